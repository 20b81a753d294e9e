//! Provider error types.
//!
//! Every capability call (embeddings, chat, generation, vector store) surfaces
//! failures through [`ProviderError`]. Variants carry the service name where it
//! helps the caller decide whether to retry, reconfigure, or reconnect.

/// Unified error type for provider connections and capability dispatch.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    // -- Registry / connection errors ---------------------------------------
    /// No live connection is registered under this service name.
    #[error("{service} connection not found, connect the vault first")]
    NotConnected { service: String },

    /// A credential record does not have the shape the provider requires.
    #[error("credential for {service} does not match its schema: {reason}")]
    SchemaMismatch { service: String, reason: String },

    /// The provider exists but does not offer the requested capability.
    #[error("{service} does not support {capability}")]
    UnsupportedCapability { service: String, capability: String },

    /// No provider in the catalog serves this model.
    #[error("model not found: {model}")]
    ModelNotFound { model: String },

    // -- Request errors -----------------------------------------------------
    /// The caller supplied input the provider cannot accept.
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    /// The HTTP request failed or the API returned a non-success status.
    #[error("{service} request failed: {reason}")]
    RequestFailed { service: String, reason: String },

    /// The API response could not be parsed into the expected format.
    #[error("{service} response parse error: {reason}")]
    ResponseParse { service: String, reason: String },

    // -- Configuration errors -----------------------------------------------
    /// A connection setting is malformed (bad URL, unknown region, ...).
    #[error("config error: {reason}")]
    Config { reason: String },
}

/// Convenience alias used throughout the providers crate.
pub type Result<T> = std::result::Result<T, ProviderError>;
