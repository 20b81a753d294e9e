//! Error types for the vault controller.
//!
//! Store and cipher errors pass through unchanged so callers can tell a
//! missing file from a wrong key.

use ntropy_providers::ProviderError;
use ntropy_vault::{CipherError, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// A credential operation was attempted before `connect`.
    #[error("vault is not connected, call connect first")]
    NotConnected,

    #[error("no provider registered for service {service}")]
    ProviderNotFound { service: String },

    /// A credential does not carry the secrets its provider needs.
    #[error("credential for {service} does not match its provider schema: {reason}")]
    SchemaMismatch { service: String, reason: String },

    #[error("no credential stored for service {service}")]
    CredentialNotFound { service: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("cipher error: {0}")]
    Cipher(#[from] CipherError),

    #[error("provider error: {0}")]
    Provider(ProviderError),

    #[error("invalid configuration: {reason}")]
    Config { reason: String },
}

impl From<ProviderError> for VaultError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::SchemaMismatch { service, reason } => {
                Self::SchemaMismatch { service, reason }
            }
            other => Self::Provider(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_mismatch_is_lifted_from_provider_error() {
        let err: VaultError = ProviderError::SchemaMismatch {
            service: "AWS".into(),
            reason: "missing access_key".into(),
        }
        .into();
        assert!(matches!(err, VaultError::SchemaMismatch { ref service, .. } if service == "AWS"));
    }

    #[test]
    fn other_provider_errors_are_wrapped() {
        let err: VaultError = ProviderError::ModelNotFound { model: "m".into() }.into();
        assert!(matches!(err, VaultError::Provider(ProviderError::ModelNotFound { .. })));
    }

    #[test]
    fn display_messages() {
        assert_eq!(
            VaultError::NotConnected.to_string(),
            "vault is not connected, call connect first"
        );
        let err = VaultError::CredentialNotFound {
            service: "OpenAI".into(),
        };
        assert_eq!(err.to_string(), "no credential stored for service OpenAI");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VaultError>();
    }
}
