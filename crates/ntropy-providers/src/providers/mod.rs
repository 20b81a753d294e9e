//! Live provider connections.
//!
//! Each provider module exposes a `DESCRIPTOR` for the registry and a
//! connection type built from a decrypted [`CredentialRecord`]. Building a
//! connection never touches the network; the HTTP client is created lazily on
//! the first capability call (or eagerly via [`LiveConnection::init`]).

pub mod anthropic;
pub mod aws;
pub mod ollama;
pub mod openai;
pub mod pinecone;
pub mod sigv4;

use ntropy_vault::{CredentialRecord, SecretField};
use serde_json::Value;

use crate::error::{ProviderError, Result};
use crate::registry::Capability;
use crate::types::{ChatRequest, ChatResponse, EmbeddingInput, GenerateRequest, Vector};

pub use anthropic::AnthropicConnection;
pub use aws::AwsConnection;
pub use ollama::OllamaConnection;
pub use openai::OpenAiConnection;
pub use pinecone::PineconeConnection;

// ---------------------------------------------------------------------------
// Connection enum
// ---------------------------------------------------------------------------

/// An initialized-on-demand connection to one external service.
#[derive(Debug)]
pub enum LiveConnection {
    Aws(AwsConnection),
    OpenAi(OpenAiConnection),
    Anthropic(AnthropicConnection),
    Ollama(OllamaConnection),
    Pinecone(PineconeConnection),
}

impl LiveConnection {
    /// Service name of the provider behind this connection.
    pub fn service_name(&self) -> &'static str {
        match self {
            Self::Aws(_) => aws::SERVICE,
            Self::OpenAi(_) => openai::SERVICE,
            Self::Anthropic(_) => anthropic::SERVICE,
            Self::Ollama(_) => ollama::SERVICE,
            Self::Pinecone(_) => pinecone::SERVICE,
        }
    }

    /// Non-secret settings the connection was built with.
    pub fn other_setting(&self) -> Option<&Value> {
        match self {
            Self::Aws(c) => c.other_setting(),
            Self::OpenAi(c) => c.other_setting(),
            Self::Anthropic(c) => c.other_setting(),
            Self::Ollama(c) => c.other_setting(),
            Self::Pinecone(c) => c.other_setting(),
        }
    }

    /// Force creation of the underlying client.
    pub fn init(&self) -> Result<()> {
        match self {
            Self::Aws(c) => c.init(),
            Self::OpenAi(c) => c.init(),
            Self::Anthropic(c) => c.init(),
            Self::Ollama(c) => c.init(),
            Self::Pinecone(c) => c.init(),
        }
    }

    /// Whether the underlying client has been created yet.
    pub fn is_initialized(&self) -> bool {
        match self {
            Self::Aws(c) => c.is_initialized(),
            Self::OpenAi(c) => c.is_initialized(),
            Self::Anthropic(c) => c.is_initialized(),
            Self::Ollama(c) => c.is_initialized(),
            Self::Pinecone(c) => c.is_initialized(),
        }
    }

    // -- Capabilities -------------------------------------------------------

    /// Compute an embedding for `input` with `model`.
    pub async fn embeddings(
        &self,
        model: &str,
        input: EmbeddingInput,
        settings: Option<&Value>,
    ) -> Result<Vector> {
        match self {
            Self::Aws(c) => c.embeddings(model, input, settings).await,
            Self::OpenAi(c) => c.embeddings(model, input, settings).await,
            Self::Ollama(c) => c.embeddings(model, input, settings).await,
            Self::Anthropic(_) | Self::Pinecone(_) => Err(self.unsupported(Capability::Embeddings)),
        }
    }

    /// Run a chat completion.
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        match self {
            Self::OpenAi(c) => c.chat(request).await,
            Self::Anthropic(c) => c.chat(request).await,
            Self::Ollama(c) => c.chat(request).await,
            Self::Aws(_) | Self::Pinecone(_) => Err(self.unsupported(Capability::Chat)),
        }
    }

    /// Run a single-shot completion.
    pub async fn generate(&self, request: &GenerateRequest) -> Result<String> {
        match self {
            Self::Ollama(c) => c.generate(request).await,
            _ => Err(self.unsupported(Capability::Generate)),
        }
    }

    // -- Downcasts ----------------------------------------------------------

    pub fn as_aws(&self) -> Option<&AwsConnection> {
        match self {
            Self::Aws(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_pinecone(&self) -> Option<&PineconeConnection> {
        match self {
            Self::Pinecone(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_ollama(&self) -> Option<&OllamaConnection> {
        match self {
            Self::Ollama(c) => Some(c),
            _ => None,
        }
    }

    fn unsupported(&self, capability: Capability) -> ProviderError {
        ProviderError::UnsupportedCapability {
            service: self.service_name().to_owned(),
            capability: capability.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared helpers for connection constructors
// ---------------------------------------------------------------------------

/// Fetch a secret that the schema marks as required.
pub(crate) fn required_secret(
    service: &str,
    record: &CredentialRecord,
    field: SecretField,
) -> Result<String> {
    field
        .get(record)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| ProviderError::SchemaMismatch {
            service: service.to_owned(),
            reason: format!("missing required field `{field}`"),
        })
}

/// Read a string setting from `other_setting`, falling back to `default`.
pub(crate) fn setting_or(record: &CredentialRecord, key: &str, default: &str) -> String {
    record
        .setting_str(key)
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
        .to_owned()
}

/// Reject an embedding input the model cannot consume.
pub(crate) fn require_text<'a>(model: &str, input: &'a EmbeddingInput) -> Result<&'a str> {
    if input.image().is_some() {
        return Err(ProviderError::InvalidInput {
            reason: format!("model {model} only accepts text input"),
        });
    }
    input
        .text_content()
        .ok_or_else(|| ProviderError::InvalidInput {
            reason: "input has no text content".into(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GenerateRequest;

    fn anthropic() -> LiveConnection {
        anthropic::connect(&CredentialRecord::new("Anthropic").with_api_key("sk-ant-test")).unwrap()
    }

    #[test]
    fn connection_reports_service_and_is_lazy() {
        let conn = anthropic();
        assert_eq!(conn.service_name(), "Anthropic");
        assert!(!conn.is_initialized());
        conn.init().unwrap();
        assert!(conn.is_initialized());
    }

    #[tokio::test]
    async fn unsupported_capability_is_typed() {
        let conn = anthropic();
        let err = conn
            .embeddings("any", EmbeddingInput::text("hi"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnsupportedCapability { .. }));

        let err = conn
            .generate(&GenerateRequest::new("claude", "hi"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("generate"));
    }

    #[test]
    fn require_text_rejects_images() {
        let input = EmbeddingInput::Document(crate::types::Document::image(1, "a.png"));
        assert!(require_text("m", &input).is_err());
        assert_eq!(require_text("m", &EmbeddingInput::text("x")).unwrap(), "x");
    }

    #[test]
    fn setting_or_falls_back() {
        let record = CredentialRecord::new("AWS")
            .with_other_setting(serde_json::json!({ "region_name": "", "x": "y" }));
        assert_eq!(setting_or(&record, "region_name", "us-east-1"), "us-east-1");
        assert_eq!(setting_or(&record, "x", "z"), "y");
    }
}
