//! Provider registry and model catalog.
//!
//! The registry maps a service name (`"AWS"`, `"OpenAI"`, ...) to a static
//! [`ProviderDescriptor`]: the credential shape the provider expects, the
//! constructor that turns a decrypted credential into a [`LiveConnection`], and
//! the capabilities and embedding models it offers.
//!
//! Descriptors are plain data defined in each provider module. The registry is
//! built once at startup and then shared read-only behind an `Arc`.
//!
//! # Example
//!
//! ```rust
//! # use ntropy_providers::registry::{Capability, ProviderRegistry};
//! let registry = ProviderRegistry::builtin();
//! let aws = registry.lookup("AWS").unwrap();
//! assert!(aws.supports(Capability::Embeddings));
//! assert_eq!(
//!     registry.provider_for_model("amazon.titan-embed-text-v2:0").unwrap().service_name,
//!     "AWS"
//! );
//! ```

use std::collections::BTreeMap;

use ntropy_vault::{CredentialRecord, SecretField};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ProviderError, Result};
use crate::providers::{self, LiveConnection};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Something a provider connection can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Embeddings,
    Chat,
    Generate,
    VectorStore,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Embeddings => "embeddings",
            Self::Chat => "chat",
            Self::Generate => "generate",
            Self::VectorStore => "vector_store",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which secret fields a provider's credential must (or may) carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthSchema {
    pub required: &'static [SecretField],
    pub optional: &'static [SecretField],
}

impl AuthSchema {
    /// A provider that needs no secrets at all.
    pub const NONE: AuthSchema = AuthSchema {
        required: &[],
        optional: &[],
    };

    /// Whether `field` belongs to this schema.
    pub fn accepts(&self, field: SecretField) -> bool {
        self.required.contains(&field) || self.optional.contains(&field)
    }

    /// Check that `record` has the shape this provider requires.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::SchemaMismatch`] if a required secret is
    /// missing or empty, a secret the provider does not use is set, or
    /// `other_setting` is not a JSON object.
    pub fn validate(&self, service: &str, record: &CredentialRecord) -> Result<()> {
        let mismatch = |reason: String| ProviderError::SchemaMismatch {
            service: service.to_owned(),
            reason,
        };

        for field in self.required {
            if field.get(record).is_none_or(str::is_empty) {
                return Err(mismatch(format!("missing required field `{field}`")));
            }
        }

        for field in SecretField::ALL {
            if field.get(record).is_some_and(|v| !v.is_empty()) && !self.accepts(field) {
                return Err(mismatch(format!("field `{field}` is not used by {service}")));
            }
        }

        match &record.other_setting {
            None | Some(Value::Object(_)) | Some(Value::Null) => Ok(()),
            Some(other) => Err(mismatch(format!(
                "`other_setting` must be a JSON object, got {other}"
            ))),
        }
    }
}

/// Catalog entry for an embedding model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddingModel {
    pub name: &'static str,
    pub service: &'static str,
    pub description: &'static str,
    /// Default request settings as a JSON object literal.
    pub defaults: &'static str,
    /// `(setting, accepted values)` pairs shown to operators.
    pub settings_help: &'static [(&'static str, &'static str)],
    pub accepts_images: bool,
}

impl EmbeddingModel {
    /// The model's default settings as JSON.
    pub fn default_settings(&self) -> Value {
        serde_json::from_str(self.defaults).unwrap_or(Value::Null)
    }
}

/// Builds a connection from a validated credential. Must not perform I/O.
pub type ConnectFn = fn(&CredentialRecord) -> Result<LiveConnection>;

/// Static metadata binding a service name to its schema, constructor and
/// capabilities.
#[derive(Clone, Copy)]
pub struct ProviderDescriptor {
    pub service_name: &'static str,
    pub description: &'static str,
    pub auth_schema: AuthSchema,
    pub connect: ConnectFn,
    pub capabilities: &'static [Capability],
    pub embedding_models: &'static [EmbeddingModel],
}

impl std::fmt::Debug for ProviderDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderDescriptor")
            .field("service_name", &self.service_name)
            .field("capabilities", &self.capabilities)
            .field(
                "embedding_models",
                &self.embedding_models.iter().map(|m| m.name).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl ProviderDescriptor {
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn validate(&self, record: &CredentialRecord) -> Result<()> {
        self.auth_schema.validate(self.service_name, record)
    }

    /// Validate `record` and construct a connection from it.
    pub fn build_connection(&self, record: &CredentialRecord) -> Result<LiveConnection> {
        self.validate(record)?;
        (self.connect)(record)
    }

    pub fn embedding_model(&self, name: &str) -> Option<&'static EmbeddingModel> {
        self.embedding_models.iter().find(|m| m.name == name)
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Table of known providers, keyed by service name.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    providers: BTreeMap<&'static str, ProviderDescriptor>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ProviderRegistry {
    /// A registry with no providers. Use [`register`](Self::register) to
    /// compose a custom set at startup.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            providers: BTreeMap::new(),
        }
    }

    /// A registry holding every provider compiled into this crate.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(providers::aws::DESCRIPTOR);
        registry.register(providers::openai::DESCRIPTOR);
        registry.register(providers::anthropic::DESCRIPTOR);
        registry.register(providers::ollama::DESCRIPTOR);
        registry.register(providers::pinecone::DESCRIPTOR);
        registry
    }

    /// Add a provider. A descriptor with the same service name is replaced
    /// and returned.
    pub fn register(&mut self, descriptor: ProviderDescriptor) -> Option<ProviderDescriptor> {
        tracing::debug!(service = descriptor.service_name, "provider registered");
        self.providers.insert(descriptor.service_name, descriptor)
    }

    pub fn lookup(&self, service_name: &str) -> Option<&ProviderDescriptor> {
        self.providers.get(service_name)
    }

    pub fn contains(&self, service_name: &str) -> bool {
        self.providers.contains_key(service_name)
    }

    /// Registered service names in sorted order.
    pub fn names(&self) -> Vec<&'static str> {
        self.providers.keys().copied().collect()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ProviderDescriptor> {
        self.providers.values()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    // -- Model catalog ------------------------------------------------------

    /// Embedding models grouped by service. Services without embedding
    /// models are omitted.
    pub fn list_models(&self) -> BTreeMap<String, Vec<String>> {
        self.providers
            .values()
            .filter(|d| !d.embedding_models.is_empty())
            .map(|d| {
                let models = d.embedding_models.iter().map(|m| m.name.to_owned()).collect();
                (d.service_name.to_owned(), models)
            })
            .collect()
    }

    /// Catalog entry (including default settings) for an embedding model.
    pub fn model_settings(&self, model: &str) -> Option<&'static EmbeddingModel> {
        self.providers
            .values()
            .find_map(|d| d.embedding_model(model))
    }

    /// The provider that serves an embedding model.
    pub fn provider_for_model(&self, model: &str) -> Option<&ProviderDescriptor> {
        self.providers
            .values()
            .find(|d| d.embedding_model(model).is_some())
    }
}
