//! Connection manager and capability dispatch.
//!
//! [`ConnectionManager`] maps a service name to its [`LiveConnection`]. It is
//! backed by [`DashMap`], so registration and lookup from concurrent tasks
//! never race and a lookup for an unknown name returns immediately.
//!
//! The manager is an explicit handle rather than global state: clone it into
//! every component that needs it, and give each test its own.
//!
//! # Example
//!
//! ```rust
//! # use ntropy_providers::connections::ConnectionManager;
//! # use ntropy_providers::providers;
//! # use ntropy_vault::CredentialRecord;
//! let manager = ConnectionManager::new();
//! let conn = providers::ollama::connect(&CredentialRecord::new("Ollama")).unwrap();
//! manager.register("Ollama", conn);
//!
//! assert!(manager.get("Ollama").is_some());
//! assert!(manager.get("AWS").is_none());
//! ```

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use crate::error::{ProviderError, Result};
use crate::providers::LiveConnection;
use crate::registry::{Capability, ProviderRegistry};
use crate::types::{ChatRequest, ChatResponse, EmbeddingInput, GenerateRequest, QueryMatch, Vector};

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Shared registry of live connections, keyed by service name.
///
/// Cheaply cloneable (`Arc`-backed) and `Send + Sync`.
#[derive(Debug, Clone, Default)]
pub struct ConnectionManager {
    inner: Arc<DashMap<String, Arc<LiveConnection>>>,
}

impl ConnectionManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. An existing entry for `name` is replaced and
    /// returned.
    pub fn register(
        &self,
        name: impl Into<String>,
        connection: LiveConnection,
    ) -> Option<Arc<LiveConnection>> {
        let name = name.into();
        tracing::info!(service = %name, "connection registered");
        self.inner.insert(name, Arc::new(connection))
    }

    /// Look up a connection.
    pub fn get(&self, name: &str) -> Option<Arc<LiveConnection>> {
        self.inner.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Look up a connection, failing with [`ProviderError::NotConnected`].
    pub fn require(&self, name: &str) -> Result<Arc<LiveConnection>> {
        self.get(name).ok_or_else(|| ProviderError::NotConnected {
            service: name.to_owned(),
        })
    }

    /// Drop the connection for `name`, returning it if one was registered.
    pub fn remove(&self, name: &str) -> Option<Arc<LiveConnection>> {
        let removed = self.inner.remove(name).map(|(_, conn)| conn);
        if removed.is_some() {
            tracing::info!(service = name, "connection removed");
        }
        removed
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    /// Registered service names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Capability dispatch
// ---------------------------------------------------------------------------

/// Compute an embedding through the connection registered for `service`.
pub async fn embeddings(
    manager: &ConnectionManager,
    service: &str,
    model: &str,
    input: EmbeddingInput,
    settings: Option<&Value>,
) -> Result<Vector> {
    let conn = manager.require(service)?;
    conn.embeddings(model, input, settings).await
}

/// Compute an embedding with whichever provider serves `model` in the catalog.
pub async fn embeddings_for_model(
    registry: &ProviderRegistry,
    manager: &ConnectionManager,
    model: &str,
    input: EmbeddingInput,
    settings: Option<&Value>,
) -> Result<Vector> {
    let provider = registry
        .provider_for_model(model)
        .ok_or_else(|| ProviderError::ModelNotFound {
            model: model.to_owned(),
        })?;
    embeddings(manager, provider.service_name, model, input, settings).await
}

pub async fn chat(
    manager: &ConnectionManager,
    service: &str,
    request: &ChatRequest,
) -> Result<ChatResponse> {
    let conn = manager.require(service)?;
    conn.chat(request).await
}

pub async fn generate(
    manager: &ConnectionManager,
    service: &str,
    request: &GenerateRequest,
) -> Result<String> {
    let conn = manager.require(service)?;
    conn.generate(request).await
}

/// A text or image query against a vector store.
#[derive(Debug, Clone)]
pub struct SimilarityQuery {
    /// Embedding model used to vectorize the query.
    pub model: String,
    pub input: EmbeddingInput,
    pub settings: Option<Value>,
    pub top_k: usize,
    pub namespace: Option<String>,
}

/// Embed the query, then ask the vector store registered under `store` for
/// its nearest neighbours.
pub async fn similarity_search(
    registry: &ProviderRegistry,
    manager: &ConnectionManager,
    store: &str,
    query: SimilarityQuery,
) -> Result<Vec<QueryMatch>> {
    let store_conn = manager.require(store)?;
    let pinecone = store_conn
        .as_pinecone()
        .ok_or_else(|| ProviderError::UnsupportedCapability {
            service: store.to_owned(),
            capability: Capability::VectorStore.to_string(),
        })?;

    let vector = embeddings_for_model(
        registry,
        manager,
        &query.model,
        query.input,
        query.settings.as_ref(),
    )
    .await?;
    pinecone
        .query(&vector.vector, query.top_k, query.namespace.as_deref(), false)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers;
    use ntropy_vault::CredentialRecord;

    fn ollama() -> LiveConnection {
        providers::ollama::connect(&CredentialRecord::new("Ollama")).unwrap()
    }

    #[test]
    fn register_overwrites_and_returns_previous() {
        let manager = ConnectionManager::new();
        assert!(manager.register("Ollama", ollama()).is_none());
        let previous = manager.register("Ollama", ollama());
        assert!(previous.is_some());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn require_unknown_is_not_connected() {
        let manager = ConnectionManager::new();
        let err = manager.require("AWS").unwrap_err();
        assert!(matches!(err, ProviderError::NotConnected { service } if service == "AWS"));
    }

    #[test]
    fn clones_share_state() {
        let manager = ConnectionManager::new();
        let clone = manager.clone();
        clone.register("Ollama", ollama());
        assert!(manager.contains("Ollama"));
        assert_eq!(manager.names(), vec!["Ollama".to_owned()]);
    }

    #[test]
    fn remove_returns_previous_entry() {
        let manager = ConnectionManager::new();
        manager.register("Ollama", ollama());
        assert!(manager.remove("Ollama").is_some());
        assert!(manager.remove("Ollama").is_none());
        assert!(manager.is_empty());
    }

    #[test]
    fn concurrent_register_and_get() {
        let manager = ConnectionManager::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let m = manager.clone();
                std::thread::spawn(move || {
                    m.register(format!("svc-{}", i % 4), ollama());
                    m.get(&format!("svc-{}", (i + 1) % 4));
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(manager.len(), 4);
    }

    #[tokio::test]
    async fn dispatch_without_connection_fails_fast() {
        let manager = ConnectionManager::new();
        let err = embeddings(&manager, "AWS", "amazon.titan-embed-text-v2:0", "hi".into(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotConnected { .. }));
    }

    #[tokio::test]
    async fn unknown_model_is_not_found() {
        let registry = ProviderRegistry::builtin();
        let manager = ConnectionManager::new();
        let err = embeddings_for_model(&registry, &manager, "mystery", "hi".into(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::ModelNotFound { .. }));
    }

    #[tokio::test]
    async fn similarity_search_requires_vector_store() {
        let registry = ProviderRegistry::builtin();
        let manager = ConnectionManager::new();
        manager.register("Ollama", ollama());

        let query = SimilarityQuery {
            model: "nomic-embed-text".into(),
            input: "hi".into(),
            settings: None,
            top_k: 3,
            namespace: None,
        };
        let err = similarity_search(&registry, &manager, "Ollama", query)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnsupportedCapability { .. }));
    }
}
