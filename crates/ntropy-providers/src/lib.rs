//! Model and vector-store providers for Ntropy.
//!
//! This crate turns decrypted credentials from `ntropy-vault` into live
//! connections to external services and routes embedding, chat, generation
//! and vector-store calls to them.
//!
//! # Modules
//!
//! - [`registry`]: Static provider descriptors and the embedding model catalog.
//! - [`connections`]: Shared connection manager and capability dispatch.
//! - [`providers`]: AWS Bedrock, OpenAI, Anthropic, Ollama, Pinecone.
//! - [`types`]: Documents, chunks, vectors, chat messages.
//! - [`error`]: Error types.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use ntropy_providers::{ConnectionManager, ProviderRegistry, connections};
//! use ntropy_providers::types::TextChunk;
//! use ntropy_vault::CredentialRecord;
//!
//! # async fn example() -> ntropy_providers::Result<()> {
//! let registry = ProviderRegistry::builtin();
//! let manager = ConnectionManager::new();
//!
//! let record = CredentialRecord::new("Ollama");
//! let conn = registry.lookup("Ollama").unwrap().build_connection(&record)?;
//! manager.register("Ollama", conn);
//!
//! let chunk = TextChunk::new("doc-1", 0, "Rust is a systems language.");
//! let vector =
//!     connections::embeddings_for_model(&registry, &manager, "nomic-embed-text", chunk.into(), None)
//!         .await?;
//! println!("{} dimensions", vector.size);
//! # Ok(())
//! # }
//! ```

pub mod connections;
pub mod error;
mod http;
pub mod providers;
pub mod registry;
pub mod types;

pub use connections::{ConnectionManager, SimilarityQuery};
pub use error::{ProviderError, Result};
pub use providers::LiveConnection;
pub use registry::{AuthSchema, Capability, EmbeddingModel, ProviderDescriptor, ProviderRegistry};
