//! Vault controller for Ntropy.
//!
//! Ties the encrypted credential store from [`ntropy_vault`] to the provider
//! registry and connection manager from [`ntropy_providers`]:
//!
//! ```text
//! VaultController
//! ├── CredentialStore     (SQLite, RSA-OAEP secret fields)
//! ├── ProviderRegistry    (descriptor per service)
//! └── ConnectionManager   (live connection per service, shared)
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use ntropy_auth::{VaultConfig, VaultController};
//! use ntropy_providers::{ConnectionManager, ProviderRegistry};
//! use ntropy_vault::{CredentialRecord, PrivateKeySource};
//!
//! # fn example() -> ntropy_auth::Result<()> {
//! let connections = ConnectionManager::new();
//! let vault = VaultController::new(
//!     VaultConfig::load(None)?,
//!     Arc::new(ProviderRegistry::builtin()),
//!     connections.clone(),
//! );
//!
//! let created = vault.create(false)?;
//! vault.connect(PrivateKeySource::File(created.private_key_path), None)?;
//! vault.add_provider(CredentialRecord::new("OpenAI").with_api_key("sk-..."))?;
//!
//! assert!(connections.get("OpenAI").is_some());
//! println!("{}", vault.list_providers()?);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod controller;
pub mod error;

pub use config::VaultConfig;
pub use controller::{ConnectReport, CreatedVault, SkippedProvider, VaultController, VaultState, key_source};
pub use error::{Result, VaultError};
