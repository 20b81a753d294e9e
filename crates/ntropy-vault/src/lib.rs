//! Encrypted credential store for Ntropy.
//!
//! Provider credentials (API keys, access keys, secret keys) live in a single
//! SQLite file. Each secret field is encrypted on its own with RSA-2048
//! OAEP/SHA-256 under the store's public key; only a holder of the matching
//! private key can read them back. The private key is generated once at
//! creation time and is never written into the database.
//!
//! # Modules
//!
//! - [`cipher`]: RSA keypair generation, PEM encoding, OAEP encrypt/decrypt.
//! - [`keyfile`]: Private key sources and the on-disk key file.
//! - [`store`]: SQLite-backed credential CRUD with per-field encryption.
//! - [`error`]: Error types.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use ntropy_vault::{CredentialRecord, CredentialStore, PrivateKeySource};
//!
//! # fn example() -> ntropy_vault::Result<()> {
//! // One-time setup. Keep the private key somewhere safe.
//! let created = CredentialStore::initialize("data/vault.db", false)?;
//! println!("{}", created.private_key_pem);
//!
//! // Later: open with the key file and store a credential.
//! let store = CredentialStore::open(
//!     "data/vault.db",
//!     &PrivateKeySource::File(created.private_key_path),
//! )?;
//! store.insert_credential(&CredentialRecord::new("OpenAI").with_api_key("sk-..."))?;
//!
//! for record in store.list_credentials(None)? {
//!     println!("{}", serde_json::to_string(&record.redacted()).unwrap_or_default());
//! }
//! # Ok(())
//! # }
//! ```

pub mod cipher;
pub mod error;
pub mod keyfile;
pub mod store;

pub use cipher::{Keypair, MAX_PLAINTEXT_LEN, PrivateKey, PublicKey};
pub use error::{CipherError, RecordError, Result, StoreError};
pub use keyfile::{DEFAULT_KEY_FILE_NAME, PrivateKeySource, default_key_path};
pub use store::{
    CredentialRecord, CredentialStore, CredentialUpdate, InitializedStore, RedactedCredential,
    SecretField,
};
