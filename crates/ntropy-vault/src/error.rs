//! Vault error types.
//!
//! The vault surfaces two error families: [`CipherError`] for failures of the
//! asymmetric field encryption and [`StoreError`] for everything touching the
//! SQLite file or the private key material. Cipher errors propagate through
//! the store unchanged via [`StoreError::Cipher`].

use std::path::PathBuf;

/// Errors raised by the RSA-OAEP field cipher.
#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    /// The private key does not correspond to the public key that produced
    /// the ciphertext.
    #[error("decryption failed: wrong private key for this ciphertext")]
    WrongKey,

    /// The plaintext does not fit in a single OAEP block.
    #[error("plaintext is {len} bytes, at most {max} bytes can be encrypted")]
    PlaintextTooLong { len: usize, max: usize },

    /// The ciphertext is truncated, padded, or otherwise malformed.
    #[error("ciphertext corrupted: {reason}")]
    Corrupted { reason: String },

    /// Keypair generation failed (CSPRNG or prime search failure).
    #[error("key generation failed: {reason}")]
    KeyGeneration { reason: String },

    /// A key could not be encoded to or decoded from its textual form.
    #[error("key encoding error: {reason}")]
    Encoding { reason: String },
}

/// Errors raised by the credential store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    // -- Lifecycle errors ---------------------------------------------------
    /// A store already exists at the target path and overwrite was not
    /// confirmed.
    #[error("credential store already exists: {}", path.display())]
    AlreadyExists { path: PathBuf },

    /// No store exists at the given path.
    #[error("credential store not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// The supplied private key could not be parsed or does not belong to
    /// this store.
    #[error("invalid private key: {reason}")]
    InvalidKey { reason: String },

    /// The `auth` table holds no public key (store was never initialized).
    #[error("public key record missing from credential store")]
    MissingPublicKey,

    /// Schema creation failed.
    #[error("migration failed: {reason}")]
    Migration { reason: String },

    // -- Underlying errors --------------------------------------------------
    /// Field encryption or decryption failed.
    #[error("cipher error: {0}")]
    Cipher(#[from] CipherError),

    /// SQLite error from `rusqlite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// `other_setting` JSON could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem failure (store file, key file, parent directories).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single stored credential that could not be decrypted or decoded.
///
/// Produced by bulk loads that tolerate per-record failures, so one damaged
/// row does not hide every other credential.
#[derive(Debug, thiserror::Error)]
#[error("credential {id} ({service_name}): {source}")]
pub struct RecordError {
    pub id: String,
    pub service_name: String,
    pub source: StoreError,
}

/// Convenience alias used throughout the vault crate.
pub type Result<T> = std::result::Result<T, StoreError>;
