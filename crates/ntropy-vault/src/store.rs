//! SQLite-backed credential store with per-field RSA-OAEP encryption.
//!
//! [`CredentialStore`] wraps a `rusqlite::Connection` together with the
//! vault keypair. Secret fields are encrypted with the public key right
//! before they are written and decrypted with the private key right after
//! they are read; plaintext secrets never touch the database file.
//!
//! # Schema
//!
//! - `auth`: exactly one row holding the SPKI PEM public key. A
//!   `CHECK (id = 1)` constraint makes a second key row impossible.
//! - `providers`: one row per credential. `service_name` names the provider
//!   that owns the row and is *not* unique. `api_key`, `secret_access_key` and
//!   `access_key` are OAEP ciphertext blobs (or NULL); `other_setting` is
//!   plaintext JSON.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::cipher::{Keypair, PrivateKey, PublicKey};
use crate::error::{RecordError, Result, StoreError};
use crate::keyfile::{self, PrivateKeySource};

/// Mask appended to the visible prefix of redacted secrets.
const MASK: &str = "******";

/// Suffix of the database built during [`CredentialStore::initialize`].
const STAGING_SUFFIX: &str = ".init";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The encrypted fields a credential may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretField {
    ApiKey,
    SecretAccessKey,
    AccessKey,
}

impl SecretField {
    pub const ALL: [SecretField; 3] = [Self::ApiKey, Self::SecretAccessKey, Self::AccessKey];

    /// Field (and column) name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApiKey => "api_key",
            Self::SecretAccessKey => "secret_access_key",
            Self::AccessKey => "access_key",
        }
    }

    /// Read this field from a decrypted record.
    pub fn get<'a>(&self, record: &'a CredentialRecord) -> Option<&'a str> {
        match self {
            Self::ApiKey => record.api_key.as_deref(),
            Self::SecretAccessKey => record.secret_access_key.as_deref(),
            Self::AccessKey => record.access_key.as_deref(),
        }
    }
}

impl std::fmt::Display for SecretField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One provider credential, with secrets in plaintext.
///
/// This is the in-memory view. The store only ever persists the secret
/// fields as ciphertext.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Row identifier. Generated (UUIDv7) on insert when absent.
    #[serde(default)]
    pub id: Option<String>,
    /// Which provider owns this credential (e.g. `"AWS"`, `"OpenAI"`).
    pub service_name: String,
    /// Optional human label.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
    /// Non-secret provider settings (region, base URL, index name, ...).
    #[serde(default)]
    pub other_setting: Option<serde_json::Value>,
}

impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redacted = self.redacted();
        f.debug_struct("CredentialRecord")
            .field("id", &self.id)
            .field("service_name", &self.service_name)
            .field("name", &self.name)
            .field("api_key", &redacted.api_key)
            .field("secret_access_key", &redacted.secret_access_key)
            .field("access_key", &redacted.access_key)
            .field("other_setting", &self.other_setting)
            .finish()
    }
}

impl CredentialRecord {
    /// Start a record for the given provider.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_access_key(mut self, key: impl Into<String>) -> Self {
        self.access_key = Some(key.into());
        self
    }

    pub fn with_secret_access_key(mut self, key: impl Into<String>) -> Self {
        self.secret_access_key = Some(key.into());
        self
    }

    pub fn with_other_setting(mut self, setting: serde_json::Value) -> Self {
        self.other_setting = Some(setting);
        self
    }

    /// Look up a key inside `other_setting`.
    pub fn setting(&self, key: &str) -> Option<&serde_json::Value> {
        self.other_setting.as_ref().and_then(|s| s.get(key))
    }

    /// Convenience for string-valued settings.
    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.setting(key).and_then(|v| v.as_str())
    }

    /// Produce the masked view shown to operators.
    pub fn redacted(&self) -> RedactedCredential {
        RedactedCredential {
            id: self.id.clone(),
            service_name: self.service_name.clone(),
            name: self.name.clone(),
            api_key: self.api_key.as_deref().map(|k| mask(k, 2, 0)),
            secret_access_key: self.secret_access_key.as_ref().map(|_| MASK.to_owned()),
            access_key: self.access_key.as_deref().map(|k| mask(k, 2, 2)),
            other_setting: self.other_setting.clone(),
        }
    }
}

/// Masked credential view: secrets are either `None` or visibly masked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedactedCredential {
    pub id: Option<String>,
    pub service_name: String,
    pub name: Option<String>,
    pub api_key: Option<String>,
    pub secret_access_key: Option<String>,
    pub access_key: Option<String>,
    pub other_setting: Option<serde_json::Value>,
}

/// Keep `head` leading and `tail` trailing characters and mask the rest.
/// Short values are masked entirely so nothing meaningful leaks.
fn mask(value: &str, head: usize, tail: usize) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= (head + tail).max(4) {
        return MASK.to_owned();
    }
    let prefix: String = chars[..head].iter().collect();
    let suffix: String = chars[chars.len() - tail..].iter().collect();
    format!("{prefix}{MASK}{suffix}")
}

/// A partial update. `None` fields keep their stored value.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialUpdate {
    /// Rows to update are selected by service name...
    pub service_name: String,
    /// ...optionally narrowed to one row.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub other_setting: Option<serde_json::Value>,
}

impl std::fmt::Debug for CredentialUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let set = |v: &Option<String>| v.as_ref().map(|_| MASK);
        f.debug_struct("CredentialUpdate")
            .field("service_name", &self.service_name)
            .field("id", &self.id)
            .field("name", &self.name)
            .field("api_key", &set(&self.api_key))
            .field("secret_access_key", &set(&self.secret_access_key))
            .field("access_key", &set(&self.access_key))
            .field("other_setting", &self.other_setting)
            .finish()
    }
}

impl CredentialUpdate {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Self::default()
        }
    }

    /// Whether [`CredentialStore::update_credential`] would touch `record`.
    pub fn targets(&self, record: &CredentialRecord) -> bool {
        record.service_name == self.service_name
            && self.id.as_ref().is_none_or(|id| record.id.as_ref() == Some(id))
    }

    /// Apply this update to a decrypted record in memory, with the same
    /// coalescing rules the store uses. Empty secrets keep the stored value.
    pub fn apply_to(&self, record: &mut CredentialRecord) {
        fn secret(update: &Option<String>, stored: &mut Option<String>) {
            if let Some(value) = update.as_ref().filter(|v| !v.is_empty()) {
                *stored = Some(value.clone());
            }
        }

        if let Some(name) = &self.name {
            record.name = Some(name.clone());
        }
        secret(&self.api_key, &mut record.api_key);
        secret(&self.secret_access_key, &mut record.secret_access_key);
        secret(&self.access_key, &mut record.access_key);
        if let Some(setting) = &self.other_setting {
            record.other_setting = Some(setting.clone());
        }
    }
}

/// Result of [`CredentialStore::initialize`].
///
/// `private_key_pem` is the only copy of the private key besides the file at
/// `private_key_path`. Show it to the operator once; if both are lost, every
/// stored secret is unrecoverable.
pub struct InitializedStore {
    pub store: CredentialStore,
    pub private_key_pem: String,
    pub private_key_path: PathBuf,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Encrypted credential store backed by a single SQLite file.
///
/// The store is single-writer: one instance owns the file at a time and
/// callers serialize mutations.
pub struct CredentialStore {
    conn: Connection,
    path: PathBuf,
    public_key: PublicKey,
    private_key: PrivateKey,
}

impl CredentialStore {
    /// Create a new store at `path` with a fresh keypair. The private key is
    /// written next to the store (see [`keyfile::default_key_path`]).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] if a store exists at `path` and
    /// `overwrite` is false.
    pub fn initialize(path: impl AsRef<Path>, overwrite: bool) -> Result<InitializedStore> {
        let path = path.as_ref();
        Self::initialize_with_key_path(path, &keyfile::default_key_path(path), overwrite)
    }

    /// Like [`initialize`](Self::initialize) with an explicit key file path.
    ///
    /// The new database is built at a staging path next to `path` and only
    /// moved into place once the private key file is on disk. A failure
    /// before that point leaves any existing store and key untouched.
    pub fn initialize_with_key_path(
        path: impl AsRef<Path>,
        key_path: &Path,
        overwrite: bool,
    ) -> Result<InitializedStore> {
        let path = path.as_ref();

        if path.exists() && !overwrite {
            return Err(StoreError::AlreadyExists {
                path: path.to_path_buf(),
            });
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "creating credential store");

        let keys = Keypair::generate()?;
        let public_pem = keys.public.to_pem()?;
        let private_pem = keys.private.to_pem()?;

        let staging = keyfile::with_suffix(path, STAGING_SUFFIX);
        let staged = build_database(&staging, &public_pem)
            .and_then(|()| keyfile::write_private_key(key_path, &private_pem));
        if let Err(err) = staged {
            discard_database_files(&staging);
            return Err(err);
        }

        if path.exists() {
            tracing::warn!(path = %path.display(), "overwriting existing credential store");
            remove_database_files(path)?;
        }
        std::fs::rename(&staging, path)?;

        let conn = Connection::open(path)?;
        configure_connection(&conn)?;

        tracing::info!("credential store ready");

        Ok(InitializedStore {
            store: Self {
                conn,
                path: path.to_path_buf(),
                public_key: keys.public,
                private_key: keys.private,
            },
            private_key_pem: private_pem,
            private_key_path: key_path.to_path_buf(),
        })
    }

    /// Open an existing store with the operator's private key.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if no file exists at `path`.
    /// - [`StoreError::InvalidKey`] if the key cannot be parsed or does not
    ///   match the store's public key.
    /// - [`StoreError::MissingPublicKey`] if the file has no key record.
    pub fn open(path: impl AsRef<Path>, key: &PrivateKeySource) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(StoreError::NotFound {
                path: path.to_path_buf(),
            });
        }

        tracing::info!(path = %path.display(), "opening credential store");

        let private_key = key.load()?;

        let conn = Connection::open(path)?;
        configure_connection(&conn)?;
        run_migrations(&conn)?;

        let public_pem: Option<String> = conn
            .query_row("SELECT public_key FROM auth WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        let public_pem = public_pem.ok_or(StoreError::MissingPublicKey)?;
        let public_key = PublicKey::from_pem(&public_pem)?;

        if !private_key.matches(&public_key) {
            return Err(StoreError::InvalidKey {
                reason: "private key does not belong to this credential store".into(),
            });
        }

        Ok(Self {
            conn,
            path: path.to_path_buf(),
            public_key,
            private_key,
        })
    }

    /// Path of the underlying database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The store's public key.
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    // -- Credential CRUD ----------------------------------------------------

    /// Insert a new credential row and return its id.
    pub fn insert_credential(&self, record: &CredentialRecord) -> Result<String> {
        let id = record
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());
        let sealed = self.seal_record(record)?;
        let now = Utc::now().timestamp();

        self.conn.execute(
            "INSERT INTO providers
                 (id, service_name, name, api_key, secret_access_key, access_key, other_setting, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id,
                record.service_name,
                record.name,
                sealed.api_key,
                sealed.secret_access_key,
                sealed.access_key,
                sealed.other_setting,
                now,
                now,
            ],
        )?;

        tracing::info!(service = %record.service_name, id = %id, "stored credential");
        Ok(id)
    }

    /// Insert `record`, or replace every field of the row with the same id.
    pub fn upsert_credential(&self, record: &CredentialRecord) -> Result<String> {
        let Some(id) = record.id.as_deref() else {
            return self.insert_credential(record);
        };

        let sealed = self.seal_record(record)?;
        let now = Utc::now().timestamp();

        self.conn.execute(
            "INSERT INTO providers
                 (id, service_name, name, api_key, secret_access_key, access_key, other_setting, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
             ON CONFLICT(id) DO UPDATE SET
                 service_name = excluded.service_name,
                 name = excluded.name,
                 api_key = excluded.api_key,
                 secret_access_key = excluded.secret_access_key,
                 access_key = excluded.access_key,
                 other_setting = excluded.other_setting,
                 updated_at = excluded.updated_at",
            params![
                id,
                record.service_name,
                record.name,
                sealed.api_key,
                sealed.secret_access_key,
                sealed.access_key,
                sealed.other_setting,
                now,
            ],
        )?;

        tracing::info!(service = %record.service_name, id = %id, "upserted credential");
        Ok(id.to_owned())
    }

    /// Null-coalescing partial update. Returns the number of rows touched.
    ///
    /// Every row with `update.service_name` is updated unless `update.id`
    /// narrows the match to one row. Fields left `None` keep their stored
    /// value (and, for secrets, their stored ciphertext).
    pub fn update_credential(&self, update: &CredentialUpdate) -> Result<usize> {
        let api_key = self.seal(update.api_key.as_deref())?;
        let secret_access_key = self.seal(update.secret_access_key.as_deref())?;
        let access_key = self.seal(update.access_key.as_deref())?;
        let other_setting = update
            .other_setting
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let rows = self.conn.execute(
            "UPDATE providers SET
                 name = COALESCE(?1, name),
                 api_key = COALESCE(?2, api_key),
                 secret_access_key = COALESCE(?3, secret_access_key),
                 access_key = COALESCE(?4, access_key),
                 other_setting = COALESCE(?5, other_setting),
                 updated_at = ?6
             WHERE service_name = ?7 AND (?8 IS NULL OR id = ?8)",
            params![
                update.name,
                api_key,
                secret_access_key,
                access_key,
                other_setting,
                Utc::now().timestamp(),
                update.service_name,
                update.id,
            ],
        )?;

        tracing::info!(service = %update.service_name, rows, "updated credentials");
        Ok(rows)
    }

    /// Decrypt and return all credentials, optionally only those for one
    /// service. Fails on the first row that cannot be decrypted.
    pub fn list_credentials(&self, service_name: Option<&str>) -> Result<Vec<CredentialRecord>> {
        let rows = self.select_rows(service_name)?;
        let records = rows
            .into_iter()
            .map(|row| self.open_row(row))
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(count = records.len(), "listed credentials");
        Ok(records)
    }

    /// Decrypt every credential, reporting failures per row instead of
    /// aborting the whole load.
    pub fn load_credentials(&self) -> Result<Vec<std::result::Result<CredentialRecord, RecordError>>> {
        let rows = self.select_rows(None)?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let id = row.id.clone();
                let service_name = row.service_name.clone();
                self.open_row(row).map_err(|source| RecordError {
                    id,
                    service_name,
                    source,
                })
            })
            .collect())
    }

    /// Service name of the credential with `id`, without decrypting anything.
    pub fn service_name_for_id(&self, id: &str) -> Result<Option<String>> {
        let service = self
            .conn
            .query_row(
                "SELECT service_name FROM providers WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(service)
    }

    /// Delete every credential for `service_name`. Deleting a service with no
    /// credentials is a no-op that returns 0.
    pub fn delete_credential(&self, service_name: &str) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM providers WHERE service_name = ?1",
            params![service_name],
        )?;

        if rows == 0 {
            tracing::debug!(service = service_name, "no credentials to delete");
        } else {
            tracing::info!(service = service_name, rows, "deleted credentials");
        }
        Ok(rows)
    }

    /// Delete a single credential by id. Returns whether a row was removed.
    pub fn delete_credential_by_id(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM providers WHERE id = ?1", params![id])?;
        if rows > 0 {
            tracing::info!(id = id, "deleted credential");
        }
        Ok(rows > 0)
    }

    // -- Internal helpers ---------------------------------------------------

    fn select_rows(&self, service_name: Option<&str>) -> Result<Vec<ProviderRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, service_name, name, api_key, secret_access_key, access_key, other_setting
             FROM providers
             WHERE ?1 IS NULL OR service_name = ?1
             ORDER BY rowid",
        )?;

        let rows = stmt.query_map(params![service_name], |row| {
            Ok(ProviderRow {
                id: row.get(0)?,
                service_name: row.get(1)?,
                name: row.get(2)?,
                api_key: row.get(3)?,
                secret_access_key: row.get(4)?,
                access_key: row.get(5)?,
                other_setting: row.get(6)?,
            })
        })?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::from)
    }

    /// Encrypt a secret. Empty strings are treated as absent.
    fn seal(&self, value: Option<&str>) -> Result<Option<Vec<u8>>> {
        value
            .filter(|v| !v.is_empty())
            .map(|v| self.public_key.encrypt(v))
            .transpose()
            .map_err(StoreError::from)
    }

    fn unseal(&self, value: Option<Vec<u8>>) -> Result<Option<String>> {
        value
            .map(|ciphertext| self.private_key.decrypt(&ciphertext))
            .transpose()
            .map_err(StoreError::from)
    }

    fn seal_record(&self, record: &CredentialRecord) -> Result<SealedFields> {
        Ok(SealedFields {
            api_key: self.seal(record.api_key.as_deref())?,
            secret_access_key: self.seal(record.secret_access_key.as_deref())?,
            access_key: self.seal(record.access_key.as_deref())?,
            other_setting: record
                .other_setting
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        })
    }

    fn open_row(&self, row: ProviderRow) -> Result<CredentialRecord> {
        Ok(CredentialRecord {
            api_key: self.unseal(row.api_key)?,
            secret_access_key: self.unseal(row.secret_access_key)?,
            access_key: self.unseal(row.access_key)?,
            other_setting: row
                .other_setting
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            id: Some(row.id),
            service_name: row.service_name,
            name: row.name,
        })
    }
}

/// Configure SQLite pragmas for durability and concurrency.
fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA temp_store = MEMORY;",
    )?;
    Ok(())
}

fn run_migrations(conn: &Connection) -> Result<()> {
    tracing::debug!("running credential store migrations");

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS auth (
            id         INTEGER PRIMARY KEY CHECK (id = 1),
            public_key TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS providers (
            id                TEXT PRIMARY KEY,
            service_name      TEXT NOT NULL,
            name              TEXT,
            api_key           BLOB,
            secret_access_key BLOB,
            access_key        BLOB,
            other_setting     TEXT,
            created_at        INTEGER NOT NULL,
            updated_at        INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_providers_service ON providers(service_name);",
    )
    .map_err(|e| StoreError::Migration {
        reason: e.to_string(),
    })
}

/// Remove a database file together with its WAL side files.
/// Create the schema and key record at `path`, then close the connection so
/// the file can be renamed.
fn build_database(path: &Path, public_pem: &str) -> Result<()> {
    // Leftovers from an interrupted create.
    remove_database_files(path)?;

    let conn = Connection::open(path)?;
    configure_connection(&conn)?;
    run_migrations(&conn)?;
    conn.execute(
        "INSERT INTO auth (id, public_key, created_at) VALUES (1, ?1, ?2)",
        params![public_pem, Utc::now().timestamp()],
    )?;
    conn.close().map_err(|(_, e)| e)?;
    Ok(())
}

/// Remove a database file and its WAL sidecars. Missing files are ignored.
fn remove_database_files(path: &Path) -> Result<()> {
    for file in [
        path.to_path_buf(),
        keyfile::with_suffix(path, "-wal"),
        keyfile::with_suffix(path, "-shm"),
    ] {
        match std::fs::remove_file(&file) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn discard_database_files(path: &Path) {
    if let Err(err) = remove_database_files(path) {
        tracing::warn!(path = %path.display(), error = %err, "failed to clean up staged store");
    }
}

// ---------------------------------------------------------------------------
// Internal row types (avoid leaking rusqlite details)
// ---------------------------------------------------------------------------

struct ProviderRow {
    id: String,
    service_name: String,
    name: Option<String>,
    api_key: Option<Vec<u8>>,
    secret_access_key: Option<Vec<u8>>,
    access_key: Option<Vec<u8>>,
    other_setting: Option<String>,
}

struct SealedFields {
    api_key: Option<Vec<u8>>,
    secret_access_key: Option<Vec<u8>>,
    access_key: Option<Vec<u8>>,
    other_setting: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
