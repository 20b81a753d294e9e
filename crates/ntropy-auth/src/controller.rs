//! The vault controller.
//!
//! [`VaultController`] moves through three states:
//!
//! ```text
//! Uninitialized ──create()──▶ Open ──connect()──▶ Connected
//! ```
//!
//! `connect` opens the credential store, decrypts every record and registers
//! a live connection for each one in the shared [`ConnectionManager`]. A
//! record that cannot be turned into a connection is logged and skipped; the
//! rest of the vault still comes up.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ntropy_providers::{ConnectionManager, ProviderRegistry};
use ntropy_vault::{
    CredentialRecord, CredentialStore, CredentialUpdate, PrivateKeySource, RedactedCredential,
    StoreError,
};
use serde::Serialize;

use crate::config::VaultConfig;
use crate::error::{Result, VaultError};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultState {
    /// No store file exists yet.
    Uninitialized,
    /// A store exists but has not been unlocked.
    Open,
    /// The store is unlocked and connections are registered.
    Connected,
}

/// Output of [`VaultController::create`].
///
/// `private_key_pem` is shown to the operator once. Losing both it and the
/// key file makes every stored secret unrecoverable.
pub struct CreatedVault {
    pub store_path: PathBuf,
    pub private_key_path: PathBuf,
    pub private_key_pem: String,
}

impl std::fmt::Debug for CreatedVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreatedVault")
            .field("store_path", &self.store_path)
            .field("private_key_path", &self.private_key_path)
            .finish_non_exhaustive()
    }
}

/// A credential that did not produce a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedProvider {
    pub service_name: String,
    pub id: Option<String>,
    pub reason: String,
}

/// Outcome of a bulk (re)connect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectReport {
    /// Service names registered, in processing order.
    pub registered: Vec<String>,
    pub skipped: Vec<SkippedProvider>,
}

impl ConnectReport {
    fn skip(&mut self, service_name: &str, id: Option<&str>, reason: String) {
        tracing::warn!(
            service = service_name,
            id = id.unwrap_or_default(),
            reason = %reason,
            "skipping credential"
        );
        self.skipped.push(SkippedProvider {
            service_name: service_name.to_owned(),
            id: id.map(str::to_owned),
            reason,
        });
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Owns the credential store for a session and keeps the connection manager
/// in step with it.
///
/// The store sits behind a `Mutex`: mutations are serialized, and the
/// controller can be shared across tasks behind an `Arc`.
pub struct VaultController {
    config: VaultConfig,
    registry: Arc<ProviderRegistry>,
    connections: ConnectionManager,
    store: Mutex<Option<CredentialStore>>,
    /// Store most recently created or connected; survives `disconnect`.
    last_path: Mutex<PathBuf>,
}

impl VaultController {
    pub fn new(
        config: VaultConfig,
        registry: Arc<ProviderRegistry>,
        connections: ConnectionManager,
    ) -> Self {
        let last_path = Mutex::new(config.store_path.clone());
        Self {
            config,
            registry,
            connections,
            store: Mutex::new(None),
            last_path,
        }
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    // A panic while holding the lock cannot leave SQLite half-written, so a
    // poisoned guard is still usable.
    fn lock(&self) -> MutexGuard<'_, Option<CredentialStore>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn last_path(&self) -> MutexGuard<'_, PathBuf> {
        self.last_path.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> VaultState {
        if self.lock().is_some() {
            VaultState::Connected
        } else if self.store_path().exists() {
            VaultState::Open
        } else {
            VaultState::Uninitialized
        }
    }

    /// Path of the store last created or connected, or the configured one.
    pub fn store_path(&self) -> PathBuf {
        self.last_path().clone()
    }

    fn with_store<T>(&self, f: impl FnOnce(&CredentialStore) -> Result<T>) -> Result<T> {
        let guard = self.lock();
        let store = guard.as_ref().ok_or(VaultError::NotConnected)?;
        f(store)
    }

    // -- Lifecycle ----------------------------------------------------------

    /// Create a new store and keypair at the configured location.
    ///
    /// Any open session is closed first; the controller ends up `Open`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] (wrapped) when a store exists
    /// and `overwrite` is false.
    pub fn create(&self, overwrite: bool) -> Result<CreatedVault> {
        let mut guard = self.lock();
        if guard.take().is_some() {
            tracing::info!("closing connected store before create");
        }

        let key_path = self.config.key_path();
        let created = CredentialStore::initialize_with_key_path(
            &self.config.store_path,
            &key_path,
            overwrite,
        )?;
        *self.last_path() = created.store.path().to_path_buf();

        tracing::info!(
            store = %self.config.store_path.display(),
            key_file = %created.private_key_path.display(),
            "vault created"
        );

        Ok(CreatedVault {
            store_path: created.store.path().to_path_buf(),
            private_key_path: created.private_key_path,
            private_key_pem: created.private_key_pem,
        })
    }

    /// Unlock the store and register a connection for every credential.
    ///
    /// `store_path` overrides the configured location. Records that fail to
    /// decrypt, name an unknown provider, or do not match their provider's
    /// schema are reported in [`ConnectReport::skipped`].
    ///
    /// # Errors
    ///
    /// Fails only when the store itself cannot be opened: missing file,
    /// unparseable or mismatched private key, database failure.
    pub fn connect(&self, key: PrivateKeySource, store_path: Option<PathBuf>) -> Result<ConnectReport> {
        let path = store_path.unwrap_or_else(|| self.config.store_path.clone());
        let store = CredentialStore::open(&path, &key)?;

        let report = self.register_all(&store)?;
        *self.lock() = Some(store);
        *self.last_path() = path.clone();

        tracing::info!(
            store = %path.display(),
            registered = report.registered.len(),
            skipped = report.skipped.len(),
            "vault connected"
        );
        Ok(report)
    }

    /// Re-register connections from the stored credentials.
    pub fn refresh_connections(&self) -> Result<ConnectReport> {
        self.with_store(|store| self.register_all(store))
    }

    fn register_all(&self, store: &CredentialStore) -> Result<ConnectReport> {
        let mut report = ConnectReport::default();

        for loaded in store.load_credentials()? {
            match loaded {
                Ok(record) => self.register_record(&record, &mut report),
                Err(err) => {
                    let reason = err.source.to_string();
                    report.skip(&err.service_name, Some(&err.id), reason);
                }
            }
        }
        Ok(report)
    }

    fn register_record(&self, record: &CredentialRecord, report: &mut ConnectReport) {
        let service = record.service_name.as_str();
        let Some(descriptor) = self.registry.lookup(service) else {
            let reason = VaultError::ProviderNotFound {
                service: service.to_owned(),
            }
            .to_string();
            report.skip(service, record.id.as_deref(), reason);
            return;
        };

        match descriptor.build_connection(record) {
            Ok(conn) => {
                self.connections.register(service, conn);
                report.registered.push(service.to_owned());
            }
            Err(err) => {
                let reason = VaultError::from(err).to_string();
                report.skip(service, record.id.as_deref(), reason);
            }
        }
    }

    // -- Credentials (connected only) ---------------------------------------

    /// Store a new credential and register its connection.
    ///
    /// Credentials for a known provider must produce a working connection
    /// before anything is written. Unknown services are stored anyway so
    /// that a provider added later can pick them up.
    ///
    /// # Errors
    ///
    /// [`VaultError::NotConnected`], [`VaultError::SchemaMismatch`],
    /// [`VaultError::Provider`] when the connection cannot be built, or a
    /// store/cipher failure.
    pub fn add_provider(&self, record: CredentialRecord) -> Result<String> {
        self.with_store(|store| {
            let connection = match self.registry.lookup(&record.service_name) {
                Some(descriptor) => Some(descriptor.build_connection(&record)?),
                None => {
                    tracing::warn!(
                        service = %record.service_name,
                        "storing credential for a service with no registered provider"
                    );
                    None
                }
            };

            let id = store.insert_credential(&record)?;
            tracing::info!(service = %record.service_name, id = %id, "provider added");

            if let Some(connection) = connection {
                self.connections.register(record.service_name, connection);
            }
            Ok(id)
        })
    }

    /// Apply a partial update and re-register the affected connections.
    ///
    /// For a known provider every matching credential is updated in memory
    /// and rebuilt first; if any of them no longer produces a connection the
    /// update is rejected and nothing is written. Returns the number of rows
    /// changed; zero is not an error.
    pub fn update_provider(&self, update: CredentialUpdate) -> Result<usize> {
        self.with_store(|store| {
            let mut rebuilt = Vec::new();
            if let Some(descriptor) = self.registry.lookup(&update.service_name) {
                for mut record in store.list_credentials(Some(&update.service_name))? {
                    if !update.targets(&record) {
                        continue;
                    }
                    update.apply_to(&mut record);
                    rebuilt.push(descriptor.build_connection(&record)?);
                }
            }

            let changed = store.update_credential(&update)?;
            tracing::info!(service = %update.service_name, changed, "provider updated");

            // Rows are processed in insertion order; the last one wins.
            for connection in rebuilt {
                self.connections.register(update.service_name.as_str(), connection);
            }
            Ok(changed)
        })
    }

    /// Delete every credential stored for `service_name` and drop its
    /// connection. Deleting an absent service returns zero.
    pub fn delete_provider(&self, service_name: &str) -> Result<usize> {
        self.with_store(|store| {
            let deleted = store.delete_credential(service_name)?;
            if deleted > 0 {
                self.connections.remove(service_name);
            }
            tracing::info!(service = service_name, deleted, "provider deleted");
            Ok(deleted)
        })
    }

    /// Delete a single credential by id. The service's connection is rebuilt
    /// from whatever credentials remain for it.
    pub fn delete_provider_by_id(&self, id: &str) -> Result<bool> {
        self.with_store(|store| {
            let Some(service) = store.service_name_for_id(id)? else {
                return Ok(false);
            };

            let deleted = store.delete_credential_by_id(id)?;
            if deleted {
                self.connections.remove(&service);
                if self.registry.contains(&service) {
                    let mut report = ConnectReport::default();
                    for record in store.list_credentials(Some(&service))? {
                        self.register_record(&record, &mut report);
                    }
                }
                tracing::info!(service = %service, id = id, "provider credential deleted");
            }
            Ok(deleted)
        })
    }

    /// Masked view of every stored credential.
    pub fn redacted_providers(&self) -> Result<Vec<RedactedCredential>> {
        self.with_store(|store| {
            Ok(store
                .list_credentials(None)?
                .iter()
                .map(CredentialRecord::redacted)
                .collect())
        })
    }

    /// Masked view of every stored credential as a JSON array.
    pub fn list_providers(&self) -> Result<String> {
        let redacted = self.redacted_providers()?;
        let json = serde_json::to_string_pretty(&redacted).map_err(StoreError::from)?;
        Ok(json)
    }

    /// Decrypted credentials, optionally filtered by service.
    pub fn get_credentials(&self, service_name: Option<&str>) -> Result<Vec<CredentialRecord>> {
        self.with_store(|store| Ok(store.list_credentials(service_name)?))
    }

    /// The first credential stored for `service_name`.
    pub fn get_credential(&self, service_name: &str) -> Result<CredentialRecord> {
        self.get_credentials(Some(service_name))?
            .into_iter()
            .next()
            .ok_or_else(|| VaultError::CredentialNotFound {
                service: service_name.to_owned(),
            })
    }

    /// Close the session. Registered connections stay in the manager.
    pub fn disconnect(&self) {
        if self.lock().take().is_some() {
            tracing::info!("vault disconnected");
        }
    }
}

impl std::fmt::Debug for VaultController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultController")
            .field("store_path", &self.store_path())
            .field("state", &self.state())
            .field("connections", &self.connections.len())
            .finish_non_exhaustive()
    }
}

/// Key material from an inline PEM or, failing that, a key file.
pub fn key_source(inline: Option<String>, file: Option<&Path>, config: &VaultConfig) -> PrivateKeySource {
    match (inline, file) {
        (Some(pem), _) => PrivateKeySource::Inline(pem),
        (None, Some(path)) => PrivateKeySource::File(path.to_path_buf()),
        (None, None) => PrivateKeySource::File(config.key_path()),
    }
}
