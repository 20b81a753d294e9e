//! Vault configuration.
//!
//! Settings are resolved in layers, each overriding the previous one:
//!
//! 1. Built-in defaults (`data/vault.db`, key file next to the store).
//! 2. The `[vault]` table of a TOML file (`config/ntropy.toml` by default).
//! 3. `NTROPY_VAULT_PATH` and `NTROPY_PRIVATE_KEY_FILE`.
//! 4. Explicit overrides, typically from command-line flags.
//!
//! ```toml
//! [vault]
//! store_path = "data/vault.db"
//! private_key_path = "secrets/private_key.pem"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};

pub const DEFAULT_CONFIG_PATH: &str = "config/ntropy.toml";
pub const DEFAULT_STORE_PATH: &str = "data/vault.db";

pub const ENV_VAULT_PATH: &str = "NTROPY_VAULT_PATH";
pub const ENV_PRIVATE_KEY_FILE: &str = "NTROPY_PRIVATE_KEY_FILE";

/// Where the credential store and its private key live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultConfig {
    pub store_path: PathBuf,
    /// Defaults to `private_key.pem` in the store's directory.
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
            private_key_path: None,
        }
    }
}

/// Every key is optional so a file may override a single setting.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    vault: VaultSection,
}

#[derive(Debug, Default, Deserialize)]
struct VaultSection {
    store_path: Option<PathBuf>,
    private_key_path: Option<PathBuf>,
}

impl VaultConfig {
    pub fn new(store_path: impl Into<PathBuf>) -> Self {
        Self {
            store_path: store_path.into(),
            private_key_path: None,
        }
    }

    /// Resolve the full layered configuration.
    ///
    /// An explicit `config_file` must exist; the default location is
    /// optional.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Config`] if the file cannot be read or parsed.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let config = match config_file {
            Some(path) => Self::default().merge_file(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::default().merge_file(default)?
                } else {
                    Self::default()
                }
            }
        };
        Ok(config.merge_env(|key| std::env::var(key).ok()))
    }

    /// Apply the `[vault]` table of the TOML file at `path`.
    pub fn merge_file(self, path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| VaultError::Config {
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        tracing::debug!(path = %path.display(), "loaded vault configuration file");
        self.merge_toml(&content)
    }

    /// Apply the `[vault]` table of a TOML document.
    pub fn merge_toml(mut self, content: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(content).map_err(|e| VaultError::Config {
            reason: format!("invalid configuration file: {e}"),
        })?;
        if let Some(store_path) = file.vault.store_path {
            self.store_path = store_path;
        }
        if let Some(key_path) = file.vault.private_key_path {
            self.private_key_path = Some(key_path);
        }
        Ok(self)
    }

    /// Apply environment overrides read through `lookup`. Empty values are
    /// ignored.
    pub fn merge_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(store_path) = get(ENV_VAULT_PATH) {
            self.store_path = PathBuf::from(store_path);
        }
        if let Some(key_path) = get(ENV_PRIVATE_KEY_FILE) {
            self.private_key_path = Some(PathBuf::from(key_path));
        }
        self
    }

    /// Apply explicit overrides.
    pub fn with_overrides(
        mut self,
        store_path: Option<PathBuf>,
        private_key_path: Option<PathBuf>,
    ) -> Self {
        if let Some(store_path) = store_path {
            self.store_path = store_path;
        }
        if private_key_path.is_some() {
            self.private_key_path = private_key_path;
        }
        self
    }

    /// The configured private key file, or the default next to the store.
    pub fn key_path(&self) -> PathBuf {
        self.private_key_path
            .clone()
            .unwrap_or_else(|| ntropy_vault::default_key_path(&self.store_path))
    }
}
