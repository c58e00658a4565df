//! Gateway configuration.
//!
//! Resolution order, later wins:
//!
//! 1. built-in defaults
//! 2. an optional JSON file (missing keys keep their defaults)
//! 3. environment variables `LISTEN_ADDR`, `API_KEY`, `WHATSAPP_DATA_DIR`
//!    (ignored when empty)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;
use waypost_registry::{DEFAULT_DATA_DIR, RegistryConfig};
use waypost_session::SessionConfig;

/// Errors from loading, validating or saving a [`GatewayConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Process-level settings for a gateway.
///
/// `listen_addr` and `api_key` belong to whatever HTTP surface fronts the
/// registry; Waypost carries them so one file configures the whole process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub listen_addr: String,

    /// Shared secret for the HTTP surface. No default: an unset key means
    /// the surface is unauthenticated, and callers should say so loudly.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(rename = "whatsapp_data_dir")]
    pub data_dir: PathBuf,

    /// 0 disables autosave.
    pub autosave_interval_secs: u64,
    pub challenge_timeout_secs: u64,
    pub delete_grace_millis: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: ":8080".to_string(),
            api_key: None,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            autosave_interval_secs: 300,
            challenge_timeout_secs: 30,
            delete_grace_millis: 1000,
        }
    }
}

impl GatewayConfig {
    /// Loads defaults, then `path` if given, then the process environment.
    ///
    /// # Errors
    /// A named file that can't be read or parsed, or a result that fails
    /// [`validate`](Self::validate).
    pub async fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path).await?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;

        tracing::debug!(
            file = ?path,
            listen_addr = %config.listen_addr,
            data_dir = %config.data_dir.display(),
            api_key_set = config.api_key.is_some(),
            "gateway config loaded"
        );
        Ok(config)
    }

    /// Reads a JSON config file on top of the defaults.
    pub async fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read(path).await.map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies environment overrides read through `lookup`.
    ///
    /// Taking the lookup as a closure keeps tests off the real process
    /// environment.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(addr) = var("LISTEN_ADDR") {
            self.listen_addr = addr;
        }
        if let Some(key) = var("API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(dir) = var("WHATSAPP_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
    }

    /// Rejects values the registry can't run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_addr.trim().is_empty() {
            return Err(ConfigError::Invalid("listen_addr must not be empty".into()));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("whatsapp_data_dir must not be empty".into()));
        }
        if self.challenge_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "challenge_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Writes the config as indented JSON, creating parent directories.
    pub async fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let json = serde_json::to_vec_pretty(self).map_err(ConfigError::Serialize)?;
        fs::write(path, json).await.map_err(io_err)
    }

    /// The registry settings this config describes.
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            root: self.data_dir.clone(),
            autosave_interval: Duration::from_secs(self.autosave_interval_secs),
            delete_grace: Duration::from_millis(self.delete_grace_millis),
            session: SessionConfig {
                challenge_timeout: Duration::from_secs(self.challenge_timeout_secs),
            },
        }
    }
}
