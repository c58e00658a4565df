//! Registry configuration.

use std::path::PathBuf;
use std::time::Duration;

use waypost_session::SessionConfig;

/// Data root used when none is configured.
pub const DEFAULT_DATA_DIR: &str = "./whatsapp-data";

/// Configuration for a [`Registry`](crate::Registry).
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Directory holding one subdirectory per session plus the
    /// default-client marker.
    pub root: PathBuf,

    /// How often every session's state is written back to disk.
    ///
    /// Default: 5 minutes. `Duration::ZERO` disables autosave; state is
    /// then only written on create, `save_all` and `close`.
    pub autosave_interval: Duration,

    /// Pause between closing a deleted session and removing its directory,
    /// so the engine can finish flushing its store.
    ///
    /// Default: 1 second.
    pub delete_grace: Duration,

    /// Settings handed to every session.
    pub session: SessionConfig,
}

impl RegistryConfig {
    /// Default settings rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_DATA_DIR),
            autosave_interval: Duration::from_secs(5 * 60),
            delete_grace: Duration::from_secs(1),
            session: SessionConfig::default(),
        }
    }
}
