//! Error types for the registry layer.

use waypost_engine::EngineError;
use waypost_store::StoreError;

/// Errors that can occur during registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The id can't name a session directory.
    #[error("invalid session id {id:?}: {reason}")]
    InvalidId { id: String, reason: &'static str },

    /// A session with this id exists, or is still being deleted.
    #[error("session {0:?} already exists")]
    AlreadyExists(String),

    /// No session with this id.
    #[error("session {0:?} not found")]
    NotFound(String),

    /// An empty id was given and no default session is set.
    #[error("no default session is set")]
    NoDefaultClient,

    /// The protocol engine could not be opened.
    #[error("failed to open engine: {0}")]
    Engine(#[from] EngineError),

    /// The data root could not be read or written.
    #[error("persistence failed: {0}")]
    PersistenceFailed(#[from] StoreError),

    /// The registry was closed.
    #[error("registry is closed")]
    Closed,
}
