//! Unified error type for Waypost.

use waypost_engine::EngineError;
use waypost_protocol::ProtocolError;
use waypost_registry::RegistryError;
use waypost_session::SessionError;
use waypost_store::StoreError;

use crate::ConfigError;

/// Top-level error that wraps all crate-specific errors.
///
/// Each variant is `#[error(transparent)]` with a `#[from]` impl, so `?`
/// lifts any layer's error into this one and the message stays the
/// layer's own.
#[derive(Debug, thiserror::Error)]
pub enum WaypostError {
    /// Address parsing or state (de)serialization.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The protocol engine failed.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A session lifecycle or send operation failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Reading or writing the data root failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A registry operation failed (unknown id, duplicate, closed, ...).
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The gateway configuration couldn't be loaded or saved.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
