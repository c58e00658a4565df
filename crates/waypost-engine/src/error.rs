/// Errors reported by a protocol engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Opening the socket or logging in failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Invalidating credentials failed.
    #[error("logout failed: {0}")]
    Logout(String),

    /// The network refused or dropped an outgoing message.
    #[error("send failed: {0}")]
    Send(String),

    /// A challenge stream could not be opened.
    #[error("challenge request failed: {0}")]
    Challenge(String),

    /// The engine's private store could not be opened or written.
    #[error("engine store error: {0}")]
    Storage(#[source] std::io::Error),

    /// The engine was already released.
    #[error("engine released")]
    Released,
}
