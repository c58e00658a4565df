//! Error types for the session layer.

use std::time::Duration;

use waypost_engine::EngineError;

/// Errors that can occur while driving a session.
///
/// Lifecycle failures (`ConnectionFailed`, `LogoutFailed`, the pairing
/// variants) leave the session in `Error` or a safe intermediate status.
/// Send-path failures (`NotConnected` through `SendFailed`) never change
/// the session's status.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The engine could not connect (or could not open a challenge stream).
    #[error("failed to connect: {0}")]
    ConnectionFailed(#[source] EngineError),

    /// The engine could not invalidate the credentials.
    #[error("failed to logout: {0}")]
    LogoutFailed(#[source] EngineError),

    /// No challenge arrived within the configured wait.
    #[error("timed out after {0:?} waiting for a pairing code")]
    AuthenticationTimeout(Duration),

    /// The network rejected the engine's protocol version. Retrying will
    /// fail the same way until the engine is updated.
    #[error("protocol engine is outdated; update it before pairing again")]
    ProtocolOutdated,

    /// Pairing was requested for a session that is already logged in.
    #[error("session is already logged in")]
    AlreadyAuthenticated,

    /// The challenge stream produced something other than a code.
    #[error("unexpected pairing event: {0}")]
    UnexpectedEvent(String),

    /// The socket is down.
    #[error("not connected")]
    NotConnected,

    /// The socket is up but the session has no credentials.
    #[error("not logged in")]
    NotLoggedIn,

    /// The recipient could not be turned into a user address.
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    /// The engine refused the message.
    #[error("failed to send message: {0}")]
    SendFailed(#[source] EngineError),

    /// The session was closed and accepts no more operations.
    #[error("session is closed")]
    Closed,
}
