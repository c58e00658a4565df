//! Protocol engine abstraction for Waypost.
//!
//! Waypost does not speak the messaging network's wire protocol itself.
//! A *protocol engine* does: it owns the socket, the cryptographic
//! handshake and the credential store. This crate defines the small
//! capability surface the session layer drives:
//!
//! - [`Engine`]: one authenticated identity's connection
//! - [`EngineFactory`]: opens an engine for a session directory
//! - [`EngineEvent`]: push notifications from engine to session
//! - [`ChallengeEvent`]: what arrives on a pairing-challenge stream
//!
//! # Feature Flags
//!
//! - `loopback`: an in-memory, scriptable engine used by tests and the demo
//!   shell ([`LoopbackFactory`], [`LoopbackEngine`], [`LoopbackHandle`])

mod error;
#[cfg(feature = "loopback")]
mod loopback;

pub use error::EngineError;
#[cfg(feature = "loopback")]
pub use loopback::{LoopbackEngine, LoopbackFactory, LoopbackHandle};

use std::fmt;
use std::future::Future;
use std::path::Path;

use tokio::sync::mpsc;
use waypost_protocol::{Account, Address};

/// Lifecycle notifications pushed by an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A new pairing challenge was issued.
    ChallengeIssued,
    /// The engine finished logging in on a live socket.
    Connected,
    /// The socket went down.
    Disconnected,
    /// Anything else the engine reports; carried by name only.
    Other(String),
}

/// One item on a pairing-challenge stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeEvent {
    /// A challenge payload to show the user (e.g. QR contents).
    Code(String),
    /// Pairing completed.
    Success,
    /// The engine gave up issuing codes.
    Timeout,
    /// The network rejected the engine's protocol version.
    ClientOutdated,
    /// Any other failure, with the engine's description.
    Error(String),
}

impl ChallengeEvent {
    /// Stable name of the event kind, used in error messages and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Code(_) => "code",
            Self::Success => "success",
            Self::Timeout => "timeout",
            Self::ClientOutdated => "err-client-outdated",
            Self::Error(_) => "error",
        }
    }
}

impl fmt::Display for ChallengeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// Receiver half of an engine's lifecycle event feed.
pub type EventStream = mpsc::UnboundedReceiver<EngineEvent>;

/// Receiver half of a pairing-challenge stream.
pub type ChallengeStream = mpsc::Receiver<ChallengeEvent>;

/// A connection to the messaging network for one identity.
///
/// # Trait bounds
///
/// - `Send + Sync` → the engine is shared by every task touching its
///   session (requests, the event dispatcher, reconnect tasks).
/// - `'static` → it lives as long as its session.
///
/// Flag queries are synchronous; everything that touches the network
/// returns a `Send` future so callers can run it on any Tokio worker.
pub trait Engine: Send + Sync + 'static {
    /// Opens the socket (and logs in if credentials exist).
    fn connect(&self) -> impl Future<Output = Result<(), EngineError>> + Send;

    /// Closes the socket. Credentials are kept.
    fn disconnect(&self) -> impl Future<Output = ()> + Send;

    /// Invalidates the credentials on the network and locally.
    fn logout(&self) -> impl Future<Output = Result<(), EngineError>> + Send;

    /// Whether the socket is up.
    fn is_connected(&self) -> bool;

    /// Whether the engine holds valid credentials on a live socket.
    fn is_logged_in(&self) -> bool;

    /// Opens a challenge stream. Must be called *before* [`connect`]
    /// so the first challenge isn't missed.
    ///
    /// [`connect`]: Engine::connect
    fn request_challenge(&self) -> impl Future<Output = Result<ChallengeStream, EngineError>> + Send;

    /// Sends a plain-text message.
    fn send_text(
        &self,
        to: &Address,
        body: &str,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    /// Account metadata known so far.
    fn account(&self) -> Account;

    /// Drops sockets and store handles. Called once when the session closes.
    fn release(&self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// Creates engines for sessions.
///
/// The registry owns one factory and calls [`open`](EngineFactory::open)
/// once per session, handing it the session's private directory. Whatever
/// the engine writes there is opaque to Waypost.
pub trait EngineFactory: Send + Sync + 'static {
    /// The engine type this factory produces.
    type Engine: Engine;

    /// Opens (or re-opens) the engine for `id` rooted at `store_dir`.
    fn open(
        &self,
        id: &str,
        store_dir: &Path,
    ) -> impl Future<Output = Result<(Self::Engine, EventStream), EngineError>> + Send;
}
