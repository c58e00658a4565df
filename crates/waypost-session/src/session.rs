//! The session state machine.
//!
//! A [`Session`] wraps one protocol engine and keeps the few fields the
//! engine doesn't: the last explicitly recorded status, the last error
//! message and when the session was last touched.
//!
//! # Locking
//!
//! Every lifecycle operation takes the session's write lock, so connect,
//! disconnect, logout and pairing on the same session never interleave.
//! Two operations deliberately run without it:
//!
//! - the pairing *wait*: once the challenge stream is open the lock is
//!   released, so `state()` keeps answering for the whole wait
//! - the network part of `send_message`
//!
//! # Events
//!
//! Each session spawns one dispatcher task that drains the engine's event
//! feed. It holds only a `Weak` reference, so it never keeps a dropped
//! session alive.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinHandle;
use waypost_engine::{ChallengeEvent, Engine, EngineEvent, EventStream};
use waypost_protocol::{Address, SessionSnapshot, SessionStatus, normalize_recipient};

use crate::SessionError;

/// Capacity of the subscriber broadcast. Slow subscribers lag; they never
/// block the dispatcher.
const NOTICE_CHANNEL_SIZE: usize = 64;

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Configuration for session behavior.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long `generate_qr` waits for the first pairing code.
    ///
    /// Default: 30 seconds.
    pub challenge_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            challenge_timeout: Duration::from_secs(30),
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Fields guarded by the session lock.
struct Fields {
    status: SessionStatus,
    last_activity: DateTime<Utc>,
    connection_error: String,
}

impl Fields {
    fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    fn fail(&mut self, err: &SessionError) {
        self.status = SessionStatus::Error;
        self.connection_error = err.to_string();
    }
}

/// One messaging identity and its engine.
///
/// Always handled through an `Arc`: the registry, in-flight requests and
/// reconnect tasks may all hold the same session at once.
pub struct Session<E: Engine> {
    id: String,
    engine: E,
    config: SessionConfig,
    fields: RwLock<Fields>,
    closed: AtomicBool,
    notices: broadcast::Sender<EngineEvent>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl<E: Engine> Session<E> {
    /// Wraps an opened engine and starts dispatching its events.
    ///
    /// The session starts `LoggedOut` with `last_activity` set to now.
    /// Must be called from inside a Tokio runtime.
    pub fn spawn(
        id: impl Into<String>,
        engine: E,
        events: EventStream,
        config: SessionConfig,
    ) -> Arc<Self> {
        let (notices, _) = broadcast::channel(NOTICE_CHANNEL_SIZE);
        let session = Arc::new(Self {
            id: id.into(),
            engine,
            config,
            fields: RwLock::new(Fields {
                status: SessionStatus::LoggedOut,
                last_activity: Utc::now(),
                connection_error: String::new(),
            }),
            closed: AtomicBool::new(false),
            notices,
            dispatcher: Mutex::new(None),
        });

        let handle = tokio::spawn(dispatch(Arc::downgrade(&session), events));
        *session
            .dispatcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);

        session
    }

    /// The session's id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// When the session was last touched by an operation or engine event.
    pub async fn last_activity(&self) -> DateTime<Utc> {
        self.fields.read().await.last_activity
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Receives every engine event after the session has handled it.
    ///
    /// Events sent while nobody is subscribed are dropped.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.notices.subscribe()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Opens the connection. A no-op if already connected.
    ///
    /// On success the status becomes `Connected` when the engine is logged
    /// in and `Disconnected` otherwise (socket up, no credentials yet).
    ///
    /// # Errors
    /// [`SessionError::ConnectionFailed`]; the session moves to `Error`.
    pub async fn connect(&self) -> Result<(), SessionError> {
        let mut fields = self.fields.write().await;
        self.ensure_open()?;
        fields.touch();

        if self.engine.is_connected() {
            return Ok(());
        }

        if let Err(e) = self.engine.connect().await {
            let err = SessionError::ConnectionFailed(e);
            fields.fail(&err);
            tracing::warn!(session_id = %self.id, error = %err, "connect failed");
            return Err(err);
        }

        fields.status = if self.engine.is_logged_in() {
            SessionStatus::Connected
        } else {
            SessionStatus::Disconnected
        };
        fields.connection_error.clear();
        tracing::info!(session_id = %self.id, status = %fields.status, "session connected");
        Ok(())
    }

    /// Closes the connection, keeping credentials. Never fails.
    pub async fn disconnect(&self) {
        let mut fields = self.fields.write().await;
        if self.is_closed() {
            return;
        }
        fields.touch();

        if !self.engine.is_connected() {
            return;
        }
        self.engine.disconnect().await;
        fields.status = SessionStatus::Disconnected;
        tracing::info!(session_id = %self.id, "session disconnected");
    }

    /// Invalidates the credentials. A no-op if not logged in.
    ///
    /// # Errors
    /// [`SessionError::LogoutFailed`]; the session moves to `Error`.
    pub async fn logout(&self) -> Result<(), SessionError> {
        let mut fields = self.fields.write().await;
        self.ensure_open()?;
        fields.touch();

        if !self.engine.is_logged_in() {
            return Ok(());
        }

        if let Err(e) = self.engine.logout().await {
            let err = SessionError::LogoutFailed(e);
            fields.fail(&err);
            tracing::warn!(session_id = %self.id, error = %err, "logout failed");
            return Err(err);
        }

        fields.status = SessionStatus::LoggedOut;
        tracing::info!(session_id = %self.id, "session logged out");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Pairing
    // -----------------------------------------------------------------------

    /// Starts pairing and returns the first challenge code.
    ///
    /// ```text
    ///   [lock]  logged in? → AlreadyAuthenticated
    ///           connected? → disconnect
    ///           open challenge stream, then connect
    ///  [unlock] wait up to challenge_timeout for the first event
    /// ```
    ///
    /// The stream must be open before the engine connects or the first
    /// code can slip past. Any failure is recorded as `Error` with its
    /// message.
    ///
    /// # Errors
    /// - [`SessionError::AlreadyAuthenticated`] (status unchanged)
    /// - [`SessionError::ConnectionFailed`]
    /// - [`SessionError::ProtocolOutdated`]
    /// - [`SessionError::UnexpectedEvent`] for any non-code event, or
    ///   when the stream closes without one
    /// - [`SessionError::AuthenticationTimeout`]
    pub async fn generate_qr(&self) -> Result<String, SessionError> {
        let mut challenges = {
            let mut fields = self.fields.write().await;
            self.ensure_open()?;
            fields.touch();

            if self.engine.is_logged_in() {
                return Err(SessionError::AlreadyAuthenticated);
            }
            if self.engine.is_connected() {
                self.engine.disconnect().await;
            }

            let challenges = match self.engine.request_challenge().await {
                Ok(stream) => stream,
                Err(e) => {
                    let err = SessionError::ConnectionFailed(e);
                    fields.fail(&err);
                    return Err(err);
                }
            };
            if let Err(e) = self.engine.connect().await {
                let err = SessionError::ConnectionFailed(e);
                fields.fail(&err);
                return Err(err);
            }
            challenges
        };

        let timeout = self.config.challenge_timeout;
        let err = match tokio::time::timeout(timeout, challenges.recv()).await {
            Ok(Some(ChallengeEvent::Code(code))) => {
                tracing::info!(session_id = %self.id, "pairing code issued");
                return Ok(code);
            }
            Ok(Some(ChallengeEvent::ClientOutdated)) => SessionError::ProtocolOutdated,
            Ok(Some(other)) => SessionError::UnexpectedEvent(other.kind().to_string()),
            Ok(None) => SessionError::UnexpectedEvent("stream closed".to_string()),
            Err(_) => SessionError::AuthenticationTimeout(timeout),
        };
        drop(challenges);

        tracing::warn!(session_id = %self.id, error = %err, "pairing failed");
        self.fields.write().await.fail(&err);
        Err(err)
    }

    // -----------------------------------------------------------------------
    // Messaging
    // -----------------------------------------------------------------------

    /// Sends a text message.
    ///
    /// `recipient` may be a bare phone number (`6281234`, `+6281234`) or a
    /// full address. Failures here never change the session's status.
    ///
    /// # Errors
    /// Checked in this order: [`SessionError::NotConnected`],
    /// [`SessionError::NotLoggedIn`], [`SessionError::InvalidRecipient`],
    /// [`SessionError::SendFailed`].
    pub async fn send_message(&self, recipient: &str, body: &str) -> Result<(), SessionError> {
        {
            let mut fields = self.fields.write().await;
            self.ensure_open()?;
            fields.touch();
        }

        if !self.engine.is_connected() {
            return Err(SessionError::NotConnected);
        }
        if !self.engine.is_logged_in() {
            return Err(SessionError::NotLoggedIn);
        }

        let to = parse_recipient(recipient)?;
        self.engine
            .send_text(&to, body)
            .await
            .map_err(SessionError::SendFailed)?;

        tracing::debug!(session_id = %self.id, %to, "message sent");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // State
    // -----------------------------------------------------------------------

    /// A snapshot of the session, with status derived from the engine.
    ///
    /// The phone number is only reported while logged in.
    pub async fn state(&self) -> SessionSnapshot {
        let fields = self.fields.read().await;
        let connected = self.engine.is_connected();
        let logged_in = self.engine.is_logged_in();
        let account = self.engine.account();

        SessionSnapshot {
            id: self.id.clone(),
            status: SessionStatus::derive(connected, logged_in, fields.status),
            last_activity: fields.last_activity,
            connected,
            logged_in,
            push_name: account.push_name.unwrap_or_default(),
            phone_number: if logged_in {
                account.phone_number.unwrap_or_default()
            } else {
                String::new()
            },
            connection_error: fields.connection_error.clone(),
        }
    }

    /// Seeds the session from a persisted snapshot.
    ///
    /// Restores `last_activity` and `connection_error`. The recorded status
    /// becomes `Disconnected` when the snapshot was logged in (the session
    /// still holds credentials, it just isn't online yet), `Error` when
    /// the snapshot was in error, and `LoggedOut` otherwise.
    pub async fn restore(&self, snapshot: &SessionSnapshot) {
        let mut fields = self.fields.write().await;
        fields.last_activity = snapshot.last_activity;
        fields.connection_error = snapshot.connection_error.clone();
        fields.status = if snapshot.status == SessionStatus::Error {
            SessionStatus::Error
        } else if snapshot.logged_in {
            SessionStatus::Disconnected
        } else {
            SessionStatus::LoggedOut
        };
    }

    /// Disconnects, releases the engine and stops event dispatch.
    ///
    /// Idempotent. Afterwards lifecycle and send operations return
    /// [`SessionError::Closed`]; `state()` keeps answering.
    pub async fn close(&self) {
        let _fields = self.fields.write().await;
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if self.engine.is_connected() {
            self.engine.disconnect().await;
        }
        self.engine.release().await;
        self.stop_dispatcher();
        tracing::info!(session_id = %self.id, "session closed");
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.is_closed() {
            Err(SessionError::Closed)
        } else {
            Ok(())
        }
    }

    fn stop_dispatcher(&self) {
        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    /// Applies one engine event, then forwards it to subscribers.
    async fn handle_event(&self, event: EngineEvent) {
        {
            let mut fields = self.fields.write().await;
            fields.touch();
            match &event {
                EngineEvent::Connected => {
                    fields.status = SessionStatus::Connected;
                    fields.connection_error.clear();
                    tracing::info!(session_id = %self.id, "engine logged in");
                }
                EngineEvent::Disconnected => {
                    fields.status = if self.engine.is_logged_in() {
                        SessionStatus::Disconnected
                    } else {
                        SessionStatus::LoggedOut
                    };
                    tracing::info!(session_id = %self.id, status = %fields.status, "engine disconnected");
                }
                EngineEvent::ChallengeIssued => {
                    tracing::debug!(session_id = %self.id, "pairing challenge issued");
                }
                EngineEvent::Other(name) => {
                    tracing::trace!(session_id = %self.id, event = %name, "engine event");
                }
            }
        }

        // No subscribers is fine.
        let _ = self.notices.send(event);
    }
}

impl<E: Engine> fmt::Debug for Session<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl<E: Engine> Drop for Session<E> {
    fn drop(&mut self) {
        let slot = match self.dispatcher.get_mut() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }
}

/// Drains the engine feed until it closes or the session is gone.
async fn dispatch<E: Engine>(session: Weak<Session<E>>, mut events: EventStream) {
    while let Some(event) = events.recv().await {
        let Some(session) = session.upgrade() else {
            break;
        };
        session.handle_event(event).await;
    }
}

/// Normalises `raw` and parses it into a user address.
///
/// # Errors
/// [`SessionError::InvalidRecipient`] when the text doesn't parse, names a
/// non-user server, or has an empty local part.
pub fn parse_recipient(raw: &str) -> Result<Address, SessionError> {
    let normalized = normalize_recipient(raw);
    let address = Address::parse(&normalized)
        .map_err(|e| SessionError::InvalidRecipient(e.to_string()))?;

    if !address.is_user() {
        return Err(SessionError::InvalidRecipient(format!(
            "{normalized}: not a user address"
        )));
    }
    if address.user.is_empty() {
        return Err(SessionError::InvalidRecipient(format!(
            "{normalized}: empty user"
        )));
    }
    Ok(address)
}
