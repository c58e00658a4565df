//! In-memory protocol engine.
//!
//! `LoopbackEngine` never touches a network. It keeps the flags a real
//! engine would keep (connected, paired) and lets the caller script what
//! the "network" does next through a [`LoopbackHandle`]:
//!
//! ```text
//! handle.fail_next_connect("dial tcp: refused");   // next connect() errors
//! handle.script_challenge([ClientOutdated]);       // next challenge stream
//! handle.pair("6281234", "Ana");                   // the user scanned the code
//! handle.drop_connection();                        // socket dies
//! ```
//!
//! Engine state is kept per id inside the [`LoopbackFactory`], so opening
//! the same id again (e.g. after a simulated restart) finds the same
//! credentials, just like a real engine re-reading its store.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rand::Rng;
use tokio::sync::mpsc;
use waypost_protocol::{Account, Address};

use crate::{
    ChallengeEvent, ChallengeStream, Engine, EngineError, EngineEvent, EngineFactory,
    EventStream,
};

/// File the loopback engine creates in each session directory.
const STORE_FILE: &str = "loopback.store";

/// Capacity of a challenge stream.
const CHALLENGE_CHANNEL_SIZE: usize = 8;

// ---------------------------------------------------------------------------
// Shared per-id state
// ---------------------------------------------------------------------------

enum ConnectFailure {
    Once(String),
    Always(String),
}

#[derive(Default)]
struct LoopbackState {
    connected: bool,
    paired: bool,
    released: bool,
    push_name: Option<String>,
    phone_number: Option<String>,

    open_failure: Option<String>,
    connect_failure: Option<ConnectFailure>,
    logout_failure: Option<String>,
    send_failure: Option<String>,
    withhold_challenges: bool,
    scripted: VecDeque<ChallengeEvent>,

    events: Option<mpsc::UnboundedSender<EngineEvent>>,
    challenge_tx: Option<mpsc::Sender<ChallengeEvent>>,

    sent: Vec<(Address, String)>,
    connect_calls: usize,
    disconnect_calls: usize,
    logout_calls: usize,
}

impl LoopbackState {
    fn emit(&self, event: EngineEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Delivers scripted challenge events, or a fresh code when nothing is
    /// scripted. Called once the socket is up.
    fn issue_challenges(&mut self) {
        let Some(tx) = self.challenge_tx.take() else {
            return;
        };
        if !self.scripted.is_empty() {
            for event in self.scripted.drain(..) {
                let _ = tx.try_send(event);
            }
        } else if !self.withhold_challenges {
            let _ = tx.try_send(ChallengeEvent::Code(pairing_code()));
        } else {
            // Keep the stream open so the waiter times out instead of
            // seeing the stream close.
            self.challenge_tx = Some(tx);
            return;
        }
        self.emit(EngineEvent::ChallengeIssued);
    }
}

/// Scripting and inspection handle for one loopback engine id.
///
/// Cheap to clone; every clone controls the same engine state.
#[derive(Clone)]
pub struct LoopbackHandle {
    id: Arc<str>,
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackHandle {
    fn new(id: &str) -> Self {
        Self {
            id: Arc::from(id),
            state: Arc::new(Mutex::new(LoopbackState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The id this handle belongs to.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Makes opening this id's engine fail with `message` until cleared.
    pub fn fail_open(&self, message: impl Into<String>) {
        self.state().open_failure = Some(message.into());
    }

    /// Makes the next `connect()` fail with `message`.
    pub fn fail_next_connect(&self, message: impl Into<String>) {
        self.state().connect_failure = Some(ConnectFailure::Once(message.into()));
    }

    /// Makes every `connect()` fail with `message` until cleared.
    pub fn fail_connects(&self, message: impl Into<String>) {
        self.state().connect_failure = Some(ConnectFailure::Always(message.into()));
    }

    /// Makes `logout()` fail with `message` until cleared.
    pub fn fail_logout(&self, message: impl Into<String>) {
        self.state().logout_failure = Some(message.into());
    }

    /// Makes `send_text()` fail with `message` until cleared.
    pub fn fail_send(&self, message: impl Into<String>) {
        self.state().send_failure = Some(message.into());
    }

    /// Removes every scripted failure.
    pub fn clear_failures(&self) {
        let mut st = self.state();
        st.open_failure = None;
        st.connect_failure = None;
        st.logout_failure = None;
        st.send_failure = None;
    }

    /// Never answer challenge requests (lets the waiter time out).
    pub fn withhold_challenges(&self) {
        self.state().withhold_challenges = true;
    }

    /// Queues exact events for the next challenge stream.
    pub fn script_challenge(&self, events: impl IntoIterator<Item = ChallengeEvent>) {
        self.state().scripted.extend(events);
    }

    /// Simulates the user completing pairing.
    ///
    /// Stores credentials and account data; if the socket is up the engine
    /// reports `Connected`.
    pub fn pair(&self, phone_number: impl Into<String>, push_name: impl Into<String>) {
        let mut st = self.state();
        st.paired = true;
        st.phone_number = Some(phone_number.into());
        st.push_name = Some(push_name.into());
        if st.connected {
            st.emit(EngineEvent::Connected);
        }
    }

    /// Simulates the socket dying underneath the session.
    pub fn drop_connection(&self) {
        let mut st = self.state();
        if st.connected {
            st.connected = false;
            st.emit(EngineEvent::Disconnected);
        }
    }

    /// Pushes an arbitrary event to the session.
    pub fn emit(&self, event: EngineEvent) {
        self.state().emit(event);
    }

    /// Messages accepted by `send_text()`, oldest first.
    pub fn sent_messages(&self) -> Vec<(Address, String)> {
        self.state().sent.clone()
    }

    pub fn connect_calls(&self) -> usize {
        self.state().connect_calls
    }

    pub fn disconnect_calls(&self) -> usize {
        self.state().disconnect_calls
    }

    pub fn logout_calls(&self) -> usize {
        self.state().logout_calls
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    pub fn is_paired(&self) -> bool {
        self.state().paired
    }

    pub fn is_released(&self) -> bool {
        self.state().released
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// An [`EngineFactory`] producing [`LoopbackEngine`]s.
#[derive(Clone, Default)]
pub struct LoopbackFactory {
    handles: Arc<Mutex<HashMap<String, LoopbackHandle>>>,
}

impl LoopbackFactory {
    /// Creates a factory with no engines.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle for `id`, creating its state if needed.
    ///
    /// Scripting a handle before the registry opens the engine is how tests
    /// make a restored session fail its reconnect.
    pub fn handle(&self, id: &str) -> LoopbackHandle {
        let mut handles = self
            .handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        handles
            .entry(id.to_string())
            .or_insert_with(|| LoopbackHandle::new(id))
            .clone()
    }
}

impl EngineFactory for LoopbackFactory {
    type Engine = LoopbackEngine;

    async fn open(
        &self,
        id: &str,
        store_dir: &Path,
    ) -> Result<(LoopbackEngine, EventStream), EngineError> {
        let handle = self.handle(id);
        if let Some(message) = handle.state().open_failure.clone() {
            return Err(EngineError::Storage(std::io::Error::other(message)));
        }

        tokio::fs::create_dir_all(store_dir)
            .await
            .map_err(EngineError::Storage)?;
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(store_dir.join(STORE_FILE))
            .await
            .map_err(EngineError::Storage)?;

        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut st = handle.state();
            st.events = Some(tx);
            st.released = false;
            st.connected = false;
            st.challenge_tx = None;
        }

        tracing::debug!(session_id = id, "loopback engine opened");
        Ok((LoopbackEngine { handle }, rx))
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// An [`Engine`] backed by a [`LoopbackHandle`].
pub struct LoopbackEngine {
    handle: LoopbackHandle,
}

impl LoopbackEngine {
    /// The scripting handle for this engine.
    pub fn handle(&self) -> &LoopbackHandle {
        &self.handle
    }
}

impl Engine for LoopbackEngine {
    async fn connect(&self) -> Result<(), EngineError> {
        let mut st = self.handle.state();
        st.connect_calls += 1;
        if st.released {
            return Err(EngineError::Released);
        }
        match st.connect_failure.take() {
            Some(ConnectFailure::Once(message)) => {
                return Err(EngineError::Connection(message));
            }
            Some(ConnectFailure::Always(message)) => {
                st.connect_failure = Some(ConnectFailure::Always(message.clone()));
                return Err(EngineError::Connection(message));
            }
            None => {}
        }

        st.connected = true;
        if st.paired {
            st.emit(EngineEvent::Connected);
        } else {
            st.issue_challenges();
        }
        Ok(())
    }

    async fn disconnect(&self) {
        let mut st = self.handle.state();
        st.disconnect_calls += 1;
        st.connected = false;
    }

    async fn logout(&self) -> Result<(), EngineError> {
        let mut st = self.handle.state();
        st.logout_calls += 1;
        if let Some(message) = &st.logout_failure {
            return Err(EngineError::Logout(message.clone()));
        }
        st.paired = false;
        st.connected = false;
        st.push_name = None;
        st.phone_number = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.handle.state().connected
    }

    fn is_logged_in(&self) -> bool {
        let st = self.handle.state();
        st.connected && st.paired
    }

    async fn request_challenge(&self) -> Result<ChallengeStream, EngineError> {
        let mut st = self.handle.state();
        if st.released {
            return Err(EngineError::Released);
        }
        if st.paired {
            return Err(EngineError::Challenge("store already holds credentials".into()));
        }
        let (tx, rx) = mpsc::channel(CHALLENGE_CHANNEL_SIZE);
        st.challenge_tx = Some(tx);
        Ok(rx)
    }

    async fn send_text(&self, to: &Address, body: &str) -> Result<(), EngineError> {
        let mut st = self.handle.state();
        if let Some(message) = &st.send_failure {
            return Err(EngineError::Send(message.clone()));
        }
        if !st.connected {
            return Err(EngineError::Send("socket is closed".into()));
        }
        st.sent.push((to.clone(), body.to_string()));
        Ok(())
    }

    fn account(&self) -> Account {
        let st = self.handle.state();
        Account {
            push_name: st.push_name.clone(),
            phone_number: st.phone_number.clone(),
        }
    }

    async fn release(&self) {
        let mut st = self.handle.state();
        st.released = true;
        st.connected = false;
        st.events = None;
        st.challenge_tx = None;
        tracing::debug!(session_id = %self.handle.id, "loopback engine released");
    }
}

/// Generates a pairing code shaped like a QR payload: `2@` + 32 hex chars.
fn pairing_code() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("2@{hex}")
}
