//! Session lifecycle for Waypost.
//!
//! A session is one authenticated identity on the messaging network. This
//! crate owns its state machine:
//!
//! 1. **Lifecycle**: connect, disconnect, logout ([`Session`])
//! 2. **Pairing**: the two-step QR challenge handshake with a bounded wait
//! 3. **Sending**: recipient normalisation and dispatch through the engine
//! 4. **Events**: one dispatch point reacting to engine notifications
//!
//! # How it fits in the stack
//!
//! ```text
//! Registry Layer (above)  ← creates, looks up, persists and deletes sessions
//!     ↕
//! Session Layer (this crate)  ← one state machine per identity
//!     ↕
//! Engine Layer (below)  ← the protocol engine doing the actual networking
//! ```

mod error;
mod session;

pub use error::SessionError;
pub use session::{Session, SessionConfig, parse_recipient};
