//! Shared data types for Waypost.
//!
//! This crate defines the values that cross layer boundaries:
//!
//! - **Addresses** ([`Address`]): how a recipient on the messaging network
//!   is named, plus the recipient normalisation used when sending.
//! - **Session types** ([`SessionStatus`], [`SessionSnapshot`],
//!   [`Account`]): what a session looks like from the outside and on disk.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how snapshots are turned
//!   into bytes for the session store.
//! - **Errors** ([`ProtocolError`]).
//!
//! # Architecture
//!
//! The protocol layer knows nothing about engines, locks or directories. It
//! only knows how to name things and how to serialize them.
//!
//! ```text
//! Engine (network) → Protocol (Address, snapshot) → Session / Store
//! ```

mod address;
mod codec;
mod error;
mod types;

pub use address::{Address, DEFAULT_USER_SERVER, normalize_recipient};
pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{Account, SessionSnapshot, SessionStatus};
