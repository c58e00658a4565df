//! Codec trait and implementations for serializing persisted values.
//!
//! A "codec" (coder/decoder) converts between Rust types and raw bytes.
//! The session store doesn't care HOW a snapshot is serialized; it just
//! needs something that implements [`Codec`]. Today that is [`JsonCodec`],
//! because `state.json` is meant to be readable by an operator with `cat`.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because the store is shared by every task that
/// saves a session (requests, the autosave task, reconnect tasks).
///
/// `DeserializeOwned` (vs plain `Deserialize`) means the decoded value owns
/// its data, so the read buffer can be dropped right after decoding.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if the value can't be represented
    /// in this format.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// `pretty` selects indented output. The session store uses the pretty form;
/// the compact form is the default.
///
/// ## Example
///
/// ```rust
/// use waypost_protocol::{Codec, JsonCodec, SessionStatus};
///
/// let codec = JsonCodec::default();
/// let bytes = codec.encode(&SessionStatus::LoggedOut).unwrap();
/// assert_eq!(bytes, b"\"logged_out\"");
///
/// let decoded: SessionStatus = codec.decode(&bytes).unwrap();
/// assert_eq!(decoded, SessionStatus::LoggedOut);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec {
    /// Emit indented, human-oriented JSON.
    pub pretty: bool,
}

#[cfg(feature = "json")]
impl JsonCodec {
    /// A codec producing indented JSON.
    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        if self.pretty {
            serde_json::to_vec_pretty(value).map_err(ProtocolError::Encode)
        } else {
            serde_json::to_vec(value).map_err(ProtocolError::Encode)
        }
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
