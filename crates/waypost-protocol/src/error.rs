//! Error types for the protocol layer.
//!
//! Each Waypost crate defines its own error enum. A `ProtocolError` always
//! means a value could not be parsed or (de)serialized; it never means a
//! network or storage failure.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust value into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a Rust value).
    ///
    /// Common causes on the store path: a truncated `state.json`, a file
    /// edited by hand, or a field with the wrong type.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The text is not a well-formed network address.
    #[error("invalid address {0:?}: {1}")]
    InvalidAddress(String, &'static str),
}
