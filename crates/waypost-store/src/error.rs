use std::path::PathBuf;

use waypost_protocol::ProtocolError;

/// Errors that can occur while reading or writing the data root.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O error during a file operation.
    #[error("I/O error at {path}: {source}")]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A state file could not be encoded or decoded.
    #[error("state file {path}: {source}")]
    Codec {
        path: PathBuf,
        #[source]
        source: ProtocolError,
    },
}

impl StoreError {
    /// Create a file I/O error with path context.
    pub fn file_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileIo {
            path: path.into(),
            source,
        }
    }

    /// Create a codec error with path context.
    pub fn codec(path: impl Into<PathBuf>, source: ProtocolError) -> Self {
        Self::Codec {
            path: path.into(),
            source,
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
