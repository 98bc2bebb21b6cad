//! Error types for the INDI client.

use thiserror::Error;

/// Errors that can occur while talking to an INDI server.
#[derive(Debug, Error)]
pub enum IndiError {
    /// The byte stream is not well-formed XML.
    #[error("xml error: {0}")]
    Xml(String),

    /// Well-formed XML that does not follow the INDI schema.
    #[error("malformed {tag}: {reason}")]
    Malformed { tag: String, reason: String },

    /// A single message exceeded the configured size limit.
    #[error("message exceeds {limit} bytes")]
    MessageTooLarge { limit: usize },

    /// The connection is not established.
    #[error("not connected to the INDI server")]
    Disconnected,

    /// The caller's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// A wait exceeded its deadline.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Device, vector or property does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The vector is Busy and the caller required it to be ready.
    #[error("vector {device}.{vector} is busy")]
    Busy { device: String, vector: String },

    /// The driver answered a command with an Alert state.
    #[error("vector {device}.{vector} went to Alert")]
    Alert { device: String, vector: String },

    /// The command cannot be sent (e.g. writing a read-only Light vector).
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// Socket-level failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Device-tree write failed.
    #[error("store error: {0}")]
    Store(#[from] indi_panel_store::StoreError),
}

impl IndiError {
    pub(crate) fn malformed(tag: &str, reason: impl Into<String>) -> Self {
        IndiError::Malformed {
            tag: tag.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<roxmltree::Error> for IndiError {
    fn from(err: roxmltree::Error) -> Self {
        IndiError::Xml(err.to_string())
    }
}

/// Result type for INDI operations.
pub type Result<T> = std::result::Result<T, IndiError>;
