//! Error types for the INDI Panel Core.

use thiserror::Error;

/// Errors raised while decoding or applying diffs.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("malformed diff: {0}")]
    MalformedDiff(String),

    #[error("cannot apply update to a {0} value")]
    InvalidDiffTarget(&'static str),

    #[error("invalid array index in diff: {0}")]
    InvalidIndex(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
