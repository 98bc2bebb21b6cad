//! Error types for the store module.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Path cannot be addressed (bad array index, removing the root, ...).
    #[error("invalid path {path}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// Array write past the end of the array.
    #[error("index {index} out of range for array of length {len} at {path}")]
    IndexOutOfRange {
        path: String,
        index: usize,
        len: usize,
    },
}

impl StoreError {
    pub(crate) fn invalid(path: &[&str], reason: impl Into<String>) -> Self {
        StoreError::InvalidPath {
            path: display_path(path),
            reason: reason.into(),
        }
    }
}

/// Render a path for error messages and logs.
pub fn display_path(path: &[&str]) -> String {
    if path.is_empty() {
        "<root>".to_string()
    } else {
        path.join(".")
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
