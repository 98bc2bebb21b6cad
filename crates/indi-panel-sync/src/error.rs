//! Error types for the sync module.

use thiserror::Error;

use crate::replicator::ClientId;

/// Errors that can occur in the synchronizer or replication layer.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The selector expands to no path at all (e.g. an empty OR-group).
    #[error("path selector matches nothing")]
    EmptySelector,

    /// No replication client with this id.
    #[error("unknown replication client: {0}")]
    UnknownClient(ClientId),

    /// A received diff could not be applied.
    #[error("diff error: {0}")]
    Diff(#[from] indi_panel_core::CoreError),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] indi_panel_store::StoreError),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
