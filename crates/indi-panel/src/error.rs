//! Error types for the panel facade.

use indi_panel_core::CoreError;
use indi_panel_indi::IndiError;
use indi_panel_store::StoreError;
use indi_panel_sync::SyncError;
use thiserror::Error;

/// Errors surfaced by [`Panel`](crate::Panel) operations.
#[derive(Debug, Error)]
pub enum PanelError {
    /// Path, whitelist or diff error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Synchronizer or replication error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// INDI protocol or connection error.
    #[error("indi error: {0}")]
    Indi(#[from] IndiError),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Configuration file could not be read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file is not valid JSON for [`PanelConfig`](crate::PanelConfig).
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result type for panel operations.
pub type Result<T> = std::result::Result<T, PanelError>;
