//! # INDI Panel
//!
//! Backend for a web control panel driving astronomy devices over INDI.
//!
//! ## Overview
//!
//! The panel keeps one versioned JSON state tree. The INDI connection writes
//! the live device tree into it, business logic reacts through synchronizers
//! bound to path selectors, and every attached client receives incremental
//! diffs of the parts of the tree it is allowed to see.
//!
//! - **Store**: versioned tree with per-node serials and cheap change checks
//! - **Synchronizers**: callbacks fired once per commit for watched subtrees
//! - **Replication**: per-client snapshot cursors and whitelisted diffs
//! - **INDI**: connection lifecycle, device model, throttling, `wait`
//!
//! ## Usage
//!
//! ```rust,no_run
//! use indi_panel::{CancelToken, Panel, PanelConfig, Whitelist};
//!
//! async fn example() -> indi_panel::Result<()> {
//!     let panel = Panel::start(PanelConfig::default())?;
//!     let (_client, _diffs) = panel.attach_client(Whitelist::All);
//!
//!     let ct = CancelToken::new();
//!     panel
//!         .wait(&ct, false, |tree| tree.device("CCD Simulator").exists().then_some(()))
//!         .await?;
//!     panel
//!         .set_param(&ct, "CCD Simulator", "CCD_EXPOSURE", &[("CCD_EXPOSURE_VALUE", "2")])
//!         .await?;
//!
//!     panel.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `indi_panel::core` - Serial clock, paths, whitelists, diffs
//! - `indi_panel::store` - Versioned store and snapshots
//! - `indi_panel::sync` - Synchronizers, hub, replication
//! - `indi_panel::indi` - INDI protocol client

pub mod config;
pub mod error;
pub mod panel;

pub use indi_panel_core as core;
pub use indi_panel_indi as indi;
pub use indi_panel_store as store;
pub use indi_panel_sync as sync;

pub use config::{HubConfig, IndiConfig, PanelConfig};
pub use error::{PanelError, Result};
pub use panel::Panel;

pub use indi_panel_core::{apply_diff, Diff, PathSpec, SerialClock, Whitelist};
pub use indi_panel_indi::{
    CancelToken, ConnectionState, ConnectionStatus, Connector, DeviceHandle, DeviceTreeView,
    IndiConnection, VectorHandle, VectorKind, VectorState,
};
pub use indi_panel_store::Store;
pub use indi_panel_sync::{ClientId, CommitReport, ReplicaCopy, SyncToken};
