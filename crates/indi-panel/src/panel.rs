//! The Panel: one hub, one INDI connection, any number of clients.

use std::sync::Arc;

use indi_panel_core::{Diff, PathSpec, SerialClock, Whitelist};
use indi_panel_indi::{
    CancelToken, Connector, DeviceHandle, DeviceTreeView, IndiConnection, SharedHub, TcpConnector,
};
use indi_panel_store::Store;
use indi_panel_sync::{ClientId, CommitReport, StateHub, SyncToken};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::info;

use crate::config::PanelConfig;
use crate::error::Result;

/// The panel backend.
///
/// Owns the serial clock shared by the store and the connection, the hub
/// behind a mutex, and the connection task. Every method that mutates the
/// hub commits before returning, so synchronizers and clients observe each
/// change exactly once.
pub struct Panel {
    config: PanelConfig,
    clock: SerialClock,
    hub: SharedHub,
    connection: IndiConnection,
}

impl Panel {
    /// Connect over TCP to the configured INDI server.
    pub fn start(config: PanelConfig) -> Result<Self> {
        let connector = Arc::new(TcpConnector::new(config.indi.host.clone(), config.indi.port));
        Self::with_connector(config, connector)
    }

    /// Connect through a caller-supplied transport.
    pub fn with_connector(config: PanelConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;
        let clock = SerialClock::new();
        let hub = Arc::new(Mutex::new(StateHub::new(clock.clone(), config.sync_config())));
        info!(server = %connector.describe(), "starting indi panel");
        let connection =
            IndiConnection::spawn(hub.clone(), clock.clone(), config.connection_config(), connector);
        Ok(Self {
            config,
            clock,
            hub,
            connection,
        })
    }

    pub fn config(&self) -> &PanelConfig {
        &self.config
    }

    pub fn clock(&self) -> &SerialClock {
        &self.clock
    }

    pub fn hub(&self) -> &SharedHub {
        &self.hub
    }

    pub fn connection(&self) -> &IndiConnection {
        &self.connection
    }

    pub fn device(&self, name: &str) -> DeviceHandle {
        self.connection.device(name)
    }

    /// Plain value at `path`.
    pub fn get(&self, path: &[&str]) -> Option<Value> {
        self.hub.lock().get(path)
    }

    /// Read the device tree under the hub lock.
    pub fn with_tree<R>(&self, f: impl FnOnce(&DeviceTreeView<'_>) -> R) -> R {
        self.connection.with_tree(f)
    }

    /// Apply local writes (outside the device tree) and commit.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut Store) -> R) -> (R, CommitReport) {
        self.hub.lock().mutate(f)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Synchronizers and clients
    // ─────────────────────────────────────────────────────────────────────────

    /// Register `callback` for every path `spec` expands to.
    ///
    /// Callbacks run while the hub lock is held. They must only touch the
    /// `Store` they are given: calling back into this `Panel`, a
    /// [`DeviceHandle`] or the connection from a callback deadlocks.
    pub fn add_synchronizer<F>(
        &self,
        spec: &PathSpec,
        callback: F,
        force_initial_trigger: bool,
    ) -> Result<SyncToken>
    where
        F: FnMut(&mut Store) -> anyhow::Result<()> + Send + 'static,
    {
        let token = self
            .hub
            .lock()
            .add_synchronizer(spec, callback, force_initial_trigger)?;
        Ok(token)
    }

    pub fn remove_synchronizer(&self, token: SyncToken) -> bool {
        self.hub.lock().remove_synchronizer(token)
    }

    /// Attach a replication client. The first diff on the channel is the
    /// full (filtered) state.
    pub fn attach_client(&self, whitelist: Whitelist) -> (ClientId, mpsc::UnboundedReceiver<Diff>) {
        self.hub.lock().attach_client(whitelist)
    }

    pub fn detach_client(&self, id: ClientId) -> Result<()> {
        self.hub.lock().detach_client(id)?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Device control
    // ─────────────────────────────────────────────────────────────────────────

    /// Wait for a predicate over the device tree. See [`indi_panel_indi::wait`].
    pub async fn wait<T, F>(&self, ct: &CancelToken, allow_disconnected: bool, predicate: F) -> Result<T>
    where
        F: FnMut(&DeviceTreeView<'_>) -> Option<T>,
    {
        Ok(indi_panel_indi::wait(&self.connection, ct, allow_disconnected, predicate).await?)
    }

    /// Write a vector and wait for the driver to settle it.
    pub async fn set_param(
        &self,
        ct: &CancelToken,
        device: &str,
        vector: &str,
        values: &[(&str, &str)],
    ) -> Result<()> {
        indi_panel_indi::set_param(&self.connection, ct, device, vector, values).await?;
        Ok(())
    }

    /// Stop the connection task. The device tree is cleared; other state
    /// and attached clients stay.
    pub async fn shutdown(&self) {
        self.connection.shutdown().await;
        info!("indi panel stopped");
    }
}

impl Drop for Panel {
    fn drop(&mut self) {
        self.connection.close();
    }
}
