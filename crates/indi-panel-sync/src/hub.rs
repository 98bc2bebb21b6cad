//! The tick/commit driver.
//!
//! [`StateHub`] owns the store, its synchronizers and the replication
//! clients. Writers mutate the store, then call [`StateHub::commit`] once per
//! batch: the tick is closed, synchronizer passes run until no callback
//! mutates anything further, and every client receives its diff.

use indi_panel_core::{Diff, PathSpec, SerialClock, Whitelist};
use indi_panel_store::Store;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::error::Result;
use crate::replicator::{ClientId, Replicator};
use crate::synchronizer::{SyncToken, Synchronizer};

/// Configuration for commit behaviour.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Upper bound on synchronizer passes per commit. Callbacks that keep
    /// mutating what they watch would otherwise loop forever.
    pub max_passes: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { max_passes: 16 }
    }
}

/// What one commit did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitReport {
    /// Synchronizer passes run.
    pub passes: usize,
    /// Callback invocations across all passes.
    pub fired: usize,
    /// Diffs pushed to replication clients.
    pub diffs_sent: usize,
    /// The pass limit was reached with mutations still pending.
    pub truncated: bool,
}

/// Store + synchronizers + replication, driven one commit at a time.
#[derive(Debug)]
pub struct StateHub {
    store: Store,
    synchronizer: Synchronizer,
    replicator: Replicator,
    config: SyncConfig,
}

impl StateHub {
    pub fn new(clock: SerialClock, config: SyncConfig) -> Self {
        Self {
            store: Store::new(clock),
            synchronizer: Synchronizer::new(),
            replicator: Replicator::new(),
            config,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Mutable store access. Changes become visible to synchronizers and
    /// clients at the next [`commit`](Self::commit).
    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    pub fn get(&self, path: &[&str]) -> Option<Value> {
        self.store.get(path)
    }

    pub fn synchronizer(&self) -> &Synchronizer {
        &self.synchronizer
    }

    pub fn replicator(&self) -> &Replicator {
        &self.replicator
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Synchronizers
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a synchronizer. A forced initial trigger runs the callback
    /// now and commits whatever it wrote.
    pub fn add_synchronizer<F>(
        &mut self,
        spec: &PathSpec,
        callback: F,
        force_initial_trigger: bool,
    ) -> Result<SyncToken>
    where
        F: FnMut(&mut Store) -> anyhow::Result<()> + Send + 'static,
    {
        let token = self
            .synchronizer
            .add(&mut self.store, spec, callback, force_initial_trigger)?;
        if force_initial_trigger {
            self.commit();
        }
        Ok(token)
    }

    pub fn remove_synchronizer(&mut self, token: SyncToken) -> bool {
        self.synchronizer.remove(token)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Replication
    // ─────────────────────────────────────────────────────────────────────────

    pub fn attach_client(&mut self, whitelist: Whitelist) -> (ClientId, mpsc::UnboundedReceiver<Diff>) {
        self.replicator.attach(&self.store, whitelist)
    }

    pub fn detach_client(&mut self, id: ClientId) -> Result<()> {
        self.replicator.detach(id)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Commit
    // ─────────────────────────────────────────────────────────────────────────

    /// Run `f` against the store, then commit.
    pub fn mutate<R>(&mut self, f: impl FnOnce(&mut Store) -> R) -> (R, CommitReport) {
        let out = f(&mut self.store);
        (out, self.commit())
    }

    /// Close the tick, run synchronizer passes until quiescent, then publish.
    pub fn commit(&mut self) -> CommitReport {
        let mut report = CommitReport::default();
        while self.store.end_tick() {
            if report.passes == self.config.max_passes {
                warn!(
                    max_passes = self.config.max_passes,
                    "synchronizers still mutating after pass limit"
                );
                report.truncated = true;
                break;
            }
            report.passes += 1;
            report.fired += self.synchronizer.run(&mut self.store);
        }
        report.diffs_sent = self.replicator.publish(&self.store);
        trace!(
            passes = report.passes,
            fired = report.fired,
            diffs = report.diffs_sent,
            "commit"
        );
        report
    }
}
