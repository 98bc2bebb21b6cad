//! Cooperative cancellation and predicate waits.
//!
//! [`wait`] re-evaluates a predicate over the device tree each time the
//! connection reports progress (a message processed, a state change), until
//! the predicate yields a value, the token is cancelled, or the connection
//! drops. [`with_timeout`] bounds any such wait and runs a hook when the
//! deadline passes.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use crate::connection::{ConnectionState, IndiConnection};
use crate::device::DeviceTreeView;
use crate::error::{IndiError, Result};
use crate::message::VectorState;

/// A cloneable cancellation flag. Cancelling is sticky.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Checkpoint: `Err(Cancelled)` once the token fired.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(IndiError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Wait until `predicate` returns `Some`.
///
/// The predicate runs against a consistent view of the device tree. Unless
/// `allow_disconnected` is set, the wait fails with
/// [`IndiError::Disconnected`] whenever the connection is not established.
pub async fn wait<T, F>(
    conn: &IndiConnection,
    ct: &CancelToken,
    allow_disconnected: bool,
    mut predicate: F,
) -> Result<T>
where
    F: FnMut(&DeviceTreeView<'_>) -> Option<T>,
{
    let mut status = conn.subscribe();
    loop {
        ct.check()?;
        let current = *status.borrow_and_update();
        if !allow_disconnected && current.state != ConnectionState::Connected {
            return Err(IndiError::Disconnected);
        }
        if let Some(value) = conn.with_tree(&mut predicate) {
            return Ok(value);
        }

        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    return Err(IndiError::Disconnected);
                }
            }
            _ = ct.cancelled() => return Err(IndiError::Cancelled),
        }
    }
}

/// Run `future` with a deadline. On expiry `on_timeout` runs (e.g. to send
/// an abort command) and the result is [`IndiError::Timeout`].
pub async fn with_timeout<T, Fut, H>(duration: Duration, future: Fut, on_timeout: H) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
    H: FnOnce(),
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => {
            on_timeout();
            Err(IndiError::Timeout(duration))
        }
    }
}

/// Write a vector and wait for the driver to settle it.
///
/// Waits until the vector exists and is not Busy, sends the new values, then
/// waits for a non-Busy state. An Alert answer is an error.
pub async fn set_param(
    conn: &IndiConnection,
    ct: &CancelToken,
    device: &str,
    vector: &str,
    values: &[(&str, &str)],
) -> Result<()> {
    wait(conn, ct, false, |tree| {
        let v = tree.device(device).vector(vector);
        (v.exists() && v.is_ready_for_order()).then_some(())
    })
    .await?;

    ct.check()?;
    conn.device(device).vector(vector).set_values(values)?;
    debug!(device, vector, "parameter sent, waiting for driver");

    wait(conn, ct, false, |tree| {
        let v = tree.device(device).vector(vector);
        match v.state() {
            None => Some(Err(IndiError::NotFound(format!("{device}.{vector}")))),
            Some(VectorState::Busy) => None,
            Some(VectorState::Alert) => Some(Err(IndiError::Alert {
                device: device.to_string(),
                vector: vector.to_string(),
            })),
            Some(_) => Some(Ok(())),
        }
    })
    .await?
}
