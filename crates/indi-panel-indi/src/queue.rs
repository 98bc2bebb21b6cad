//! Throttling of high-frequency driver updates.
//!
//! Drivers report fast-changing numbers (exposure countdowns) many times a
//! second. The [`MessageQueue`] delivers the first update of a burst right
//! away, then holds later ones in a single delayed slot per coalesce key
//! that fires at most once per expiration window. After the last real update
//! a placeholder ("fantom") copy still fires once, so consumers never see a
//! value older than the window.
//!
//! Non-delayable messages flush every pending delayed slot ahead of
//! themselves, so a hard state change is never reordered behind a throttled
//! duplicate.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::message::{IndiMessage, VectorKind, VectorState};

/// Throttling parameters.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Longest a delayed update may wait.
    pub default_expiration: Duration,
    /// Number vectors whose Busy updates may be throttled.
    pub delayable_vectors: Vec<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_expiration: Duration::from_millis(500),
            delayable_vectors: vec!["CCD_EXPOSURE".to_string()],
        }
    }
}

/// Identity of a throttled stream: message kind, device, vector and state.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CoalesceKey {
    kind: VectorKind,
    device: String,
    vector: String,
    state: Option<VectorState>,
}

#[derive(Debug)]
struct Entry {
    message: IndiMessage,
    /// `None` delivers as soon as possible.
    due: Option<Instant>,
    /// Placeholder re-delivery not backed by fresh traffic.
    fantom: bool,
    key: Option<CoalesceKey>,
}

/// FIFO of pending deliveries with per-key coalescing.
#[derive(Debug)]
pub struct MessageQueue {
    config: QueueConfig,
    entries: VecDeque<Entry>,
}

impl MessageQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            entries: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget everything pending, e.g. on disconnect.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Whether `message` may be throttled.
    pub fn is_delayable(&self, message: &IndiMessage) -> bool {
        match message {
            IndiMessage::Set(set) => {
                set.kind == VectorKind::Number
                    && set.state == Some(VectorState::Busy)
                    && self.config.delayable_vectors.iter().any(|v| *v == set.name)
            }
            _ => false,
        }
    }

    fn key_of(message: &IndiMessage) -> Option<CoalesceKey> {
        match message {
            IndiMessage::Set(set) => Some(CoalesceKey {
                kind: set.kind,
                device: set.device.clone(),
                vector: set.name.clone(),
                state: set.state,
            }),
            _ => None,
        }
    }

    /// Enqueue a freshly received message.
    pub fn push(&mut self, message: IndiMessage, now: Instant) {
        if !self.is_delayable(&message) {
            let before = self.entries.len();
            self.entries.retain(|e| !e.fantom);
            for entry in &mut self.entries {
                entry.due = None;
            }
            trace!(fantoms = before - self.entries.len(), "hard message flushes delayed entries");
            self.entries.push_back(Entry {
                message,
                due: None,
                fantom: false,
                key: None,
            });
            return;
        }

        let key = Self::key_of(&message);
        let pending = self
            .entries
            .iter_mut()
            .find(|e| e.due.is_some() && e.key == key);
        if let Some(entry) = pending {
            entry.message = message;
            entry.fantom = false;
            return;
        }

        let expiration = self.config.default_expiration;
        self.entries.push_back(Entry {
            message: message.clone(),
            due: None,
            fantom: false,
            key: key.clone(),
        });
        self.entries.push_back(Entry {
            message,
            due: Some(now + expiration),
            fantom: true,
            key,
        });
    }

    /// Remove and return the first entry that is ready at `now`.
    ///
    /// Delivering a live delayed entry re-arms a fantom for the same key; a
    /// fantom firing does not.
    pub fn pop_ready(&mut self, now: Instant) -> Option<IndiMessage> {
        let index = self
            .entries
            .iter()
            .position(|e| e.due.map_or(true, |due| due <= now))?;
        let entry = self.entries.remove(index)?;

        if entry.due.is_some() && !entry.fantom {
            self.entries.push_back(Entry {
                message: entry.message.clone(),
                due: Some(now + self.config.default_expiration),
                fantom: true,
                key: entry.key.clone(),
            });
        }
        Some(entry.message)
    }

    /// When the next entry becomes ready; `now` if one already is.
    pub fn next_due(&self, now: Instant) -> Option<Instant> {
        self.entries
            .iter()
            .map(|e| e.due.map_or(now, |due| due.max(now)))
            .min()
    }
}
