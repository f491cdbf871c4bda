//! Outbound status notifications.
//!
//! The core publishes a [`StatusEvent`] on every residency transition and
//! never waits for acknowledgement. The transport is up to the host
//! application: implement [`StatusSink`] or use one of the sinks here.

use std::sync::{Mutex, PoisonError};

use tokio::sync::broadcast;
use tracing::trace;

use crate::types::StatusEvent;

/// Default capacity of [`BroadcastSink`] channels.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Receiver of status notifications.
///
/// `publish` is called from inside the core's operations and must not block.
pub trait StatusSink: Send + Sync {
    fn publish(&self, event: StatusEvent);
}

/// Sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl StatusSink for NoopSink {
    fn publish(&self, _event: StatusEvent) {}
}

/// Fan-out sink over a `tokio::sync::broadcast` channel.
///
/// Lossy by design of the channel: a receiver that falls more than the
/// buffer size behind observes `RecvError::Lagged` and skips ahead.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<StatusEvent>,
}

impl BroadcastSink {
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer_size.max(1));
        Self { tx }
    }

    /// Subscribe to events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER)
    }
}

impl StatusSink for BroadcastSink {
    fn publish(&self, event: StatusEvent) {
        // No receivers is not an error for a one-way notification.
        if self.tx.send(event).is_err() {
            trace!("status event dropped: no subscribers");
        }
    }
}

/// Sink that keeps every event in memory, for diagnostics and tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<StatusEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events recorded so far, oldest first.
    pub fn events(&self) -> Vec<StatusEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl StatusSink for RecordingSink {
    fn publish(&self, event: StatusEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
