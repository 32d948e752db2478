//! Broadcast of billing lifecycle events.
//!
//! The coordinator publishes every state transition, backend failure and
//! recovery here, so hosts (UI, telemetry, the CLI) can observe billing
//! without polling.
//!
//! # Example
//!
//! ```rust
//! use navbill_core::event_bus::{BillingEvent, BillingEventBus};
//!
//! let bus = BillingEventBus::new();
//! let mut rx = bus.subscribe();
//!
//! bus.emit(BillingEvent::UsageReported);
//! assert_eq!(rx.try_recv().unwrap(), BillingEvent::UsageReported);
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::backend::BackendOperation;
use crate::session::{SessionState, SessionType};

/// Events beyond this many unread will make slow subscribers lag.
const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BillingEvent {
    StateChanged {
        previous: SessionState,
        current: SessionState,
        active_count: usize,
    },

    BackendFailed {
        operation: BackendOperation,
        reason: String,
    },

    /// A failed resume was healed by re-opening a session of this type.
    Recovered { session_type: SessionType },

    UsageReported,

    UsageReportFailed { reason: String },
}

pub struct BillingEventBus {
    sender: broadcast::Sender<BillingEvent>,
}

impl BillingEventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers.
    ///
    /// Returns the number of subscribers reached; 0 when nobody listens.
    pub fn emit(&self, event: BillingEvent) -> usize {
        log::trace!("billing event: {:?}", event);
        self.sender.send(event).unwrap_or(0)
    }

    /// Receive all future events. Past events are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<BillingEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BillingEventBus {
    fn default() -> Self {
        Self::new()
    }
}
