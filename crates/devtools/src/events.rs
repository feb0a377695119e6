//! Event Bus - Session events for any number of listeners
//!
//! Design: bounded tokio broadcast channel. Slow listeners lag, they never
//! block the receive loop.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::cdp::protocol::CDPEvent;

/// Default number of events buffered per listener
pub const EVENT_BUS_CAPACITY: usize = 1024;

/// Session events that can be dispatched
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
    Connected { endpoint: String },
    Disconnected { reason: Option<String> },
    LoadCompleted,
    Detached { reason: String },
    TargetCrashed,
    /// Every protocol event, known or not
    Protocol(CDPEvent),
}

/// Simple event bus using tokio broadcast channel
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event
    pub fn publish(&self, event: SessionEvent) {
        let _ = self.tx.send(event); // Ignore error if no subscribers
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
