//! Event Dispatcher - reacts to unsolicited protocol events
//!
//! Known notifications update session state (ready flag, termination).
//! Every event, known or not, then goes to per-method callbacks and the bus.
//! Unknown methods are not an error: the protocol grows faster than this client.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

use super::protocol::{
    CDPEvent, INSPECTOR_DETACHED, LOAD_EVENT_FIRED, TARGET_CRASHED, TERMINAL_DETACH_REASONS,
};
use crate::error::{CDPError, Result};
use crate::events::{EventBus, SessionEvent};
use crate::retry::with_timeout;

/// Event subscriber callback
pub type EventCallback = Arc<dyn Fn(CDPEvent) + Send + Sync>;

/// What the receive loop should do after an event was dispatched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Continue,
    /// The target is gone; stop reading
    Terminate { reason: String },
}

pub struct EventDispatcher {
    /// Client id, for log lines
    id: String,

    /// Key: method name (e.g., "Page.loadEventFired"), Value: callbacks
    subscribers: DashMap<String, Vec<EventCallback>>,

    /// Set once the page reported its load event
    ready: watch::Sender<bool>,

    bus: EventBus,
}

impl EventDispatcher {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            subscribers: DashMap::new(),
            ready: watch::Sender::new(false),
            bus: EventBus::new(),
        }
    }

    /// Handle one inbound event
    pub fn dispatch(&self, event: CDPEvent) -> Disposition {
        let disposition = match event.method.as_str() {
            LOAD_EVENT_FIRED => {
                self.ready.send_replace(true);
                self.bus.publish(SessionEvent::LoadCompleted);
                Disposition::Continue
            }
            INSPECTOR_DETACHED => {
                let reason = event.param_str("reason").unwrap_or("unknown").to_string();
                tracing::warn!("[{}] Inspector detached: {}", self.id, reason);
                self.bus.publish(SessionEvent::Detached {
                    reason: reason.clone(),
                });
                if is_terminal_reason(&reason) {
                    Disposition::Terminate { reason }
                } else {
                    Disposition::Continue
                }
            }
            TARGET_CRASHED => {
                tracing::warn!("[{}] Target crashed", self.id);
                self.ready.send_replace(false);
                self.bus.publish(SessionEvent::TargetCrashed);
                Disposition::Continue
            }
            _ => Disposition::Continue,
        };

        let callbacks = self
            .subscribers
            .get(&event.method)
            .map(|entry| entry.value().clone());
        if let Some(callbacks) = callbacks {
            for callback in callbacks {
                callback(event.clone());
            }
        } else if !event.method.is_empty() {
            tracing::trace!("[{}] No subscriber for {}", self.id, event.method);
        }

        self.bus.publish(SessionEvent::Protocol(event));
        disposition
    }

    /// Subscribe a callback to one event method
    pub fn subscribe(&self, method: impl Into<String>, callback: EventCallback) {
        self.subscribers
            .entry(method.into())
            .or_default()
            .push(callback);
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    pub fn reset_ready(&self) {
        self.ready.send_replace(false);
    }

    /// Wait for the load event, or return at once if it was already seen
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.ready.subscribe();
        with_timeout(timeout, async move {
            rx.wait_for(|ready| *ready)
                .await
                .map(|_| ())
                .map_err(|_| CDPError::Connection("event dispatcher dropped".to_string()))
        })
        .await
    }

    /// Wait for the next event with the given method
    pub async fn wait_for_event(&self, method: &str, timeout: Duration) -> Result<CDPEvent> {
        let mut rx = self.bus.subscribe();
        let id = &self.id;
        with_timeout(timeout, async move {
            loop {
                match rx.recv().await {
                    Ok(SessionEvent::Protocol(event)) if event.method == method => {
                        return Ok(event)
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(
                            "[{}] Event listener lagged, skipped {} events",
                            id,
                            skipped
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(CDPError::Connection("event bus closed".to_string()))
                    }
                }
            }
        })
        .await
    }
}

pub fn is_terminal_reason(reason: &str) -> bool {
    TERMINAL_DETACH_REASONS.contains(&reason)
}
