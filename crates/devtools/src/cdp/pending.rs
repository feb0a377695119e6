//! In-flight request slots
//!
//! One entry per outstanding request id, each holding the one-shot senders of
//! the callers waiting on it (more than one only for id replays). The receive
//! loop resolves a slot; a caller that times out removes its own waiter, so a
//! late reply finds nobody and is dropped.
//!
//! `fail_all` also closes the table until `reopen`, so a caller that registers
//! while the connection is going away fails at once instead of waiting forever.

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::oneshot;

use super::protocol::{CDPResponse, RequestId};

#[derive(Default)]
pub struct PendingRequests {
    slots: DashMap<RequestId, Vec<oneshot::Sender<CDPResponse>>>,
    closed: AtomicBool,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `id`. `None` once the table was failed.
    pub fn register(&self, id: RequestId) -> Option<oneshot::Receiver<CDPResponse>> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }

        let (tx, rx) = oneshot::channel();
        self.slots.entry(id).or_default().push(tx);

        // fail_all may have cleared between the check and the insert
        if self.closed.load(Ordering::SeqCst) {
            drop(rx);
            self.forget(id);
            return None;
        }
        Some(rx)
    }

    /// Accept waiters again after a new connection came up
    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    /// Deliver a reply to every live waiter of its id.
    ///
    /// Returns the reply back if nobody was waiting for it.
    pub fn resolve(&self, response: CDPResponse) -> Result<(), CDPResponse> {
        let Some((_, waiters)) = self.slots.remove(&response.id) else {
            return Err(response);
        };

        let mut delivered = false;
        for tx in waiters {
            if tx.send(response.clone()).is_ok() {
                delivered = true;
            }
        }

        if delivered {
            Ok(())
        } else {
            Err(response)
        }
    }

    /// Drop waiters whose receiver is gone (timed out or cancelled)
    pub fn forget(&self, id: RequestId) {
        self.slots.remove_if_mut(&id, |_, waiters| {
            waiters.retain(|tx| !tx.is_closed());
            waiters.is_empty()
        });
    }

    /// Drop every waiter and refuse new ones until `reopen`.
    ///
    /// Receivers of dropped waiters observe a closed channel.
    pub fn fail_all(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        let count = self.slots.len();
        self.slots.clear();
        count
    }

    /// Number of ids still awaiting a reply
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
