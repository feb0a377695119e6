//! CDP Client - The Core Communication Layer
//!
//! Design decisions:
//! 1. Single WebSocket per client, reconnectable, never two at once
//! 2. Request/response matching via ID: one completion slot per in-flight request
//! 3. Events go to the dispatcher: callbacks, ready flag, broadcast bus
//! 4. A dropped connection heals itself once on the next request; a terminated target does not

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tracing::Instrument;

use super::connection::{self, Connection, EndpointResolver, StaticEndpoint};
use super::dispatcher::{EventCallback, EventDispatcher};
use super::pending::PendingRequests;
use super::protocol::*;
use super::receiver;
use crate::config::ClientConfig;
use crate::error::{CDPError, Result};
use crate::events::SessionEvent;
use crate::retry::with_timeout;

/// Per-call knobs for `send_request_with`
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Overrides `ClientConfig::request_timeout`
    pub timeout: Option<Duration>,

    /// When false, the request goes out under the last issued id (replay)
    pub increment_id: bool,
}

impl RequestOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::default()
        }
    }

    pub fn replay() -> Self {
        Self {
            increment_id: false,
            ..Self::default()
        }
    }
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            increment_id: true,
        }
    }
}

/// State shared between the client and its receive loop
pub(crate) struct SessionState {
    pub id: String,

    /// Monotonic request ID counter, survives reconnects
    pub next_id: AtomicU64,

    /// True while a socket exists and its receive loop runs
    pub alive: AtomicBool,

    pub pending: PendingRequests,

    pub dispatcher: EventDispatcher,

    /// Set when the target went away; blocks automatic reconnects
    pub termination: RwLock<Option<String>>,
}

/// CDP Client - one session with one browser endpoint
pub struct CDPClient {
    config: ClientConfig,
    resolver: Arc<dyn EndpointResolver>,
    state: Arc<SessionState>,

    /// Live socket, if any. Also serializes connect and close.
    connection: Mutex<Option<Connection>>,
}

impl CDPClient {
    /// Create a client for `config.endpoint`. Nothing is opened yet.
    pub fn new(config: ClientConfig) -> Self {
        let resolver = Arc::new(StaticEndpoint(config.endpoint.clone()));
        Self::with_resolver(config, resolver)
    }

    /// Create a client that asks `resolver` for the endpoint on every connect
    pub fn with_resolver(config: ClientConfig, resolver: Arc<dyn EndpointResolver>) -> Self {
        let state = Arc::new(SessionState {
            id: config.id.clone(),
            next_id: AtomicU64::new(1),
            alive: AtomicBool::new(false),
            pending: PendingRequests::new(),
            dispatcher: EventDispatcher::new(config.id.clone()),
            termination: RwLock::new(None),
        });

        Self {
            config,
            resolver,
            state,
            connection: Mutex::new(None),
        }
    }

    /// Create and connect in one step
    pub async fn open(config: ClientConfig) -> Result<Arc<Self>> {
        let client = Self::new(config);
        client.connect().await?;
        Ok(Arc::new(client))
    }

    /// Connect to the DevTools endpoint. No-op when already connected.
    pub async fn connect(&self) -> Result<()> {
        let mut current = self.connection.lock().await;

        if current.is_some() && self.is_connected() {
            tracing::debug!("[{}] Already connected", self.state.id);
            return Ok(());
        }

        // A loop that already exited on its own still has to be joined
        if let Some(stale) = current.take() {
            tracing::debug!(
                "[{}] Releasing dead connection (loop finished: {})",
                self.state.id,
                stale.is_finished()
            );
            stale.shutdown(&self.state.id).await;
        }

        // Handshake and retry logs carry the client id through this span
        let (ws, endpoint) = connection::open(self.resolver.as_ref(), &self.config.retry)
            .instrument(tracing::info_span!("cdp", client = %self.state.id))
            .await
            .map_err(|e| {
                tracing::error!("[{}] Failed to connect: {}", self.state.id, e);
                e
            })?;
        let (sink, source) = ws.split();
        let sink = Arc::new(Mutex::new(sink));

        *self.state.termination.write().await = None;
        self.state.dispatcher.reset_ready();
        self.state.pending.reopen();
        self.state.alive.store(true, Ordering::SeqCst);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let reader = tokio::spawn(receiver::run(
            self.state.clone(),
            sink.clone(),
            source,
            shutdown_rx,
        ));
        *current = Some(Connection::new(sink, shutdown_tx, reader));

        tracing::info!("[{}] Connected to {}", self.state.id, endpoint);
        self.state
            .dispatcher
            .bus()
            .publish(SessionEvent::Connected {
                endpoint: endpoint.to_string(),
            });
        Ok(())
    }

    /// Close the connection. Safe to call any number of times.
    pub async fn close(&self) {
        let mut current = self.connection.lock().await;
        let Some(connection) = current.take() else {
            return;
        };

        // Flag first so the receive loop treats what follows as intentional
        self.state.alive.store(false, Ordering::SeqCst);
        connection.shutdown(&self.state.id).await;

        let failed = self.state.pending.fail_all();
        tracing::info!(
            "[{}] Disconnected ({} in-flight request(s) dropped)",
            self.state.id,
            failed
        );
    }

    /// Send CDP request and wait for its reply
    pub async fn send_request(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> Result<Value> {
        self.send_request_with(method, params, RequestOptions::default())
            .await
    }

    /// Send CDP request with explicit timeout / id options
    pub async fn send_request_with(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        options: RequestOptions,
    ) -> Result<Value> {
        let method = method.into();

        if !self.is_connected() {
            if let Some(reason) = self.state.termination.read().await.clone() {
                return Err(CDPError::SessionTerminated(reason));
            }
            tracing::info!(
                "[{}] Not connected, reconnecting before {}",
                self.state.id,
                method
            );
            self.connect().await?;
        }

        let id = self.allocate_id(options.increment_id);
        let request = CDPRequest::new(id, method, params);
        let json = serde_json::to_string(&request)?;

        let sink = self
            .connection
            .lock()
            .await
            .as_ref()
            .map(|c| c.sink.clone())
            .ok_or_else(|| CDPError::Connection("connection closed".to_string()))?;

        // Slot first: the reply may beat the write's return.
        // Refused when the connection went down after the check above.
        let Some(rx) = self.state.pending.register(id) else {
            return Err(self.lost_reply_error(id).await);
        };

        tracing::debug!("[{}] -> {} {}", self.state.id, id, request.method);
        let written = sink.lock().await.send(Message::Text(json)).await;
        if let Err(e) = written {
            drop(rx);
            self.state.pending.forget(id);
            return Err(e.into());
        }

        let timeout = options.timeout.unwrap_or(self.config.request_timeout);
        let response = match with_timeout(timeout, async { Ok::<_, CDPError>(rx.await) }).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(self.lost_reply_error(id).await),
            Err(e) => {
                // Receiver is gone with the timed-out future; a late reply finds no slot
                self.state.pending.forget(id);
                tracing::warn!(
                    "[{}] {} ({}) got no reply within {:?}",
                    self.state.id,
                    request.method,
                    id,
                    timeout
                );
                return Err(e);
            }
        };

        if let Some(error) = response.error {
            return Err(CDPError::Protocol {
                code: error.code,
                message: error.message,
                data: error.data,
            });
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    fn allocate_id(&self, increment: bool) -> RequestId {
        if !increment {
            let last = self.state.next_id.load(Ordering::SeqCst) - 1;
            if last > 0 {
                return last;
            }
        }
        self.state.next_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn lost_reply_error(&self, id: RequestId) -> CDPError {
        match self.state.termination.read().await.clone() {
            Some(reason) => CDPError::SessionTerminated(reason),
            None => CDPError::Connection(format!("connection lost before reply to request {}", id)),
        }
    }

    /// Subscribe to CDP events
    pub fn subscribe(&self, method: impl Into<String>, callback: EventCallback) {
        self.state.dispatcher.subscribe(method, callback);
    }

    /// Listen to every session event
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.state.dispatcher.bus().subscribe()
    }

    /// Wait for the next event named `method`
    pub async fn wait_for_event(&self, method: &str, timeout: Duration) -> Result<CDPEvent> {
        self.state.dispatcher.wait_for_event(method, timeout).await
    }

    /// Wait until the page reported its load event
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<()> {
        self.state.dispatcher.wait_until_ready(timeout).await
    }

    /// Forget a previous load event, typically right before navigating
    pub fn reset_ready(&self) {
        self.state.dispatcher.reset_ready();
    }

    pub fn is_ready(&self) -> bool {
        self.state.dispatcher.is_ready()
    }

    pub fn is_connected(&self) -> bool {
        self.state.alive.load(Ordering::SeqCst)
    }

    /// Id the next incrementing request will get
    pub fn next_id(&self) -> RequestId {
        self.state.next_id.load(Ordering::SeqCst)
    }

    /// Requests still waiting for a reply
    pub fn pending_requests(&self) -> usize {
        self.state.pending.len()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}
