//! Connection Manager - owns the WebSocket of one client
//!
//! Opening goes through the retry executor, each handshake attempt bounded by
//! its own deadline. The live socket is split: the write half stays here
//! behind a mutex shared with the receive loop, the read half belongs to the
//! loop. Whoever ends the session first closes the write half.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::SinkExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::config::RetryPolicy;
use crate::error::{CDPError, Result};
use crate::retry::{retry, with_timeout};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub type WsSink = SplitSink<WsStream, Message>;
pub type WsSource = SplitStream<WsStream>;
pub type SharedSink = Arc<Mutex<WsSink>>;

/// Upper bound on sending the close frame; a stalled peer must not hang teardown
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Supplies the WebSocket debugger URL for each connect.
///
/// Discovery (asking the browser's `/json/version` endpoint) lives outside this
/// crate; implement this trait to plug it in.
#[async_trait]
pub trait EndpointResolver: Send + Sync {
    async fn resolve(&self) -> Result<String>;
}

/// A fixed, already known debugger URL
#[derive(Debug, Clone)]
pub struct StaticEndpoint(pub String);

#[async_trait]
impl EndpointResolver for StaticEndpoint {
    async fn resolve(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Reject anything that is not a ws:// or wss:// URL with a host
pub fn validate_endpoint(endpoint: &str) -> Result<Url> {
    let url = Url::parse(endpoint)
        .map_err(|e| CDPError::Connection(format!("invalid endpoint {:?}: {}", endpoint, e)))?;

    match url.scheme() {
        "ws" | "wss" if url.host().is_some() => Ok(url),
        "ws" | "wss" => Err(CDPError::Connection(format!(
            "endpoint {} has no host",
            endpoint
        ))),
        scheme => Err(CDPError::Connection(format!(
            "unsupported endpoint scheme {:?} in {}",
            scheme, endpoint
        ))),
    }
}

/// Resolve the endpoint and complete the WebSocket handshake under `policy`
pub async fn open(resolver: &dyn EndpointResolver, policy: &RetryPolicy) -> Result<(WsStream, Url)> {
    let endpoint = validate_endpoint(&resolver.resolve().await?)?;

    let ws = retry(policy, |attempt| {
        let endpoint = endpoint.clone();
        async move {
            tracing::debug!("Connecting to {} (attempt {})", endpoint, attempt);
            with_timeout(policy.attempt_timeout, async {
                let (ws, _) = connect_async(endpoint.as_str()).await?;
                Ok::<_, CDPError>(ws)
            })
            .await
        }
    })
    .await?;

    Ok((ws, endpoint))
}

/// A live socket: write half, plus the receive loop reading the other half
pub struct Connection {
    pub sink: SharedSink,
    shutdown: Option<oneshot::Sender<()>>,
    reader: JoinHandle<()>,
}

impl Connection {
    pub fn new(sink: SharedSink, shutdown: oneshot::Sender<()>, reader: JoinHandle<()>) -> Self {
        Self {
            sink,
            shutdown: Some(shutdown),
            reader,
        }
    }

    /// Whether the receive loop already exited on its own
    pub fn is_finished(&self) -> bool {
        self.reader.is_finished()
    }

    /// Stop the receive loop, close the socket, and join the loop.
    ///
    /// Close errors are logged, never returned: the socket is going away either way.
    pub async fn shutdown(mut self, id: &str) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(()); // Loop may already be gone
        }

        close_sink(id, &self.sink).await;

        if let Err(e) = (&mut self.reader).await {
            if !e.is_cancelled() {
                tracing::error!("[{}] Receive loop panicked: {}", id, e);
            }
        }
    }
}

/// Send a close frame and flush. Safe to call on an already closed sink.
pub async fn close_sink(id: &str, sink: &Mutex<WsSink>) {
    let closing = async { sink.lock().await.close().await };

    match tokio::time::timeout(CLOSE_TIMEOUT, closing).await {
        Ok(Ok(())) => {}
        Ok(Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed)) => {
            tracing::debug!("[{}] WebSocket already closed", id);
        }
        Ok(Err(e)) => tracing::warn!("[{}] Error while closing WebSocket: {}", id, e),
        Err(_) => tracing::warn!(
            "[{}] Closing WebSocket timed out after {:?}",
            id,
            CLOSE_TIMEOUT
        ),
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_validate_endpoint() {
        assert!(validate_endpoint("ws://127.0.0.1:9222/devtools/browser/abc").is_ok());
        assert!(validate_endpoint("wss://remote.example:443/devtools/page/1").is_ok());

        assert!(matches!(
            validate_endpoint("http://127.0.0.1:9222/json/version"),
            Err(CDPError::Connection(msg)) if msg.contains("scheme")
        ));
        assert!(validate_endpoint("not a url").is_err());
    }

    #[tokio::test]
    async fn test_static_endpoint() {
        let resolver = StaticEndpoint("ws://localhost:9222/devtools/browser".to_string());
        assert_eq!(
            resolver.resolve().await.unwrap(),
            "ws://localhost:9222/devtools/browser"
        );
    }

    #[tokio::test]
    async fn test_open_refused_exhausts_retries() {
        // Grab a free port, then release it so nothing listens there
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let resolver = StaticEndpoint(format!("ws://{}/devtools/browser", addr));
        let policy = RetryPolicy::new(2, Duration::ZERO, Duration::from_secs(2));

        let result = open(&resolver, &policy).await;
        assert!(matches!(result, Err(CDPError::Connection(_))));
    }

    #[tokio::test]
    async fn test_open_times_out_on_silent_peer() {
        // Accepts TCP but never answers the HTTP upgrade
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _hold = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let resolver = StaticEndpoint(format!("ws://{}/devtools/browser", addr));
        let policy = RetryPolicy::new(1, Duration::ZERO, Duration::from_millis(100));

        let result = open(&resolver, &policy).await;
        assert!(matches!(result, Err(CDPError::Timeout(_))));
    }
}
