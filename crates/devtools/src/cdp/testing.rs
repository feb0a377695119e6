//! In-process fake browser for client tests
//!
//! Speaks the WebSocket side of the protocol on 127.0.0.1:<random>. A
//! responder decides what to send back for every request; tests can also push
//! unsolicited frames, or raw bytes, into the most recent connection.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

pub type Responder = Arc<dyn Fn(&Value) -> Vec<Message> + Send + Sync>;

/// Something to push into a live connection
enum Inject {
    Frame(Message),
    /// Written straight to the TCP stream, bypassing WebSocket framing
    Raw(Vec<u8>),
}

pub struct MockBrowser {
    pub url: String,
    /// TCP connections accepted, including rejected ones
    pub accepts: Arc<AtomicUsize>,
    /// Completed WebSocket handshakes
    pub connections: Arc<AtomicUsize>,
    /// WebSocket connections that ended (closed by either side or failed)
    pub disconnects: Arc<AtomicUsize>,
    current: Arc<Mutex<Option<mpsc::UnboundedSender<Inject>>>>,
    task: JoinHandle<()>,
}

impl MockBrowser {
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(&Value) -> Vec<Message> + Send + Sync + 'static,
    {
        Self::start_rejecting(0, responder).await
    }

    /// Drop the first `reject` TCP connections before completing any handshake
    pub async fn start_rejecting<F>(reject: usize, responder: F) -> Self
    where
        F: Fn(&Value) -> Vec<Message> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!(
            "ws://{}/devtools/browser/mock",
            listener.local_addr().unwrap()
        );

        let responder: Responder = Arc::new(responder);
        let accepts = Arc::new(AtomicUsize::new(0));
        let connections = Arc::new(AtomicUsize::new(0));
        let disconnects = Arc::new(AtomicUsize::new(0));
        let current = Arc::new(Mutex::new(None));

        let task = {
            let accepts = accepts.clone();
            let connections = connections.clone();
            let disconnects = disconnects.clone();
            let current = current.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    if accepts.fetch_add(1, Ordering::SeqCst) < reject {
                        drop(stream);
                        continue;
                    }
                    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                        continue;
                    };
                    connections.fetch_add(1, Ordering::SeqCst);

                    let (tx, rx) = mpsc::unbounded_channel();
                    *current.lock().unwrap() = Some(tx);
                    let responder = responder.clone();
                    let disconnects = disconnects.clone();
                    tokio::spawn(async move {
                        serve(ws, responder, rx).await;
                        disconnects.fetch_add(1, Ordering::SeqCst);
                    });
                }
            })
        };

        Self {
            url,
            accepts,
            connections,
            disconnects,
            current,
            task,
        }
    }

    /// Push a frame into the latest connection
    pub fn inject(&self, frame: Message) {
        self.push(Inject::Frame(frame));
    }

    /// Push bytes that are not a valid WebSocket frame into the latest connection
    pub fn inject_raw(&self, bytes: Vec<u8>) {
        self.push(Inject::Raw(bytes));
    }

    fn push(&self, item: Inject) {
        if let Some(tx) = self.current.lock().unwrap().as_ref() {
            let _ = tx.send(item);
        }
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn accepts(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl Drop for MockBrowser {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    mut ws: WebSocketStream<TcpStream>,
    responder: Responder,
    mut inject: mpsc::UnboundedReceiver<Inject>,
) {
    loop {
        tokio::select! {
            msg = ws.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let Ok(request) = serde_json::from_str::<Value>(&text) else {
                        continue;
                    };
                    for frame in responder(&request) {
                        if ws.send(frame).await.is_err() {
                            return;
                        }
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return,
            },
            Some(item) = inject.recv() => {
                let sent = match item {
                    Inject::Frame(frame) => ws.send(frame).await.is_ok(),
                    Inject::Raw(bytes) => ws.get_mut().write_all(&bytes).await.is_ok(),
                };
                if !sent {
                    return;
                }
            }
        }
    }
}

pub fn reply(id: u64, result: Value) -> Message {
    Message::Text(json!({ "id": id, "result": result }).to_string())
}

pub fn error_reply(id: u64, message: &str) -> Message {
    Message::Text(json!({ "id": id, "error": { "code": -32000, "message": message } }).to_string())
}

pub fn event(method: &str, params: Value) -> Message {
    Message::Text(json!({ "method": method, "params": params }).to_string())
}

pub fn request_id(request: &Value) -> u64 {
    request["id"].as_u64().unwrap_or_default()
}

/// Poll `cond` until it holds, failing the test after ~2s
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Captured log output of the current thread
pub struct LogCapture {
    buf: Arc<Mutex<Vec<u8>>>,
    _guard: tracing::subscriber::DefaultGuard,
}

impl LogCapture {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buf.lock().unwrap()).into_owned()
    }
}

struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

impl io::Write for CaptureWriter {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Record everything logged on this thread until the capture is dropped.
///
/// `#[tokio::test]` runs on a current-thread runtime, so spawned tasks log here too.
pub fn capture_logs() -> LogCapture {
    let buf = Arc::new(Mutex::new(Vec::new()));
    let writer = buf.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .with_writer(move || CaptureWriter(writer.clone()))
        .finish();

    LogCapture {
        buf,
        _guard: tracing::subscriber::set_default(subscriber),
    }
}
