//! Receive Loop - one task per live socket
//!
//! Reads frames until the client asks it to stop, the peer closes, the socket
//! fails, or the target reports it is gone. Replies go to their pending slot,
//! everything else to the event dispatcher. Whatever the exit path, the
//! session ends up marked not alive and every in-flight request is failed.
//! Unless the client itself is closing, the loop also closes the write half
//! so the socket does not outlive the session.

use futures_util::StreamExt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};

use super::client::SessionState;
use super::connection::{close_sink, SharedSink, WsSource};
use super::dispatcher::Disposition;
use super::protocol::InboundFrame;
use crate::events::SessionEvent;

/// Why the loop stopped
#[derive(Debug, Clone, PartialEq, Eq)]
enum Exit {
    /// Client called close
    Shutdown,
    /// Peer closed the socket in an orderly way
    Closed(String),
    /// Target reported it is gone
    Terminated(String),
    /// Read failed unexpectedly
    Failed(String),
}

pub(crate) async fn run(
    state: Arc<SessionState>,
    sink: SharedSink,
    mut source: WsSource,
    mut shutdown: oneshot::Receiver<()>,
) {
    let exit = loop {
        if !state.alive.load(Ordering::SeqCst) {
            break Exit::Shutdown;
        }

        let msg = tokio::select! {
            biased;
            _ = &mut shutdown => break Exit::Shutdown,
            msg = source.next() => msg,
        };

        match msg {
            Some(Ok(Message::Text(text))) => {
                if let Some(reason) = handle_frame(&state, &text) {
                    break Exit::Terminated(reason);
                }
            }
            Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                Ok(text) => {
                    if let Some(reason) = handle_frame(&state, text) {
                        break Exit::Terminated(reason);
                    }
                }
                Err(e) => tracing::warn!("[{}] Dropping non-UTF-8 frame: {}", state.id, e),
            },
            Some(Ok(Message::Close(frame))) => {
                let detail = match frame {
                    Some(f) if matches!(f.code, CloseCode::Normal | CloseCode::Away) => {
                        tracing::info!("[{}] WebSocket closed by browser", state.id);
                        format!("closed by browser ({})", f.code)
                    }
                    Some(f) => {
                        tracing::warn!(
                            "[{}] WebSocket closed by browser: {} {}",
                            state.id,
                            f.code,
                            f.reason
                        );
                        format!("closed by browser ({}): {}", f.code, f.reason)
                    }
                    None => {
                        tracing::info!("[{}] WebSocket closed by browser", state.id);
                        "closed by browser".to_string()
                    }
                };
                break Exit::Closed(detail);
            }
            Some(Ok(_)) => {} // Ping/Pong are answered by tungstenite
            Some(Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed))
            | None => {
                tracing::debug!("[{}] WebSocket stream ended", state.id);
                break Exit::Closed("connection closed".to_string());
            }
            Some(Err(e)) => {
                tracing::warn!("[{}] WebSocket read failed: {}", state.id, e);
                break Exit::Failed(e.to_string());
            }
        }
    };

    finish(&state, &sink, exit).await;
}

/// Route one text frame. Returns the reason if the target is gone.
fn handle_frame(state: &SessionState, text: &str) -> Option<String> {
    let frame = match InboundFrame::decode(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!("[{}] Dropping undecodable frame: {}", state.id, e);
            return None;
        }
    };

    match frame {
        InboundFrame::Reply(response) => {
            if let Err(response) = state.pending.resolve(response) {
                tracing::debug!(
                    "[{}] Dropping reply {}: no caller waiting (timed out or unknown)",
                    state.id,
                    response.id
                );
            }
            None
        }
        InboundFrame::Event(event) => match state.dispatcher.dispatch(event) {
            Disposition::Continue => None,
            Disposition::Terminate { reason } => Some(reason),
        },
    }
}

async fn finish(state: &SessionState, sink: &SharedSink, exit: Exit) {
    let reason = match exit {
        Exit::Shutdown => None,
        Exit::Terminated(reason) => {
            tracing::warn!("[{}] Session terminated by browser: {}", state.id, reason);
            *state.termination.write().await = Some(reason.clone());
            Some(reason)
        }
        Exit::Closed(reason) | Exit::Failed(reason) => Some(reason),
    };

    // Termination must be recorded before waiters learn the socket is gone
    state.alive.store(false, Ordering::SeqCst);

    let failed = state.pending.fail_all();
    if failed > 0 {
        tracing::debug!("[{}] Failed {} in-flight request(s)", state.id, failed);
    }

    // On Shutdown the client closes the socket itself
    if reason.is_some() {
        close_sink(&state.id, sink).await;
    }

    state
        .dispatcher
        .bus()
        .publish(SessionEvent::Disconnected { reason });
}
