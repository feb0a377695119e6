//! Error types for CDP operations
//!
//! Flat taxonomy: every public call fails with exactly one of these.

use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::retry::TimedOut;

pub type Result<T> = std::result::Result<T, CDPError>;

#[derive(Error, Debug)]
pub enum CDPError {
    /// Handshake never succeeded, the socket failed, or it went away mid-request
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The browser answered with an explicit error payload
    #[error("CDP protocol error: {code} - {message}")]
    Protocol {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    #[error("Failed to decode frame: {0}")]
    Decode(#[from] serde_json::Error),

    /// The debugging target is gone; not retried automatically
    #[error("Session terminated: {0}")]
    SessionTerminated(String),
}

impl CDPError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CDPError::Timeout(_))
    }
}

impl From<TimedOut> for CDPError {
    fn from(elapsed: TimedOut) -> Self {
        CDPError::Timeout(elapsed.0)
    }
}

impl From<tungstenite::Error> for CDPError {
    fn from(e: tungstenite::Error) -> Self {
        CDPError::Connection(e.to_string())
    }
}
