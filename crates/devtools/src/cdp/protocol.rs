//! CDP Protocol Types
//!
//! These are the fundamental types for CDP communication.
//! Keep them minimal - domain-specific payloads stay as `Value`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Request ID - monotonically increasing
pub type RequestId = u64;

/// Fired when the main frame finished loading
pub const LOAD_EVENT_FIRED: &str = "Page.loadEventFired";

/// Fired when the debugging session is detached from its target
pub const INSPECTOR_DETACHED: &str = "Inspector.detached";

/// Fired when the renderer of the target crashed
pub const TARGET_CRASHED: &str = "Inspector.targetCrashed";

/// `Inspector.detached` reasons meaning the target is gone for good
pub const TERMINAL_DETACH_REASONS: &[&str] = &["target_closed", "Render process gone."];

/// CDP Request sent to browser
#[derive(Debug, Clone, Serialize)]
pub struct CDPRequest {
    pub id: RequestId,
    pub method: String,
    pub params: Value,
}

impl CDPRequest {
    /// Missing params encode as an empty object
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id,
            method: method.into(),
            params: params.unwrap_or_else(|| Value::Object(Map::new())),
        }
    }
}

/// CDP Response from browser
#[derive(Debug, Clone, Deserialize)]
pub struct CDPResponse {
    pub id: RequestId,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<ErrorPayload>,
}

/// Error body of a failed reply
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// CDP Event from browser (no request ID)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CDPEvent {
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

impl CDPEvent {
    /// String field of the params object, if present
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.as_ref()?.get(key)?.as_str()
    }
}

/// One decoded inbound frame: a reply to a request or an unsolicited event
#[derive(Debug, Clone)]
pub enum InboundFrame {
    Reply(CDPResponse),
    Event(CDPEvent),
}

impl InboundFrame {
    /// Classify a raw frame.
    ///
    /// An integer `id` makes it a reply. Anything else that is a JSON object is
    /// an event; objects without a string `method` get an empty method name,
    /// which no handler claims.
    pub fn decode(text: &str) -> serde_json::Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        let Value::Object(mut obj) = value else {
            return Err(serde::de::Error::custom("frame is not a JSON object"));
        };

        if obj.get("id").is_some_and(Value::is_u64) {
            return serde_json::from_value(Value::Object(obj)).map(InboundFrame::Reply);
        }

        let method = match obj.remove("method") {
            Some(Value::String(method)) => method,
            _ => String::new(),
        };
        let params = obj.remove("params");
        Ok(InboundFrame::Event(CDPEvent { method, params }))
    }
}
