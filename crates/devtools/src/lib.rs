//! DevTools Protocol Client - connection and correlation engine
//!
//! One persistent WebSocket to a browser's debugging endpoint. Requests get
//! increasing ids and are matched to their replies by id; everything without
//! a waiting caller is an event and goes to the dispatcher.
//!
//! # Layout
//!
//! 1. **`retry`**: bounded retries and deadlines, used by connect and by every request
//! 2. **`cdp::connection`**: endpoint resolution, handshake, teardown
//! 3. **`cdp::receiver`**: the background read loop, one per live socket
//! 4. **`cdp::client`**: the session handle callers hold
//!
//! Page-level helpers (navigate, evaluate, screenshots) are callers of
//! `CDPClient::send_request` and live outside this crate.

pub mod cdp;
pub mod config;
pub mod error;
pub mod events;
pub mod retry;

pub use cdp::{CDPClient, EndpointResolver, RequestOptions, StaticEndpoint};
pub use config::{ClientConfig, RetryPolicy};
pub use error::{CDPError, Result};
pub use events::{EventBus, SessionEvent};
