//! CDP (Chrome DevTools Protocol) Client Implementation
//!
//! Core principle: Single WebSocket connection, replies routed by id.
//! The read half is owned by one task; writes share a mutex.

pub mod client;
pub mod connection;
pub mod dispatcher;
pub mod pending;
pub mod protocol;
mod receiver;

#[cfg(test)]
mod testing;

pub use client::{CDPClient, RequestOptions};
pub use connection::{EndpointResolver, StaticEndpoint};
pub use dispatcher::{EventCallback, EventDispatcher};
pub use protocol::{CDPEvent, CDPRequest, CDPResponse, InboundFrame, RequestId};
