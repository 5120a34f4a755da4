//! facegate-relay: websocket transport for gating events.
//!
//! [`EventRelay`] is the resilient publishing client used by the daemon;
//! [`BroadcastRelay`] is the fan-out server that subscribers connect to.

pub mod client;
pub mod server;

pub use client::{ConnectionState, EventRelay, RelayConfig, RelayError};
pub use server::{BroadcastRelay, Hub, SUBSCRIBER_QUEUE};
