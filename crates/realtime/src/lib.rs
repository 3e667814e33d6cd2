//! Realtime transport for the Wardbell nurse-call client.
//!
//! Keeps one STOMP-over-WebSocket session to the backend broker alive,
//! replays room subscriptions after every reconnect, and routes inbound
//! chat, call-bell and read-receipt messages to per-topic handlers.
//!
//! The crate logs through `tracing` and never installs a subscriber; hosts
//! set one up, e.g. `tracing_subscriber::fmt().with_env_filter(...)`.

pub mod config;
pub mod connector;
pub mod manager;
pub mod network;
pub mod publisher;
mod pumps;
pub(crate) mod reconnection;
pub(crate) mod registry;
pub mod stomp_client;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{ConfigError, RealtimeConfig};
pub use connector::{Connector, Transport, WsConnector};
pub use manager::{ConnectionGuard, ConnectionManager};
pub use network::{NetworkBridge, spawn_interface_monitor};
pub use publisher::PublishError;
pub use stomp_client::{CloseReason, StompError};
pub use types::{ConnectionEvent, ConnectionState, NetworkStatus, SubscribeOutcome};
