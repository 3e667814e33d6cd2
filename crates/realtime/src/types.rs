//! Public types for the realtime connection manager.

use std::sync::Arc;
use std::time::Duration;

use wardbell_protocol::InboundMessage;
use wardbell_protocol::constants::RECONNECT_DELAY;

/// Connection state of the broker session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No live broker connection.
    #[default]
    Disconnected,
    /// Socket upgrade or STOMP handshake in progress.
    Connecting,
    /// CONNECTED received; exactly one live connection exists.
    Connected,
}

/// Events emitted by the connection manager.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The connection state changed.
    StateChanged(ConnectionState),
    /// A reconnect attempt is scheduled.
    Reconnecting { attempt: u32, next_retry_secs: f64 },
    /// The broker sent an ERROR frame; the session was torn down.
    ProtocolError { message: String },
    /// Desired subscriptions were replayed after a handshake.
    Resubscribed { count: usize },
}

/// Host connectivity as reported to the network bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Online,
    Offline,
}

/// Result of [`ConnectionManager::subscribe_to_room`](crate::ConnectionManager::subscribe_to_room).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// The topic was already subscribed; nothing changed.
    AlreadySubscribed,
    /// Recorded, and will be sent to the broker on the next handshake.
    Deferred,
    /// Recorded and sent to the broker under this subscription id.
    Live { subscription_id: String },
}

/// Handler invoked for every message on a subscribed topic.
pub type MessageHandler = Arc<dyn Fn(InboundMessage) + Send + Sync>;

/// Hook invoked after every successful handshake, once subscriptions have
/// been replayed.
pub type ReconnectHook = Arc<dyn Fn() + Send + Sync>;

/// Reconnection policy: a fixed delay between attempts, retried forever.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: RECONNECT_DELAY,
        }
    }
}
