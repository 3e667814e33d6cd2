use std::time::Duration;

/// STOMP versions offered in the CONNECT frame.
pub const STOMP_ACCEPT_VERSION: &str = "1.2,1.1,1.0";

/// WebSocket subprotocols advertised during the upgrade.
pub const STOMP_SUBPROTOCOLS: &str = "v12.stomp, v11.stomp, v10.stomp";

/// Broker endpoint appended to the backend host.
pub const DEFAULT_BROKER_PATH: &str = "/ws";

/// Interval at which the client promises to send heartbeats.
pub const HEARTBEAT_OUTGOING: Duration = Duration::from_millis(4000);

/// Interval at which the client asks the broker to send heartbeats.
pub const HEARTBEAT_INCOMING: Duration = Duration::from_millis(4000);

/// Silence longer than `incoming interval * HEARTBEAT_TTL_FACTOR` means the
/// connection is dead.
pub const HEARTBEAT_TTL_FACTOR: u32 = 2;

/// Fixed delay between reconnect attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Window in which repeated `initialize()` calls collapse into one attempt.
pub const INITIALIZE_DEBOUNCE: Duration = Duration::from_millis(500);

/// Time allowed for the socket upgrade plus the CONNECT/CONNECTED exchange.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed to flush a single outbound frame.
pub const WS_WRITE_WAIT: Duration = Duration::from_secs(10);

/// How often the host network interfaces are polled.
pub const NETWORK_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Maximum WebSocket message size in bytes (4 MB).
pub const WS_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Content type of every SEND body.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Application-level shape of an inbound message, read from the `type` or
/// `messageType` field of the decoded body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Chat,
    CallBell,
    ReadReceipt,
}

impl MessageKind {
    /// Maps a discriminant value to a kind. Matching is case-insensitive.
    pub fn from_discriminant(value: &str) -> Option<Self> {
        const CHAT: &[&str] = &["MESSAGE", "CHAT"];
        const CALL_BELL: &[&str] = &["NOTIFICATION", "CALL_BELL", "REQUEST"];
        const READ_RECEIPT: &[&str] = &["READ", "READ_RECEIPT"];

        let matches = |names: &[&str]| names.iter().any(|n| n.eq_ignore_ascii_case(value));
        if matches(CHAT) {
            Some(Self::Chat)
        } else if matches(CALL_BELL) {
            Some(Self::CallBell)
        } else if matches(READ_RECEIPT) {
            Some(Self::ReadReceipt)
        } else {
            None
        }
    }
}
