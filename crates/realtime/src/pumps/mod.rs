//! Per-connection tasks spawned by [`StompClient`](crate::stomp_client::StompClient).

pub(crate) mod heartbeat;
pub(crate) mod read;
pub(crate) mod write;
