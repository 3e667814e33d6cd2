//! Outbound publishing.
//!
//! A publish resolves at call time: it either hands one SEND frame to the
//! live session or fails. Nothing is queued for later and nothing is retried.

use serde::Serialize;
use tracing::{debug, warn};

use wardbell_protocol::Frame;

use crate::manager::ConnectionManager;

/// Errors returned to callers of [`ConnectionManager::send_message`].
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("not connected to the broker")]
    NotConnected,

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl ConnectionManager {
    /// Serializes `payload` as JSON and sends it to `destination`.
    ///
    /// Fails with [`PublishError::NotConnected`] without touching the
    /// transport unless a session is live. Success means the frame was
    /// accepted for sending; the broker does not acknowledge it.
    pub fn send_message<T: Serialize + ?Sized>(
        &self,
        destination: &str,
        payload: &T,
    ) -> Result<(), PublishError> {
        let shared = self.ctx.lock();
        let Some(session) = shared.session.as_ref() else {
            debug!(destination, "publish rejected, not connected");
            return Err(PublishError::NotConnected);
        };

        let body = serde_json::to_string(payload)?;
        session
            .client
            .send_frame(&Frame::send(destination, body))
            .map_err(|e| {
                warn!(destination, error = %e, "publish failed");
                PublishError::SendFailed(e.to_string())
            })
    }
}
