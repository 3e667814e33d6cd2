//! WebSocket write pump: serialises outbound frames onto the socket.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use wardbell_protocol::constants::WS_WRITE_WAIT;

/// Writes queued messages to the WebSocket.
///
/// Queued messages take priority over cancellation, so frames accepted
/// before a close (DISCONNECT in particular) still reach the socket. Each
/// write is bounded by [`WS_WRITE_WAIT`].
pub(crate) async fn write_pump<S>(
    mut write: S,
    mut write_rx: mpsc::Receiver<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            msg = write_rx.recv() => msg,
            _ = cancel.cancelled() => match write_rx.try_recv() {
                Ok(msg) => Some(msg),
                Err(_) => None,
            },
        };
        let Some(msg) = next else { break };

        match tokio::time::timeout(WS_WRITE_WAIT, write.send(msg)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("WebSocket write error: {e}");
                return;
            }
            Err(_) => {
                warn!("WebSocket write timed out");
                return;
            }
        }
    }

    let _ = tokio::time::timeout(WS_WRITE_WAIT, write.send(tungstenite::Message::Close(None))).await;
}
