//! STOMP heartbeat pump: an EOL at the negotiated outgoing interval.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Sends a heartbeat every `period` until cancelled or the write pump is gone.
pub(crate) async fn heartbeat_pump(
    write_tx: mpsc::Sender<tungstenite::Message>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // Skip immediate first tick.

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                trace!("sending heartbeat");
                if write_tx.send(tungstenite::Message::Text("\n".into())).await.is_err() {
                    break;
                }
            }
        }
    }
}
