//! WebSocket read pump: decodes STOMP frames and hands them to the session.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use wardbell_protocol::{
    Command, Frame, FrameError, decode_frames_bytes_partial, decode_frames_partial,
};

use crate::stomp_client::{CloseReason, SessionCallbacks};

/// Reads messages from the WebSocket and dispatches STOMP frames.
///
/// When `ttl` is set, any inbound traffic (heartbeats included) must arrive
/// within it or the session is considered dead. `on_closed` fires exactly
/// once when the loop ends for any reason other than cancellation.
pub(crate) async fn read_pump<S>(
    mut read: S,
    callbacks: SessionCallbacks,
    write_tx: mpsc::Sender<tungstenite::Message>,
    ttl: Option<Duration>,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let liveness = tokio::time::sleep(ttl.unwrap_or_default());
    tokio::pin!(liveness);

    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => return,

            () = &mut liveness, if ttl.is_some() => {
                warn!("no traffic from broker within heartbeat window, closing");
                break CloseReason::HeartbeatTimeout;
            }

            msg = read.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        break CloseReason::TransportError(e.to_string());
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break CloseReason::TransportClosed;
                    }
                };

                if let Some(ttl) = ttl {
                    liveness.as_mut().reset(tokio::time::Instant::now() + ttl);
                }

                match msg {
                    tungstenite::Message::Ping(data) => {
                        trace!("received ping, sending pong");
                        let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                        continue;
                    }
                    tungstenite::Message::Close(_) => {
                        debug!("received close frame");
                        break CloseReason::TransportClosed;
                    }
                    _ => {}
                }

                let Some((frames, error)) = frames_in(&msg) else {
                    continue;
                };
                if let Some(reason) = handle_frames(frames, &callbacks) {
                    break reason;
                }
                if let Some(e) = error {
                    warn!("dropping undecodable frame: {e}");
                }
            }
        }
    };

    if !cancel.is_cancelled() {
        (callbacks.on_closed)(reason);
    }
}

/// Dispatches decoded frames. Returns a close reason if the broker sent ERROR.
fn handle_frames(frames: Vec<Frame>, callbacks: &SessionCallbacks) -> Option<CloseReason> {
    for frame in frames {
        match frame.command {
            Command::Message => (callbacks.on_message)(frame),
            Command::Error => {
                let message = frame.error_message();
                warn!(%message, "broker sent ERROR");
                return Some(CloseReason::ProtocolError(message));
            }
            Command::Receipt => {
                trace!(receipt = frame.header("receipt-id").unwrap_or(""), "receipt")
            }
            other => debug!(command = %other, "ignoring unexpected frame"),
        }
    }
    None
}

/// Decodes the STOMP frames carried by a WebSocket message.
///
/// Returns `None` for control messages. Heartbeat-only payloads decode to an
/// empty list. Frames ahead of a malformed one are kept and the decode error
/// is returned next to them.
pub(crate) fn frames_in(msg: &tungstenite::Message) -> Option<(Vec<Frame>, Option<FrameError>)> {
    match msg {
        tungstenite::Message::Text(text) => Some(decode_frames_partial(text.as_str())),
        tungstenite::Message::Binary(bytes) => Some(decode_frames_bytes_partial(bytes)),
        _ => None,
    }
}
