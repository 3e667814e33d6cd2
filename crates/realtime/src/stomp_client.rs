//! STOMP client for a single broker connection.
//!
//! Performs the CONNECT/CONNECTED handshake on a fresh [`Transport`], then
//! runs the read, write and heartbeat pumps until the connection drops or
//! the client is dropped.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use wardbell_protocol::constants::HEARTBEAT_TTL_FACTOR;
use wardbell_protocol::{Command, Frame, FrameError, HeartBeat};

use crate::connector::{FrameStream, Transport};

/// Errors from the STOMP client.
#[derive(Debug, thiserror::Error)]
pub enum StompError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("connection timed out")]
    Timeout,

    #[error("connection closed")]
    Closed,

    #[error("outbound queue is full")]
    QueueFull,

    #[error("broker error: {0}")]
    Protocol(String),
}

/// Why a live session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The broker sent an ERROR frame.
    ProtocolError(String),
    /// The socket reported an error.
    TransportError(String),
    /// Nothing arrived within the negotiated heartbeat window.
    HeartbeatTimeout,
    /// The socket closed cleanly or the stream ended.
    TransportClosed,
}

/// Callback for MESSAGE frames.
pub(crate) type FrameCallback = Box<dyn Fn(Frame) + Send + Sync>;

/// Callback fired once when the session ends on its own. Not fired when the
/// client is closed or dropped locally.
pub(crate) type CloseCallback = Box<dyn Fn(CloseReason) + Send + Sync>;

pub(crate) struct SessionCallbacks {
    pub(crate) on_message: FrameCallback,
    pub(crate) on_closed: CloseCallback,
}

/// Parameters of the CONNECT frame.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub host: String,
    pub heart_beat: HeartBeat,
    pub headers: Vec<(String, String)>,
}

/// A STOMP session over one WebSocket connection.
pub struct StompClient {
    write_tx: mpsc::Sender<tungstenite::Message>,
    heart_beat: HeartBeat,
    server: Option<String>,
    _read_handle: tokio::task::JoinHandle<()>,
    _write_handle: tokio::task::JoinHandle<()>,
    _heartbeat_handle: Option<tokio::task::JoinHandle<()>>,
    cancel: CancellationToken,
}

impl StompClient {
    /// Sends CONNECT on the transport and waits for CONNECTED.
    ///
    /// Callbacks are installed before the read pump starts, so no frame of
    /// this session can be routed before the caller is ready for it.
    pub(crate) async fn connect(
        transport: Transport,
        request: &ConnectRequest,
        callbacks: SessionCallbacks,
    ) -> Result<Self, StompError> {
        let Transport {
            mut sink,
            mut stream,
        } = transport;

        let connect = Frame::connect(
            &request.host,
            request.heart_beat,
            request.headers.iter().cloned(),
        );
        sink.send(tungstenite::Message::Text(connect.encode().into()))
            .await?;

        let connected = await_connected(&mut stream).await?;
        let heart_beat = HeartBeat::negotiate(request.heart_beat, connected.heart_beat()?);
        let server = connected.header("server").map(str::to_string);
        debug!(
            version = connected.header("version").unwrap_or("1.0"),
            server = server.as_deref().unwrap_or("unknown"),
            heart_beat = %heart_beat.header_value(),
            "STOMP session established"
        );

        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(256);
        let cancel = CancellationToken::new();

        let write_handle = {
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::write::write_pump(sink, write_rx, cancel))
        };

        let read_handle = {
            let cancel = cancel.clone();
            let write_tx = write_tx.clone();
            let ttl = heart_beat.incoming().map(|d| d * HEARTBEAT_TTL_FACTOR);
            tokio::spawn(crate::pumps::read::read_pump(
                stream, callbacks, write_tx, ttl, cancel,
            ))
        };

        let heartbeat_handle = heart_beat.outgoing().map(|period| {
            let write_tx = write_tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::heartbeat::heartbeat_pump(
                write_tx, period, cancel,
            ))
        });

        Ok(Self {
            write_tx,
            heart_beat,
            server,
            _read_handle: read_handle,
            _write_handle: write_handle,
            _heartbeat_handle: heartbeat_handle,
            cancel,
        })
    }

    /// Queues a frame for the write pump.
    ///
    /// Succeeds once the frame is accepted into the outbound queue; there is
    /// no broker acknowledgement.
    pub fn send_frame(&self, frame: &Frame) -> Result<(), StompError> {
        if self.cancel.is_cancelled() {
            return Err(StompError::Closed);
        }
        trace!(command = %frame.command, "queueing frame");
        self.write_tx
            .try_send(tungstenite::Message::Text(frame.encode().into()))
            .map_err(|e| match e {
                TrySendError::Full(_) => StompError::QueueFull,
                TrySendError::Closed(_) => StompError::Closed,
            })
    }

    /// Negotiated heartbeat intervals.
    pub(crate) fn heart_beat(&self) -> HeartBeat {
        self.heart_beat
    }

    /// `server` header of the CONNECTED frame.
    pub(crate) fn server(&self) -> Option<&str> {
        self.server.as_deref()
    }

    /// Sends a best-effort DISCONNECT and stops the pumps. The write pump
    /// flushes what is queued, then closes the socket.
    pub fn close(&self) {
        let _ = self.send_frame(&Frame::disconnect());
        self.cancel.cancel();
    }
}

impl Drop for StompClient {
    fn drop(&mut self) {
        self.cancel.cancel();
        self._read_handle.abort();
        if let Some(handle) = &self._heartbeat_handle {
            handle.abort();
        }
        // The write pump exits on its own once the queue drains.
    }
}

/// Reads until CONNECTED (or ERROR) arrives. Heartbeats and other frames
/// sent ahead of CONNECTED are skipped.
async fn await_connected(stream: &mut FrameStream) -> Result<Frame, StompError> {
    while let Some(msg) = stream.next().await {
        let msg = msg?;
        if let tungstenite::Message::Close(_) = msg {
            return Err(StompError::Closed);
        }
        let Some((frames, error)) = crate::pumps::read::frames_in(&msg) else {
            continue;
        };
        for frame in frames {
            match frame.command {
                Command::Connected => return Ok(frame),
                Command::Error => return Err(StompError::Protocol(frame.error_message())),
                other => trace!(command = %other, "skipping frame before CONNECTED"),
            }
        }
        if let Some(e) = error {
            return Err(e.into());
        }
    }
    Err(StompError::Closed)
}
