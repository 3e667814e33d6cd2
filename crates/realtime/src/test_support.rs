//! In-memory broker for driving the manager in tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use futures_util::{sink, stream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;

use wardbell_protocol::{Command, Frame, decode_frames};

use crate::connector::{ConnectFuture, Connector, Transport};
use crate::stomp_client::StompError;

type Inbound = Result<tungstenite::Message, tungstenite::Error>;

/// Connector that hands each new socket to a [`Broker`].
pub(crate) struct MemoryConnector {
    attempts: AtomicUsize,
    refuse: AtomicBool,
    accepted_tx: mpsc::UnboundedSender<BrokerEnd>,
}

impl MemoryConnector {
    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Makes subsequent connects fail before any socket exists.
    pub(crate) fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

impl Connector for MemoryConnector {
    fn connect<'a>(&'a self, _url: &'a str) -> ConnectFuture<'a> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Box::pin(async {
                Err::<Transport, _>(StompError::Ws(tungstenite::Error::ConnectionClosed))
            });
        }

        let (to_broker_tx, to_broker_rx) = mpsc::unbounded_channel::<tungstenite::Message>();
        let (to_client_tx, to_client_rx) = mpsc::unbounded_channel::<Inbound>();

        let sink = sink::unfold(to_broker_tx, |tx, msg: tungstenite::Message| async move {
            tx.send(msg)
                .map_err(|_| tungstenite::Error::ConnectionClosed)?;
            Ok::<_, tungstenite::Error>(tx)
        });
        let stream = stream::unfold(to_client_rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        let _ = self.accepted_tx.send(BrokerEnd {
            inbound: to_broker_rx,
            outbound: to_client_tx,
        });

        Box::pin(async move {
            Ok(Transport {
                sink: Box::pin(sink),
                stream: Box::pin(stream),
            })
        })
    }
}

/// Accepts sockets opened through a [`MemoryConnector`].
pub(crate) struct Broker {
    accepted_rx: mpsc::UnboundedReceiver<BrokerEnd>,
}

impl Broker {
    pub(crate) async fn accept(&mut self) -> BrokerEnd {
        self.accepted_rx
            .recv()
            .await
            .expect("connector dropped")
    }
}

pub(crate) fn memory_broker() -> (Arc<MemoryConnector>, Broker) {
    let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
    let connector = Arc::new(MemoryConnector {
        attempts: AtomicUsize::new(0),
        refuse: AtomicBool::new(false),
        accepted_tx,
    });
    (connector, Broker { accepted_rx })
}

/// Broker side of one socket. Dropping it ends the client's stream.
pub(crate) struct BrokerEnd {
    inbound: mpsc::UnboundedReceiver<tungstenite::Message>,
    outbound: mpsc::UnboundedSender<Inbound>,
}

impl BrokerEnd {
    /// Reads CONNECT and answers CONNECTED with heartbeats disabled.
    pub(crate) async fn handshake(&mut self) -> Frame {
        let connect = self.next_frame().await.expect("client sent nothing");
        assert_eq!(connect.command, Command::Connect);
        self.push(
            Frame::new(Command::Connected)
                .with_header("version", "1.2")
                .with_header("heart-beat", "0,0"),
        );
        connect
    }

    /// Next frame from the client, skipping heartbeats and control messages.
    pub(crate) async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            let msg = self.inbound.recv().await?;
            if let Some(frame) = first_frame(&msg) {
                return Some(frame);
            }
        }
    }

    /// Like [`next_frame`](Self::next_frame) but does not wait.
    pub(crate) fn try_frame(&mut self) -> Option<Frame> {
        while let Ok(msg) = self.inbound.try_recv() {
            if let Some(frame) = first_frame(&msg) {
                return Some(frame);
            }
        }
        None
    }

    pub(crate) fn push(&self, frame: Frame) {
        let _ = self
            .outbound
            .send(Ok(tungstenite::Message::Text(frame.encode().into())));
    }

    pub(crate) fn push_message(&self, subscription: &str, body: &str) {
        self.push(
            Frame::new(Command::Message)
                .with_header("subscription", subscription)
                .with_header("message-id", "m-1")
                .with_header("destination", "/sub/test")
                .with_body(body),
        );
    }
}

fn first_frame(msg: &tungstenite::Message) -> Option<Frame> {
    match msg {
        tungstenite::Message::Text(text) => decode_frames(text.as_str()).ok()?.into_iter().next(),
        _ => None,
    }
}

/// Lets spawned tasks run without advancing paused time.
pub(crate) async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
