//! Socket establishment, kept behind a trait so the manager can be driven
//! by an in-memory broker in tests.

use std::future::Future;
use std::pin::Pin;

use futures_util::{Sink, Stream, StreamExt};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;

use wardbell_protocol::constants::{STOMP_SUBPROTOCOLS, WS_MAX_MESSAGE_SIZE};

use crate::stomp_client::StompError;

/// Outbound half of a WebSocket connection.
pub type FrameSink = Pin<Box<dyn Sink<tungstenite::Message, Error = tungstenite::Error> + Send>>;

/// Inbound half of a WebSocket connection.
pub type FrameStream =
    Pin<Box<dyn Stream<Item = Result<tungstenite::Message, tungstenite::Error>> + Send>>;

/// An established, not yet STOMP-connected, socket.
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Future returned by [`Connector::connect`].
pub type ConnectFuture<'a> = Pin<Box<dyn Future<Output = Result<Transport, StompError>> + Send + 'a>>;

/// Opens sockets to the broker.
pub trait Connector: Send + Sync {
    fn connect<'a>(&'a self, url: &'a str) -> ConnectFuture<'a>;
}

/// WebSocket connector backed by tokio-tungstenite.
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect<'a>(&'a self, url: &'a str) -> ConnectFuture<'a> {
        Box::pin(async move {
            let mut request = url.into_client_request()?;
            request.headers_mut().insert(
                SEC_WEBSOCKET_PROTOCOL,
                HeaderValue::from_static(STOMP_SUBPROTOCOLS),
            );

            let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
            ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
            ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
            let (ws_stream, _) =
                tokio_tungstenite::connect_async_with_config(request, Some(ws_config), false)
                    .await?;
            let (sink, stream) = ws_stream.split();

            Ok(Transport {
                sink: Box::pin(sink),
                stream: Box::pin(stream),
            })
        })
    }
}
