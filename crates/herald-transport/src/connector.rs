//! Socket opening, behind a trait so the session can run over in-memory
//! channels in tests.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt, future};
use herald_core::TransportError;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

/// Outbound half: whole STOMP text messages.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Inbound half: whole WebSocket text messages.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// A bidirectional text channel to the broker.
pub struct FrameChannel {
    /// Messages to the broker.
    pub sink: FrameSink,
    /// Messages from the broker. `None` means the peer closed.
    pub stream: FrameStream,
}

impl FrameChannel {
    /// Build from any sink/stream pair.
    pub fn new(
        sink: impl Sink<String, Error = TransportError> + Send + 'static,
        stream: impl Stream<Item = Result<String, TransportError>> + Send + 'static,
    ) -> Self {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

impl std::fmt::Debug for FrameChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameChannel").finish_non_exhaustive()
    }
}

/// Opens a [`FrameChannel`] to a broker endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open the socket. The STOMP handshake is the caller's job.
    async fn connect(&self, endpoint: &str) -> Result<FrameChannel, TransportError>;
}

/// Production connector over `tokio-tungstenite`.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &str) -> Result<FrameChannel, TransportError> {
        let (ws, response) = tokio_tungstenite::connect_async(endpoint)
            .await
            .map_err(|e| TransportError::Connect {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            })?;
        debug!(endpoint, status = %response.status(), "websocket opened");

        let (ws_tx, ws_rx) = ws.split();

        let sink = ws_tx
            .sink_map_err(|e| TransportError::Socket(e.to_string()))
            .with(|text: String| future::ready(Ok::<_, TransportError>(Message::text(text))));

        let stream = ws_rx.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(data)) => Some(
                    String::from_utf8(data.to_vec())
                        .map_err(|_| TransportError::Frame("non-UTF-8 binary message".into())),
                ),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "broker sent close frame");
                    Some(Err(TransportError::Closed))
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
                Err(e) => Some(Err(TransportError::Socket(e.to_string()))),
            })
        });

        Ok(FrameChannel::new(sink, stream))
    }
}
