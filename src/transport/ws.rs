//! WebSocket transport (text frames only).

use futures::{future, SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::{FrameSink, FrameStream, FrameTransport};
use crate::error::{MuxError, Result};

pub struct WsTransport<S> {
    inner: WebSocketStream<S>,
}

impl<S> WsTransport<S> {
    pub fn new(inner: WebSocketStream<S>) -> Self {
        Self { inner }
    }
}

fn lost(err: tokio_tungstenite::tungstenite::Error) -> MuxError {
    MuxError::ConnectionLost(err.to_string())
}

/// Dial a `ws://` or `wss://` endpoint.
pub async fn connect(url: &str) -> Result<WsTransport<MaybeTlsStream<TcpStream>>> {
    let (inner, _response) = tokio_tungstenite::connect_async(url).await.map_err(lost)?;
    tracing::info!(url, "websocket connected");
    Ok(WsTransport::new(inner))
}

/// Complete the server handshake on an accepted socket.
pub async fn accept(stream: TcpStream) -> Result<WsTransport<TcpStream>> {
    let inner = tokio_tungstenite::accept_async(stream).await.map_err(lost)?;
    Ok(WsTransport::new(inner))
}

impl<S> FrameTransport for WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn split(self) -> (FrameSink, FrameStream) {
        let (sink, stream) = self.inner.split();
        let sink = sink
            .sink_map_err(lost)
            .with(|frame: String| future::ready(Ok::<_, MuxError>(Message::text(frame))));
        let stream = stream
            .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
            .filter_map(|msg| {
                future::ready(match msg {
                    Ok(Message::Text(text)) => Some(Ok(text.to_string())),
                    Ok(_) => None,
                    Err(err) => Some(Err(lost(err))),
                })
            });
        (Box::pin(sink), Box::pin(stream))
    }
}
