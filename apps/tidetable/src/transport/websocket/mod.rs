use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::debug;
use url::Url;

use super::{Connector, FrameSource, TransportError};

pub mod config;

pub use config::WebSocketConfig;

/// Opens real WebSocket connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn FrameSource>, TransportError> {
        let (stream, _) = connect_async(url.as_str()).await?;
        Ok(Box::new(WebSocketSource { stream }))
    }
}

struct WebSocketSource {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FrameSource for WebSocketSource {
    async fn recv(&mut self) -> Option<Result<Vec<u8>, TransportError>> {
        while let Some(msg) = self.stream.next().await {
            match msg {
                Ok(Message::Text(text)) => return Some(Ok(text.into_bytes())),
                Ok(Message::Binary(data)) => return Some(Ok(data)),
                Ok(Message::Close(frame)) => {
                    debug!(target = "tidetable::transport", ?frame, "peer sent close frame");
                    return None;
                }
                // Ping/pong are answered by tungstenite.
                Ok(_) => {}
                Err(err) => return Some(Err(err.into())),
            }
        }
        None
    }

    async fn close(&mut self) {
        if let Err(err) = self.stream.close(None).await {
            debug!(
                target = "tidetable::transport",
                error = %err,
                "websocket close handshake failed"
            );
        }
    }
}
