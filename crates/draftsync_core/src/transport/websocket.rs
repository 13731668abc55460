//! WebSocket transport backed by tokio-tungstenite.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{BoxFuture, Connection, ConnectionRequest, Incoming, Transport};
use crate::error::{CollabError, Result};

/// Opens one WebSocket per session.
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Create a WebSocket transport.
    pub fn new() -> Self {
        Self
    }
}

impl Transport for WebSocketTransport {
    fn connect<'a>(
        &'a self,
        request: &'a ConnectionRequest,
    ) -> BoxFuture<'a, Result<Box<dyn Connection>>> {
        Box::pin(async move {
            log::info!("[SyncTransport] Connecting to {}", request.key);
            let (stream, response) = connect_async(request.url.as_str())
                .await
                .map_err(|e| CollabError::Transport(format!("connect failed: {}", e)))?;
            log::debug!(
                "[SyncTransport] Handshake complete, HTTP {}",
                response.status()
            );
            Ok(Box::new(WebSocketConnection { stream }) as Box<dyn Connection>)
        })
    }
}

struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Connection for WebSocketConnection {
    fn send<'a>(&'a mut self, frame: Vec<u8>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.stream
                .send(WsMessage::Binary(frame.into()))
                .await
                .map_err(|e| CollabError::Transport(format!("send failed: {}", e)))
        })
    }

    fn recv<'a>(&'a mut self) -> BoxFuture<'a, Result<Incoming>> {
        Box::pin(async move {
            loop {
                match self.stream.next().await {
                    Some(Ok(WsMessage::Binary(data))) => return Ok(Incoming::Frame(data.to_vec())),
                    Some(Ok(WsMessage::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.as_str().to_string()))
                            .unwrap_or((1005, String::new()));
                        log::info!("[SyncTransport] Server closed connection: {} {}", code, reason);
                        return Ok(Incoming::Closed { code, reason });
                    }
                    Some(Ok(WsMessage::Text(text))) => {
                        log::debug!("[SyncTransport] Ignoring text message: {}", text.as_str());
                    }
                    // Pings are answered by tungstenite on the next read or write
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Err(CollabError::Transport(format!("receive failed: {}", e)));
                    }
                    None => {
                        return Ok(Incoming::Closed {
                            code: 1006,
                            reason: "stream ended".to_string(),
                        });
                    }
                }
            }
        })
    }

    fn close<'a>(&'a mut self) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.stream
                .close(None)
                .await
                .map_err(|e| CollabError::Transport(format!("close failed: {}", e)))
        })
    }
}
