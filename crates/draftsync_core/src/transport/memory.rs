//! In-process transport.
//!
//! [`MemoryTransport::new`] returns the client-side transport plus a
//! [`MemoryListener`] that yields a [`ServerConnection`] for every connect.
//! Tests script a collaboration server on the listener side.

use tokio::sync::mpsc;

use super::{BoxFuture, Connection, ConnectionRequest, Incoming, Transport};
use crate::crdt::Message;
use crate::error::{CollabError, Result};

/// Client side of the in-memory transport.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    accept_tx: mpsc::UnboundedSender<ServerConnection>,
}

/// Server side: accepts connections opened through the paired transport.
#[derive(Debug)]
pub struct MemoryListener {
    accept_rx: mpsc::UnboundedReceiver<ServerConnection>,
}

impl MemoryTransport {
    /// Create a connected transport/listener pair.
    ///
    /// Dropping the listener makes every later connect fail.
    pub fn new() -> (Self, MemoryListener) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        (Self { accept_tx }, MemoryListener { accept_rx })
    }
}

impl Transport for MemoryTransport {
    fn connect<'a>(
        &'a self,
        request: &'a ConnectionRequest,
    ) -> BoxFuture<'a, Result<Box<dyn Connection>>> {
        Box::pin(async move {
            let (to_server, from_client) = mpsc::unbounded_channel();
            let (to_client, from_server) = mpsc::unbounded_channel();

            let server = ServerConnection {
                request: request.clone(),
                to_client,
                from_client,
            };
            self.accept_tx
                .send(server)
                .map_err(|_| CollabError::Transport("connection refused".to_string()))?;

            Ok(Box::new(MemoryConnection {
                to_server: Some(to_server),
                from_server,
            }) as Box<dyn Connection>)
        })
    }
}

impl MemoryListener {
    /// Wait for the next client connection.
    pub async fn accept(&mut self) -> Option<ServerConnection> {
        self.accept_rx.recv().await
    }

    /// Take an already pending connection without waiting.
    pub fn try_accept(&mut self) -> Option<ServerConnection> {
        self.accept_rx.try_recv().ok()
    }
}

struct MemoryConnection {
    to_server: Option<mpsc::UnboundedSender<Vec<u8>>>,
    from_server: mpsc::UnboundedReceiver<Incoming>,
}

impl Connection for MemoryConnection {
    fn send<'a>(&'a mut self, frame: Vec<u8>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let tx = self.to_server.as_ref().ok_or(CollabError::SessionClosed)?;
            tx.send(frame)
                .map_err(|_| CollabError::Transport("peer dropped".to_string()))
        })
    }

    fn recv<'a>(&'a mut self) -> BoxFuture<'a, Result<Incoming>> {
        Box::pin(async move {
            Ok(self.from_server.recv().await.unwrap_or(Incoming::Closed {
                code: 1006,
                reason: "peer dropped".to_string(),
            }))
        })
    }

    fn close<'a>(&'a mut self) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.to_server = None;
            self.from_server.close();
            Ok(())
        })
    }
}

/// Server end of one in-memory connection.
#[derive(Debug)]
pub struct ServerConnection {
    /// The request the client connected with
    pub request: ConnectionRequest,
    to_client: mpsc::UnboundedSender<Incoming>,
    from_client: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl ServerConnection {
    /// Next raw frame from the client; `None` once the client hung up.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.from_client.recv().await
    }

    /// Next frame from the client, decoded. Undecodable frames are skipped.
    pub async fn recv_message(&mut self) -> Option<Message> {
        while let Some(frame) = self.recv().await {
            if let Ok(Some(message)) = Message::decode(&frame) {
                return Some(message);
            }
        }
        None
    }

    /// Send a raw frame to the client. Returns false if the client is gone.
    pub fn send(&self, frame: Vec<u8>) -> bool {
        self.to_client.send(Incoming::Frame(frame)).is_ok()
    }

    /// Send an encoded protocol message to the client.
    pub fn send_message(&self, message: &Message) -> bool {
        self.send(message.encode())
    }

    /// Close the connection from the server side.
    pub fn close(self, code: u16, reason: &str) {
        let _ = self.to_client.send(Incoming::Closed {
            code,
            reason: reason.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::{DocumentKey, SyncMessage};
    use crate::transport::ConnectionParams;

    fn request() -> ConnectionRequest {
        ConnectionRequest::new(
            DocumentKey::new("alice", "p"),
            ConnectionParams {
                endpoint: "ws://memory".into(),
                account: "alice".into(),
                challenge: "c".into(),
                public_key: "k".into(),
                signature: "s".into(),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (transport, mut listener) = MemoryTransport::new();
        let request = request();
        let mut client = transport.connect(&request).await.unwrap();
        let mut server = listener.accept().await.unwrap();
        assert_eq!(server.request.key, request.key);

        client
            .send(Message::Sync(SyncMessage::SyncStep1(vec![0])).encode())
            .await
            .unwrap();
        assert_eq!(
            server.recv_message().await,
            Some(Message::Sync(SyncMessage::SyncStep1(vec![0])))
        );

        assert!(server.send(vec![1, 2]));
        assert_eq!(client.recv().await.unwrap(), Incoming::Frame(vec![1, 2]));

        server.close(4000, "bye");
        assert_eq!(
            client.recv().await.unwrap(),
            Incoming::Closed {
                code: 4000,
                reason: "bye".into()
            }
        );
    }

    #[tokio::test]
    async fn test_connect_refused_without_listener() {
        let (transport, listener) = MemoryTransport::new();
        drop(listener);
        let request = request();
        assert!(matches!(
            transport.connect(&request).await,
            Err(CollabError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_client_close_ends_server_stream() {
        let (transport, mut listener) = MemoryTransport::new();
        let request = request();
        let mut client = transport.connect(&request).await.unwrap();
        let mut server = listener.accept().await.unwrap();

        client.close().await.unwrap();
        assert_eq!(server.recv().await, None);
        assert!(matches!(
            client.send(vec![1]).await,
            Err(CollabError::SessionClosed)
        ));
    }
}
