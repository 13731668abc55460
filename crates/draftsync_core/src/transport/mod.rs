//! Network transport abstraction.
//!
//! [`TransportSession`] drives the sync protocol against a narrow
//! [`Transport`]/[`Connection`] pair so that alternate transports can be
//! substituted. Two implementations ship with the crate:
//!
//! - [`WebSocketTransport`] (feature `websocket`), backed by tokio-tungstenite
//! - [`memory::MemoryTransport`], an in-process pair for tests and demos

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::crdt::DocumentKey;
use crate::error::{CollabError, Result};

pub mod memory;
mod session;
#[cfg(feature = "websocket")]
mod websocket;

pub use session::{SessionConfig, SessionEnvelope, SessionEvent, SessionState, TransportSession};
#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;

/// A boxed future for object-safe async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Signed credentials plus endpoint, supplied by an external auth collaborator.
///
/// None of these values are interpreted here; they are forwarded verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Collaboration server URL (ws:// or wss://)
    pub endpoint: String,
    /// Account identifier
    pub account: String,
    /// Time-bounded challenge value
    pub challenge: String,
    /// Public key identifier
    pub public_key: String,
    /// Signature over the challenge
    pub signature: String,
}

impl ConnectionParams {
    /// Credential token sent in the auth handshake.
    pub fn token(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.account, self.challenge, self.public_key, self.signature
        )
    }

    /// Build the connection URL for a document.
    pub fn connection_url(&self, key: &DocumentKey) -> Result<String> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| CollabError::InvalidEndpoint(format!("{}: {}", self.endpoint, e)))?;

        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(CollabError::InvalidEndpoint(format!(
                    "{}: unsupported scheme '{}'",
                    self.endpoint, other
                )));
            }
        }

        url.query_pairs_mut()
            .append_pair("doc", &key.room_name())
            .append_pair("account", &self.account)
            .append_pair("challenge", &self.challenge)
            .append_pair("public_key", &self.public_key)
            .append_pair("signature", &self.signature);

        Ok(url.to_string())
    }
}

/// Everything a transport needs to open one connection.
#[derive(Debug, Clone)]
pub struct ConnectionRequest {
    /// Document being joined
    pub key: DocumentKey,
    /// Fully built connection URL
    pub url: String,
    /// The credentials the URL was built from
    pub params: ConnectionParams,
}

impl ConnectionRequest {
    /// Build a request, validating the endpoint.
    pub fn new(key: DocumentKey, params: ConnectionParams) -> Result<Self> {
        let url = params.connection_url(&key)?;
        Ok(Self { key, url, params })
    }
}

/// What a connection yields on receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// One binary protocol frame
    Frame(Vec<u8>),
    /// The peer closed the connection
    Closed {
        /// WebSocket-style close code
        code: u16,
        /// Close reason
        reason: String,
    },
}

/// Opens connections.
pub trait Transport: Send + Sync {
    /// Open a connection for `request`.
    fn connect<'a>(
        &'a self,
        request: &'a ConnectionRequest,
    ) -> BoxFuture<'a, Result<Box<dyn Connection>>>;
}

/// One open, bidirectional frame channel.
///
/// `recv` must be cancel-safe: the session polls it inside `select!`.
pub trait Connection: Send {
    /// Send one binary frame.
    fn send<'a>(&'a mut self, frame: Vec<u8>) -> BoxFuture<'a, Result<()>>;

    /// Wait for the next inbound frame or close.
    fn recv<'a>(&'a mut self) -> BoxFuture<'a, Result<Incoming>>;

    /// Close the connection.
    fn close<'a>(&'a mut self) -> BoxFuture<'a, Result<()>>;
}
