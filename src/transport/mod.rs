//! Byte transports
//!
//! A session transport carries framed traffic between a bridge and the
//! server. Two implementations exist (raw TCP and WebSocket); both deliver
//! inbound bytes and state changes as [`ConnectionEvent`]s so the rest of the
//! node never sees which one is in use. The serial link to the sensor node is
//! a plain byte stream and lives in [`serial`].

use crate::connection::ConnectionEvent;
use crate::protocol::SessionMetadata;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub mod serial;
pub mod tcp;
pub mod websocket;

pub use serial::SerialLink;
pub use tcp::TcpTransport;
pub use websocket::WebSocketTransport;

/// Depth of the inbound event channel fed by reader tasks
pub(crate) const EVENT_BUFFER: usize = 64;

/// Transport-level failures
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(#[source] std::io::Error),
    #[error("Connection attempt timed out after {0:?}")]
    Timeout(Duration),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),
    #[error("Invalid server address: {0}")]
    InvalidAddress(String),
    #[error("Invalid session header {name}")]
    InvalidHeader { name: String },
    #[error("Serial port error: {0}")]
    Serial(String),
    #[error("Not connected")]
    NotConnected,
    #[error("Session cannot open while the network is {attachment}")]
    NotAttached { attachment: String },
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        TransportError::WebSocket(Box::new(err))
    }
}

/// Which session transport to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Tcp,
    #[serde(alias = "ws")]
    Websocket,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Tcp => write!(f, "tcp"),
            TransportKind::Websocket => write!(f, "websocket"),
        }
    }
}

/// Where the server listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEndpoint {
    pub host: String,
    pub port: u16,
    /// Request path, used by the WebSocket transport only
    pub path: String,
}

impl ServerEndpoint {
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn websocket_url(&self) -> Result<Url, TransportError> {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        let raw = format!("ws://{}:{}{}", self.host, self.port, path);
        Url::parse(&raw).map_err(|_| TransportError::InvalidAddress(raw))
    }
}

/// Session transport abstraction
///
/// Implementations spawn their own reader task; inbound traffic is drained
/// without blocking through [`SessionTransport::poll_event`].
#[async_trait::async_trait]
pub trait SessionTransport: Send {
    fn kind(&self) -> TransportKind;

    /// Open the session and announce `metadata` to the server
    async fn connect(&mut self, metadata: &SessionMetadata) -> Result<(), TransportError>;

    async fn send(&mut self, bytes: Bytes) -> Result<(), TransportError>;

    /// Next pending event, if any
    fn poll_event(&mut self) -> Option<ConnectionEvent>;

    /// Tear the session down. Idempotent.
    async fn close(&mut self);
}

/// Build the configured transport
pub fn build_transport(kind: TransportKind, endpoint: ServerEndpoint) -> Box<dyn SessionTransport> {
    match kind {
        TransportKind::Tcp => Box::new(TcpTransport::new(endpoint)),
        TransportKind::Websocket => Box::new(WebSocketTransport::new(endpoint)),
    }
}
