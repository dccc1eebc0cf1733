//! Raw TCP session transport
//!
//! After connecting, the metadata header block is written as plain text and
//! framed bytes follow on the same stream.

use super::{ServerEndpoint, SessionTransport, TransportError, TransportKind, EVENT_BUFFER};
use crate::connection::ConnectionEvent;
use crate::protocol::SessionMetadata;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

const READ_CHUNK: usize = 512;

pub struct TcpTransport {
    endpoint: ServerEndpoint,
    writer: Option<OwnedWriteHalf>,
    events: Option<mpsc::Receiver<ConnectionEvent>>,
    reader: Option<JoinHandle<()>>,
}

impl TcpTransport {
    pub fn new(endpoint: ServerEndpoint) -> Self {
        Self {
            endpoint,
            writer: None,
            events: None,
            reader: None,
        }
    }

    async fn read_loop(mut read: OwnedReadHalf, tx: mpsc::Sender<ConnectionEvent>) {
        loop {
            let mut buf = BytesMut::with_capacity(READ_CHUNK);
            match read.read_buf(&mut buf).await {
                Ok(0) => {
                    debug!("Server closed the stream");
                    break;
                }
                Ok(_) => {
                    if tx
                        .send(ConnectionEvent::DataReceived(buf.freeze()))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Err(e) => {
                    debug!(error = %e, "TCP read failed");
                    break;
                }
            }
        }
        let _ = tx.send(ConnectionEvent::Disconnected).await;
    }
}

#[async_trait::async_trait]
impl SessionTransport for TcpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    async fn connect(&mut self, metadata: &SessionMetadata) -> Result<(), TransportError> {
        self.close().await;

        let address = self.endpoint.socket_address();
        let stream = TcpStream::connect(&address)
            .await
            .map_err(TransportError::ConnectionFailed)?;
        stream.set_nodelay(true)?;

        let (read, mut write) = stream.into_split();
        write.write_all(metadata.to_header_block().as_bytes()).await?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        // Consumers learn about the session from the same channel as its data
        let _ = tx.send(ConnectionEvent::Connected).await;
        self.reader = Some(tokio::spawn(Self::read_loop(read, tx)));
        self.events = Some(rx);
        self.writer = Some(write);

        info!(%address, "TCP session opened");
        Ok(())
    }

    async fn send(&mut self, bytes: Bytes) -> Result<(), TransportError> {
        let writer = self.writer.as_mut().ok_or(TransportError::NotConnected)?;
        writer.write_all(&bytes).await?;
        Ok(())
    }

    fn poll_event(&mut self) -> Option<ConnectionEvent> {
        self.events.as_mut()?.try_recv().ok()
    }

    async fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
        self.events = None;
    }
}
