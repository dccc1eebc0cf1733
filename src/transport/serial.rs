//! Serial link between bridge and sensor node
//!
//! Any `AsyncRead + AsyncWrite` stream works, so tests can use an in-memory
//! duplex pipe. A reader task drains the port into a channel; the node loop
//! pulls chunks without blocking.

use super::{TransportError, EVENT_BUFFER};
use crate::protocol::Frame;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

const READ_CHUNK: usize = 64;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub struct SerialLink {
    writer: BoxedWriter,
    chunks: mpsc::Receiver<Bytes>,
    reader: JoinHandle<()>,
    closed: bool,
}

impl SerialLink {
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read, write) = tokio::io::split(stream);
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let reader = tokio::spawn(async move {
            let mut read = read;
            loop {
                let mut buf = BytesMut::with_capacity(READ_CHUNK);
                match read.read_buf(&mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        if tx.send(buf.freeze()).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "Serial read failed");
                        break;
                    }
                }
            }
        });
        Self {
            writer: Box::new(write),
            chunks: rx,
            reader,
            closed: false,
        }
    }

    /// Next received chunk, if one is waiting
    pub fn try_read(&mut self) -> Option<Bytes> {
        match self.chunks.try_recv() {
            Ok(chunk) => Some(chunk),
            Err(mpsc::error::TryRecvError::Empty) => None,
            Err(mpsc::error::TryRecvError::Disconnected) => {
                self.closed = true;
                None
            }
        }
    }

    /// Whether the port has reached end of stream
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), TransportError> {
        self.write_bytes(&frame.encode()).await
    }

    pub async fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Open a hardware serial port
#[cfg(feature = "serial")]
pub fn open_serial(device: &str, baud_rate: u32) -> Result<SerialLink, TransportError> {
    use tokio_serial::SerialPortBuilderExt;

    let port = tokio_serial::new(device, baud_rate)
        .open_native_async()
        .map_err(|e| TransportError::Serial(format!("{device}: {e}")))?;
    Ok(SerialLink::new(port))
}
