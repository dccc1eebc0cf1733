//! WebSocket session transport
//!
//! Session metadata rides on the upgrade request as extra headers; each frame
//! travels in a binary message. Text messages are accepted as raw bytes too.
//! Header values outside visible ASCII (a network name with accents, say) are
//! form-urlencoded, since the handshake only carries ASCII header text.

use super::{ServerEndpoint, SessionTransport, TransportError, TransportKind, EVENT_BUFFER};
use crate::connection::ConnectionEvent;
use crate::protocol::SessionMetadata;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WebSocketTransport {
    endpoint: ServerEndpoint,
    sink: Option<SplitSink<WsStream, Message>>,
    events: Option<mpsc::Receiver<ConnectionEvent>>,
    reader: Option<JoinHandle<()>>,
}

impl WebSocketTransport {
    pub fn new(endpoint: ServerEndpoint) -> Self {
        Self {
            endpoint,
            sink: None,
            events: None,
            reader: None,
        }
    }

    async fn read_loop(mut stream: SplitStream<WsStream>, tx: mpsc::Sender<ConnectionEvent>) {
        while let Some(message) = stream.next().await {
            let data = match message {
                Ok(Message::Binary(data)) => Bytes::from(data),
                Ok(Message::Text(text)) => Bytes::from(text.into_bytes()),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "Server closed the WebSocket");
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    debug!(error = %e, "WebSocket read failed");
                    break;
                }
            };
            if tx.send(ConnectionEvent::DataReceived(data)).await.is_err() {
                return;
            }
        }
        let _ = tx.send(ConnectionEvent::Disconnected).await;
    }
}

fn header_value(value: &str) -> Result<HeaderValue, InvalidHeaderValue> {
    if value.bytes().all(|b| b == b' ' || b.is_ascii_graphic()) {
        return HeaderValue::from_str(value);
    }
    let encoded: String = url::form_urlencoded::byte_serialize(value.as_bytes()).collect();
    HeaderValue::from_str(&encoded)
}

#[async_trait::async_trait]
impl SessionTransport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Websocket
    }

    async fn connect(&mut self, metadata: &SessionMetadata) -> Result<(), TransportError> {
        self.close().await;

        let url = self.endpoint.websocket_url()?;
        let mut request = url.as_str().into_client_request()?;
        for (name, value) in metadata.header_pairs() {
            let header = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| TransportError::InvalidHeader { name: name.clone() })?;
            let value = header_value(&value)
                .map_err(|_| TransportError::InvalidHeader { name: name.clone() })?;
            request.headers_mut().insert(header, value);
        }

        let (stream, _response) = connect_async(request).await?;
        let (sink, stream) = stream.split();

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let _ = tx.send(ConnectionEvent::Connected).await;
        self.reader = Some(tokio::spawn(Self::read_loop(stream, tx)));
        self.events = Some(rx);
        self.sink = Some(sink);

        info!(%url, "WebSocket session opened");
        Ok(())
    }

    async fn send(&mut self, bytes: Bytes) -> Result<(), TransportError> {
        let sink = self.sink.as_mut().ok_or(TransportError::NotConnected)?;
        sink.send(Message::Binary(bytes.to_vec())).await?;
        Ok(())
    }

    fn poll_event(&mut self) -> Option<ConnectionEvent> {
        self.events.as_mut()?.try_recv().ok()
    }

    async fn close(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            let _ = sink.close().await;
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.events = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DEFAULT_HEADER_PREFIX;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    type SeenHeaders = Arc<Mutex<Vec<(String, String)>>>;

    fn metadata(network: &str) -> SessionMetadata {
        SessionMetadata {
            prefix: DEFAULT_HEADER_PREFIX.to_string(),
            device_id: "node-7".to_string(),
            auth_key: "k".to_string(),
            network: network.to_string(),
            local_address: "10.0.0.7".to_string(),
        }
    }

    /// Accept one session, record its headers, answer one PING and close
    async fn serve_once(listener: TcpListener, seen: SeenHeaders) {
        let (socket, _) = listener.accept().await.unwrap();
        let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            let mut seen = seen.lock().unwrap();
            for (name, value) in request.headers() {
                if let Ok(value) = value.to_str() {
                    seen.push((name.as_str().to_string(), value.to_string()));
                }
            }
            Ok(response)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(socket, callback)
            .await
            .unwrap();
        let msg = ws.next().await.unwrap().unwrap();
        assert_eq!(msg, Message::Binary(vec![101]));
        ws.send(Message::Binary(vec![102])).await.unwrap();
        ws.close(None).await.unwrap();
    }

    async fn exchange_ping(network: &str) -> Vec<(String, String)> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let seen = SeenHeaders::default();
        let server = tokio::spawn(serve_once(listener, seen.clone()));

        let mut transport = WebSocketTransport::new(ServerEndpoint {
            host: "127.0.0.1".to_string(),
            port,
            path: "/".to_string(),
        });
        transport.connect(&metadata(network)).await.unwrap();
        transport.send(Bytes::from_static(&[101])).await.unwrap();

        let mut events = Vec::new();
        while !events.contains(&ConnectionEvent::Disconnected) {
            match transport.poll_event() {
                Some(event) => events.push(event),
                None => tokio::time::sleep(std::time::Duration::from_millis(5)).await,
            }
        }
        assert_eq!(events[0], ConnectionEvent::Connected);
        assert!(events.contains(&ConnectionEvent::DataReceived(Bytes::from_static(&[102]))));

        server.await.unwrap();
        transport.close().await;
        let headers = seen.lock().unwrap().clone();
        headers
    }

    fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
        headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[tokio::test]
    async fn test_headers_and_binary_frames() {
        let headers = exchange_ping("9G").await;
        assert_eq!(header(&headers, "CO3006-Name"), Some("node-7"));
        assert_eq!(header(&headers, "CO3006-WiFi"), Some("9G"));
        assert_eq!(header(&headers, "CO3006-Local-IP"), Some("10.0.0.7"));
    }

    #[tokio::test]
    async fn test_non_ascii_network_name_still_connects() {
        let headers = exchange_ping("Café").await;
        assert_eq!(header(&headers, "CO3006-WiFi"), Some("Caf%C3%A9"));
        assert_eq!(header(&headers, "CO3006-Name"), Some("node-7"));
    }

    #[test]
    fn test_header_value_encoding() {
        assert_eq!(header_value("10.0.0.7").unwrap(), "10.0.0.7");
        assert_eq!(header_value("my net").unwrap(), "my net");
        assert_eq!(header_value("Café").unwrap(), "Caf%C3%A9");
        assert_eq!(header_value("tab\there").unwrap(), "tab%09there");
    }
}
