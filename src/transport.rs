use crate::auth::AccessToken;
use crate::config::SessionConfig;
use crate::protocol::Frame;
use crate::session::SessionContext;
use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use http::{HeaderName, HeaderValue};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

pub const INBOUND_CAPACITY: usize = 64;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("Send failed: {0}")]
    Send(String),
    #[error("Connection is not open")]
    Closed,
    #[error("Invalid handshake header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },
}

/// A server-pushed message, delivered in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Text(String),
    Binary(Vec<u8>),
}

/// Headers sent with the WebSocket upgrade request
#[derive(Clone)]
pub struct HandshakeHeaders {
    pub log_level: String,
    pub locale: String,
    pub authorization: String,
    pub user_agent: String,
    pub host: String,
}

impl HandshakeHeaders {
    pub fn new(
        session: &SessionContext,
        token: &AccessToken,
        config: &SessionConfig,
    ) -> Result<Self, TransportError> {
        Ok(Self {
            log_level: config.log_level.clone(),
            locale: session.locale.clone(),
            authorization: token.bearer(),
            user_agent: config.user_agent.clone(),
            host: host_header(&session.endpoint)?,
        })
    }

    pub fn pairs(&self) -> [(&'static str, &str); 5] {
        [
            ("X-CU-LogLevel", self.log_level.as_str()),
            ("X-CU-Locale", self.locale.as_str()),
            ("Authorization", self.authorization.as_str()),
            ("User-Agent", self.user_agent.as_str()),
            ("Host", self.host.as_str()),
        ]
    }
}

impl fmt::Debug for HandshakeHeaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeHeaders")
            .field("log_level", &self.log_level)
            .field("locale", &self.locale)
            .field("authorization", &"[REDACTED]")
            .field("user_agent", &self.user_agent)
            .field("host", &self.host)
            .finish()
    }
}

fn host_header(endpoint: &str) -> Result<String, TransportError> {
    let url = Url::parse(endpoint).map_err(|e| TransportError::InvalidHeader {
        name: "Host".to_string(),
        reason: format!("invalid endpoint {}: {}", endpoint, e),
    })?;
    let host = url.host_str().ok_or_else(|| TransportError::InvalidHeader {
        name: "Host".to_string(),
        reason: format!("endpoint {} has no host", endpoint),
    })?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Outbound half of a live duplex connection
#[async_trait]
pub trait Transport: Send {
    /// Frames are written in call order; no retry on failure.
    async fn send(&mut self, frame: &Frame) -> Result<(), TransportError>;

    /// Idempotent: closing an already closed transport does nothing.
    async fn close(&mut self) -> Result<(), TransportError>;

    fn is_open(&self) -> bool;
}

/// An opened connection: the outbound transport plus the inbound message queue
pub struct Connection {
    pub transport: Box<dyn Transport>,
    pub inbound: mpsc::Receiver<InboundMessage>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &str,
        headers: &HandshakeHeaders,
    ) -> Result<Connection, TransportError>;
}

pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(
        &self,
        endpoint: &str,
        headers: &HandshakeHeaders,
    ) -> Result<Connection, TransportError> {
        let mut request = endpoint
            .into_client_request()
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        for (name, value) in headers.pairs() {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                TransportError::InvalidHeader {
                    name: name.to_string(),
                    reason: e.to_string(),
                }
            })?;
            let header_value =
                HeaderValue::from_str(value).map_err(|e| TransportError::InvalidHeader {
                    name: name.to_string(),
                    reason: e.to_string(),
                })?;
            request.headers_mut().insert(header_name, header_value);
        }

        log::info!("Transport: connecting to {}", endpoint);
        let (ws_stream, response) =
            tokio::time::timeout(self.connect_timeout, connect_async(request))
                .await
                .map_err(|_| TransportError::Timeout(self.connect_timeout))?
                .map_err(|e| TransportError::Connection(e.to_string()))?;
        log::info!("Transport: connected, status: {}", response.status());

        let (write, mut read) = ws_stream.split();
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let peer_open = Arc::new(AtomicBool::new(true));
        let reader_peer_open = Arc::clone(&peer_open);

        // Dedicated delivery task so handlers never stall the send loop
        let reader = tokio::spawn(async move {
            let mut message_count = 0usize;
            while let Some(msg_result) = read.next().await {
                let inbound = match msg_result {
                    Ok(Message::Text(text)) => InboundMessage::Text(text.as_str().to_string()),
                    Ok(Message::Binary(data)) => InboundMessage::Binary(data.as_slice().to_vec()),
                    Ok(Message::Close(frame)) => {
                        log::info!("Transport: server closed connection: {:?}", frame);
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        log::warn!("Transport: read error: {}", e);
                        break;
                    }
                };
                message_count += 1;
                if inbound_tx.send(inbound).await.is_err() {
                    log::debug!("Transport: inbound receiver dropped");
                    return;
                }
            }
            // Stream ended on the server side
            reader_peer_open.store(false, Ordering::SeqCst);
            log::debug!(
                "Transport: reader finished after {} messages",
                message_count
            );
        });

        Ok(Connection {
            transport: Box::new(WsTransport {
                write,
                reader,
                open: true,
                peer_open,
            }),
            inbound: inbound_rx,
        })
    }
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

pub struct WsTransport {
    write: WsSink,
    reader: JoinHandle<()>,
    open: bool,
    /// Cleared by the reader task once the server closes or the read side fails
    peer_open: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }

        let message = if frame.kind().is_text() {
            match String::from_utf8(frame.as_bytes().to_vec()) {
                Ok(text) => Message::Text(text.into()),
                Err(e) => Message::Binary(e.into_bytes().into()),
            }
        } else {
            Message::Binary(frame.as_bytes().to_vec().into())
        };

        self.write
            .send(message)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;
        log::trace!(
            "Transport: sent {} ({} bytes)",
            frame.kind().label(),
            frame.as_bytes().len()
        );
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.reader.abort();

        let result = self.write.close().await;
        log::info!("Transport: connection closed");
        result.map_err(|e| TransportError::Send(format!("close failed: {}", e)))
    }

    fn is_open(&self) -> bool {
        self.open && self.peer_open.load(Ordering::SeqCst)
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::RecognitionMode;

    #[test]
    fn test_handshake_headers() {
        let config = SessionConfig::default();
        let session = SessionContext::new("de-DE", RecognitionMode::LongDictation, &config);
        let headers = HandshakeHeaders::new(&session, &AccessToken::new("tok"), &config).unwrap();

        let pairs = headers.pairs();
        assert_eq!(pairs[0], ("X-CU-LogLevel", "1"));
        assert_eq!(pairs[1], ("X-CU-Locale", "de-DE"));
        assert_eq!(pairs[2], ("Authorization", "Bearer tok"));
        assert_eq!(pairs[4], ("Host", "speech.platform.bing.com"));
        assert!(!format!("{:?}", headers).contains("tok\""));
    }

    #[test]
    fn test_host_header_keeps_explicit_port() {
        assert_eq!(
            host_header("ws://127.0.0.1:9001/recognition").unwrap(),
            "127.0.0.1:9001"
        );
        assert!(matches!(
            host_header("not a url"),
            Err(TransportError::InvalidHeader { .. })
        ));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port with nothing listening
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let endpoint = format!("ws://{}/recognition", addr);
        let config = SessionConfig::default();
        let mut session = SessionContext::new("en-US", RecognitionMode::ShortPhrase, &config);
        session.endpoint = endpoint.clone();
        let headers = HandshakeHeaders::new(&session, &AccessToken::new("tok"), &config).unwrap();

        let result = WsConnector::new(Duration::from_secs(2))
            .connect(&endpoint, &headers)
            .await;
        assert!(matches!(result, Err(TransportError::Connection(_))));
    }
}
