//! Transport seams.
//!
//! The sync client talks to the server through two channels: a
//! bidirectional event stream of text frames and a request/response
//! channel. Both are traits so tests can substitute an in-memory server.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use kinsync_proto::{Request, Response};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

use crate::credentials::Credential;
use crate::error::TransportError;

/// An open event-stream connection carrying text frames.
#[async_trait]
pub trait StreamTransport: Send {
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Next text frame. `None` once the peer closed the connection.
    ///
    /// Must be cancel-safe: the client polls it inside `select!`.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    async fn close(&mut self);
}

/// Opens event-stream connections.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn StreamTransport>, TransportError>;
}

/// Request/response channel for queries and mutations.
#[async_trait]
pub trait RequestChannel: Send + Sync {
    /// Send one request. A `Response` with `success = false` is a definitive
    /// answer; `Err` means the outcome is unknown and the request may be retried.
    async fn call(
        &self,
        request: &Request,
        credential: Option<&Credential>,
    ) -> Result<Response, TransportError>;
}

// ============================================================================
// WebSocket event stream
// ============================================================================

pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl StreamConnector for WebSocketConnector {
    async fn connect(&self) -> Result<Box<dyn StreamTransport>, TransportError> {
        let (stream, response) = connect_async(self.url.as_str()).await?;
        debug!(url = %self.url, status = %response.status(), "WebSocket connected");
        Ok(Box::new(WebSocketTransport { stream }))
    }
}

struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl StreamTransport for WebSocketTransport {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => {
                    return Some(String::from_utf8(bytes).map_err(|e| {
                        TransportError::Protocol(kinsync_proto::ProtocolError::Unexpected(
                            format!("binary frame is not UTF-8: {e}"),
                        ))
                    }));
                }
                Ok(Message::Close(_)) => return None,
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}

// ============================================================================
// HTTP request channel
// ============================================================================

/// Posts JSON request envelopes to `{base_url}/rpc`.
pub struct HttpRequestChannel {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRequestChannel {
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("kinsync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/rpc", base_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RequestChannel for HttpRequestChannel {
    async fn call(
        &self,
        request: &Request,
        credential: Option<&Credential>,
    ) -> Result<Response, TransportError> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(credential) = credential {
            builder = builder.bearer_auth(credential.expose());
        }
        let response = builder.send().await?;
        let status = response.status();
        if status.is_server_error() {
            return Err(TransportError::Status(status.as_u16()));
        }
        // 4xx responses carry a structured error envelope; anything else is unexpected.
        match response.json::<Response>().await {
            Ok(envelope) => Ok(envelope),
            Err(_) if !status.is_success() => Err(TransportError::Status(status.as_u16())),
            Err(e) => Err(e.into()),
        }
    }
}
