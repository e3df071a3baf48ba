//! Physical connections
//!
//! A [`Connector`] opens one connection and a [`Transport`] carries its
//! frames. The manager only talks to these traits; [`WsConnector`] is the
//! WebSocket implementation.

use futures::{future::BoxFuture, SinkExt, StreamExt};
use murmur_shared::{AuthErrorKind, ClientEvent, MurmurError, ServerEvent, AUTH_ERROR_HEADER};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{header::AUTHORIZATION, HeaderMap, HeaderValue, StatusCode},
        Error as WsError, Message,
    },
    MaybeTlsStream, WebSocketStream,
};

use crate::machine::Failure;

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("Handshake rejected: {0}")]
    Rejected(AuthErrorKind),

    #[error("Handshake timed out")]
    Timeout,

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Invalid connection request: {0}")]
    Request(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error(transparent)]
    Protocol(#[from] MurmurError),
}

impl ConnectError {
    pub fn failure(&self) -> Failure {
        match self {
            ConnectError::Rejected(kind) => Failure::Auth(*kind),
            _ => Failure::Transport,
        }
    }
}

/// Something received on a live connection
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Event(ServerEvent),
    /// The connection ended; `code` is the close code when the peer sent one
    Closed { code: Option<u16> },
}

/// One live physical connection
pub trait Transport: Send {
    fn recv(&mut self) -> BoxFuture<'_, Inbound>;
    fn send(&mut self, event: ClientEvent) -> BoxFuture<'_, Result<(), ConnectError>>;
    fn close(&mut self) -> BoxFuture<'_, ()>;
}

/// Opens physical connections
pub trait Connector: Send + Sync {
    fn connect<'a>(
        &'a self,
        token: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Box<dyn Transport>, ConnectError>>;
}

/// WebSocket connector presenting the token as a bearer header
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    /// `url` is the full endpoint, e.g. `wss://rt.example.com/ws`
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    async fn open(&self, token: Option<&str>) -> Result<Box<dyn Transport>, ConnectError> {
        let mut request = self.url.as_str().into_client_request()?;
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| ConnectError::Request(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        match connect_async(request).await {
            Ok((stream, _)) => Ok(Box::new(WsTransport { stream })),
            Err(WsError::Http(response)) => {
                Err(classify_rejection(response.status(), response.headers()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Connector for WsConnector {
    fn connect<'a>(
        &'a self,
        token: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Box<dyn Transport>, ConnectError>> {
        Box::pin(self.open(token))
    }
}

/// Map a refused upgrade to an auth category when the server supplied one
fn classify_rejection(status: StatusCode, headers: &HeaderMap) -> ConnectError {
    let kind = headers
        .get(AUTH_ERROR_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<AuthErrorKind>().ok());

    match kind {
        Some(kind) if status == StatusCode::UNAUTHORIZED => ConnectError::Rejected(kind),
        _ => ConnectError::Handshake(format!("upgrade refused with HTTP {status}")),
    }
}

struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsTransport {
    async fn next_inbound(&mut self) -> Inbound {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => match ServerEvent::from_json(&text) {
                    Ok(event) => return Inbound::Event(event),
                    Err(e) => {
                        tracing::warn!(error = %e, "Ignoring unparsable server event");
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    return Inbound::Closed {
                        code: frame.map(|f| u16::from(f.code)),
                    }
                }
                // Pings are answered by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "WebSocket read error");
                    return Inbound::Closed { code: None };
                }
                None => return Inbound::Closed { code: None },
            }
        }
    }

    async fn send_event(&mut self, event: ClientEvent) -> Result<(), ConnectError> {
        let json = event.to_json()?;
        self.stream.send(Message::Text(json)).await?;
        Ok(())
    }
}

impl Transport for WsTransport {
    fn recv(&mut self) -> BoxFuture<'_, Inbound> {
        Box::pin(self.next_inbound())
    }

    fn send(&mut self, event: ClientEvent) -> BoxFuture<'_, Result<(), ConnectError>> {
        Box::pin(self.send_event(event))
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Err(e) = self.stream.close(None).await {
                tracing::debug!(error = %e, "WebSocket close failed");
            }
        })
    }
}
