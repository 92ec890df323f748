//! Transport seam of the realtime client
//!
//! The client talks to the server through a [`Connector`] that opens
//! [`Connection`]s. [`WsConnector`] is the production implementation over
//! WebSockets; tests plug in scripted connectors instead.

use crate::config::AuthToken;
use crate::error::{RealtimeError, RealtimeResult};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};
use url::Url;

/// Data or close frame received from the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame
    Text(String),
    /// Binary frame
    Binary(Vec<u8>),
    /// Peer closed the channel, with its reason if any
    Close(Option<String>),
}

/// Where to connect and how to authenticate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Event channel address, including the `user_id` query
    pub url: Url,
    /// Session token sent as the `EPS-Auth` cookie
    pub auth_token: Option<AuthToken>,
}

impl Endpoint {
    /// Endpoint without credentials
    pub fn new(url: Url) -> Self {
        Self {
            url,
            auth_token: None,
        }
    }

    /// Upgrade request for the WebSocket handshake
    pub fn handshake_request(&self) -> RealtimeResult<Request> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| RealtimeError::connect_failed(self.url.as_str(), e.to_string()))?;
        if let Some(token) = &self.auth_token {
            let cookie = HeaderValue::from_str(&token.cookie())
                .map_err(|_| RealtimeError::config("auth token is not a valid cookie value"))?;
            request.headers_mut().insert(COOKIE, cookie);
        }
        Ok(request)
    }
}

/// Opens connections to an endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection; returns once the transport is confirmed open
    async fn connect(&self, endpoint: &Endpoint) -> RealtimeResult<Box<dyn Connection>>;
}

/// One open, full-duplex message channel
#[async_trait]
pub trait Connection: Send {
    /// Next inbound frame; `None` once the channel is closed
    async fn next_frame(&mut self) -> Option<RealtimeResult<Frame>>;

    /// Send a text frame
    async fn send_text(&mut self, text: String) -> RealtimeResult<()>;

    /// Close the channel; closing twice is a no-op
    async fn close(&mut self) -> RealtimeResult<()>;
}

/// WebSocket connector
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl WsConnector {
    /// Create a new connector
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &Endpoint) -> RealtimeResult<Box<dyn Connection>> {
        let url = &endpoint.url;
        debug!(
            "Opening telephony WebSocket to {} ({})",
            url,
            if endpoint.auth_token.is_some() { "with session cookie" } else { "anonymous" }
        );
        let request = endpoint.handshake_request()?;
        let (stream, response) = connect_async(request)
            .await
            .map_err(|e| RealtimeError::connect_failed(url.as_str(), e.to_string()))?;
        trace!("WebSocket handshake completed with status {}", response.status());
        Ok(Box::new(WsConnection {
            stream,
            closed: false,
        }))
    }
}

/// WebSocket connection
pub struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

#[async_trait]
impl Connection for WsConnection {
    async fn next_frame(&mut self) -> Option<RealtimeResult<Frame>> {
        if self.closed {
            return None;
        }
        loop {
            let message = match self.stream.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    let err = RealtimeError::from(e);
                    if err.is_fatal_for_connection() {
                        self.closed = true;
                    }
                    return Some(Err(err));
                }
                None => {
                    self.closed = true;
                    return None;
                }
            };

            match message {
                WsMessage::Text(text) => return Some(Ok(Frame::Text(text))),
                WsMessage::Binary(data) => return Some(Ok(Frame::Binary(data))),
                // tungstenite answers pings on its own
                WsMessage::Ping(_) | WsMessage::Pong(_) => {
                    trace!("WebSocket control frame");
                }
                WsMessage::Close(frame) => {
                    self.closed = true;
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|reason| !reason.is_empty());
                    return Some(Ok(Frame::Close(reason)));
                }
                WsMessage::Frame(_) => {
                    warn!("Unexpected raw WebSocket frame");
                }
            }
        }
    }

    async fn send_text(&mut self, text: String) -> RealtimeResult<()> {
        if self.closed {
            return Err(RealtimeError::TransportClosed);
        }
        self.stream.send(WsMessage::Text(text)).await.map_err(|e| {
            self.closed = true;
            RealtimeError::from(e)
        })
    }

    async fn close(&mut self) -> RealtimeResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.stream.close(None).await {
            Ok(()) => Ok(()),
            Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed)
            | Err(tokio_tungstenite::tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(RealtimeError::from(e)),
        }
    }
}
