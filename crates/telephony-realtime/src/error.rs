//! Error types for the realtime telephony client

use thiserror::Error;

/// Result type for realtime client operations
pub type RealtimeResult<T> = Result<T, RealtimeError>;

/// Errors that can occur inside the realtime client
///
/// None of these escape the client's public `connect`/`disconnect` contract;
/// the session task logs them and applies the reconnection policy instead.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Endpoint URL could not be built
    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Opening the transport failed
    #[error("Connection to {endpoint} failed: {message}")]
    ConnectFailed { endpoint: String, message: String },

    /// Error reported by an open transport
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// The transport is already closed
    #[error("Transport closed")]
    TransportClosed,

    /// Inbound frame could not be decoded
    #[error("Malformed frame: {reason}")]
    MalformedFrame { reason: String },
}

impl RealtimeError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a connect failure for the given endpoint
    pub fn connect_failed(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectFailed {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a malformed frame error
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedFrame {
            reason: reason.into(),
        }
    }

    /// Whether the error ends the current transport
    pub fn is_fatal_for_connection(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailed { .. } | Self::Transport { .. } | Self::TransportClosed
        )
    }
}

impl From<serde_json::Error> for RealtimeError {
    fn from(err: serde_json::Error) -> Self {
        Self::malformed(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RealtimeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => Self::TransportClosed,
            other => Self::transport(other.to_string()),
        }
    }
}
