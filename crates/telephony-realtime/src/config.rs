//! Client configuration
//!
//! # Examples
//!
//! ```rust
//! use crm_telephony_realtime::config::RealtimeConfig;
//! use std::time::Duration;
//!
//! let config = RealtimeConfig::new("wss://crm.example.com")
//!     .with_heartbeat_interval(Duration::from_secs(30));
//!
//! let url = config.endpoint_for("42").unwrap();
//! assert_eq!(url.as_str(), "wss://crm.example.com/integrations/telephony/ws?user_id=42");
//! ```

use crate::error::{RealtimeError, RealtimeResult};
use crate::reconnect::ReconnectPolicy;
use crate::transport::Endpoint;
use std::fmt;
use std::time::Duration;
use url::Url;

/// Environment variable holding the WebSocket base address
pub const BASE_URL_ENV: &str = "TELEPHONY_WS_BASE_URL";
/// Base address used when nothing is configured
pub const DEFAULT_BASE_URL: &str = "ws://localhost:8081";
/// Path of the telephony event channel below the base address
pub const DEFAULT_ENDPOINT_PATH: &str = "/integrations/telephony/ws";
/// Environment variable holding the session token sent with the handshake
pub const AUTH_TOKEN_ENV: &str = "TELEPHONY_AUTH_TOKEN";
/// Cookie the server reads the session token from
pub const AUTH_COOKIE: &str = "EPS-Auth";

/// Session token presented as the `EPS-Auth` cookie during the handshake.
///
/// The server checks that the token belongs to the user in the query string.
/// `Debug` never prints the token.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// Wrap a token
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// `Cookie` header value carrying the token
    pub fn cookie(&self) -> String {
        format!("{}={}", AUTH_COOKIE, self.0)
    }

    fn validate(&self) -> RealtimeResult<()> {
        if self.0.is_empty() {
            return Err(RealtimeError::config("auth token must not be empty"));
        }
        let unsafe_char = self.0.chars().find(|c| {
            c.is_whitespace() || c.is_control() || matches!(c, ';' | ',' | '"' | '\\') || !c.is_ascii()
        });
        if let Some(c) = unsafe_char {
            return Err(RealtimeError::config(format!(
                "auth token contains {:?}, which cannot appear in a cookie",
                c
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(<redacted>)")
    }
}

/// Configuration of the realtime client
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeConfig {
    /// Base WebSocket address, `ws://` or `wss://`
    pub base_url: String,
    /// Path of the event channel
    pub endpoint_path: String,
    /// Backoff parameters
    pub reconnect: ReconnectPolicy,
    /// Interval of outbound `ping` frames; `None` keeps the channel receive-only
    pub heartbeat_interval: Option<Duration>,
    /// Session token sent as a cookie with every handshake
    pub auth_token: Option<AuthToken>,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            endpoint_path: DEFAULT_ENDPOINT_PATH.to_string(),
            reconnect: ReconnectPolicy::default(),
            heartbeat_interval: None,
            auth_token: None,
        }
    }
}

impl RealtimeConfig {
    /// Create a configuration for the given base address
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Read the base address from `TELEPHONY_WS_BASE_URL`, falling back to the local dev server,
    /// and the session token from `TELEPHONY_AUTH_TOKEN`
    pub fn from_env() -> Self {
        let config = match std::env::var(BASE_URL_ENV) {
            Ok(base) if !base.trim().is_empty() => Self::new(base.trim()),
            _ => Self::default(),
        };
        match std::env::var(AUTH_TOKEN_ENV) {
            Ok(token) if !token.trim().is_empty() => config.with_auth_token(token.trim()),
            _ => config,
        }
    }

    /// Set the base address
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the endpoint path
    pub fn with_endpoint_path(mut self, path: impl Into<String>) -> Self {
        self.endpoint_path = path.into();
        self
    }

    /// Set the backoff policy
    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Send a heartbeat `ping` at this interval while open
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval);
        self
    }

    /// Authenticate the handshake with a session token
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(AuthToken::new(token));
        self
    }

    /// Keep the channel receive-only
    pub fn without_heartbeat(mut self) -> Self {
        self.heartbeat_interval = None;
        self
    }

    /// Check the configuration without connecting
    pub fn validate(&self) -> RealtimeResult<()> {
        let base = Url::parse(&self.base_url)?;
        match base.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(RealtimeError::config(format!(
                    "unsupported scheme '{}' in base URL, expected ws or wss",
                    other
                )))
            }
        }
        if base.cannot_be_a_base() {
            return Err(RealtimeError::config("base URL cannot carry a path"));
        }
        if self.heartbeat_interval == Some(Duration::ZERO) {
            return Err(RealtimeError::config("heartbeat interval must be non-zero"));
        }
        if let Some(token) = &self.auth_token {
            token.validate()?;
        }
        Ok(())
    }

    /// Event channel address for one user
    pub fn endpoint_for(&self, user_id: &str) -> RealtimeResult<Url> {
        self.validate()?;
        if user_id.trim().is_empty() {
            return Err(RealtimeError::config("user id must not be empty"));
        }

        let base = self.base_url.trim_end_matches('/');
        let path = self.endpoint_path.trim_start_matches('/');
        let mut url = Url::parse(&format!("{}/{}", base, path))?;
        url.query_pairs_mut().append_pair("user_id", user_id);
        Ok(url)
    }

    /// Address and credentials of the event channel for one user
    pub fn endpoint(&self, user_id: &str) -> RealtimeResult<Endpoint> {
        Ok(Endpoint {
            url: self.endpoint_for(user_id)?,
            auth_token: self.auth_token.clone(),
        })
    }
}
