//! On-disk settings for the CLI
//!
//! Values are layered: defaults, then the TOML file, then environment and
//! command-line flags.

use anyhow::{Context, Result, bail};
use crm_telephony_realtime::{RealtimeConfig, ReconnectPolicy};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub base_url: Option<String>,
    pub endpoint_path: Option<String>,
    pub user_id: Option<String>,
    /// Session token sent as the `EPS-Auth` cookie
    pub auth_token: Option<String>,
    pub heartbeat_secs: Option<u64>,
    pub log_level: Option<String>,
    pub reconnect: ReconnectSection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconnectSection {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
}

/// `<config dir>/crm-telephony/config.toml`
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("crm-telephony").join("config.toml"))
}

impl FileConfig {
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid config file")
    }

    /// An explicit path must exist; the default location is optional
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match default_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config = Self::parse(&text).with_context(|| format!("in {}", path.display()))?;
        tracing::debug!("Loaded settings from {}", path.display());
        Ok(config)
    }

    pub fn reconnect_policy(&self, max_attempts: Option<u32>) -> ReconnectPolicy {
        let mut policy = ReconnectPolicy::default();
        if let Some(attempts) = max_attempts.or(self.reconnect.max_attempts) {
            policy = policy.with_max_attempts(attempts);
        }
        if let Some(ms) = self.reconnect.base_delay_ms {
            policy = policy.with_base_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = self.reconnect.max_delay_ms {
            policy = policy.with_max_delay(Duration::from_millis(ms));
        }
        policy
    }

    /// Build the client configuration, letting flag values override the file
    pub fn realtime_config(
        &self,
        base_url: Option<&str>,
        auth_token: Option<&str>,
        heartbeat_secs: Option<u64>,
        max_attempts: Option<u32>,
    ) -> Result<RealtimeConfig> {
        let mut config = RealtimeConfig::default();
        if let Some(url) = base_url.or(self.base_url.as_deref()) {
            config = config.with_base_url(url);
        }
        if let Some(token) = auth_token.or(self.auth_token.as_deref()) {
            config = config.with_auth_token(token.trim());
        }
        if let Some(path) = &self.endpoint_path {
            config = config.with_endpoint_path(path.clone());
        }
        match heartbeat_secs.or(self.heartbeat_secs) {
            Some(0) => bail!("heartbeat interval must be at least one second"),
            Some(secs) => config = config.with_heartbeat_interval(Duration::from_secs(secs)),
            None => {}
        }
        config = config.with_reconnect_policy(self.reconnect_policy(max_attempts));
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_file() {
        let config = FileConfig::parse(
            r#"
            base_url = "wss://crm.example.com"
            user_id = "42"
            auth_token = "from.file"
            heartbeat_secs = 25

            [reconnect]
            max_attempts = 8
            max_delay_ms = 60000
            "#,
        )
        .unwrap();
        assert_eq!(config.base_url.as_deref(), Some("wss://crm.example.com"));
        assert_eq!(config.user_id.as_deref(), Some("42"));
        assert_eq!(config.reconnect.max_attempts, Some(8));

        let realtime = config.realtime_config(None, None, None, None).unwrap();
        assert_eq!(realtime.base_url, "wss://crm.example.com");
        assert_eq!(realtime.heartbeat_interval, Some(Duration::from_secs(25)));
        assert_eq!(realtime.reconnect.max_attempts, 8);
        assert_eq!(realtime.reconnect.max_delay, Duration::from_secs(60));
        assert_eq!(realtime.auth_token.unwrap().expose(), "from.file");

        let flagged = config.realtime_config(None, Some("from.flag"), None, None).unwrap();
        assert_eq!(flagged.auth_token.unwrap().expose(), "from.flag");
    }

    #[test]
    fn test_flags_override_file() {
        let config = FileConfig::parse("base_url = \"ws://file:1\"\n[reconnect]\nmax_attempts = 8\n").unwrap();
        let realtime = config
            .realtime_config(Some("ws://flag:2"), None, Some(10), Some(3))
            .unwrap();
        assert_eq!(realtime.base_url, "ws://flag:2");
        assert_eq!(realtime.heartbeat_interval, Some(Duration::from_secs(10)));
        assert_eq!(realtime.reconnect.max_attempts, 3);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = FileConfig::parse("").unwrap();
        assert_eq!(config, FileConfig::default());
        let realtime = config.realtime_config(None, None, None, None).unwrap();
        assert_eq!(realtime.base_url, "ws://localhost:8081");
        assert_eq!(realtime.heartbeat_interval, None);
        assert_eq!(realtime.reconnect, ReconnectPolicy::default());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(FileConfig::parse("colour = \"red\"").is_err());
        let config = FileConfig::default();
        assert!(config.realtime_config(Some("https://crm"), None, None, None).is_err());
        assert!(config.realtime_config(None, None, Some(0), None).is_err());
        assert!(config.realtime_config(None, Some("a;b"), None, None).is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let path = std::env::temp_dir().join("crm-telephony-missing-settings.toml");
        assert!(FileConfig::load(Some(&path)).is_err());
    }
}
