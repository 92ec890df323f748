mod commands;
mod logging;
mod render;
mod settings;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use logging::{LoggingConfig, parse_log_level, setup_logging};
use settings::FileConfig;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "crm-telephony", about = "Watch and debug the CRM telephony event channel", version)]
struct Cli {
    /// Settings file (defaults to <config dir>/crm-telephony/config.toml when present)
    #[arg(long, global = true, env = "CRM_TELEPHONY_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, global = true, env = "CRM_TELEPHONY_LOG")]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Include source file and line in log lines
    #[arg(long, global = true)]
    log_file_info: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect as a user and print events as they arrive
    Watch {
        #[arg(long, env = "TELEPHONY_USER_ID")]
        user_id: Option<String>,

        #[arg(long, env = "TELEPHONY_WS_BASE_URL")]
        base_url: Option<String>,

        /// Session token (the EPS-Auth cookie) of the signed-in user
        #[arg(long, env = "TELEPHONY_AUTH_TOKEN", hide_env_values = true)]
        auth_token: Option<String>,

        /// Send a ping every N seconds while connected
        #[arg(long)]
        heartbeat_secs: Option<u64>,

        #[arg(long)]
        max_attempts: Option<u32>,

        /// One JSON object per line
        #[arg(long)]
        json: bool,
    },
    /// Decode frames read from stdin, one per line
    Decode {
        #[arg(long)]
        json: bool,
    },
    /// Print the reconnect schedule
    Backoff {
        #[arg(long)]
        max_attempts: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let file = FileConfig::load(cli.config.as_deref())?;

    let level = match cli.log_level.as_deref().or(file.log_level.as_deref()) {
        Some(level) => parse_log_level(level)?,
        None => LoggingConfig::default().level,
    };
    let mut logging = LoggingConfig::new(level).with_json(cli.log_json);
    if cli.log_file_info {
        logging = logging.with_file_info();
    }
    setup_logging(&logging)?;

    match cli.command {
        Command::Watch {
            user_id,
            base_url,
            auth_token,
            heartbeat_secs,
            max_attempts,
            json,
        } => {
            let user_id = match user_id.or_else(|| file.user_id.clone()) {
                Some(id) if !id.trim().is_empty() => id.trim().to_string(),
                _ => bail!("no user id: pass --user-id or set user_id in the config file"),
            };
            let config = file.realtime_config(
                base_url.as_deref(),
                auth_token.as_deref(),
                heartbeat_secs,
                max_attempts,
            )?;
            commands::watch(config, user_id, json).await
        }
        Command::Decode { json } => {
            let failures = commands::decode(std::io::stdin().lock(), std::io::stdout().lock(), json)?;
            if failures > 0 {
                bail!("{} frame(s) failed to decode", failures);
            }
            Ok(())
        }
        Command::Backoff { max_attempts } => {
            commands::backoff(&file.reconnect_policy(max_attempts), std::io::stdout().lock())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_watch() {
        let cli = Cli::try_parse_from([
            "crm-telephony",
            "--log-level",
            "debug",
            "watch",
            "--user-id",
            "42",
            "--base-url",
            "wss://crm.example.com",
            "--max-attempts",
            "3",
            "--auth-token",
            "jwt",
            "--json",
        ])
        .unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Command::Watch {
                user_id,
                base_url,
                auth_token,
                max_attempts,
                json,
                heartbeat_secs,
            } => {
                assert_eq!(auth_token.as_deref(), Some("jwt"));
                assert_eq!(user_id.as_deref(), Some("42"));
                assert_eq!(base_url.as_deref(), Some("wss://crm.example.com"));
                assert_eq!(max_attempts, Some(3));
                assert_eq!(heartbeat_secs, None);
                assert!(json);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "crm-telephony",
            "backoff",
            "--log-json",
            "--log-file-info",
            "--max-attempts",
            "2",
        ])
        .unwrap();
        assert!(cli.log_json);
        assert!(cli.log_file_info);
        assert!(matches!(cli.command, Command::Backoff { max_attempts: Some(2) }));
    }
}
