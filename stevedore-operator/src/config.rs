//! Operator configuration
//!
//! The bot token and the operator allowlist are required: without either
//! the process must not serve any traffic.

use anyhow::{bail, Context, Result};
use stevedore_relay::RelayConfig;

#[derive(Debug, Clone)]
pub struct OperatorConfig {
    pub relay: RelayConfig,
    /// Bot token, `TELEGRAM_TOKEN_ADMIN`. Required.
    pub telegram_token: String,
    /// Authorized chat ids, `TELEGRAM_ADMIN_IDS` (comma separated). Required.
    pub authorized_chats: Vec<i64>,
    /// Chat to forward terminal container events to, `EVENT_NOTIFY_CHAT`.
    pub notify_chat: Option<i64>,
    /// Enables the pg bridge when set, `DATABASE_URL`.
    pub database_url: Option<String>,
    /// Notification channel for the pg bridge, `PG_NOTIFY_CHANNEL`.
    pub pg_channel: String,
}

impl OperatorConfig {
    pub fn from_env() -> Result<Self> {
        let relay = RelayConfig::from_env().context("relay configuration")?;

        let telegram_token = std::env::var("TELEGRAM_TOKEN_ADMIN")
            .ok()
            .filter(|token| !token.trim().is_empty())
            .context("TELEGRAM_TOKEN_ADMIN is not set")?;

        let authorized_chats = parse_chat_ids(
            &std::env::var("TELEGRAM_ADMIN_IDS").unwrap_or_default(),
        )?;
        if authorized_chats.is_empty() {
            bail!("TELEGRAM_ADMIN_IDS must list at least one chat id");
        }

        Ok(Self {
            relay,
            telegram_token,
            authorized_chats,
            notify_chat: std::env::var("EVENT_NOTIFY_CHAT")
                .ok()
                .and_then(|value| value.trim().parse().ok()),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            pg_channel: std::env::var("PG_NOTIFY_CHANNEL")
                .ok()
                .filter(|channel| !channel.trim().is_empty())
                .unwrap_or_else(|| "pod_logs_channel".to_string()),
        })
    }
}

fn parse_chat_ids(raw: &str) -> Result<Vec<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<i64>()
                .with_context(|| format!("invalid chat id in TELEGRAM_ADMIN_IDS: {part:?}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_id_list_parses_with_whitespace() {
        assert_eq!(parse_chat_ids("1, 2 ,3").unwrap(), vec![1, 2, 3]);
        assert_eq!(parse_chat_ids("").unwrap(), Vec::<i64>::new());
        assert!(parse_chat_ids("1,abc").is_err());
    }
}
