//! Telegram Bot API transport
//!
//! Long-polling client over HTTPS. Registration of the command menu and
//! the readiness signal happen in `init`; consumers of the transport wait
//! on `ready` instead of polling for an initialized bot.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use stevedore_relay::{ChatTransport, RelayError};
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub from: Option<User>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

pub struct TelegramBot {
    http: reqwest::Client,
    base: String,
    ready_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
}

impl TelegramBot {
    pub fn new(token: &str) -> Self {
        let (ready_tx, ready_rx) = watch::channel(false);
        Self {
            http: reqwest::Client::new(),
            base: format!("https://api.telegram.org/bot{token}"),
            ready_tx,
            ready_rx,
        }
    }

    /// Resolves once `init` has confirmed the bot identity.
    pub async fn ready(&self) {
        let mut rx = self.ready_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Confirm the token with `getMe`, register the command menu and flip
    /// the readiness signal.
    pub async fn init(&self) -> Result<()> {
        let me: User = self.call("getMe", &json!({})).await.context("getMe failed")?;
        info!(
            bot = me.username.as_deref().unwrap_or("?"),
            id = me.id,
            "telegram bot connected"
        );

        self.call::<bool>(
            "setMyCommands",
            &json!({
                "commands": [
                    {"command": "debug", "description": "Check the bot and show this chat id"},
                    {"command": "containers", "description": "List containers on every node"},
                    {"command": "restart", "description": "Restart a container (/restart <id>)"},
                    {"command": "stop", "description": "Stop a container (/stop <id>)"},
                    {"command": "reloadapps", "description": "Reload apps on a node (/reloadapps <node>)"},
                    {"command": "runscript", "description": "Run the node script (/runscript <node>)"},
                    {"command": "killprocess", "description": "Run the kill script (/killprocess <node>)"},
                ]
            }),
        )
        .await
        .context("setMyCommands failed")?;
        info!("bot commands registered");

        let _ = self.ready_tx.send(true);
        Ok(())
    }

    /// Long-poll for updates after `offset`.
    pub async fn next_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>> {
        self.call(
            "getUpdates",
            &json!({
                "offset": offset,
                "timeout": timeout_secs,
                "allowed_updates": ["message"],
            }),
        )
        .await
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: &serde_json::Value) -> Result<T> {
        let response: ApiResponse<T> = self
            .http
            .post(format!("{}/{method}", self.base))
            .json(body)
            .send()
            .await
            .with_context(|| format!("{method} request failed"))?
            .json()
            .await
            .with_context(|| format!("{method} returned an unreadable body"))?;

        if !response.ok {
            return Err(anyhow!(
                "{method}: {}",
                response.description.unwrap_or_else(|| "unknown error".into())
            ));
        }
        response
            .result
            .ok_or_else(|| anyhow!("{method}: missing result"))
    }
}

#[async_trait]
impl ChatTransport for TelegramBot {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), RelayError> {
        self.call::<Message>(
            "sendMessage",
            &json!({
                "chat_id": chat_id,
                "text": text,
                "parse_mode": "MarkdownV2",
            }),
        )
        .await
        .map(|_| ())
        .map_err(|err| RelayError::Chat(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_payload_parses() {
        let raw = r#"{
            "ok": true,
            "result": [{
                "update_id": 1001,
                "message": {
                    "chat": {"id": 42, "type": "private"},
                    "text": "/restart abc123",
                    "from": {"id": 42, "is_bot": false, "first_name": "Ops", "username": "ops"}
                }
            }]
        }"#;
        let response: ApiResponse<Vec<Update>> = serde_json::from_str(raw).unwrap();
        assert!(response.ok);
        let updates = response.result.unwrap();
        assert_eq!(updates[0].update_id, 1001);
        let message = updates[0].message.as_ref().unwrap();
        assert_eq!(message.chat.id, 42);
        assert_eq!(message.text.as_deref(), Some("/restart abc123"));
    }

    #[test]
    fn api_error_payload_parses() {
        let raw = r#"{"ok": false, "error_code": 401, "description": "Unauthorized"}"#;
        let response: ApiResponse<Vec<Update>> = serde_json::from_str(raw).unwrap();
        assert!(!response.ok);
        assert_eq!(response.description.as_deref(), Some("Unauthorized"));
    }
}
