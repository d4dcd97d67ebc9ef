//! Chat command gateway
//!
//! Parses operator chat messages into command envelopes and publishes
//! them to the right exchange. Container-scoped commands go out even
//! without arguments - the dispatcher answers with its validation message,
//! exercising the same path as any other result. Node-scoped commands
//! without a target would be silently ignored by every node, so those get
//! a local usage reply instead.

use std::sync::Arc;

use stevedore_relay::sink::escape_markdown;
use stevedore_relay::{
    BrokerManager, ChatTransport, CommandPayload, CommandTag, Envelope, Exchanges, RelayError,
    ServerIdentity,
};
use lapin::options::BasicPublishOptions;
use lapin::BasicProperties;
use tracing::{debug, info, warn};

use crate::telegram::{Message, TelegramBot};

pub struct CommandGateway<T> {
    broker: Arc<BrokerManager>,
    exchanges: Exchanges,
    identity: ServerIdentity,
    authorized: Vec<i64>,
    chat: Arc<T>,
}

/// Map a chat command to its tag and single optional argument.
pub fn parse_command(text: &str) -> Option<(CommandTag, Option<String>)> {
    let mut parts = text.split_whitespace();
    let head = parts.next()?.strip_prefix('/')?;
    // Group chats address commands as /restart@BotName.
    let head = head.split('@').next().unwrap_or(head);

    let tag = match head {
        "containers" => CommandTag::Containers,
        "restart" => CommandTag::Restart,
        "stop" => CommandTag::Stop,
        "reloadapps" => CommandTag::ReloadApps,
        "runscript" => CommandTag::RunScript,
        "killprocess" => CommandTag::KillProcess,
        _ => return None,
    };
    Some((tag, parts.next().map(str::to_string)))
}

impl<T: ChatTransport> CommandGateway<T> {
    pub fn new(
        broker: Arc<BrokerManager>,
        exchanges: Exchanges,
        identity: ServerIdentity,
        authorized: Vec<i64>,
        chat: Arc<T>,
    ) -> Self {
        Self {
            broker,
            exchanges,
            identity,
            authorized,
            chat,
        }
    }

    pub fn is_authorized(&self, chat_id: i64) -> bool {
        self.authorized.contains(&chat_id)
    }

    pub async fn handle_message(&self, message: &Message) {
        let Some(text) = message.text.as_deref() else { return };
        let chat_id = message.chat.id;

        // Open to anyone: it only reveals the requester's own chat id,
        // which is exactly what a new operator needs to get allowlisted.
        if text.starts_with("/debug") {
            self.reply(chat_id, &format!("Bot is up. Chat id: {chat_id}")).await;
            return;
        }

        if !self.is_authorized(chat_id) {
            warn!(
                chat_id,
                user = message
                    .from
                    .as_ref()
                    .and_then(|user| user.username.as_deref())
                    .unwrap_or("?"),
                "ignoring command from unauthorized chat"
            );
            return;
        }

        let Some((tag, argument)) = parse_command(text) else {
            debug!(chat_id, "ignoring non-command message");
            return;
        };

        let payload = match tag {
            CommandTag::Containers => CommandPayload {
                container_id: None,
                node: None,
                chat_id: Some(chat_id),
            },
            CommandTag::Restart | CommandTag::Stop => CommandPayload {
                container_id: argument,
                node: None,
                chat_id: Some(chat_id),
            },
            CommandTag::ReloadApps | CommandTag::RunScript | CommandTag::KillProcess => {
                let Some(node) = argument else {
                    self.reply(chat_id, &format!("Usage: /{} <node>", tag.to_string().to_lowercase()))
                        .await;
                    return;
                };
                CommandPayload {
                    container_id: None,
                    node: Some(node),
                    chat_id: Some(chat_id),
                }
            }
            CommandTag::Unknown => return,
        };

        let exchange = if tag.is_node_scoped() {
            self.exchanges.admin_commands.clone()
        } else {
            self.exchanges.commands.clone()
        };

        let envelope = Envelope::command(tag, payload, &self.identity);
        match self.publish(&exchange, &envelope).await {
            Ok(()) => info!(command = %tag, exchange = %exchange, chat_id, "command published"),
            Err(err) => {
                warn!(command = %tag, error = %err, "failed to publish command");
                self.reply(chat_id, "Broker unavailable, try again shortly.").await;
            }
        }
    }

    async fn publish(&self, exchange: &str, envelope: &Envelope) -> Result<(), RelayError> {
        let channel = self.broker.channel().await?;
        let payload = envelope.to_bytes()?;
        channel
            .basic_publish(
                exchange,
                "",
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_content_type("application/json".into()),
            )
            .await?;
        Ok(())
    }

    /// Best-effort direct reply; failures are logged only.
    async fn reply(&self, chat_id: i64, text: &str) {
        if let Err(err) = self.chat.send_message(chat_id, &escape_markdown(text)).await {
            warn!(chat_id, error = %err, "failed to reply in chat");
        }
    }
}

/// Drive the gateway from the bot's long-poll loop. Waits for the
/// readiness signal instead of polling an uninitialized transport.
pub async fn run_chat_loop<T: ChatTransport>(bot: Arc<TelegramBot>, gateway: Arc<CommandGateway<T>>) {
    bot.ready().await;
    info!("chat command loop started");

    let mut offset = 0i64;
    loop {
        match bot.next_updates(offset, 30).await {
            Ok(updates) => {
                for update in updates {
                    offset = offset.max(update.update_id + 1);
                    if let Some(message) = &update.message {
                        gateway.handle_message(message).await;
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "getUpdates failed, backing off");
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devkit::RecordingChat;
    use std::time::Duration;
    use stevedore_relay::RelayConfig;

    fn parse(text: &str) -> Option<(CommandTag, Option<String>)> {
        parse_command(text)
    }

    #[test]
    fn commands_parse_with_and_without_arguments() {
        assert_eq!(parse("/containers"), Some((CommandTag::Containers, None)));
        assert_eq!(
            parse("/restart abc123"),
            Some((CommandTag::Restart, Some("abc123".into())))
        );
        assert_eq!(
            parse("/stop@StevedoreBot abc123"),
            Some((CommandTag::Stop, Some("abc123".into())))
        );
        assert_eq!(
            parse("/reloadapps node-a"),
            Some((CommandTag::ReloadApps, Some("node-a".into())))
        );
        assert_eq!(parse("/restart"), Some((CommandTag::Restart, None)));
        assert_eq!(parse("hello there"), None);
        assert_eq!(parse("/frobnicate"), None);
        assert_eq!(parse(""), None);
    }

    // A gateway against an unreachable broker: publishes fail fast, which
    // is what the broker-unavailable tests want.
    fn offline_gateway(chat: Arc<RecordingChat>) -> CommandGateway<RecordingChat> {
        let config = RelayConfig {
            broker_url: "amqp://127.0.0.1:1/%2F".into(),
            exchanges: Exchanges {
                events: "docker_events".into(),
                commands: "docker_commands".into(),
                admin_commands: "admin_docker_commands".into(),
                results: "docker_results".into(),
            },
            reconnect_delay: Duration::from_millis(50),
            channel_retries: 1,
            channel_retry_delay: Duration::from_millis(5),
        };
        CommandGateway::new(
            BrokerManager::new(&config),
            config.exchanges.clone(),
            ServerIdentity::new("10.0.0.1", "operator"),
            vec![42],
            chat,
        )
    }

    fn message(chat_id: i64, text: &str) -> Message {
        serde_json::from_value(serde_json::json!({
            "chat": {"id": chat_id},
            "text": text,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn debug_replies_with_the_chat_id_without_authorization() {
        let chat = Arc::new(RecordingChat::default());
        let gateway = offline_gateway(Arc::clone(&chat));
        gateway.handle_message(&message(999, "/debug")).await;
        assert!(chat.last_for(999).unwrap().contains("999"));
    }

    #[tokio::test]
    async fn unauthorized_chats_are_ignored() {
        let chat = Arc::new(RecordingChat::default());
        let gateway = offline_gateway(Arc::clone(&chat));
        gateway.handle_message(&message(999, "/containers")).await;
        assert!(chat.sent().is_empty());
    }

    #[tokio::test]
    async fn node_scoped_command_without_target_gets_a_usage_reply() {
        let chat = Arc::new(RecordingChat::default());
        let gateway = offline_gateway(Arc::clone(&chat));
        gateway.handle_message(&message(42, "/reloadapps")).await;
        assert!(chat.last_for(42).unwrap().contains("Usage"));
    }

    #[tokio::test]
    async fn broker_outage_produces_a_chat_reply() {
        let chat = Arc::new(RecordingChat::default());
        let gateway = offline_gateway(Arc::clone(&chat));
        gateway.handle_message(&message(42, "/containers")).await;
        assert!(chat.last_for(42).unwrap().contains("Broker unavailable"));
    }
}
