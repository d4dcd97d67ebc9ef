//! Result/notification sink
//!
//! Consumes result envelopes and relays them to the chat session named in
//! the originating payload. Delivery is best-effort: a failed or
//! unroutable send is logged and the envelope is acknowledged anyway.
//! A second consumer acts as a pass-through logger on the events exchange.

use std::sync::Arc;

use futures::StreamExt;
use lapin::options::{BasicAckOptions, BasicConsumeOptions};
use lapin::types::FieldTable;
use tracing::{info, warn};

use crate::broker::BrokerManager;
use crate::chat::ChatTransport;
use crate::envelope::Envelope;
use crate::error::RelayError;
use crate::topology::Topology;

/// Characters reserved by Telegram MarkdownV2.
const MARKDOWN_RESERVED: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
];

pub fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if MARKDOWN_RESERVED.contains(&ch) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Human-readable rendering of a result envelope, or `None` when the
/// envelope carries no result body.
pub fn format_result(envelope: &Envelope) -> Option<String> {
    let result = envelope.result.as_ref()?;

    let mut lines = vec![escape_markdown(&result.message)];
    if let Some(containers) = &result.containers {
        for container in containers {
            lines.push(format!(
                "\u{2022} *{}* \\({}\\) {}",
                escape_markdown(&container.name),
                escape_markdown(&container.id),
                escape_markdown(&container.status),
            ));
        }
    }
    if let Some(output) = &result.output {
        // Code block: content is taken verbatim, not escaped.
        lines.push(format!("```\n{}\n```", output.trim_end()));
    }
    lines.push(escape_markdown(&format!(
        "from {} ({})",
        envelope.hostname, envelope.server_ip
    )));

    Some(lines.join("\n"))
}

pub struct ResultSink<T> {
    chat: Arc<T>,
}

impl<T: ChatTransport> ResultSink<T> {
    pub fn new(chat: Arc<T>) -> Self {
        Self { chat }
    }

    /// Consume the results exchange forever, re-binding after failures.
    pub async fn run(&self, broker: Arc<BrokerManager>, exchange: &str) {
        let topology = Topology::new(Arc::clone(&broker));
        loop {
            match self.consume_once(&topology, exchange).await {
                Ok(()) => warn!(exchange, "result stream ended, re-binding"),
                Err(err) => warn!(exchange, error = %err, "result listener error, retrying"),
            }
            tokio::time::sleep(broker.reconnect_delay()).await;
        }
    }

    async fn consume_once(&self, topology: &Topology, exchange: &str) -> Result<(), RelayError> {
        let bound = topology.bind_queue(exchange).await?;
        let mut consumer = bound
            .channel
            .basic_consume(
                &bound.queue,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        info!(exchange, queue = %bound.queue, "listening for results");

        while let Some(delivery) = consumer.next().await {
            let delivery = delivery?;
            self.handle_message(&delivery.data).await;
            delivery.ack(BasicAckOptions::default()).await?;
        }
        Ok(())
    }

    /// Relay one result envelope. Never fails: malformed envelopes and
    /// failed sends are logged and the message is dropped.
    pub async fn handle_message(&self, body: &[u8]) {
        let envelope = match Envelope::from_bytes(body) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "dropping malformed result envelope");
                return;
            }
        };

        let Some(text) = format_result(&envelope) else {
            warn!(hostname = %envelope.hostname, "result envelope without result body, dropping");
            return;
        };

        let chat_id = envelope.payload.as_ref().and_then(|payload| payload.chat_id);
        let Some(chat_id) = chat_id else {
            // No originating chat; visible in the logs only.
            info!(hostname = %envelope.hostname, "result without chat id: {}",
                envelope.result.as_ref().map(|r| r.message.as_str()).unwrap_or("-"));
            return;
        };

        if let Err(err) = self.chat.send_message(chat_id, &text).await {
            warn!(chat_id, error = %err, "failed to deliver result, dropping");
        }
    }
}

/// Pass-through logger on the events exchange. Terminal statuses are
/// forwarded to the notification chat when one is configured.
pub struct EventLogger<T> {
    chat: Arc<T>,
    notify_chat: Option<i64>,
}

const NOTIFY_STATUSES: &[&str] = &["die", "stop", "destroy"];

impl<T: ChatTransport> EventLogger<T> {
    pub fn new(chat: Arc<T>, notify_chat: Option<i64>) -> Self {
        Self { chat, notify_chat }
    }

    pub async fn run(&self, broker: Arc<BrokerManager>, exchange: &str) {
        let topology = Topology::new(Arc::clone(&broker));
        loop {
            match self.consume_once(&topology, exchange).await {
                Ok(()) => warn!(exchange, "event stream ended, re-binding"),
                Err(err) => warn!(exchange, error = %err, "event listener error, retrying"),
            }
            tokio::time::sleep(broker.reconnect_delay()).await;
        }
    }

    async fn consume_once(&self, topology: &Topology, exchange: &str) -> Result<(), RelayError> {
        let bound = topology.bind_queue(exchange).await?;
        let mut consumer = bound
            .channel
            .basic_consume(
                &bound.queue,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        info!(exchange, queue = %bound.queue, "listening for events");

        while let Some(delivery) = consumer.next().await {
            let delivery = delivery?;
            self.handle_message(&delivery.data).await;
            delivery.ack(BasicAckOptions::default()).await?;
        }
        Ok(())
    }

    pub async fn handle_message(&self, body: &[u8]) {
        let envelope = match Envelope::from_bytes(body) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "dropping malformed event envelope");
                return;
            }
        };

        let status = envelope.status.as_deref().unwrap_or("-");
        info!(
            status,
            container = envelope.container_name.as_deref().unwrap_or("-"),
            image = envelope.image.as_deref().unwrap_or("-"),
            hostname = %envelope.hostname,
            "container event"
        );

        let Some(chat_id) = self.notify_chat else { return };
        if !NOTIFY_STATUSES.contains(&status) {
            return;
        }

        let text = escape_markdown(&format!(
            "Container {} {} on {} ({})",
            envelope.container_name.as_deref().unwrap_or("?"),
            status,
            envelope.hostname,
            envelope.server_ip,
        ));
        if let Err(err) = self.chat.send_message(chat_id, &text).await {
            warn!(chat_id, error = %err, "failed to send event notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{CommandPayload, CommandTag, ContainerSnapshot, ResultBody};
    use devkit::{command_envelope, event_envelope_json, test_identity, RecordingChat};

    fn result_envelope(chat_id: Option<i64>) -> Envelope {
        command_envelope(
            CommandTag::Containers,
            CommandPayload {
                container_id: None,
                node: None,
                chat_id,
            },
        )
        .into_result(
            ResultBody::message("Container list")
                .with_containers(vec![ContainerSnapshot::new("web.1", "0123456789abcdef", "Up 2 hours")]),
            &test_identity(),
        )
    }

    #[test]
    fn escape_covers_every_reserved_character() {
        let escaped = escape_markdown("a_b*c[d]e(f)g~h`i>j#k+l-m=n|o{p}q.r!s");
        for reserved in MARKDOWN_RESERVED {
            assert!(
                escaped.contains(&format!("\\{reserved}")),
                "missing escape for {reserved}"
            );
        }
        assert_eq!(escape_markdown("plain text"), "plain text");
    }

    #[test]
    fn format_includes_message_containers_and_origin() {
        let text = format_result(&result_envelope(Some(42))).unwrap();
        assert!(text.contains("Container list"));
        assert!(text.contains("web\\.1"));
        assert!(text.contains("0123456789ab"));
        assert!(text.contains("test\\-node"));
    }

    #[test]
    fn format_returns_none_without_a_result_body() {
        let envelope = command_envelope(CommandTag::Containers, CommandPayload::default());
        assert!(format_result(&envelope).is_none());
    }

    #[tokio::test]
    async fn result_is_delivered_to_the_originating_chat() {
        let chat = Arc::new(RecordingChat::default());
        let sink = ResultSink::new(Arc::clone(&chat));
        sink.handle_message(&result_envelope(Some(42)).to_bytes().unwrap())
            .await;

        let sent = chat.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 42);
        assert!(sent[0].1.contains("Container list"));
    }

    #[tokio::test]
    async fn result_without_chat_id_is_logged_not_sent() {
        let chat = Arc::new(RecordingChat::default());
        let sink = ResultSink::new(Arc::clone(&chat));
        sink.handle_message(&result_envelope(None).to_bytes().unwrap())
            .await;
        assert!(chat.sent().is_empty());
    }

    #[tokio::test]
    async fn failed_send_is_swallowed() {
        let chat = Arc::new(RecordingChat::default());
        chat.set_failing(true);
        let sink = ResultSink::new(Arc::clone(&chat));
        // Must not panic or error; the envelope is simply dropped.
        sink.handle_message(&result_envelope(Some(42)).to_bytes().unwrap())
            .await;
        assert!(chat.sent().is_empty());
    }

    #[tokio::test]
    async fn malformed_result_is_dropped() {
        let chat = Arc::new(RecordingChat::default());
        let sink = ResultSink::new(Arc::clone(&chat));
        sink.handle_message(b"]]").await;
        assert!(chat.sent().is_empty());
    }

    #[tokio::test]
    async fn terminal_events_notify_the_configured_chat() {
        let chat = Arc::new(RecordingChat::default());
        let logger = EventLogger::new(Arc::clone(&chat), Some(7));

        logger.handle_message(event_envelope_json("die", "web").as_bytes()).await;
        logger.handle_message(event_envelope_json("start", "web").as_bytes()).await;

        let sent = chat.sent();
        assert_eq!(sent.len(), 1, "only terminal statuses are forwarded");
        assert_eq!(sent[0].0, 7);
        assert!(sent[0].1.contains("die"));
    }

    #[tokio::test]
    async fn events_without_notify_chat_are_only_logged() {
        let chat = Arc::new(RecordingChat::default());
        let logger = EventLogger::new(Arc::clone(&chat), None);
        logger.handle_message(event_envelope_json("die", "web").as_bytes()).await;
        assert!(chat.sent().is_empty());
    }
}
