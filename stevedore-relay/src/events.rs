//! Event publisher
//!
//! Turns raw Docker lifecycle events into envelopes on the events
//! exchange. Publishing is fire-and-forget: fanout exchanges give no
//! delivery confirmation at this layer, and the event stream must keep
//! flowing no matter what, so every failure is logged and dropped.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use lapin::options::BasicPublishOptions;
use lapin::BasicProperties;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::broker::BrokerManager;
use crate::envelope::Envelope;
use crate::identity::ServerIdentity;

/// Lifecycle statuses worth relaying. Everything else is dropped
/// silently - Docker emits far more than anyone downstream cares about.
pub const RELAYED_STATUSES: &[&str] = &["start", "stop", "die", "destroy", "resize", "exec_create"];

/// Raw event as emitted by `docker events --format '{{json .}}'`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawContainerEvent {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(rename = "Actor", default)]
    pub actor: Option<RawActor>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawActor {
    #[serde(rename = "Attributes", default)]
    pub attributes: HashMap<String, String>,
}

impl RawContainerEvent {
    fn attribute(&self, key: &str) -> Option<String> {
        self.actor
            .as_ref()
            .and_then(|actor| actor.attributes.get(key).cloned())
    }
}

/// Build the event envelope for a raw event, or `None` when the status is
/// not in the relayed set.
pub fn event_envelope(raw: &RawContainerEvent, identity: &ServerIdentity) -> Option<Envelope> {
    let status = raw.status.as_deref()?;
    if !RELAYED_STATUSES.contains(&status) {
        return None;
    }

    Some(Envelope {
        command: None,
        payload: None,
        result: None,
        container_id: raw.id.clone(),
        container_name: raw.attribute("name"),
        image: raw.from.clone(),
        status: Some(status.to_string()),
        exit_code: raw.attribute("exitCode"),
        time: raw.time,
        server_ip: identity.server_ip.clone(),
        hostname: identity.hostname.clone(),
        timestamp: Utc::now(),
    })
}

pub struct EventPublisher {
    broker: Arc<BrokerManager>,
    exchange: String,
    identity: ServerIdentity,
}

impl EventPublisher {
    pub fn new(broker: Arc<BrokerManager>, exchange: impl Into<String>, identity: ServerIdentity) -> Self {
        Self {
            broker,
            exchange: exchange.into(),
            identity,
        }
    }

    /// Parse one raw JSON line from the event stream and relay it.
    /// Malformed lines are logged and discarded.
    pub async fn publish_raw(&self, line: &str) {
        let raw: RawContainerEvent = match serde_json::from_str(line) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(error = %err, "failed to parse container event, dropping");
                return;
            }
        };

        match event_envelope(&raw, &self.identity) {
            Some(envelope) => self.publish(&envelope).await,
            None => debug!(status = ?raw.status, "ignoring unrelayed event status"),
        }
    }

    /// Fire-and-forget publish to the events exchange.
    pub async fn publish(&self, envelope: &Envelope) {
        let channel = match self.broker.channel().await {
            Ok(channel) => channel,
            Err(err) => {
                warn!(error = %err, "no channel for event publish, dropping event");
                return;
            }
        };

        let payload = match envelope.to_bytes() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "failed to serialize event envelope");
                return;
            }
        };

        match channel
            .basic_publish(
                &self.exchange,
                "",
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_content_type("application/json".into()),
            )
            .await
        {
            Ok(_confirm) => debug!(
                status = envelope.status.as_deref().unwrap_or("-"),
                container = envelope.container_name.as_deref().unwrap_or("-"),
                "event published"
            ),
            // A publish racing a reconnect lands here; the stream moves on.
            Err(err) => warn!(error = %err, "failed to publish event, dropping"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> ServerIdentity {
        ServerIdentity::new("10.0.0.5", "node-a")
    }

    fn raw(status: &str) -> RawContainerEvent {
        serde_json::from_str(&format!(
            r#"{{"status":"{status}","id":"0123456789abcdef","from":"nginx:latest","time":1712345678,
                "Actor":{{"Attributes":{{"name":"web","exitCode":"0"}}}}}}"#
        ))
        .unwrap()
    }

    #[test]
    fn recognized_statuses_produce_one_envelope() {
        for status in RELAYED_STATUSES {
            let envelope = event_envelope(&raw(status), &identity())
                .unwrap_or_else(|| panic!("status {status} should be relayed"));
            assert_eq!(envelope.status.as_deref(), Some(*status));
            assert_eq!(envelope.container_id.as_deref(), Some("0123456789abcdef"));
            assert_eq!(envelope.container_name.as_deref(), Some("web"));
            assert_eq!(envelope.image.as_deref(), Some("nginx:latest"));
            assert_eq!(envelope.server_ip, "10.0.0.5");
            assert_eq!(envelope.hostname, "node-a");
            assert!(envelope.command.is_none());
        }
    }

    #[test]
    fn unrecognized_statuses_are_dropped() {
        for status in ["attach", "health_status", "top", ""] {
            assert!(event_envelope(&raw(status), &identity()).is_none());
        }
        let no_status = RawContainerEvent::default();
        assert!(event_envelope(&no_status, &identity()).is_none());
    }

    #[test]
    fn event_envelope_survives_a_wire_round_trip() {
        let envelope = event_envelope(&raw("die"), &identity()).unwrap();
        let parsed = Envelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, envelope);
        assert_eq!(parsed.exit_code.as_deref(), Some("0"));
        assert_eq!(parsed.time, Some(1712345678));
    }

    #[test]
    fn malformed_raw_events_fail_to_parse() {
        assert!(serde_json::from_str::<RawContainerEvent>("not json at all").is_err());
    }
}
