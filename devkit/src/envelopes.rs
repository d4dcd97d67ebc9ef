//! Envelope builders for tests
//!
//! All builders stamp the fixed test identity so assertions can match on
//! known origin fields.

use chrono::Utc;
use stevedore_relay::{CommandPayload, CommandTag, Envelope, ServerIdentity};

/// The identity every builder stamps: `10.0.0.5` / `test-node`.
pub fn test_identity() -> ServerIdentity {
    ServerIdentity::new("10.0.0.5", "test-node")
}

/// A command envelope as the operator gateway would publish it.
pub fn command_envelope(tag: CommandTag, payload: CommandPayload) -> Envelope {
    Envelope::command(tag, payload, &test_identity())
}

/// An event envelope in wire form, as published to the events exchange.
pub fn event_envelope_json(status: &str, container_name: &str) -> String {
    serde_json::json!({
        "containerId": "0123456789abcdef",
        "containerName": container_name,
        "image": "nginx:latest",
        "status": status,
        "exitCode": "0",
        "time": 1712345678,
        "serverIp": test_identity().server_ip,
        "hostname": test_identity().hostname,
        "timestamp": Utc::now().to_rfc3339(),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_builder_stamps_the_test_identity() {
        let envelope = command_envelope(CommandTag::Containers, CommandPayload::default());
        assert_eq!(envelope.server_ip, "10.0.0.5");
        assert_eq!(envelope.hostname, "test-node");
        assert_eq!(envelope.command, Some(CommandTag::Containers));
    }

    #[test]
    fn event_json_parses_back_into_an_envelope() {
        let envelope = Envelope::from_bytes(event_envelope_json("die", "web").as_bytes()).unwrap();
        assert_eq!(envelope.status.as_deref(), Some("die"));
        assert_eq!(envelope.container_name.as_deref(), Some("web"));
        assert!(envelope.command.is_none());
    }
}
