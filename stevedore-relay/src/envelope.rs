//! Wire model for everything exchanged over the broker
//!
//! A single JSON shape covers events, commands and results. Absent fields
//! are elided on the wire, never serialized as null. Field names are
//! camelCase to match the deployed wire contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::identity::ServerIdentity;

/// Closed set of command tags. Anything else deserializes to `Unknown`,
/// which the dispatcher answers with an "unrecognized command" result
/// instead of erroring. Serde is hand-written to pin that fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandTag {
    Containers,
    Restart,
    Stop,
    ReloadApps,
    RunScript,
    KillProcess,
    Unknown,
}

impl CommandTag {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandTag::Containers => "containers",
            CommandTag::Restart => "restart",
            CommandTag::Stop => "stop",
            CommandTag::ReloadApps => "reloadapps",
            CommandTag::RunScript => "runScript",
            CommandTag::KillProcess => "killProcess",
            CommandTag::Unknown => "unknown",
        }
    }

    pub fn parse(tag: &str) -> Self {
        match tag {
            "containers" => CommandTag::Containers,
            "restart" => CommandTag::Restart,
            "stop" => CommandTag::Stop,
            "reloadapps" => CommandTag::ReloadApps,
            "runScript" => CommandTag::RunScript,
            "killProcess" => CommandTag::KillProcess,
            _ => CommandTag::Unknown,
        }
    }

    /// Tags whose action must only run on the one node matching the
    /// embedded target identity.
    pub fn is_node_scoped(self) -> bool {
        matches!(
            self,
            CommandTag::ReloadApps | CommandTag::RunScript | CommandTag::KillProcess
        )
    }
}

impl fmt::Display for CommandTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for CommandTag {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CommandTag {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(CommandTag::parse(&tag))
    }
}

/// Command arguments. `containerId` targets a container; `node` targets a
/// node for the node-scoped tags. `chatId` carries the originating chat
/// session so results can be routed back without broker-level correlation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,
}

impl CommandPayload {
    /// Node target for node-scoped commands. Falls back to `containerId`,
    /// which the legacy wire format overloaded to carry node identities.
    pub fn target_node(&self) -> Option<&str> {
        self.node.as_deref().or(self.container_id.as_deref())
    }
}

/// Read-only container projection returned by enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSnapshot {
    pub name: String,
    /// First 12 characters of the full container id.
    pub id: String,
    pub status: String,
}

impl ContainerSnapshot {
    pub fn new(
        name: impl Into<String>,
        full_id: impl AsRef<str>,
        status: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            id: full_id.as_ref().chars().take(12).collect(),
            status: status.into(),
        }
    }
}

/// Outcome of an executed command, echoed back inside a result envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultBody {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub containers: Option<Vec<ContainerSnapshot>>,
    /// Captured stdout for script commands.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ResultBody {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_containers(mut self, containers: Vec<ContainerSnapshot>) -> Self {
        self.containers = Some(containers);
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }
}

/// The unit of exchange on every exchange.
///
/// Events carry the `container*`/`status` fields and no `command`.
/// Commands carry `command` + `payload`. Results echo the full originating
/// command envelope plus `result` and fresh identity fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<CommandPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultBody>,

    // Lifecycle event fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,

    // Origin identity, stamped by whoever publishes
    pub server_ip: String,
    pub hostname: String,
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    /// A command envelope as published by the operator side.
    pub fn command(tag: CommandTag, payload: CommandPayload, identity: &ServerIdentity) -> Self {
        Self {
            command: Some(tag),
            payload: Some(payload),
            result: None,
            container_id: None,
            container_name: None,
            image: None,
            status: None,
            exit_code: None,
            time: None,
            server_ip: identity.server_ip.clone(),
            hostname: identity.hostname.clone(),
            timestamp: Utc::now(),
        }
    }

    /// Turn a consumed command envelope into its correlated result: the
    /// original is echoed in full, `result` is appended and the identity
    /// fields are replaced with the executing node's.
    pub fn into_result(mut self, result: ResultBody, identity: &ServerIdentity) -> Self {
        self.result = Some(result);
        self.server_ip = identity.server_ip.clone();
        self.hostname = identity.hostname.clone();
        self.timestamp = Utc::now();
        self
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> ServerIdentity {
        ServerIdentity::new("10.0.0.5", "node-a")
    }

    #[test]
    fn command_tags_use_wire_names() {
        let json = serde_json::to_string(&CommandTag::RunScript).unwrap();
        assert_eq!(json, "\"runScript\"");
        let json = serde_json::to_string(&CommandTag::ReloadApps).unwrap();
        assert_eq!(json, "\"reloadapps\"");
    }

    #[test]
    fn unrecognized_tag_deserializes_to_unknown() {
        let tag: CommandTag = serde_json::from_str("\"selfdestruct\"").unwrap();
        assert_eq!(tag, CommandTag::Unknown);
    }

    #[test]
    fn command_envelope_round_trip() {
        let envelope = Envelope::command(
            CommandTag::Restart,
            CommandPayload {
                container_id: Some("abc123".into()),
                node: None,
                chat_id: Some(42),
            },
            &identity(),
        );
        let bytes = envelope.to_bytes().unwrap();
        let parsed = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn absent_fields_are_elided_on_the_wire() {
        let envelope = Envelope::command(CommandTag::Containers, CommandPayload::default(), &identity());
        let json: serde_json::Value = serde_json::from_slice(&envelope.to_bytes().unwrap()).unwrap();
        let object = json.as_object().unwrap();
        assert!(!object.contains_key("result"));
        assert!(!object.contains_key("status"));
        assert!(!object.contains_key("containerId"));
        assert_eq!(object["serverIp"], "10.0.0.5");
        assert_eq!(object["hostname"], "node-a");
    }

    #[test]
    fn result_echoes_the_originating_command() {
        let original = Envelope::command(
            CommandTag::Stop,
            CommandPayload {
                container_id: Some("abc123".into()),
                node: None,
                chat_id: Some(7),
            },
            &identity(),
        );
        let executor = ServerIdentity::new("10.0.0.9", "node-b");
        let result = original
            .clone()
            .into_result(ResultBody::message("Container abc123 stopped."), &executor);

        assert_eq!(result.command, original.command);
        assert_eq!(result.payload, original.payload);
        assert_eq!(result.server_ip, "10.0.0.9");
        assert_eq!(result.hostname, "node-b");
        assert_eq!(result.result.unwrap().message, "Container abc123 stopped.");
    }

    #[test]
    fn target_node_falls_back_to_the_legacy_container_id_field() {
        let payload = CommandPayload {
            container_id: Some("node-a".into()),
            node: None,
            chat_id: None,
        };
        assert_eq!(payload.target_node(), Some("node-a"));

        let payload = CommandPayload {
            container_id: Some("ignored".into()),
            node: Some("node-b".into()),
            chat_id: None,
        };
        assert_eq!(payload.target_node(), Some("node-b"));
    }

    #[test]
    fn snapshot_truncates_to_the_short_id() {
        let snapshot = ContainerSnapshot::new("web", "0123456789abcdef0123", "Up 2 hours");
        assert_eq!(snapshot.id, "0123456789ab");
    }
}
