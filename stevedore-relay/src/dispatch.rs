//! Command dispatcher
//!
//! Consumes command envelopes from a private queue bound to a commands
//! exchange, executes the named action against the local capabilities and
//! publishes a correlated result envelope.
//!
//! Per-message lifecycle: parse (failure nacks without requeue) ->
//! execute (failures fold into error results, never escape) -> publish
//! result (best-effort) -> ack. Once execution starts it runs to
//! completion; there is no mid-flight cancellation.

use std::sync::Arc;

use futures::StreamExt;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel};
use tracing::{debug, info, warn};

use crate::broker::BrokerManager;
use crate::envelope::{CommandPayload, CommandTag, Envelope, ResultBody};
use crate::error::RelayError;
use crate::identity::ServerIdentity;
use crate::runtime::{ContainerRuntime, NodeControl};
use crate::topology::Topology;

/// What to do with the consumed message.
#[derive(Debug, PartialEq)]
pub enum DispatchOutcome {
    /// Acknowledge, optionally publishing the enclosed result first.
    Ack(Option<Envelope>),
    /// Nack without requeue. Only malformed messages land here.
    Discard,
}

pub struct CommandDispatcher<R, C> {
    runtime: R,
    control: C,
    identity: ServerIdentity,
}

impl<R, C> CommandDispatcher<R, C>
where
    R: ContainerRuntime,
    C: NodeControl,
{
    pub fn new(runtime: R, control: C, identity: ServerIdentity) -> Self {
        Self {
            runtime,
            control,
            identity,
        }
    }

    /// Consume `exchange` forever, re-binding after every stream end or
    /// broker error. Commands execute with results on `results_exchange`.
    pub async fn run(&self, broker: Arc<BrokerManager>, exchange: &str, results_exchange: &str) {
        let topology = Topology::new(Arc::clone(&broker));
        loop {
            match self.consume_once(&topology, exchange, results_exchange).await {
                Ok(()) => warn!(exchange, "command stream ended, re-binding"),
                Err(err) => warn!(exchange, error = %err, "command listener error, retrying"),
            }
            tokio::time::sleep(broker.reconnect_delay()).await;
        }
    }

    async fn consume_once(
        &self,
        topology: &Topology,
        exchange: &str,
        results_exchange: &str,
    ) -> Result<(), RelayError> {
        // Results go out on the same channel; make sure their exchange
        // exists even when this node boots before the operator side.
        topology.declare_exchange(results_exchange).await?;
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
        info!(exchange, queue = %bound.queue, "listening for commands");

        while let Some(delivery) = consumer.next().await {
            let delivery = delivery?;
            match self.handle_message(&delivery.data).await {
                DispatchOutcome::Ack(result) => {
                    if let Some(envelope) = result {
                        publish_result(&bound.channel, results_exchange, &envelope).await;
                    }
                    delivery.ack(BasicAckOptions::default()).await?;
                }
                DispatchOutcome::Discard => {
                    delivery
                        .nack(BasicNackOptions {
                            requeue: false,
                            ..Default::default()
                        })
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Parse and execute one command message. Never fails: malformed
    /// input becomes `Discard`, every execution failure becomes a result.
    pub async fn handle_message(&self, body: &[u8]) -> DispatchOutcome {
        let envelope = match Envelope::from_bytes(body) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "discarding malformed command message");
                return DispatchOutcome::Discard;
            }
        };

        let Some(tag) = envelope.command else {
            warn!("ignoring message without a command tag");
            return DispatchOutcome::Ack(None);
        };

        debug!(command = %tag, "command received");
        let result = self.execute(tag, envelope.payload.as_ref()).await;
        DispatchOutcome::Ack(result.map(|body| envelope.into_result(body, &self.identity)))
    }

    /// The action table. `None` means nothing to publish (a node-scoped
    /// command addressed to a different node).
    async fn execute(&self, tag: CommandTag, payload: Option<&CommandPayload>) -> Option<ResultBody> {
        match tag {
            CommandTag::Containers => Some(self.list_containers().await),
            CommandTag::Restart => Some(self.restart(payload).await),
            CommandTag::Stop => Some(self.stop(payload).await),
            CommandTag::ReloadApps => self.reload(tag, payload),
            CommandTag::RunScript => self.run_script(tag, payload).await,
            CommandTag::KillProcess => self.kill_process(tag, payload).await,
            CommandTag::Unknown => {
                warn!("unrecognized command tag");
                Some(ResultBody::message("Unrecognized command."))
            }
        }
    }

    async fn list_containers(&self) -> ResultBody {
        match self.runtime.list_containers(true).await {
            Ok(containers) if containers.is_empty() => ResultBody::message("No containers found."),
            Ok(containers) => ResultBody::message("Container list").with_containers(containers),
            Err(err) => ResultBody::message(format!("Error listing containers: {err}")),
        }
    }

    async fn restart(&self, payload: Option<&CommandPayload>) -> ResultBody {
        let Some(id) = container_target(payload) else {
            return ResultBody::message("No containerId given.");
        };
        info!(container = id, "restarting container");
        match self.runtime.restart_container(id).await {
            Ok(()) => ResultBody::message(format!("Container {id} restarted.")),
            Err(err) => ResultBody::message(format!("Error restarting container {id}: {err}")),
        }
    }

    async fn stop(&self, payload: Option<&CommandPayload>) -> ResultBody {
        let Some(id) = container_target(payload) else {
            return ResultBody::message("No containerId given.");
        };
        info!(container = id, "stopping container");
        match self.runtime.stop_container(id).await {
            Ok(()) => ResultBody::message(format!("Container {id} stopped.")),
            Err(err) => ResultBody::message(format!("Error stopping container {id}: {err}")),
        }
    }

    fn reload(&self, tag: CommandTag, payload: Option<&CommandPayload>) -> Option<ResultBody> {
        self.match_target(tag, payload)?;
        // Acknowledged immediately; the reload outcome is only logged.
        self.control.trigger_reload();
        Some(ResultBody::message(format!(
            "Reload triggered on {}.",
            self.identity.hostname
        )))
    }

    async fn run_script(&self, tag: CommandTag, payload: Option<&CommandPayload>) -> Option<ResultBody> {
        self.match_target(tag, payload)?;
        Some(match self.control.run_script().await {
            Ok(output) => {
                ResultBody::message(format!("Script finished on {}.", self.identity.hostname))
                    .with_output(output)
            }
            Err(err) => ResultBody::message(format!("Error running script: {err}")),
        })
    }

    async fn kill_process(&self, tag: CommandTag, payload: Option<&CommandPayload>) -> Option<ResultBody> {
        self.match_target(tag, payload)?;
        Some(match self.control.kill_process().await {
            Ok(output) => ResultBody::message(format!(
                "Kill script finished on {}.",
                self.identity.hostname
            ))
            .with_output(output),
            Err(err) => ResultBody::message(format!("Error running kill script: {err}")),
        })
    }

    /// Node-target gate: the fanout broadcast reaches every node, so a
    /// non-matching (or missing) target is a silent no-op here.
    fn match_target(&self, tag: CommandTag, payload: Option<&CommandPayload>) -> Option<()> {
        let target = payload.and_then(CommandPayload::target_node);
        match target {
            Some(target) if self.identity.matches(target) => Some(()),
            Some(target) => {
                debug!(command = %tag, target, "command addressed to another node, ignoring");
                None
            }
            None => {
                debug!(command = %tag, "node-scoped command without a target, ignoring");
                None
            }
        }
    }
}

fn container_target(payload: Option<&CommandPayload>) -> Option<&str> {
    payload.and_then(|payload| payload.container_id.as_deref())
}

/// Best-effort result publish: a failure here is logged and the command
/// message is still acknowledged by the caller.
async fn publish_result(channel: &Channel, exchange: &str, envelope: &Envelope) {
    let payload = match envelope.to_bytes() {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "failed to serialize result envelope");
            return;
        }
    };

    match channel
        .basic_publish(
            exchange,
            "",
            BasicPublishOptions::default(),
            &payload,
            BasicProperties::default().with_content_type("application/json".into()),
        )
        .await
    {
        Ok(_confirm) => info!(
            exchange,
            hostname = %envelope.hostname,
            server_ip = %envelope.server_ip,
            "result published"
        ),
        Err(err) => warn!(exchange, error = %err, "failed to publish result"),
    }
}
