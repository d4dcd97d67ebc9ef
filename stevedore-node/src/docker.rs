//! Docker runtime capability over the Docker CLI
//!
//! Container operations shell out to the `docker` binary with a per-call
//! timeout, and the lifecycle event source streams
//! `docker events --format '{{json .}}'` line by line into the publisher.
//! The child process is restarted with a delay whenever it exits.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use stevedore_relay::{ContainerRuntime, ContainerSnapshot, EventPublisher, RuntimeError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command as AsyncCommand;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

pub struct DockerCli {
    binary: String,
    call_timeout: Duration,
}

/// One line of `docker ps --format '{{json .}}'`.
#[derive(Debug, Deserialize)]
struct PsLine {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Names")]
    names: String,
    #[serde(rename = "Status")]
    status: String,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>, call_timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            call_timeout,
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String, RuntimeError> {
        let output = timeout(
            self.call_timeout,
            AsyncCommand::new(&self.binary)
                .args(args)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| RuntimeError::new(format!("docker {} timed out", args[0])))?
        .map_err(|err| RuntimeError::new(format!("failed to run docker: {err}")))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(RuntimeError::new(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }
}

fn parse_ps_output(output: &str) -> Vec<ContainerSnapshot> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<PsLine>(line) {
            Ok(ps) => Some(ContainerSnapshot::new(ps.names, ps.id, ps.status)),
            Err(err) => {
                warn!(error = %err, "skipping unparseable docker ps line");
                None
            }
        })
        .collect()
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSnapshot>, RuntimeError> {
        let mut args = vec!["ps", "--format", "{{json .}}"];
        if all {
            args.push("--all");
        }
        let output = self.run(&args).await?;
        Ok(parse_ps_output(&output))
    }

    async fn restart_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.run(&["restart", id]).await.map(|_| ())
    }

    async fn stop_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.run(&["stop", id]).await.map(|_| ())
    }
}

/// Stream Docker lifecycle events into the publisher forever.
pub fn spawn_event_stream(
    publisher: EventPublisher,
    binary: String,
    restart_delay: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match stream_events(&publisher, &binary).await {
                Ok(()) => warn!("docker event stream ended, restarting"),
                Err(err) => warn!(error = %err, "docker event stream failed, restarting"),
            }
            tokio::time::sleep(restart_delay).await;
        }
    })
}

async fn stream_events(publisher: &EventPublisher, binary: &str) -> Result<()> {
    let mut child = AsyncCommand::new(binary)
        .args(["events", "--format", "{{json .}}"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .context("failed to spawn docker events")?;

    let stdout = child.stdout.take().context("docker events has no stdout")?;
    let mut lines = BufReader::new(stdout).lines();
    info!("streaming docker events");

    while let Some(line) = lines.next_line().await.context("reading docker events")? {
        if line.trim().is_empty() {
            continue;
        }
        publisher.publish_raw(&line).await;
    }

    let status = child.wait().await.context("waiting for docker events")?;
    warn!(%status, "docker events exited");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ps_output_parses_into_snapshots() {
        let output = concat!(
            r#"{"ID":"0123456789ab","Names":"web","Status":"Up 2 hours"}"#,
            "\n",
            r#"{"ID":"fedcba987654","Names":"db","Status":"Exited (0) 3 days ago"}"#,
            "\n",
        );
        let snapshots = parse_ps_output(output);
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].name, "web");
        assert_eq!(snapshots[1].id, "fedcba987654");
    }

    #[test]
    fn garbage_ps_lines_are_skipped() {
        let output = "not json\n{\"ID\":\"0123456789ab\",\"Names\":\"web\",\"Status\":\"Up\"}\n";
        assert_eq!(parse_ps_output(output).len(), 1);
    }

    #[tokio::test]
    async fn missing_binary_surfaces_as_a_runtime_error() {
        let cli = DockerCli::new("definitely-not-a-docker-binary", Duration::from_secs(2));
        let err = cli.list_containers(true).await.unwrap_err();
        assert!(err.to_string().contains("failed to run docker"));
    }
}
