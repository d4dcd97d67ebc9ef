//! Stevedore Node - worker-node relay agent
//!
//! Runs next to a Docker daemon and:
//! - streams container lifecycle events onto the events exchange
//! - executes commands received on the commands/admin-commands exchanges
//! - publishes correlated results back to the results exchange

mod config;
mod docker;
mod scripts;

use std::sync::Arc;

use anyhow::{Context, Result};
use stevedore_relay::{BrokerManager, CommandDispatcher, EventPublisher, ServerIdentity};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::NodeConfig;
use crate::docker::DockerCli;
use crate::scripts::ScriptRunner;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("stevedore_node=info,stevedore_relay=info")),
        )
        .init();

    let config = NodeConfig::from_env().context("invalid configuration")?;

    let mut identity = ServerIdentity::detect();
    if let Some(name) = &config.node_name {
        identity.hostname = name.clone();
    }
    info!(ip = %identity.server_ip, hostname = %identity.hostname, "stevedore node starting");

    // Blocks until the broker is reachable; reconnects afterwards are
    // handled by the manager's supervisor.
    let broker = BrokerManager::new(&config.relay);
    broker.connect().await;
    broker
        .declare_exchange(&config.relay.exchanges.events)
        .await
        .context("declaring events exchange")?;

    let publisher = EventPublisher::new(
        Arc::clone(&broker),
        config.relay.exchanges.events.clone(),
        identity.clone(),
    );
    let _event_stream = docker::spawn_event_stream(
        publisher,
        config.docker_binary.clone(),
        config.relay.reconnect_delay,
    );

    let runtime = DockerCli::new(config.docker_binary.clone(), config.docker_timeout);
    let control = ScriptRunner::new(
        config.run_script.clone(),
        config.kill_script.clone(),
        config.reload_command.clone(),
        config.script_timeout,
    );
    let dispatcher = Arc::new(CommandDispatcher::new(runtime, control, identity));

    for exchange in [
        config.relay.exchanges.commands.clone(),
        config.relay.exchanges.admin_commands.clone(),
    ] {
        let dispatcher = Arc::clone(&dispatcher);
        let broker = Arc::clone(&broker);
        let results = config.relay.exchanges.results.clone();
        tokio::spawn(async move {
            dispatcher.run(broker, &exchange, &results).await;
        });
    }

    info!("stevedore node running");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");
    broker.shutdown().await;
    Ok(())
}
