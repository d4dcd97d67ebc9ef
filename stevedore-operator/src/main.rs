//! Stevedore Operator - chat side of the relay
//!
//! Bridges the Telegram operator channel and the broker:
//! - parses chat commands and publishes command envelopes
//! - consumes result envelopes and replies to the originating chat
//! - logs the event stream, forwarding terminal statuses if configured
//! - optionally bridges a Postgres notification channel into the logs

mod commands;
mod config;
mod pg_bridge;
mod telegram;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use stevedore_relay::{BrokerManager, EventLogger, ResultSink, ServerIdentity};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::commands::CommandGateway;
use crate::config::OperatorConfig;
use crate::telegram::TelegramBot;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("stevedore_operator=info,stevedore_relay=info")),
        )
        .init();

    let config = OperatorConfig::from_env().context("invalid configuration")?;
    let identity = ServerIdentity::detect();
    info!(ip = %identity.server_ip, hostname = %identity.hostname, "stevedore operator starting");

    let broker = BrokerManager::new(&config.relay);
    broker.connect().await;
    for exchange in [
        &config.relay.exchanges.events,
        &config.relay.exchanges.commands,
        &config.relay.exchanges.admin_commands,
        &config.relay.exchanges.results,
    ] {
        broker
            .declare_exchange(exchange)
            .await
            .with_context(|| format!("declaring exchange {exchange}"))?;
    }

    let bot = Arc::new(TelegramBot::new(&config.telegram_token));
    {
        // Transient failures (network, Telegram outage) retry; the
        // readiness signal flips only after a successful init.
        let bot = Arc::clone(&bot);
        tokio::spawn(async move {
            loop {
                match bot.init().await {
                    Ok(()) => break,
                    Err(err) => {
                        warn!(error = %err, "telegram init failed, retrying");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });
    }

    let gateway = Arc::new(CommandGateway::new(
        Arc::clone(&broker),
        config.relay.exchanges.clone(),
        identity,
        config.authorized_chats.clone(),
        Arc::clone(&bot),
    ));
    tokio::spawn(commands::run_chat_loop(Arc::clone(&bot), gateway));

    {
        let sink = ResultSink::new(Arc::clone(&bot));
        let broker = Arc::clone(&broker);
        let exchange = config.relay.exchanges.results.clone();
        tokio::spawn(async move { sink.run(broker, &exchange).await });
    }

    {
        let logger = EventLogger::new(Arc::clone(&bot), config.notify_chat);
        let broker = Arc::clone(&broker);
        let exchange = config.relay.exchanges.events.clone();
        tokio::spawn(async move { logger.run(broker, &exchange).await });
    }

    if let Some(database_url) = config.database_url.clone() {
        pg_bridge::spawn_pg_bridge(
            database_url,
            config.pg_channel.clone(),
            config.relay.reconnect_delay,
        );
    }

    info!("stevedore operator running");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");
    broker.shutdown().await;
    Ok(())
}
