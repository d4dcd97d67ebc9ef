//! Postgres change-notification bridge
//!
//! Subscribes to a LISTEN/NOTIFY channel and logs every payload. Outside
//! the relay's command/event model; reconnects with the same fixed-delay
//! policy as the broker manager.

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub fn spawn_pg_bridge(
    database_url: String,
    channel: String,
    retry_delay: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match listen(&database_url, &channel).await {
                Ok(()) => warn!("postgres listener ended, reconnecting"),
                Err(err) => warn!(error = %err, "postgres listener failed, reconnecting"),
            }
            tokio::time::sleep(retry_delay).await;
        }
    })
}

async fn listen(database_url: &str, channel: &str) -> Result<()> {
    let mut listener = PgListener::connect(database_url)
        .await
        .context("connecting to postgres")?;
    listener.listen(channel).await.context("LISTEN failed")?;
    info!(channel, "listening for postgres notifications");

    loop {
        let notification = listener.recv().await.context("receiving notification")?;
        match serde_json::from_str::<serde_json::Value>(notification.payload()) {
            Ok(payload) => info!(channel = notification.channel(), %payload, "notification"),
            Err(_) => info!(
                channel = notification.channel(),
                payload = notification.payload(),
                "notification (non-JSON)"
            ),
        }
    }
}
