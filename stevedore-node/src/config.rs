//! Node configuration
//!
//! Everything the node reads from the environment, resolved once at
//! startup. Script paths point at fixed local scripts; the reload command
//! is whatever process manager the node runs its apps under.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use stevedore_relay::RelayConfig;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub relay: RelayConfig,
    /// Docker CLI binary, `DOCKER_BIN` (default `docker`).
    pub docker_binary: String,
    /// Timeout for individual docker calls, `DOCKER_TIMEOUT_SECS`.
    pub docker_timeout: Duration,
    /// Script for the `runScript` command, `RUN_SCRIPT`.
    pub run_script: PathBuf,
    /// Script for the `killProcess` command, `KILL_PROCESS_SCRIPT`.
    pub kill_script: PathBuf,
    /// Shell command fired by `reloadapps`, `RELOAD_COMMAND`.
    pub reload_command: String,
    /// Upper bound for script execution, `SCRIPT_TIMEOUT_SECS`.
    pub script_timeout: Duration,
    /// Overrides the detected hostname for node targeting, `NODE_NAME`.
    pub node_name: Option<String>,
}

impl NodeConfig {
    pub fn from_env() -> Result<Self> {
        let relay = RelayConfig::from_env().context("relay configuration")?;
        Ok(Self {
            relay,
            docker_binary: env_or("DOCKER_BIN", "docker"),
            docker_timeout: Duration::from_secs(env_secs("DOCKER_TIMEOUT_SECS", 30)?),
            run_script: PathBuf::from(env_or("RUN_SCRIPT", "./scripts/run.sh")),
            kill_script: PathBuf::from(env_or("KILL_PROCESS_SCRIPT", "./scripts/kill-process.sh")),
            reload_command: env_or("RELOAD_COMMAND", "pm2 reload all"),
            script_timeout: Duration::from_secs(env_secs("SCRIPT_TIMEOUT_SECS", 60)?),
            node_name: std::env::var("NODE_NAME").ok().filter(|v| !v.trim().is_empty()),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_secs(key: &str, default: u64) -> Result<u64> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a number of seconds")),
        _ => Ok(default),
    }
}
