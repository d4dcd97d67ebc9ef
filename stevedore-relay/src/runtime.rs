//! Capability boundaries for local side effects
//!
//! The dispatcher never talks to Docker or the filesystem directly; the
//! node binary provides these implementations, tests provide stubs.

use async_trait::async_trait;
use thiserror::Error;

use crate::envelope::ContainerSnapshot;

/// Failure of a runtime call or a local script. Folded into result
/// messages by the dispatcher, never propagated further.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct RuntimeError(String);

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Container runtime operations used by the dispatcher.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSnapshot>, RuntimeError>;
    async fn restart_container(&self, id: &str) -> Result<(), RuntimeError>;
    async fn stop_container(&self, id: &str) -> Result<(), RuntimeError>;
}

/// Node-local control operations for the node-scoped command tags.
#[async_trait]
pub trait NodeControl: Send + Sync {
    /// Fire-and-forget reload trigger. Implementations detach the work
    /// and observe failures only through logging; the dispatcher
    /// acknowledges before the reload outcome is known.
    fn trigger_reload(&self);

    /// Run the configured node script, returning captured stdout.
    async fn run_script(&self) -> Result<String, RuntimeError>;

    /// Run the configured process-kill script, returning captured stdout.
    async fn kill_process(&self) -> Result<String, RuntimeError>;
}
