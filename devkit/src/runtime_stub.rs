//! Scripted capability stubs
//!
//! `StubRuntime` answers container runtime calls from a fixed list and
//! records every invocation; `StubControl` counts reloads and script runs.
//! Both can be switched to fail so dispatcher error folding can be tested.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use stevedore_relay::{ContainerRuntime, ContainerSnapshot, NodeControl, RuntimeError};

#[derive(Debug, Default)]
pub struct StubRuntime {
    containers: Mutex<Vec<ContainerSnapshot>>,
    fail_with: Mutex<Option<String>>,
    calls: Mutex<Vec<String>>,
}

impl StubRuntime {
    pub fn with_container(self, name: &str, full_id: &str, status: &str) -> Self {
        self.containers
            .lock()
            .unwrap()
            .push(ContainerSnapshot::new(name, full_id, status));
        self
    }

    /// Make every runtime call fail with the given reason.
    pub fn failing_with(self, reason: &str) -> Self {
        *self.fail_with.lock().unwrap() = Some(reason.to_string());
        self
    }

    /// Invocations so far, e.g. `["list all=true", "restart abc123"]`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) -> Result<(), RuntimeError> {
        self.calls.lock().unwrap().push(call);
        match self.fail_with.lock().unwrap().as_ref() {
            Some(reason) => Err(RuntimeError::new(reason.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ContainerRuntime for StubRuntime {
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSnapshot>, RuntimeError> {
        self.record(format!("list all={all}"))?;
        Ok(self.containers.lock().unwrap().clone())
    }

    async fn restart_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(format!("restart {id}"))
    }

    async fn stop_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(format!("stop {id}"))
    }
}

#[derive(Debug)]
pub struct StubControl {
    script_output: Mutex<String>,
    fail_with: Mutex<Option<String>>,
    reloads: AtomicUsize,
    script_runs: AtomicUsize,
    kills: AtomicUsize,
}

impl Default for StubControl {
    fn default() -> Self {
        Self {
            script_output: Mutex::new("ok\n".to_string()),
            fail_with: Mutex::new(None),
            reloads: AtomicUsize::new(0),
            script_runs: AtomicUsize::new(0),
            kills: AtomicUsize::new(0),
        }
    }
}

impl StubControl {
    pub fn with_script_output(self, output: &str) -> Self {
        *self.script_output.lock().unwrap() = output.to_string();
        self
    }

    pub fn failing_with(self, reason: &str) -> Self {
        *self.fail_with.lock().unwrap() = Some(reason.to_string());
        self
    }

    pub fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }

    pub fn script_runs(&self) -> usize {
        self.script_runs.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    fn outcome(&self) -> Result<String, RuntimeError> {
        match self.fail_with.lock().unwrap().as_ref() {
            Some(reason) => Err(RuntimeError::new(reason.clone())),
            None => Ok(self.script_output.lock().unwrap().clone()),
        }
    }
}

#[async_trait]
impl NodeControl for StubControl {
    fn trigger_reload(&self) {
        self.reloads.fetch_add(1, Ordering::SeqCst);
    }

    async fn run_script(&self) -> Result<String, RuntimeError> {
        self.script_runs.fetch_add(1, Ordering::SeqCst);
        self.outcome()
    }

    async fn kill_process(&self) -> Result<String, RuntimeError> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        self.outcome()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_runtime_records_calls_in_order() {
        let runtime = StubRuntime::default().with_container("web", "0123456789abcdef", "Up");
        let listed = runtime.list_containers(true).await.unwrap();
        assert_eq!(listed.len(), 1);
        runtime.restart_container("abc").await.unwrap();
        assert_eq!(runtime.calls(), vec!["list all=true", "restart abc"]);
    }

    #[tokio::test]
    async fn failing_runtime_still_records_the_call() {
        let runtime = StubRuntime::default().failing_with("socket gone");
        assert!(runtime.stop_container("abc").await.is_err());
        assert_eq!(runtime.calls(), vec!["stop abc"]);
    }

    #[tokio::test]
    async fn stub_control_counts_invocations() {
        let control = StubControl::default().with_script_output("done\n");
        control.trigger_reload();
        assert_eq!(control.run_script().await.unwrap(), "done\n");
        assert_eq!((control.reloads(), control.script_runs(), control.kills()), (1, 1, 0));
    }
}
