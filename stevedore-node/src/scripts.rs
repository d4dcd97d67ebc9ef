//! Local script execution for the node-scoped commands
//!
//! `runScript` and `killProcess` run fixed scripts with a timeout and
//! capture combined output. `reloadapps` detaches the reload command
//! entirely: the dispatcher acknowledges before the outcome is known, so
//! failures are observed only through these logs.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use stevedore_relay::{NodeControl, RuntimeError};
use tokio::process::Command as AsyncCommand;
use tokio::time::timeout;
use tracing::{info, warn};

pub struct ScriptRunner {
    run_script: PathBuf,
    kill_script: PathBuf,
    reload_command: String,
    script_timeout: Duration,
}

impl ScriptRunner {
    pub fn new(
        run_script: PathBuf,
        kill_script: PathBuf,
        reload_command: impl Into<String>,
        script_timeout: Duration,
    ) -> Self {
        Self {
            run_script,
            kill_script,
            reload_command: reload_command.into(),
            script_timeout,
        }
    }

    async fn execute(&self, script: &Path) -> Result<String, RuntimeError> {
        info!(script = %script.display(), "executing node script");
        let output = timeout(
            self.script_timeout,
            AsyncCommand::new("sh")
                .arg(script)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| {
            RuntimeError::new(format!(
                "{} timed out after {}s",
                script.display(),
                self.script_timeout.as_secs()
            ))
        })?
        .map_err(|err| RuntimeError::new(format!("failed to run {}: {err}", script.display())))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if output.status.success() {
            Ok(if stderr.trim().is_empty() {
                stdout.into_owned()
            } else {
                format!("{stdout}\nSTDERR:\n{stderr}")
            })
        } else {
            Err(RuntimeError::new(format!(
                "exit {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )))
        }
    }
}

#[async_trait]
impl NodeControl for ScriptRunner {
    fn trigger_reload(&self) {
        let command = self.reload_command.clone();
        tokio::spawn(async move {
            info!(%command, "reload triggered");
            match AsyncCommand::new("sh").arg("-c").arg(&command).output().await {
                Ok(output) if output.status.success() => info!("reload command finished"),
                Ok(output) => warn!(
                    code = output.status.code().unwrap_or(-1),
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "reload command failed"
                ),
                Err(err) => warn!(error = %err, "failed to spawn reload command"),
            }
        });
    }

    async fn run_script(&self) -> Result<String, RuntimeError> {
        self.execute(&self.run_script).await
    }

    async fn kill_process(&self) -> Result<String, RuntimeError> {
        self.execute(&self.kill_script).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn runner_for(script: &Path, timeout: Duration) -> ScriptRunner {
        ScriptRunner::new(
            script.to_path_buf(),
            script.to_path_buf(),
            "true",
            timeout,
        )
    }

    fn script_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn captures_script_stdout() {
        let file = script_file("echo hello from the node");
        let runner = runner_for(file.path(), Duration::from_secs(5));
        let output = runner.run_script().await.unwrap();
        assert!(output.contains("hello from the node"));
    }

    #[tokio::test]
    async fn nonzero_exit_becomes_an_error_with_stderr() {
        let file = script_file("echo boom >&2; exit 3");
        let runner = runner_for(file.path(), Duration::from_secs(5));
        let err = runner.run_script().await.unwrap_err();
        assert!(err.to_string().contains("exit 3"));
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn slow_scripts_are_cut_off() {
        let file = script_file("sleep 10");
        let runner = runner_for(file.path(), Duration::from_millis(200));
        let err = runner.kill_process().await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
