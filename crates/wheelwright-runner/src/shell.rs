//! Shell-based step execution on the host.

use std::collections::HashMap;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use wheelwright_core::{Error, Result};

use crate::action::{ActionContext, ActionOutcome, ActionRunner};

/// Runs step commands through `sh -c` on the host.
pub struct ShellRunner {
    shell: String,
}

impl ShellRunner {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new("sh")
    }
}

#[async_trait]
impl ActionRunner for ShellRunner {
    async fn invoke(&self, ctx: &ActionContext) -> Result<ActionOutcome> {
        let start = std::time::Instant::now();

        info!(
            step = %ctx.step_name,
            command = %ctx.command,
            workspace = %ctx.workspace.display(),
            "invoking shell command"
        );

        // Steps see the host environment plus the job's variables.
        let mut env_vars: HashMap<String, String> = std::env::vars().collect();
        env_vars.extend(ctx.env.clone());
        if let Some(hint) = ctx.cache {
            env_vars.insert("WHEELWRIGHT_CACHE".to_string(), hint.as_str().to_string());
        }

        // kill_on_drop so an executor-side timeout reaps the child.
        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(&ctx.command)
            .current_dir(&ctx.workspace)
            .envs(&env_vars)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Internal(format!("failed to spawn process: {}", e)))?;

        let stdout = child.stdout.take().unwrap();
        let stderr = child.stderr.take().unwrap();

        let stdout_handle = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut collected = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                collected.push(line);
            }
            collected
        });

        let stderr_handle = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut collected = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                collected.push(line);
            }
            collected
        });

        let status = child
            .wait()
            .await
            .map_err(|e| Error::Internal(format!("failed to wait for process: {}", e)))?;

        let stdout = stdout_handle.await.unwrap_or_default();
        let stderr = stderr_handle.await.unwrap_or_default();

        let exit_code = status.code().unwrap_or(-1);
        let duration_ms = start.elapsed().as_millis() as u64;
        debug!(step = %ctx.step_name, exit_code, duration_ms, "command completed");

        Ok(ActionOutcome {
            exit_code,
            stdout,
            stderr,
            duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn context(command: &str) -> ActionContext {
        ActionContext {
            step_name: "test".to_string(),
            command: command.to_string(),
            workspace: std::env::temp_dir(),
            env: HashMap::new(),
            cache: None,
        }
    }

    #[tokio::test]
    async fn test_captures_stdout() {
        let runner = ShellRunner::default();
        let outcome = runner.invoke(&context("echo hello")).await.unwrap();
        assert!(outcome.success());
        assert_eq!(outcome.stdout, vec!["hello"]);
        assert!(outcome.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_captures_stderr_and_exit_code() {
        let runner = ShellRunner::default();
        let outcome = runner
            .invoke(&context("echo oops >&2; exit 3"))
            .await
            .unwrap();
        assert!(!outcome.success());
        assert_eq!(outcome.exit_code, 3);
        assert_eq!(outcome.stderr, vec!["oops"]);
    }

    #[tokio::test]
    async fn test_env_and_cache_hint_exported() {
        let runner = ShellRunner::default();
        let mut ctx = context("echo $MATRIX_OS $WHEELWRIGHT_CACHE");
        ctx.env
            .insert("MATRIX_OS".to_string(), "linux".to_string());
        ctx.cache = Some(crate::action::CacheHint::Partial);
        let outcome = runner.invoke(&ctx).await.unwrap();
        assert_eq!(outcome.stdout, vec!["linux partial"]);
    }

    #[tokio::test]
    async fn test_runs_in_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ShellRunner::default();
        let mut ctx = context("pwd");
        ctx.workspace = dir.path().to_path_buf();
        let outcome = runner.invoke(&ctx).await.unwrap();
        let reported = PathBuf::from(&outcome.stdout[0]);
        assert_eq!(
            reported.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }
}
