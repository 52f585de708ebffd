//! [`GitHelper`] backed by the `git` executable.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use devflow_core::workflow::providers::{CommandOutput, GitHelper};
use futures_util::future::BoxFuture;

/// Runs `git` through `tokio::process`. The child is killed if the step is
/// cancelled and the future dropped.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
}

impl GitCli {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("git"),
        }
    }

    /// Use a specific git binary.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn exec(&self, cwd: &Path, args: Vec<String>) -> Result<CommandOutput, String> {
        tracing::debug!(cwd = %cwd.display(), args = ?args, "running git");
        let output = tokio::process::Command::new(&self.program)
            .args(&args)
            .current_dir(cwd)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("failed to run {}: {e}", self.program.display()))?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).trim_end().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
        })
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GitHelper for GitCli {
    fn run<'a>(&'a self, cwd: &'a Path, args: Vec<String>) -> BoxFuture<'a, Result<CommandOutput, String>> {
        Box::pin(self.exec(cwd, args))
    }
}
