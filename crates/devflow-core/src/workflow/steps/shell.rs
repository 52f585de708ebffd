//! `shell` steps: run a program with arguments, no shell in between.

use std::process::Stdio;
use std::time::Duration;

use devflow_types::workflow::ShellStepConfig;
use serde_json::{json, Value};
use tokio::process::Command;

use super::working_dir;
use crate::workflow::context::VariableScope;
use crate::workflow::step_runner::{RunContext, StepError, StepRunner};

/// Split a command line into argv.
///
/// Single quotes are literal, double quotes allow `\"` and `\\`, and a
/// backslash outside quotes escapes the next character. Nothing else is
/// interpreted: no globbing, pipes, redirection or variable expansion.
pub fn split_command_line(line: &str) -> Result<Vec<String>, String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_arg = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_arg = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => current.push(ch),
                        None => return Err("unterminated single quote".into()),
                    }
                }
            }
            '"' => {
                in_arg = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(ch @ ('"' | '\\')) => current.push(ch),
                            Some(ch) => {
                                current.push('\\');
                                current.push(ch);
                            }
                            None => return Err("unterminated double quote".into()),
                        },
                        Some(ch) => current.push(ch),
                        None => return Err("unterminated double quote".into()),
                    }
                }
            }
            '\\' => {
                in_arg = true;
                if let Some(ch) = chars.next() {
                    current.push(ch);
                }
            }
            c if c.is_whitespace() => {
                if in_arg {
                    args.push(std::mem::take(&mut current));
                    in_arg = false;
                }
            }
            c => {
                in_arg = true;
                current.push(c);
            }
        }
    }
    if in_arg {
        args.push(current);
    }
    Ok(args)
}

pub(crate) async fn run(
    runner: &StepRunner,
    cfg: &ShellStepConfig,
    scope: &VariableScope,
    ctx: &RunContext,
) -> Result<Value, StepError> {
    let command = scope.resolve_str(&cfg.command);
    let argv = split_command_line(&command).map_err(StepError::ExecutionFailed)?;
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| StepError::ExecutionFailed("empty command".into()))?;
    let cwd = working_dir(cfg.cwd.as_deref(), scope, &ctx.project_dir);
    let limit = cfg
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(runner.shell_timeout);

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(&cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in &cfg.env {
        cmd.env(key, scope.resolve_str(value));
    }

    let child = cmd
        .spawn()
        .map_err(|e| StepError::ExecutionFailed(format!("failed to spawn '{program}': {e}")))?;

    // Dropping the wait future kills the child.
    let output = tokio::select! {
        _ = ctx.cancel.cancelled() => return Err(StepError::Cancelled),
        res = tokio::time::timeout(limit, child.wait_with_output()) => match res {
            Ok(out) => out.map_err(|e| StepError::ExecutionFailed(e.to_string()))?,
            Err(_) => return Err(StepError::Timeout(limit)),
        },
    };

    let exit_code = output.status.code().unwrap_or(-1);
    tracing::debug!(run_id = %ctx.run_id, program = %program, exit_code, "shell step finished");
    Ok(json!({
        "exit_code": exit_code,
        "stdout": String::from_utf8_lossy(&output.stdout).trim_end(),
        "stderr": String::from_utf8_lossy(&output.stderr).trim_end(),
    }))
}
