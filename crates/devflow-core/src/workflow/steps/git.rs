//! `git` steps: an ordered list of sub-actions run through the [`GitHelper`].

use std::path::Path;

use devflow_types::workflow::{GitAction, GitStepConfig};
use serde_json::{json, Value};

use super::{split_command_line, working_dir};
use crate::workflow::context::VariableScope;
use crate::workflow::providers::{CommandOutput, GitHelper};
use crate::workflow::step_runner::{RunContext, StepError, StepRunner};

/// Argument lists for one sub-action. `commit` stages first, so it expands
/// to two invocations.
fn invocations(action: &GitAction, scope: &VariableScope) -> Result<Vec<Vec<String>>, StepError> {
    let r = |s: &str| scope.resolve_str(s);
    let with_target = |verb: &str, remote: &Option<String>, branch: &Option<String>| {
        let mut args = vec![verb.to_string()];
        if let Some(remote) = remote {
            args.push(r(remote));
            if let Some(branch) = branch {
                args.push(r(branch));
            }
        }
        args
    };

    Ok(match action {
        GitAction::Pull { remote, branch } => vec![with_target("pull", remote, branch)],
        GitAction::Push { remote, branch } => vec![with_target("push", remote, branch)],
        GitAction::Commit { message, paths } => {
            let stage = if paths.is_empty() {
                vec!["add".to_string(), "-A".to_string()]
            } else {
                let mut args = vec!["add".to_string(), "--".to_string()];
                args.extend(paths.iter().map(|p| r(p)));
                args
            };
            vec![stage, vec!["commit".into(), "-m".into(), r(message)]]
        }
        GitAction::Checkout { branch, create } => {
            let mut args = vec!["checkout".to_string()];
            if *create {
                args.push("-b".into());
            }
            args.push(r(branch));
            vec![args]
        }
        GitAction::Branch { name } => vec![vec!["branch".into(), r(name)]],
        GitAction::Raw { args } => {
            let mut argv = split_command_line(&r(args)).map_err(StepError::ExecutionFailed)?;
            if argv.first().map(String::as_str) == Some("git") {
                argv.remove(0);
            }
            vec![argv]
        }
    })
}

async fn run_git(
    git: &dyn GitHelper,
    cwd: &Path,
    args: Vec<String>,
    ctx: &RunContext,
) -> Result<CommandOutput, StepError> {
    tokio::select! {
        _ = ctx.cancel.cancelled() => Err(StepError::Cancelled),
        res = git.run(cwd, args) => res.map_err(StepError::ExecutionFailed),
    }
}

pub(crate) async fn run(
    runner: &StepRunner,
    cfg: &GitStepConfig,
    scope: &VariableScope,
    ctx: &RunContext,
) -> Result<Value, StepError> {
    let git = runner.git.as_ref().ok_or(StepError::MissingProvider("git"))?;
    let cwd = working_dir(cfg.cwd.as_deref(), scope, &ctx.project_dir);
    let mut results = Vec::with_capacity(cfg.actions.len());

    for action in &cfg.actions {
        let mut last = CommandOutput::default();
        for args in invocations(action, scope)? {
            last = run_git(git.as_ref(), &cwd, args, ctx).await?;
            if !last.success() {
                let detail = if last.stderr.trim().is_empty() {
                    last.stdout.trim()
                } else {
                    last.stderr.trim()
                };
                return Err(StepError::ExecutionFailed(format!(
                    "git {} failed (exit {}): {detail}",
                    action.name(),
                    last.exit_code
                )));
            }
        }
        results.push(json!({
            "action": action.name(),
            "stdout": last.stdout.trim_end(),
        }));
    }

    Ok(json!({ "actions": results }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::step_runner::tests::{test_ctx, test_runner};
    use futures_util::future::BoxFuture;
    use std::sync::{Arc, Mutex};

    /// Records every call; fails any invocation whose first arg is `fail_on`.
    #[derive(Default)]
    struct FakeGit {
        calls: Mutex<Vec<Vec<String>>>,
        fail_on: Option<&'static str>,
    }

    impl GitHelper for FakeGit {
        fn run<'a>(
            &'a self,
            _cwd: &'a Path,
            args: Vec<String>,
        ) -> BoxFuture<'a, Result<CommandOutput, String>> {
            let fail = self.fail_on.is_some_and(|f| args.first().map(String::as_str) == Some(f));
            self.calls.lock().unwrap().push(args);
            Box::pin(async move {
                Ok(if fail {
                    CommandOutput {
                        exit_code: 1,
                        stdout: String::new(),
                        stderr: "nothing to commit".into(),
                    }
                } else {
                    CommandOutput {
                        exit_code: 0,
                        stdout: "ok\n".into(),
                        stderr: String::new(),
                    }
                })
            })
        }
    }

    #[tokio::test]
    async fn commit_stages_then_commits() {
        let git = Arc::new(FakeGit::default());
        let runner = test_runner().with_git_helper(git.clone());
        let ctx = test_ctx(std::env::temp_dir());
        let mut scope = VariableScope::default();
        scope.set_variable("ticket", json!("DEV-12"));
        let cfg = GitStepConfig {
            actions: vec![
                GitAction::Commit {
                    message: "$ticket: update".into(),
                    paths: vec![],
                },
                GitAction::Push {
                    remote: Some("origin".into()),
                    branch: Some("main".into()),
                },
            ],
            cwd: None,
        };

        let out = run(&runner, &cfg, &scope, &ctx).await.unwrap();
        assert_eq!(out["actions"][0]["action"], "commit");
        assert_eq!(out["actions"][1]["stdout"], "ok");

        let calls = git.calls.lock().unwrap();
        assert_eq!(calls[0], vec!["add", "-A"]);
        assert_eq!(calls[1], vec!["commit", "-m", "DEV-12: update"]);
        assert_eq!(calls[2], vec!["push", "origin", "main"]);
    }

    #[tokio::test]
    async fn stops_at_first_failing_action() {
        let git = Arc::new(FakeGit {
            fail_on: Some("commit"),
            ..Default::default()
        });
        let runner = test_runner().with_git_helper(git.clone());
        let ctx = test_ctx(std::env::temp_dir());
        let cfg = GitStepConfig {
            actions: vec![
                GitAction::Commit {
                    message: "m".into(),
                    paths: vec!["src".into()],
                },
                GitAction::Push {
                    remote: None,
                    branch: None,
                },
            ],
            cwd: None,
        };

        let err = run(&runner, &cfg, &VariableScope::default(), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("nothing to commit"));
        let calls = git.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], vec!["add", "--", "src"]);
    }

    #[test]
    fn raw_action_strips_leading_git() {
        let scope = VariableScope::default();
        let args = invocations(
            &GitAction::Raw {
                args: "git log --oneline -n 3".into(),
            },
            &scope,
        )
        .unwrap();
        assert_eq!(args, vec![vec!["log", "--oneline", "-n", "3"]]);
    }
}
