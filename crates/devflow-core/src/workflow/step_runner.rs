//! Step runner: dispatch from a typed [`StepKind`] to its executor.
//!
//! `StepRunner` owns the injected collaborators (agent, database, git, HTTP,
//! extension handlers) and the pending-wait registry. A single call to
//! [`StepRunner::run`] performs one attempt of one step; retries, timeouts
//! and scope bookkeeping live in [`super::retry`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use devflow_types::config::EngineConfig;
use devflow_types::event::EngineEvent;
use devflow_types::workflow::{StepDefinition, StepKind, StepSnapshot, StepStatus};
use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::approval::PendingWaits;
use super::condition::evaluate_or_false;
use super::context::VariableScope;
use super::providers::{AgentProvider, DbProvider, GitHelper, HttpClient, StepHandler, StepHandlerRegistry};
use super::steps;
use crate::event::EventBus;

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// Errors that can occur during step execution.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StepError {
    /// The run's cancellation scope fired.
    #[error("cancelled")]
    Cancelled,

    /// Step execution failed.
    #[error("step execution failed: {0}")]
    ExecutionFailed(String),

    /// No executor or extension handler for this type.
    #[error("unknown step type: {0}")]
    UnknownStepType(String),

    /// A file path resolved outside the project directory.
    #[error("path escapes project directory: {0}")]
    PathTraversal(String),

    /// The step's own timeout elapsed.
    #[error("step timed out after {0:?}")]
    Timeout(Duration),

    /// The step needs a collaborator that was not injected.
    #[error("no {0} provider configured")]
    MissingProvider(&'static str),
}

impl StepError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StepError::Cancelled)
    }
}

// ---------------------------------------------------------------------------
// RunContext
// ---------------------------------------------------------------------------

/// Per-run state shared by every step of that run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub workflow_id: String,
    pub project_dir: PathBuf,
    /// Cancellation scope. Steps receive child scopes of the run's token.
    pub cancel: CancellationToken,
    pub events: EventBus,
    /// Prefix for nested step ids (`each[2].`, `fan.`).
    id_prefix: String,
    snapshots: Arc<Mutex<BTreeMap<String, StepSnapshot>>>,
}

impl RunContext {
    pub fn new(
        run_id: Uuid,
        workflow_id: impl Into<String>,
        project_dir: PathBuf,
        cancel: CancellationToken,
        events: EventBus,
    ) -> Self {
        Self {
            run_id,
            workflow_id: workflow_id.into(),
            project_dir,
            cancel,
            events,
            id_prefix: String::new(),
            snapshots: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Same run, cancellation scope derived from this one.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            ..self.clone()
        }
    }

    /// Same run, nested step ids reported under `prefix`.
    pub fn nested(&self, prefix: &str) -> Self {
        Self {
            id_prefix: format!("{}{prefix}", self.id_prefix),
            ..self.clone()
        }
    }

    /// The id a step is reported under in events and snapshots.
    pub fn qualified_id(&self, step_id: &str) -> String {
        format!("{}{step_id}", self.id_prefix)
    }

    /// Record a step status change and publish a `step-update` event.
    pub fn step_update(
        &self,
        step: &StepDefinition,
        status: StepStatus,
        attempt: Option<u32>,
        output: Option<Value>,
        error: Option<String>,
    ) {
        let step_id = self.qualified_id(&step.id);
        {
            let mut snapshots = self.snapshots.lock().expect("step snapshot lock poisoned");
            let entry = snapshots.entry(step_id.clone()).or_insert_with(|| StepSnapshot {
                step_type: step.step_type().to_string(),
                status,
                attempt: 0,
                output: None,
                error: None,
                updated_at: Utc::now(),
            });
            entry.status = status;
            entry.updated_at = Utc::now();
            if let Some(attempt) = attempt {
                entry.attempt = attempt;
            }
            if output.is_some() {
                entry.output = output.clone();
            }
            if error.is_some() {
                entry.error = error.clone();
            }
        }
        self.events.publish(EngineEvent::StepUpdate {
            run_id: self.run_id,
            step_id,
            step_type: step.step_type().to_string(),
            status,
            output,
            attempt,
            error,
        });
    }

    /// Snapshot of every step seen so far in this run.
    pub fn step_snapshots(&self) -> BTreeMap<String, StepSnapshot> {
        self.snapshots.lock().expect("step snapshot lock poisoned").clone()
    }
}

// ---------------------------------------------------------------------------
// StepRunner
// ---------------------------------------------------------------------------

/// Executes individual steps by dispatching to type-specific executors.
pub struct StepRunner {
    pub(crate) shell_timeout: Duration,
    pub(crate) http_timeout: Duration,
    default_retry_delay: Duration,
    pub(crate) agent: Option<Arc<dyn AgentProvider>>,
    pub(crate) db: Option<Arc<dyn DbProvider>>,
    pub(crate) git: Option<Arc<dyn GitHelper>>,
    pub(crate) http: Option<Arc<dyn HttpClient>>,
    pub(crate) extensions: StepHandlerRegistry,
    pub(crate) waits: Arc<PendingWaits>,
}

impl StepRunner {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            shell_timeout: Duration::from_secs(config.shell_timeout_secs),
            http_timeout: Duration::from_secs(config.http_timeout_secs),
            default_retry_delay: Duration::from_millis(config.default_retry_delay_ms),
            agent: None,
            db: None,
            git: None,
            http: None,
            extensions: StepHandlerRegistry::new(),
            waits: Arc::new(PendingWaits::new()),
        }
    }

    pub fn with_agent_provider(mut self, provider: Arc<dyn AgentProvider>) -> Self {
        self.agent = Some(provider);
        self
    }

    pub fn with_db_provider(mut self, provider: Arc<dyn DbProvider>) -> Self {
        self.db = Some(provider);
        self
    }

    pub fn with_git_helper(mut self, git: Arc<dyn GitHelper>) -> Self {
        self.git = Some(git);
        self
    }

    pub fn with_http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http = Some(client);
        self
    }

    /// Register an extension handler for `prefix.*` step types.
    pub fn with_extension(mut self, prefix: impl Into<String>, handler: Arc<dyn StepHandler>) -> Self {
        self.extensions.register(prefix, handler);
        self
    }

    pub fn waits(&self) -> Arc<PendingWaits> {
        Arc::clone(&self.waits)
    }

    pub fn git(&self) -> Option<Arc<dyn GitHelper>> {
        self.git.clone()
    }

    /// Delay between attempts of `step`.
    pub fn retry_delay(&self, step: &StepDefinition) -> Duration {
        step.retry_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_retry_delay)
    }

    /// Run one attempt of `step`.
    ///
    /// Boxed because `loop` and `parallel` recurse back into the retry
    /// wrapper for their nested steps.
    pub fn run<'a>(
        &'a self,
        step: &'a StepDefinition,
        scope: &'a VariableScope,
        ctx: &'a RunContext,
    ) -> BoxFuture<'a, Result<Value, StepError>> {
        Box::pin(async move {
            tracing::debug!(
                run_id = %ctx.run_id,
                step = %ctx.qualified_id(&step.id),
                step_type = step.step_type(),
                "running step"
            );
            match &step.kind {
                StepKind::Trigger => Ok(scope.get("trigger").cloned().unwrap_or(Value::Null)),
                StepKind::Condition(cfg) => Ok(serde_json::json!({
                    "result": evaluate_or_false(&cfg.expression, scope),
                })),
                StepKind::Shell(cfg) => steps::shell::run(self, cfg, scope, ctx).await,
                StepKind::Http(cfg) => steps::http::run(self, cfg, scope, ctx).await,
                StepKind::Git(cfg) => steps::git::run(self, cfg, scope, ctx).await,
                StepKind::File(cfg) => steps::file::run(cfg, scope, ctx).await,
                StepKind::Db(cfg) => steps::db::run(self, cfg, scope, ctx).await,
                StepKind::Agent(cfg) => steps::agent::run(self, step, cfg, scope, ctx).await,
                StepKind::Notify(cfg) => Ok(steps::notify::run(self, cfg, scope, ctx)),
                StepKind::Wait(cfg) => steps::wait::run(self, step, cfg, scope, ctx).await,
                StepKind::Loop(cfg) => steps::control::run_loop(self, step, cfg, scope, ctx).await,
                StepKind::Parallel(cfg) => {
                    steps::control::run_parallel(self, step, cfg, scope, ctx).await
                }
                StepKind::Extension { step_type, config } => {
                    steps::extension::run(self, step, step_type, config, scope, ctx).await
                }
            }
        })
    }
}

impl std::fmt::Debug for StepRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRunner")
            .field("agent", &self.agent.is_some())
            .field("db", &self.db.is_some())
            .field("git", &self.git.is_some())
            .field("http", &self.http.is_some())
            .field("extensions", &self.extensions)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use devflow_types::workflow::{ConditionStepConfig, NotifyLevel, NotifyStepConfig};
    use serde_json::json;

    pub(crate) fn test_ctx(project_dir: PathBuf) -> RunContext {
        RunContext::new(
            Uuid::now_v7(),
            "test-workflow",
            project_dir,
            CancellationToken::new(),
            EventBus::new(256),
        )
    }

    pub(crate) fn test_runner() -> StepRunner {
        StepRunner::new(&EngineConfig {
            default_retry_delay_ms: 10,
            ..EngineConfig::default()
        })
    }

    #[tokio::test]
    async fn condition_step_reports_result() {
        let runner = test_runner();
        let ctx = test_ctx(std::env::temp_dir());
        let mut scope = VariableScope::default();
        scope.set_variable("x", json!("done"));
        let step = StepDefinition::new(
            "check",
            StepKind::Condition(ConditionStepConfig {
                expression: "$x == done".into(),
            }),
        );
        let out = runner.run(&step, &scope, &ctx).await.unwrap();
        assert_eq!(out, json!({ "result": true }));
    }

    #[tokio::test]
    async fn unknown_extension_is_unknown_step_type() {
        let runner = test_runner();
        let ctx = test_ctx(std::env::temp_dir());
        let step = StepDefinition::new(
            "deploy",
            StepKind::Extension {
                step_type: "vercel.deploy".into(),
                config: json!({}),
            },
        );
        let err = runner
            .run(&step, &VariableScope::default(), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::UnknownStepType(t) if t == "vercel.deploy"));
    }

    #[test]
    fn step_update_tracks_snapshots_and_publishes() {
        let ctx = test_ctx(std::env::temp_dir()).nested("each[1].");
        let mut rx = ctx.events.subscribe();
        let step = StepDefinition::new(
            "ping",
            StepKind::Notify(NotifyStepConfig {
                title: "t".into(),
                message: String::new(),
                level: NotifyLevel::Info,
                desktop: true,
                webhooks: vec![],
            }),
        );
        ctx.step_update(&step, StepStatus::Running, Some(1), None, None);
        ctx.step_update(&step, StepStatus::Success, Some(1), Some(json!({ "ok": 1 })), None);

        let snapshots = ctx.step_snapshots();
        let snap = &snapshots["each[1].ping"];
        assert_eq!(snap.status, StepStatus::Success);
        assert_eq!(snap.attempt, 1);
        assert_eq!(snap.output, Some(json!({ "ok": 1 })));

        match rx.try_recv().unwrap() {
            EngineEvent::StepUpdate { step_id, status, .. } => {
                assert_eq!(step_id, "each[1].ping");
                assert_eq!(status, StepStatus::Running);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn child_context_shares_snapshots_but_not_cancellation_upwards() {
        let ctx = test_ctx(std::env::temp_dir());
        let child = ctx.child();
        child.cancel.cancel();
        assert!(!ctx.cancel.is_cancelled());

        let other = ctx.child();
        ctx.cancel.cancel();
        assert!(other.cancel.is_cancelled());
    }

    #[test]
    fn retry_delay_prefers_step_setting() {
        let runner = test_runner();
        let mut step = StepDefinition::new(
            "s",
            StepKind::Condition(ConditionStepConfig { expression: "true".into() }),
        );
        assert_eq!(runner.retry_delay(&step), Duration::from_millis(10));
        step.retry_delay_ms = Some(250);
        assert_eq!(runner.retry_delay(&step), Duration::from_millis(250));
    }
}
