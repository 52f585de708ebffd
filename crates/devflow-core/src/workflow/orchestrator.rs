//! Orchestrator: run lifecycle, concurrency policy and dependency resolution.
//!
//! The orchestrator owns every piece of process-wide run state:
//!
//! - the active-run registry (cancellation token and completion signal per
//!   run) and the per-workflow FIFO queues, both behind one `std::sync::Mutex`
//!   that is never held across an await;
//! - the result cache of the latest successful outputs per workflow, used to
//!   satisfy `depends_on` within `max_age`;
//! - completion listeners, through which the scheduler chains `on_workflow`
//!   triggers.
//!
//! Each started run is a spawned task (`drive_run`) that resolves
//! dependencies, executes the definition through the [`GraphEngine`] and
//! finalizes exactly once.

use std::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use devflow_types::config::EngineConfig;
use devflow_types::error::RepositoryError;
use devflow_types::event::EngineEvent;
use devflow_types::workflow::{
    ConcurrencyPolicy, NotifyLevel, RunPatch, RunStatus, TriggerOptions, TriggerSource,
    WorkflowDefinition, WorkflowRun,
};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::context::VariableScope;
use super::executor::{ExecutorError, GraphEngine};
use super::step_runner::RunContext;
use crate::event::EventBus;
use crate::repository::workflow::WorkflowRepository;

// ---------------------------------------------------------------------------
// Errors and public types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("workflow is disabled: {0}")]
    WorkflowDisabled(String),

    #[error("run not found: {0}")]
    RunNotFound(Uuid),

    #[error("no pending wait for step '{step_id}' in run {run_id}")]
    WaitNotFound { run_id: Uuid, step_id: String },

    #[error("queued trigger for '{0}' was dropped before it started")]
    QueueDropped(String),

    /// Logged during dependency resolution; never returned from `trigger`.
    #[error("dependency unresolved: {0}")]
    DependencyUnresolved(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Final result of a run, delivered through its completion signal and to
/// completion listeners.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: RunStatus,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Step id to output.
    pub outputs: Value,
    pub duration_ms: u64,
}

/// Handle to a started run.
#[derive(Debug, Clone)]
pub struct RunHandle {
    pub run_id: Uuid,
    pub workflow_id: String,
    done: watch::Receiver<Option<RunResult>>,
}

impl RunHandle {
    /// Wait for the run to finalize. `None` only if the run task died
    /// without finalizing.
    pub async fn wait(mut self) -> Option<RunResult> {
        self.done
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|result| result.clone())
    }
}

/// Outcome of a trigger request.
#[derive(Debug)]
pub enum TriggerOutcome {
    Started(RunHandle),
    /// `concurrency: skip` and a run was already active.
    Skipped,
}

impl TriggerOutcome {
    pub fn run_id(&self) -> Option<Uuid> {
        match self {
            TriggerOutcome::Started(handle) => Some(handle.run_id),
            TriggerOutcome::Skipped => None,
        }
    }
}

/// Summary of an active run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveRunInfo {
    pub run_id: Uuid,
    pub workflow_id: String,
    pub workflow_name: String,
    pub started_at: DateTime<Utc>,
}

/// Latest successful outputs of a workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResult {
    pub completed_at: DateTime<Utc>,
    pub outputs: Value,
}

/// Called with the finished workflow's name and its result.
pub type CompletionListener = Arc<dyn Fn(&str, &RunResult) + Send + Sync>;

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct ActiveRun {
    info: ActiveRunInfo,
    cancel: CancellationToken,
    done: watch::Receiver<Option<RunResult>>,
}

struct QueuedTrigger {
    def: WorkflowDefinition,
    options: TriggerOptions,
    chain: HashSet<String>,
    reply: oneshot::Sender<RunHandle>,
}

/// A slot reserved in the registry for a run about to be spawned.
struct Reservation {
    run_id: Uuid,
    cancel: CancellationToken,
    done_tx: watch::Sender<Option<RunResult>>,
    handle: RunHandle,
}

#[derive(Default)]
struct Registry {
    active: HashMap<Uuid, ActiveRun>,
    queues: HashMap<String, VecDeque<QueuedTrigger>>,
}

impl Registry {
    fn is_active(&self, workflow_id: &str) -> bool {
        self.active.values().any(|r| r.info.workflow_id == workflow_id)
    }

    fn reserve(&mut self, def: &WorkflowDefinition) -> Reservation {
        let run_id = Uuid::now_v7();
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(None);
        self.active.insert(
            run_id,
            ActiveRun {
                info: ActiveRunInfo {
                    run_id,
                    workflow_id: def.id.clone(),
                    workflow_name: def.name.clone(),
                    started_at: Utc::now(),
                },
                cancel: cancel.clone(),
                done: done_rx.clone(),
            },
        );
        Reservation {
            run_id,
            cancel,
            done_tx,
            handle: RunHandle {
                run_id,
                workflow_id: def.id.clone(),
                done: done_rx,
            },
        }
    }
}

enum Admission {
    Start(Reservation),
    Queued(oneshot::Receiver<RunHandle>, usize),
    Skip,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator<R: WorkflowRepository + 'static> {
    repo: Arc<R>,
    engine: GraphEngine,
    events: EventBus,
    run_timeout: Option<Duration>,
    max_output_size: usize,
    project_dir: PathBuf,
    registry: Mutex<Registry>,
    results: DashMap<String, CachedResult>,
    listeners: Mutex<Vec<CompletionListener>>,
}

impl<R: WorkflowRepository + 'static> Orchestrator<R> {
    pub fn new(repo: Arc<R>, engine: GraphEngine, events: EventBus, config: &EngineConfig) -> Self {
        Self {
            repo,
            engine,
            events,
            run_timeout: config.run_timeout_secs.map(Duration::from_secs),
            max_output_size: config.max_step_output_bytes,
            project_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            registry: Mutex::new(Registry::default()),
            results: DashMap::new(),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Project directory for runs whose trigger does not name one.
    pub fn with_project_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.project_dir = dir.into();
        self
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repo
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn add_completion_listener(&self, listener: CompletionListener) {
        self.listeners
            .lock()
            .expect("listener lock poisoned")
            .push(listener);
    }

    // -----------------------------------------------------------------------
    // Triggering
    // -----------------------------------------------------------------------

    /// Start a run of `workflow_id`, subject to its concurrency policy.
    ///
    /// With `concurrency: queue` and an active run, this waits until the
    /// queued trigger reaches the front and its run starts.
    pub async fn trigger(
        self: &Arc<Self>,
        workflow_id: &str,
        options: TriggerOptions,
    ) -> Result<TriggerOutcome, OrchestratorError> {
        let chain = HashSet::from([workflow_id.to_string()]);
        self.trigger_in_chain(workflow_id, options, chain).await
    }

    async fn trigger_in_chain(
        self: &Arc<Self>,
        workflow_id: &str,
        options: TriggerOptions,
        chain: HashSet<String>,
    ) -> Result<TriggerOutcome, OrchestratorError> {
        let def = self
            .repo
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| OrchestratorError::WorkflowNotFound(workflow_id.to_string()))?;
        if !def.enabled {
            return Err(OrchestratorError::WorkflowDisabled(workflow_id.to_string()));
        }

        let admission = {
            let mut registry = self.registry.lock().expect("run registry lock poisoned");
            let active = registry.is_active(&def.id);
            match def.concurrency {
                ConcurrencyPolicy::Skip if active => Admission::Skip,
                ConcurrencyPolicy::Queue if active => {
                    let (reply, rx) = oneshot::channel();
                    let queue = registry.queues.entry(def.id.clone()).or_default();
                    queue.push_back(QueuedTrigger {
                        def: def.clone(),
                        options: options.clone(),
                        chain: chain.clone(),
                        reply,
                    });
                    Admission::Queued(rx, queue.len())
                }
                _ => Admission::Start(registry.reserve(&def)),
            }
        };

        match admission {
            Admission::Skip => {
                tracing::info!(workflow_id = %def.id, source = %options.source, "run already active, skipping trigger");
                Ok(TriggerOutcome::Skipped)
            }
            Admission::Queued(rx, queue_length) => {
                tracing::info!(workflow_id = %def.id, queue_length, "run already active, trigger queued");
                self.events.publish(EngineEvent::RunQueued {
                    workflow_id: def.id.clone(),
                    queue_length,
                });
                rx.await
                    .map(TriggerOutcome::Started)
                    .map_err(|_| OrchestratorError::QueueDropped(def.id.clone()))
            }
            Admission::Start(reservation) => {
                let handle = reservation.handle.clone();
                self.spawn_run(def, options, chain, reservation);
                Ok(TriggerOutcome::Started(handle))
            }
        }
    }

    fn spawn_run(
        self: &Arc<Self>,
        def: WorkflowDefinition,
        options: TriggerOptions,
        chain: HashSet<String>,
        reservation: Reservation,
    ) {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.drive_run(def, options, chain, reservation).await });
    }

    // -----------------------------------------------------------------------
    // Run lifecycle
    // -----------------------------------------------------------------------

    async fn drive_run(
        self: Arc<Self>,
        def: WorkflowDefinition,
        options: TriggerOptions,
        chain: HashSet<String>,
        reservation: Reservation,
    ) {
        let Reservation {
            run_id,
            cancel,
            done_tx,
            ..
        } = reservation;
        let started_at = Utc::now();
        let clock = Instant::now();
        let project_dir = options
            .project_path
            .clone()
            .unwrap_or_else(|| self.project_dir.clone());
        let project_dir = std::path::absolute(&project_dir).unwrap_or(project_dir);

        let ctx = RunContext::new(run_id, def.id.clone(), project_dir.clone(), cancel.clone(), self.events.clone());
        let mut scope = VariableScope::new(self.max_output_size);
        scope.set_variable("trigger", options.trigger_data.clone());
        scope.set_variable("ctx", self.context_vars(&def, run_id, &project_dir, started_at).await);

        let run = WorkflowRun {
            id: run_id,
            workflow_id: def.id.clone(),
            workflow_name: def.name.clone(),
            status: RunStatus::Pending,
            trigger: options.source,
            trigger_data: options.trigger_data.clone(),
            project_path: Some(project_dir.display().to_string()),
            started_at,
            finished_at: None,
            duration_ms: None,
            error: None,
            steps: Default::default(),
        };
        if let Err(e) = self.repo.append_run(&run).await {
            tracing::warn!(run_id = %run_id, error = %e, "failed to persist run");
        }
        tracing::info!(run_id = %run_id, workflow_id = %def.id, source = %options.source, "run started");
        self.events.publish(EngineEvent::RunStart { run });

        let timeout = def.timeout_secs.map(Duration::from_secs).or(self.run_timeout);
        let timed_out = Arc::new(AtomicBool::new(false));
        let timer = timeout.map(|limit| {
            let cancel = cancel.clone();
            let timed_out = Arc::clone(&timed_out);
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(limit) => {
                        timed_out.store(true, Ordering::SeqCst);
                        cancel.cancel();
                    }
                }
            })
        });

        // Pending covers dependency resolution; the record turns Running once
        // the engine takes over.
        let deps = self.resolve_dependencies(&def, chain, &cancel).await;
        for (dep_id, outputs) in deps {
            scope.set_variable(dep_id, outputs);
        }

        let outcome = if cancel.is_cancelled() {
            Err(ExecutorError::Cancelled)
        } else {
            let running = RunPatch {
                status: Some(RunStatus::Running),
                ..Default::default()
            };
            if let Err(e) = self.repo.update_run(&run_id, running).await {
                tracing::warn!(run_id = %run_id, error = %e, "failed to mark run running");
            }
            AssertUnwindSafe(self.engine.execute(&def, &mut scope, &ctx))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    let message = panic_message(payload.as_ref());
                    tracing::error!(run_id = %run_id, workflow_id = %def.id, panic = %message, "step panicked");
                    Err(ExecutorError::Panicked(message))
                })
        };
        if let Some(timer) = timer {
            timer.abort();
        }

        // Cancellation wins over whatever error the engine surfaced.
        let (status, error) = if cancel.is_cancelled() {
            let reason = match timeout {
                Some(limit) if timed_out.load(Ordering::SeqCst) => {
                    format!("run timed out after {}s", limit.as_secs())
                }
                _ => "cancelled".to_string(),
            };
            (RunStatus::Cancelled, Some(reason))
        } else {
            match outcome {
                Ok(()) => (RunStatus::Success, None),
                Err(e) => (RunStatus::Failed, Some(e.to_string())),
            }
        };

        let result = RunResult {
            run_id,
            workflow_id: def.id.clone(),
            workflow_name: def.name.clone(),
            status,
            success: status == RunStatus::Success,
            error,
            outputs: Value::Object(scope.step_outputs().clone()),
            duration_ms: clock.elapsed().as_millis() as u64,
        };
        self.finalize(&def, &ctx, result, done_tx).await;
    }

    async fn finalize(
        self: &Arc<Self>,
        def: &WorkflowDefinition,
        ctx: &RunContext,
        result: RunResult,
        done_tx: watch::Sender<Option<RunResult>>,
    ) {
        let run_id = result.run_id;
        let patch = RunPatch {
            status: Some(result.status),
            finished_at: Some(Utc::now()),
            duration_ms: Some(result.duration_ms),
            error: result.error.clone(),
            steps: Some(ctx.step_snapshots()),
        };
        if let Err(e) = self.repo.update_run(&run_id, patch).await {
            tracing::error!(run_id = %run_id, error = %e, "failed to update run");
        }
        if let Err(e) = self.repo.save_result_payload(&run_id, &result.outputs).await {
            tracing::error!(run_id = %run_id, error = %e, "failed to save run result");
        }

        if result.status == RunStatus::Success {
            self.record_result(&def.id, result.outputs.clone(), Utc::now());
        }

        match result.status {
            RunStatus::Success => {
                tracing::info!(run_id = %run_id, workflow_id = %def.id, duration_ms = result.duration_ms, "run succeeded")
            }
            status => tracing::warn!(
                run_id = %run_id,
                workflow_id = %def.id,
                status = ?status,
                error = result.error.as_deref().unwrap_or_default(),
                "run did not succeed"
            ),
        }
        self.events.publish(EngineEvent::RunEnd {
            run_id,
            workflow_id: def.id.clone(),
            status: result.status,
            duration_ms: result.duration_ms,
            error: result.error.clone(),
        });

        let listeners = self.listeners.lock().expect("listener lock poisoned").clone();
        for listener in listeners {
            listener(&def.name, &result);
        }

        if result.status == RunStatus::Failed {
            self.events.publish(EngineEvent::NotifyDesktop {
                title: format!("Workflow failed: {}", def.name),
                message: result.error.clone().unwrap_or_default(),
                level: NotifyLevel::Error,
            });
        }

        // Release the slot and hand it to the next queued trigger in one step.
        let next = {
            let mut registry = self.registry.lock().expect("run registry lock poisoned");
            registry.active.remove(&run_id);
            let mut next = None;
            if let Some(queue) = registry.queues.get_mut(&def.id) {
                while let Some(queued) = queue.pop_front() {
                    if !queued.reply.is_closed() {
                        next = Some(queued);
                        break;
                    }
                }
                if queue.is_empty() {
                    registry.queues.remove(&def.id);
                }
            }
            next.map(|queued| {
                let reservation = registry.reserve(&queued.def);
                (queued, reservation)
            })
        };

        let _ = done_tx.send(Some(result));

        if let Some((queued, reservation)) = next {
            tracing::info!(workflow_id = %queued.def.id, run_id = %reservation.run_id, "starting queued run");
            let handle = reservation.handle.clone();
            self.spawn_run(queued.def, queued.options, queued.chain, reservation);
            let _ = queued.reply.send(handle);
        }
    }

    /// `ctx` variables. Git lookups are best effort.
    async fn context_vars(
        &self,
        def: &WorkflowDefinition,
        run_id: Uuid,
        project_dir: &Path,
        started_at: DateTime<Utc>,
    ) -> Value {
        let mut vars = Map::new();
        vars.insert("project_path".into(), json!(project_dir.display().to_string()));
        vars.insert("workflow".into(), json!(def.name));
        vars.insert("workflow_id".into(), json!(def.id));
        vars.insert("run_id".into(), json!(run_id));
        vars.insert("started_at".into(), json!(started_at.to_rfc3339()));
        if let Some(git) = self.engine.runner().git() {
            match git.current_branch(project_dir).await {
                Ok(branch) => {
                    vars.insert("branch".into(), json!(branch));
                }
                Err(e) => tracing::debug!(error = %e, "no current branch"),
            }
            match git.last_commit(project_dir).await {
                Ok(commit) => {
                    vars.insert("last_commit".into(), json!(commit));
                }
                Err(e) => tracing::debug!(error = %e, "no last commit"),
            }
        }
        Value::Object(vars)
    }

    // -----------------------------------------------------------------------
    // Dependencies
    // -----------------------------------------------------------------------

    /// Cache the latest successful outputs of `workflow_id`.
    pub fn record_result(&self, workflow_id: &str, outputs: Value, completed_at: DateTime<Utc>) {
        self.results.insert(
            workflow_id.to_string(),
            CachedResult {
                completed_at,
                outputs,
            },
        );
    }

    pub fn cached_result(&self, workflow_id: &str) -> Option<CachedResult> {
        self.results.get(workflow_id).map(|e| e.value().clone())
    }

    /// Outputs for each of `def`'s dependencies, in declaration order.
    /// Unresolvable dependencies are logged and left out.
    ///
    /// Boxed: a dependency run resolves its own dependencies in turn.
    fn resolve_dependencies<'a>(
        self: &'a Arc<Self>,
        def: &'a WorkflowDefinition,
        mut chain: HashSet<String>,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Vec<(String, Value)>> {
        Box::pin(async move {
            let mut resolved = Vec::new();
            for dep in &def.depends_on {
                if cancel.is_cancelled() {
                    break;
                }
                let dep_id = dep.workflow.as_str();
                if chain.contains(dep_id) {
                    tracing::warn!(workflow_id = %def.id, dependency = dep_id, "dependency already in resolution chain, skipping");
                    continue;
                }

                let max_age = dep.max_age().ok().flatten();
                if let Some(cached) = self.cached_result(dep_id) {
                    let age = (Utc::now() - cached.completed_at).to_std().unwrap_or_default();
                    if max_age.is_none_or(|max| age <= max) {
                        tracing::debug!(workflow_id = %def.id, dependency = dep_id, age_secs = age.as_secs(), "using cached dependency result");
                        resolved.push((dep_id.to_string(), cached.outputs));
                        continue;
                    }
                }

                chain.insert(dep_id.to_string());
                let handle = match self.active_handle(dep_id) {
                    Some(handle) => handle,
                    None => {
                        let options = TriggerOptions {
                            source: TriggerSource::Dependency,
                            trigger_data: json!({ "dependent": def.id }),
                            project_path: None,
                        };
                        match self.trigger_in_chain(dep_id, options, chain.clone()).await {
                            Ok(TriggerOutcome::Started(handle)) => handle,
                            Ok(TriggerOutcome::Skipped) => match self.active_handle(dep_id) {
                                Some(handle) => handle,
                                None => {
                                    self.unresolved(def, dep_id, "trigger skipped");
                                    continue;
                                }
                            },
                            Err(e) => {
                                self.unresolved(def, dep_id, &e.to_string());
                                continue;
                            }
                        }
                    }
                };

                let outcome = tokio::select! {
                    _ = cancel.cancelled() => break,
                    outcome = handle.wait() => outcome,
                };
                match outcome {
                    Some(result) if result.success => resolved.push((dep_id.to_string(), result.outputs)),
                    Some(result) => self.unresolved(
                        def,
                        dep_id,
                        result.error.as_deref().unwrap_or("dependency run failed"),
                    ),
                    None => self.unresolved(def, dep_id, "dependency run vanished"),
                }
            }
            resolved
        })
    }

    fn unresolved(&self, def: &WorkflowDefinition, dep_id: &str, reason: &str) {
        let err = OrchestratorError::DependencyUnresolved(format!("{dep_id}: {reason}"));
        tracing::warn!(workflow_id = %def.id, error = %err, "continuing without dependency");
    }

    fn active_handle(&self, workflow_id: &str) -> Option<RunHandle> {
        let registry = self.registry.lock().expect("run registry lock poisoned");
        registry
            .active
            .values()
            .find(|r| r.info.workflow_id == workflow_id)
            .map(|r| RunHandle {
                run_id: r.info.run_id,
                workflow_id: r.info.workflow_id.clone(),
                done: r.done.clone(),
            })
    }

    // -----------------------------------------------------------------------
    // Control and queries
    // -----------------------------------------------------------------------

    /// Cancel an active run.
    pub fn cancel(&self, run_id: Uuid) -> Result<(), OrchestratorError> {
        let registry = self.registry.lock().expect("run registry lock poisoned");
        let run = registry
            .active
            .get(&run_id)
            .ok_or(OrchestratorError::RunNotFound(run_id))?;
        tracing::info!(run_id = %run_id, workflow_id = %run.info.workflow_id, "cancelling run");
        run.cancel.cancel();
        Ok(())
    }

    /// Resolve a `wait` step with `data`.
    pub fn approve_wait(&self, run_id: Uuid, step_id: &str, data: Value) -> Result<(), OrchestratorError> {
        if self.engine.runner().waits().resolve(run_id, step_id, data) {
            tracing::info!(run_id = %run_id, step = step_id, "wait approved");
            Ok(())
        } else {
            Err(OrchestratorError::WaitNotFound {
                run_id,
                step_id: step_id.to_string(),
            })
        }
    }

    /// Handle for an active run.
    pub fn run_handle(&self, run_id: Uuid) -> Option<RunHandle> {
        let registry = self.registry.lock().expect("run registry lock poisoned");
        registry.active.get(&run_id).map(|r| RunHandle {
            run_id,
            workflow_id: r.info.workflow_id.clone(),
            done: r.done.clone(),
        })
    }

    /// Active runs, oldest first.
    pub fn active_runs(&self) -> Vec<ActiveRunInfo> {
        let registry = self.registry.lock().expect("run registry lock poisoned");
        let mut runs: Vec<ActiveRunInfo> = registry.active.values().map(|r| r.info.clone()).collect();
        runs.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.run_id.cmp(&b.run_id)));
        runs
    }

    pub fn active_count(&self, workflow_id: &str) -> usize {
        let registry = self.registry.lock().expect("run registry lock poisoned");
        registry
            .active
            .values()
            .filter(|r| r.info.workflow_id == workflow_id)
            .count()
    }

    pub fn queue_length(&self, workflow_id: &str) -> usize {
        let registry = self.registry.lock().expect("run registry lock poisoned");
        registry.queues.get(workflow_id).map_or(0, VecDeque::len)
    }

    /// Cancel every active run and drop queued triggers.
    pub fn shutdown(&self) {
        let mut registry = self.registry.lock().expect("run registry lock poisoned");
        registry.queues.clear();
        for run in registry.active.values() {
            run.cancel.cancel();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
