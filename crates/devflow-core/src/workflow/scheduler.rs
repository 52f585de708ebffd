//! Trigger scheduler: cron ticks, hook events and `on_workflow` chaining.
//!
//! The scheduler only decides *which* workflows fire. Starting runs is left
//! to a [`DispatchFn`], normally wired to [`Orchestrator::trigger`] through
//! [`TriggerScheduler::for_orchestrator`].
//!
//! - Cron: minute-aligned tick, guarded so a minute never fires twice.
//! - Hook: matched on `hook_type` plus an optional condition over `$event`.
//! - On-workflow: matched on the finished workflow's *name* plus an optional
//!   condition over `$result`.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone, Timelike};
use devflow_types::workflow::{
    HookEvent, TriggerKind, TriggerOptions, TriggerSource, WorkflowDefinition,
};
use futures_util::future::BoxFuture;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use super::condition::evaluate_or_false;
use super::context::VariableScope;
use super::cron::CronSchedule;
use super::orchestrator::{Orchestrator, RunResult, TriggerOutcome};
use crate::repository::workflow::WorkflowRepository;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Invalid cron expression or schedule string.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// A cron-triggered workflow has no schedule value.
    #[error("workflow {0} has a cron trigger without a schedule")]
    MissingSchedule(String),
}

// ---------------------------------------------------------------------------
// TriggerScheduler
// ---------------------------------------------------------------------------

/// Starts a run. The returned future is spawned, never awaited inline.
pub type DispatchFn = Arc<dyn Fn(String, TriggerOptions) -> BoxFuture<'static, ()> + Send + Sync>;

struct CronEntry {
    workflow_id: String,
    schedule: CronSchedule,
}

struct EventEntry {
    workflow_id: String,
    /// `hook_type` for hooks, source workflow name for `on_workflow`.
    filter: Option<String>,
    condition: Option<String>,
}

#[derive(Default)]
struct Matchers {
    cron: Vec<CronEntry>,
    hooks: Vec<EventEntry>,
    chains: Vec<EventEntry>,
    /// Minute (unix seconds / 60) of the last cron tick that fired.
    last_fired_minute: Option<i64>,
}

pub struct TriggerScheduler {
    dispatch: DispatchFn,
    matchers: Mutex<Matchers>,
    tick: Mutex<Option<JoinHandle<()>>>,
}

impl TriggerScheduler {
    pub fn new(dispatch: DispatchFn) -> Self {
        Self {
            dispatch,
            matchers: Mutex::new(Matchers::default()),
            tick: Mutex::new(None),
        }
    }

    /// Scheduler whose dispatch triggers runs on `orchestrator`, registered
    /// as its completion listener for `on_workflow` chaining.
    ///
    /// Both directions hold weak references, so dropping either side ends
    /// the wiring.
    pub fn for_orchestrator<R: WorkflowRepository + 'static>(
        orchestrator: &Arc<Orchestrator<R>>,
    ) -> Arc<Self> {
        let weak: Weak<Orchestrator<R>> = Arc::downgrade(orchestrator);
        let dispatch: DispatchFn = Arc::new(move |workflow_id: String, options: TriggerOptions| -> BoxFuture<'static, ()> {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(orchestrator) = weak.upgrade() else {
                    return;
                };
                let source = options.source;
                match orchestrator.trigger(&workflow_id, options).await {
                    Ok(TriggerOutcome::Started(handle)) => {
                        tracing::debug!(workflow_id = %workflow_id, run_id = %handle.run_id, source = %source, "dispatched run");
                    }
                    Ok(TriggerOutcome::Skipped) => {
                        tracing::debug!(workflow_id = %workflow_id, source = %source, "dispatch skipped, run already active");
                    }
                    Err(e) => {
                        tracing::warn!(workflow_id = %workflow_id, source = %source, error = %e, "dispatch failed");
                    }
                }
            })
        });

        let scheduler = Arc::new(Self::new(dispatch));
        let listener = Arc::downgrade(&scheduler);
        orchestrator.add_completion_listener(Arc::new(move |name: &str, result: &RunResult| {
            if let Some(scheduler) = listener.upgrade() {
                scheduler.on_workflow_complete(name, result);
            }
        }));
        scheduler
    }

    /// Rebuild every matcher from `workflows`. Disabled workflows are
    /// ignored; a malformed cron expression drops only that workflow.
    pub fn reload(&self, workflows: &[WorkflowDefinition]) {
        let mut cron = Vec::new();
        let mut hooks = Vec::new();
        let mut chains = Vec::new();

        for def in workflows.iter().filter(|d| d.enabled) {
            let trigger = &def.trigger;
            match trigger.kind {
                TriggerKind::Manual => {}
                TriggerKind::Cron => match cron_entry(def) {
                    Ok(entry) => cron.push(entry),
                    Err(e) => {
                        tracing::warn!(workflow_id = %def.id, error = %e, "ignoring cron trigger")
                    }
                },
                TriggerKind::Hook => hooks.push(EventEntry {
                    workflow_id: def.id.clone(),
                    filter: trigger.hook_type.clone(),
                    condition: trigger.condition.clone(),
                }),
                TriggerKind::OnWorkflow => match &trigger.value {
                    Some(source) => chains.push(EventEntry {
                        workflow_id: def.id.clone(),
                        filter: Some(source.clone()),
                        condition: trigger.condition.clone(),
                    }),
                    None => {
                        tracing::warn!(workflow_id = %def.id, "on_workflow trigger without a source workflow name")
                    }
                },
            }
        }

        tracing::info!(
            cron = cron.len(),
            hooks = hooks.len(),
            chains = chains.len(),
            "trigger matchers reloaded"
        );
        let mut matchers = self.matchers.lock().expect("scheduler lock poisoned");
        matchers.cron = cron;
        matchers.hooks = hooks;
        matchers.chains = chains;
    }

    /// Fire every cron workflow matching the minute of `now`. A minute that
    /// already fired returns nothing.
    pub fn fire_due<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Vec<String>
    where
        Tz::Offset: std::fmt::Display,
    {
        let minute = now.timestamp().div_euclid(60);
        let due: Vec<String> = {
            let mut matchers = self.matchers.lock().expect("scheduler lock poisoned");
            if matchers.last_fired_minute == Some(minute) {
                return Vec::new();
            }
            matchers.last_fired_minute = Some(minute);
            matchers
                .cron
                .iter()
                .filter(|entry| entry.schedule.matches(now))
                .map(|entry| entry.workflow_id.clone())
                .collect()
        };

        let fired_at = now.with_second(0).unwrap_or_else(|| now.clone()).to_rfc3339();
        for workflow_id in &due {
            tracing::info!(workflow_id = %workflow_id, fired_at = %fired_at, "cron trigger fired");
            self.dispatch(
                workflow_id,
                TriggerSource::Cron,
                json!({ "fired_at": fired_at }),
            );
        }
        due
    }

    /// Start the cron tick: first at the next minute boundary, then every
    /// 60s. Replaces a previously started tick.
    pub fn start(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let now = Local::now();
            let into_minute = Duration::from_millis(
                u64::from(now.second()) * 1000 + u64::from(now.timestamp_subsec_millis()),
            );
            tokio::time::sleep(Duration::from_secs(60).saturating_sub(into_minute)).await;

            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                let Some(scheduler) = weak.upgrade() else {
                    break;
                };
                scheduler.fire_due(&Local::now());
            }
        });

        if let Some(previous) = self.tick.lock().expect("scheduler lock poisoned").replace(task) {
            previous.abort();
        }
        tracing::info!("cron tick started");
    }

    /// Dispatch every hook workflow matching `event`.
    pub fn on_hook_event(&self, event: &HookEvent) -> Vec<String> {
        let event_value = serde_json::to_value(event).unwrap_or(Value::Null);
        let mut scope = VariableScope::default();
        scope.set_variable("event", event_value.clone());

        let matched = {
            let matchers = self.matchers.lock().expect("scheduler lock poisoned");
            matching(&matchers.hooks, &event.hook_type, &scope, true)
        };
        for workflow_id in &matched {
            tracing::info!(workflow_id = %workflow_id, hook_type = %event.hook_type, "hook trigger matched");
            self.dispatch(
                workflow_id,
                TriggerSource::Hook,
                json!({ "hook_type": event.hook_type, "hook_event": event_value }),
            );
        }
        matched
    }

    /// Dispatch every `on_workflow` workflow chained to `workflow_name`.
    pub fn on_workflow_complete(&self, workflow_name: &str, result: &RunResult) -> Vec<String> {
        let result_value = serde_json::to_value(result).unwrap_or(Value::Null);
        let mut scope = VariableScope::default();
        scope.set_variable("result", result_value.clone());

        let matched = {
            let matchers = self.matchers.lock().expect("scheduler lock poisoned");
            matching(&matchers.chains, workflow_name, &scope, false)
        };
        for workflow_id in &matched {
            tracing::info!(workflow_id = %workflow_id, source_workflow = workflow_name, "on_workflow trigger matched");
            self.dispatch(
                workflow_id,
                TriggerSource::OnWorkflow,
                json!({ "workflow": workflow_name, "trigger": result_value }),
            );
        }
        matched
    }

    /// Stop the tick and drop every matcher.
    pub fn destroy(&self) {
        if let Some(task) = self.tick.lock().expect("scheduler lock poisoned").take() {
            task.abort();
        }
        *self.matchers.lock().expect("scheduler lock poisoned") = Matchers::default();
        tracing::info!("trigger scheduler stopped");
    }

    /// Ids of the cron-scheduled workflows with their normalized expressions.
    pub fn cron_schedules(&self) -> Vec<(String, String)> {
        let matchers = self.matchers.lock().expect("scheduler lock poisoned");
        matchers
            .cron
            .iter()
            .map(|e| (e.workflow_id.clone(), e.schedule.expression().to_string()))
            .collect()
    }

    fn dispatch(&self, workflow_id: &str, source: TriggerSource, trigger_data: Value) {
        let options = TriggerOptions {
            source,
            trigger_data,
            project_path: None,
        };
        tokio::spawn((self.dispatch)(workflow_id.to_string(), options));
    }
}

impl Drop for TriggerScheduler {
    fn drop(&mut self) {
        if let Ok(mut tick) = self.tick.lock() {
            if let Some(task) = tick.take() {
                task.abort();
            }
        }
    }
}

fn cron_entry(def: &WorkflowDefinition) -> Result<CronEntry, SchedulerError> {
    let raw = def
        .trigger
        .value
        .as_deref()
        .ok_or_else(|| SchedulerError::MissingSchedule(def.id.clone()))?;
    Ok(CronEntry {
        workflow_id: def.id.clone(),
        schedule: CronSchedule::parse(raw)?,
    })
}

/// Entries whose filter accepts `key` and whose condition holds in `scope`.
/// A `None` filter matches everything only when `open_filter` is set.
fn matching(entries: &[EventEntry], key: &str, scope: &VariableScope, open_filter: bool) -> Vec<String> {
    entries
        .iter()
        .filter(|entry| match entry.filter.as_deref() {
            Some(filter) => filter == key,
            None => open_filter,
        })
        .filter(|entry| {
            entry
                .condition
                .as_deref()
                .is_none_or(|condition| evaluate_or_false(condition, scope))
        })
        .map(|entry| entry.workflow_id.clone())
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
