//! Graph engine: drives one run's steps to completion.
//!
//! Two layouts are supported:
//!
//! - **Graph mode** (`graph` present): breadth-first traversal from the
//!   single `trigger` node along links. Slot 0 is the success output, slot 1
//!   the error (or condition-false) output. Every node runs at most once and
//!   the first arrival wins; there are no join semantics.
//! - **Linear mode** (`steps`): steps in declaration order, first failure
//!   fails the run.
//!
//! Each non-condition node goes through [`execute_step`], which owns retries,
//! per-step timeouts and status events.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use devflow_types::workflow::{
    StepKind, StepStatus, WorkflowDefinition, WorkflowGraph, SLOT_ERROR, SLOT_SUCCESS,
};
use serde_json::{json, Value};

use super::condition::evaluate;
use super::context::VariableScope;
use super::retry::{execute_step, StepOutcome};
use super::step_runner::{RunContext, StepError, StepRunner};

// ---------------------------------------------------------------------------
// ExecutorError
// ---------------------------------------------------------------------------

/// Errors that end a run.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutorError {
    /// A step failed with no error edge to route to.
    #[error("step '{step_id}' failed: {error}")]
    StepFailed { step_id: String, error: String },

    /// The run was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// The definition cannot be executed.
    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    /// A step handler panicked.
    #[error("step panicked: {0}")]
    Panicked(String),
}

impl ExecutorError {
    fn from_step(step_id: &str, error: StepError) -> Self {
        match error {
            StepError::Cancelled => ExecutorError::Cancelled,
            other => ExecutorError::StepFailed {
                step_id: step_id.to_string(),
                error: other.to_string(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// GraphEngine
// ---------------------------------------------------------------------------

/// Executes workflow definitions against a [`StepRunner`].
#[derive(Debug, Clone)]
pub struct GraphEngine {
    runner: Arc<StepRunner>,
}

impl GraphEngine {
    pub fn new(runner: Arc<StepRunner>) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &Arc<StepRunner> {
        &self.runner
    }

    /// Run `def` to completion. Step outputs accumulate in `scope`; the
    /// trigger payload must already be bound there as `trigger`.
    pub async fn execute(
        &self,
        def: &WorkflowDefinition,
        scope: &mut VariableScope,
        ctx: &RunContext,
    ) -> Result<(), ExecutorError> {
        match &def.graph {
            Some(graph) => self.execute_graph(graph, scope, ctx).await,
            None => self.execute_linear(def, scope, ctx).await,
        }
    }

    async fn execute_graph(
        &self,
        graph: &WorkflowGraph,
        scope: &mut VariableScope,
        ctx: &RunContext,
    ) -> Result<(), ExecutorError> {
        let trigger = graph
            .trigger_node()
            .ok_or_else(|| ExecutorError::InvalidGraph("graph has no trigger node".into()))?;

        let trigger_data = scope.get("trigger").cloned().unwrap_or(Value::Null);
        ctx.step_update(trigger, StepStatus::Running, Some(1), None, None);
        let stored = scope.set_step_output(&trigger.id, trigger_data);
        ctx.step_update(trigger, StepStatus::Success, Some(1), Some(stored), None);

        let mut visited: HashSet<&str> = HashSet::from([trigger.id.as_str()]);
        let mut queue: VecDeque<&str> = VecDeque::new();
        enqueue(graph, &trigger.id, SLOT_SUCCESS, &mut visited, &mut queue);

        while let Some(node_id) = queue.pop_front() {
            if ctx.cancel.is_cancelled() {
                return Err(ExecutorError::Cancelled);
            }
            let node = graph
                .node(node_id)
                .ok_or_else(|| ExecutorError::InvalidGraph(format!("unknown node '{node_id}'")))?;

            let slot = match &node.kind {
                StepKind::Condition(cfg) => {
                    ctx.step_update(node, StepStatus::Running, Some(1), None, None);
                    let result = evaluate(&cfg.expression, scope).unwrap_or_else(|e| {
                        tracing::warn!(
                            run_id = %ctx.run_id,
                            step = %node.id,
                            error = %e,
                            "condition evaluation failed, treating as false"
                        );
                        false
                    });
                    let stored = scope.set_step_output(&node.id, json!({ "result": result }));
                    ctx.step_update(node, StepStatus::Success, Some(1), Some(stored), None);
                    if result {
                        SLOT_SUCCESS
                    } else {
                        SLOT_ERROR
                    }
                }
                StepKind::Trigger => {
                    return Err(ExecutorError::InvalidGraph(format!(
                        "trigger node '{}' reached from another node",
                        node.id
                    )));
                }
                _ => match execute_step(&self.runner, node, scope, ctx).await {
                    Ok(StepOutcome::Completed(_)) | Ok(StepOutcome::Skipped) => SLOT_SUCCESS,
                    Err(StepError::Cancelled) => return Err(ExecutorError::Cancelled),
                    Err(e) if graph.has_edge_from(&node.id, SLOT_ERROR) => {
                        tracing::info!(
                            run_id = %ctx.run_id,
                            step = %node.id,
                            error = %e,
                            "step failed, following error edge"
                        );
                        scope.set_step_output(
                            &node.id,
                            json!({ "success": false, "error": e.to_string() }),
                        );
                        SLOT_ERROR
                    }
                    Err(e) => return Err(ExecutorError::from_step(&node.id, e)),
                },
            };

            enqueue(graph, &node.id, slot, &mut visited, &mut queue);
        }

        Ok(())
    }

    async fn execute_linear(
        &self,
        def: &WorkflowDefinition,
        scope: &mut VariableScope,
        ctx: &RunContext,
    ) -> Result<(), ExecutorError> {
        for step in &def.steps {
            if let Err(e) = execute_step(&self.runner, step, scope, ctx).await {
                return Err(ExecutorError::from_step(&step.id, e));
            }
        }
        Ok(())
    }
}

/// Queue the unvisited targets of `from`'s `slot` edges.
fn enqueue<'g>(
    graph: &'g WorkflowGraph,
    from: &str,
    slot: u32,
    visited: &mut HashSet<&'g str>,
    queue: &mut VecDeque<&'g str>,
) {
    for next in graph.successors(from, slot) {
        if let Some(node) = graph.node(next) {
            if visited.insert(node.id.as_str()) {
                queue.push_back(node.id.as_str());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
