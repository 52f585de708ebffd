//! Workflow repository trait definition.
//!
//! Covers two entity families:
//! - **Definitions:** load, lookup and save (with dependency cycle checks).
//! - **Runs:** append, patch and query run history, plus the final step
//!   output payload of each run.

use devflow_types::error::RepositoryError;
use devflow_types::workflow::{RunPatch, WorkflowDefinition, WorkflowRun};
use serde_json::Value;
use uuid::Uuid;

use crate::workflow::dependency::{detect_cycle, CycleCheck};

/// Repository trait for workflow persistence.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkflowRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Definitions
    // -----------------------------------------------------------------------

    /// All stored definitions, ordered by id.
    fn load_workflows(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowDefinition>, RepositoryError>> + Send;

    fn get_workflow(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowDefinition>, RepositoryError>> + Send;

    /// Insert or replace a definition. Fails with `Conflict` when its
    /// `depends_on` would close a dependency cycle.
    fn save_workflow(
        &self,
        def: &WorkflowDefinition,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Record a newly started run.
    fn append_run(
        &self,
        run: &WorkflowRun,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn update_run(
        &self,
        run_id: &Uuid,
        patch: RunPatch,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Store the step outputs a run finished with.
    fn save_result_payload(
        &self,
        run_id: &Uuid,
        payload: &Value,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_result_payload(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Value>, RepositoryError>> + Send;

    fn get_run(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowRun>, RepositoryError>> + Send;

    /// Run history, newest first, optionally filtered to one workflow.
    fn list_runs(
        &self,
        workflow_id: Option<&str>,
        limit: usize,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowRun>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Dependency checks
    // -----------------------------------------------------------------------

    /// Would giving `id` the dependencies `depends_on` create a cycle?
    fn detect_cycle(&self, id: &str, depends_on: &[String], all: &[WorkflowDefinition]) -> CycleCheck {
        detect_cycle(id, depends_on, all)
    }
}

/// `Conflict` error for a failed cycle check, or `Ok` when acyclic.
pub fn ensure_acyclic(check: CycleCheck) -> Result<(), RepositoryError> {
    if check.has_cycle {
        Err(RepositoryError::Conflict(format!(
            "dependency cycle: {}",
            check.cycle.join(" -> ")
        )))
    } else {
        Ok(())
    }
}
