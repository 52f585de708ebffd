//! In-memory [`WorkflowRepository`] for tests and embedded hosts.

use dashmap::DashMap;
use devflow_types::error::RepositoryError;
use devflow_types::workflow::{RunPatch, WorkflowDefinition, WorkflowRun};
use serde_json::Value;
use uuid::Uuid;

use super::workflow::{ensure_acyclic, WorkflowRepository};

#[derive(Debug, Default)]
pub struct InMemoryWorkflowRepository {
    workflows: DashMap<String, WorkflowDefinition>,
    runs: DashMap<Uuid, WorkflowRun>,
    payloads: DashMap<Uuid, Value>,
}

impl InMemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with definitions, skipping the cycle check.
    pub fn with_workflows(defs: impl IntoIterator<Item = WorkflowDefinition>) -> Self {
        let repo = Self::default();
        for def in defs {
            repo.workflows.insert(def.id.clone(), def);
        }
        repo
    }
}

impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn load_workflows(&self) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let mut defs: Vec<WorkflowDefinition> =
            self.workflows.iter().map(|e| e.value().clone()).collect();
        defs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(defs)
    }

    async fn get_workflow(&self, id: &str) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        Ok(self.workflows.get(id).map(|e| e.value().clone()))
    }

    async fn save_workflow(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        let all = self.load_workflows().await?;
        ensure_acyclic(self.detect_cycle(&def.id, &def.dependency_ids(), &all))?;
        self.workflows.insert(def.id.clone(), def.clone());
        Ok(())
    }

    async fn append_run(&self, run: &WorkflowRun) -> Result<(), RepositoryError> {
        self.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn update_run(&self, run_id: &Uuid, patch: RunPatch) -> Result<(), RepositoryError> {
        let mut run = self.runs.get_mut(run_id).ok_or(RepositoryError::NotFound)?;
        run.apply(patch);
        Ok(())
    }

    async fn save_result_payload(&self, run_id: &Uuid, payload: &Value) -> Result<(), RepositoryError> {
        self.payloads.insert(*run_id, payload.clone());
        Ok(())
    }

    async fn get_result_payload(&self, run_id: &Uuid) -> Result<Option<Value>, RepositoryError> {
        Ok(self.payloads.get(run_id).map(|e| e.value().clone()))
    }

    async fn get_run(&self, run_id: &Uuid) -> Result<Option<WorkflowRun>, RepositoryError> {
        Ok(self.runs.get(run_id).map(|e| e.value().clone()))
    }

    async fn list_runs(
        &self,
        workflow_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<WorkflowRun>, RepositoryError> {
        let mut runs: Vec<WorkflowRun> = self
            .runs
            .iter()
            .filter(|e| workflow_id.is_none_or(|id| e.workflow_id == id))
            .map(|e| e.value().clone())
            .collect();
        // UUIDv7 ids sort by creation time.
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        runs.truncate(limit);
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::definition::parse_workflow_yaml;
    use chrono::Utc;
    use devflow_types::workflow::{RunStatus, TriggerSource};

    fn def(id: &str, deps: &[&str]) -> WorkflowDefinition {
        let mut yaml = format!("id: {id}\nname: {id}\nsteps:\n  - {{ id: s, type: x.y }}\n");
        if !deps.is_empty() {
            yaml.push_str("depends_on:\n");
            for d in deps {
                yaml.push_str(&format!("  - workflow: {d}\n"));
            }
        }
        parse_workflow_yaml(&yaml).unwrap()
    }

    fn run(workflow_id: &str) -> WorkflowRun {
        WorkflowRun {
            id: Uuid::now_v7(),
            workflow_id: workflow_id.into(),
            workflow_name: workflow_id.into(),
            status: RunStatus::Running,
            trigger: TriggerSource::Manual,
            trigger_data: Value::Null,
            project_path: None,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: None,
            error: None,
            steps: Default::default(),
        }
    }

    #[tokio::test]
    async fn save_rejects_dependency_cycle() {
        let repo = InMemoryWorkflowRepository::new();
        repo.save_workflow(&def("b", &["c"])).await.unwrap();
        repo.save_workflow(&def("c", &["a"])).await.unwrap();
        let err = repo.save_workflow(&def("a", &["b"])).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(msg) if msg.contains("a -> b -> c -> a")));
        assert!(repo.get_workflow("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn runs_are_patched_and_listed_newest_first() {
        let repo = InMemoryWorkflowRepository::new();
        let first = run("build");
        let second = run("build");
        let other = run("deploy");
        for r in [&first, &second, &other] {
            repo.append_run(r).await.unwrap();
        }
        repo.update_run(
            &first.id,
            RunPatch {
                status: Some(RunStatus::Success),
                duration_ms: Some(12),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let stored = repo.get_run(&first.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Success);
        assert_eq!(stored.duration_ms, Some(12));

        let builds = repo.list_runs(Some("build"), 10).await.unwrap();
        assert_eq!(builds.iter().map(|r| r.id).collect::<Vec<_>>(), vec![second.id, first.id]);
        assert_eq!(repo.list_runs(None, 1).await.unwrap().len(), 1);

        let missing = repo.update_run(&Uuid::now_v7(), RunPatch::default()).await;
        assert!(matches!(missing, Err(RepositoryError::NotFound)));
    }
}
