//! YAML-file workflow repository.
//!
//! Implements `WorkflowRepository` from `devflow-core` over a directory of
//! workflow YAML files. Definitions are re-read from disk on every lookup so
//! edits take effect without a restart; saves are written back as YAML.
//! Run history and result payloads live in memory for the process lifetime.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use devflow_core::repository::memory::InMemoryWorkflowRepository;
use devflow_core::repository::workflow::{ensure_acyclic, WorkflowRepository};
use devflow_core::workflow::definition::{discover_workflows, save_workflow_file, WorkflowError};
use devflow_types::error::RepositoryError;
use devflow_types::workflow::{RunPatch, WorkflowDefinition, WorkflowRun};
use serde_json::Value;
use uuid::Uuid;

pub struct YamlWorkflowStore {
    dir: PathBuf,
    /// Workflow id to the file it was last loaded from.
    paths: Mutex<HashMap<String, PathBuf>>,
    runs: InMemoryWorkflowRepository,
}

impl YamlWorkflowStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            paths: Mutex::new(HashMap::new()),
            runs: InMemoryWorkflowRepository::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File a definition is stored in. New workflows go to `{dir}/{id}.yaml`.
    pub fn path_for(&self, id: &str) -> PathBuf {
        self.paths
            .lock()
            .expect("workflow path lock poisoned")
            .get(id)
            .cloned()
            .unwrap_or_else(|| self.dir.join(format!("{id}.yaml")))
    }

    async fn scan(&self) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let dir = self.dir.clone();
        let found = tokio::task::spawn_blocking(move || discover_workflows(&dir))
            .await
            .map_err(|e| RepositoryError::Query(format!("workflow scan task failed: {e}")))?
            .map_err(to_repository_error)?;

        let mut paths: HashMap<String, PathBuf> = HashMap::new();
        let mut defs = Vec::with_capacity(found.len());
        for (path, def) in found {
            if let Some(first) = paths.get(&def.id) {
                tracing::warn!(
                    workflow_id = %def.id,
                    kept = %first.display(),
                    ignored = %path.display(),
                    "duplicate workflow id"
                );
                continue;
            }
            paths.insert(def.id.clone(), path);
            defs.push(def);
        }
        defs.sort_by(|a, b| a.id.cmp(&b.id));

        *self.paths.lock().expect("workflow path lock poisoned") = paths;
        Ok(defs)
    }
}

fn to_repository_error(e: WorkflowError) -> RepositoryError {
    match e {
        WorkflowError::CycleDetected(msg) => RepositoryError::Conflict(msg),
        other => RepositoryError::Query(other.to_string()),
    }
}

impl WorkflowRepository for YamlWorkflowStore {
    async fn load_workflows(&self) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        self.scan().await
    }

    async fn get_workflow(&self, id: &str) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        Ok(self.scan().await?.into_iter().find(|d| d.id == id))
    }

    async fn save_workflow(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        let all = self.scan().await?;
        ensure_acyclic(self.detect_cycle(&def.id, &def.dependency_ids(), &all))?;

        let path = self.path_for(&def.id);
        let def = def.clone();
        let target = path.clone();
        tokio::task::spawn_blocking(move || save_workflow_file(&target, &def))
            .await
            .map_err(|e| RepositoryError::Query(format!("workflow save task failed: {e}")))?
            .map_err(to_repository_error)?;
        tracing::info!(path = %path.display(), "workflow saved");
        Ok(())
    }

    async fn append_run(&self, run: &WorkflowRun) -> Result<(), RepositoryError> {
        self.runs.append_run(run).await
    }

    async fn update_run(&self, run_id: &Uuid, patch: RunPatch) -> Result<(), RepositoryError> {
        self.runs.update_run(run_id, patch).await
    }

    async fn save_result_payload(&self, run_id: &Uuid, payload: &Value) -> Result<(), RepositoryError> {
        self.runs.save_result_payload(run_id, payload).await
    }

    async fn get_result_payload(&self, run_id: &Uuid) -> Result<Option<Value>, RepositoryError> {
        self.runs.get_result_payload(run_id).await
    }

    async fn get_run(&self, run_id: &Uuid) -> Result<Option<WorkflowRun>, RepositoryError> {
        self.runs.get_run(run_id).await
    }

    async fn list_runs(
        &self,
        workflow_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<WorkflowRun>, RepositoryError> {
        self.runs.list_runs(workflow_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devflow_core::workflow::definition::parse_workflow_yaml;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn yaml(id: &str, deps: &[&str]) -> String {
        let mut out = format!("id: {id}\nname: {id}\nsteps:\n  - {{ id: s, type: shell, config: {{ command: 'echo {id}' }} }}\n");
        if !deps.is_empty() {
            out.push_str("depends_on:\n");
            for d in deps {
                out.push_str(&format!("  - workflow: {d}\n"));
            }
        }
        out
    }

    #[tokio::test]
    async fn loads_nested_files_and_skips_broken_ones() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "build.yaml", &yaml("build", &[]));
        write(tmp.path(), "team/deploy.yml", &yaml("deploy", &["build"]));
        write(tmp.path(), "broken.yaml", "id: [not, valid");
        write(tmp.path(), "notes.txt", "ignored");

        let store = YamlWorkflowStore::new(tmp.path());
        let ids: Vec<String> = store
            .load_workflows()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["build", "deploy"]);
        assert!(store.get_workflow("deploy").await.unwrap().is_some());
        assert!(store.get_workflow("broken").await.unwrap().is_none());
        assert_eq!(store.path_for("deploy"), tmp.path().join("team/deploy.yml"));
    }

    #[tokio::test]
    async fn duplicate_ids_keep_the_first_file() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a/build.yaml", &yaml("build", &[]));
        write(tmp.path(), "b/build.yaml", &yaml("build", &[]));

        let store = YamlWorkflowStore::new(tmp.path());
        assert_eq!(store.load_workflows().await.unwrap().len(), 1);
        assert_eq!(store.path_for("build"), tmp.path().join("a/build.yaml"));
    }

    #[tokio::test]
    async fn missing_directory_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = YamlWorkflowStore::new(tmp.path().join("nope"));
        assert!(store.load_workflows().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_writes_yaml_and_rejects_cycles() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a.yaml", &yaml("a", &["b"]));
        let store = YamlWorkflowStore::new(tmp.path());

        let b = parse_workflow_yaml(&yaml("b", &[])).unwrap();
        store.save_workflow(&b).await.unwrap();
        assert!(tmp.path().join("b.yaml").exists());
        assert_eq!(store.get_workflow("b").await.unwrap(), Some(b));

        let cyclic = parse_workflow_yaml(&yaml("b", &["a"])).unwrap();
        let err = store.save_workflow(&cyclic).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(msg) if msg.contains("b -> a -> b")));
        assert!(store.get_workflow("b").await.unwrap().unwrap().depends_on.is_empty());
    }

    #[tokio::test]
    async fn save_overwrites_the_original_file() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "nested/lint.yaml", &yaml("lint", &[]));
        let store = YamlWorkflowStore::new(tmp.path());
        let mut def = store.get_workflow("lint").await.unwrap().unwrap();
        def.description = Some("runs clippy".into());
        store.save_workflow(&def).await.unwrap();

        assert!(!tmp.path().join("lint.yaml").exists());
        let reloaded = store.get_workflow("lint").await.unwrap().unwrap();
        assert_eq!(reloaded.description.as_deref(), Some("runs clippy"));
    }
}
