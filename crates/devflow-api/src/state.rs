//! Application state wiring the engine together.
//!
//! AppState holds the concrete engine instances used by both CLI commands and
//! REST API handlers. The orchestrator is generic over its repository; here it
//! is pinned to the YAML-directory store with the reqwest and git adapters.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;

use devflow_core::event::EventBus;
use devflow_core::repository::workflow::WorkflowRepository;
use devflow_core::workflow::executor::GraphEngine;
use devflow_core::workflow::orchestrator::Orchestrator;
use devflow_core::workflow::scheduler::TriggerScheduler;
use devflow_core::workflow::step_runner::StepRunner;
use devflow_infra::config::{load_engine_config, workflows_dir};
use devflow_infra::git::GitCli;
use devflow_infra::http::ReqwestHttpClient;
use devflow_infra::workflow_store::YamlWorkflowStore;
use devflow_types::config::EngineConfig;

/// Orchestrator pinned to the infra repository.
pub type WorkflowOrchestrator = Orchestrator<YamlWorkflowStore>;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<WorkflowOrchestrator>,
    pub scheduler: Arc<TriggerScheduler>,
    pub config: Arc<EngineConfig>,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Create the data directory, load `config.toml` and wire the engine.
    pub async fn init(data_dir: PathBuf, project_dir: Option<&Path>) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;
        let config = load_engine_config(&data_dir).await;
        Self::from_config(data_dir, config, project_dir)
    }

    /// Wire the engine from an already loaded configuration.
    pub fn from_config(
        data_dir: PathBuf,
        config: EngineConfig,
        project_dir: Option<&Path>,
    ) -> anyhow::Result<Self> {
        let store = Arc::new(YamlWorkflowStore::new(workflows_dir(&data_dir, &config)));
        let http = ReqwestHttpClient::new().context("failed to build HTTP client")?;

        let runner = StepRunner::new(&config)
            .with_http_client(Arc::new(http))
            .with_git_helper(Arc::new(GitCli::new()));
        let engine = GraphEngine::new(Arc::new(runner));
        let events = EventBus::new(config.event_capacity);

        let mut orchestrator = Orchestrator::new(store, engine, events, &config);
        if let Some(dir) = project_dir {
            orchestrator = orchestrator.with_project_dir(dir);
        }
        let orchestrator = Arc::new(orchestrator);
        let scheduler = TriggerScheduler::for_orchestrator(&orchestrator);

        tracing::debug!(
            data_dir = %data_dir.display(),
            workflows_dir = %orchestrator.repository().dir().display(),
            "engine initialized"
        );

        Ok(Self {
            orchestrator,
            scheduler,
            config: Arc::new(config),
            data_dir,
        })
    }

    pub fn store(&self) -> &YamlWorkflowStore {
        self.orchestrator.repository()
    }

    /// Re-read workflow definitions and rebuild the trigger matchers.
    /// Returns the number of workflows loaded.
    pub async fn reload_triggers(&self) -> anyhow::Result<usize> {
        let defs = self
            .store()
            .load_workflows()
            .await
            .context("failed to load workflows")?;
        self.scheduler.reload(&defs);
        Ok(defs.len())
    }

    /// Cancel active runs and stop the scheduler.
    pub fn shutdown(&self) {
        self.scheduler.destroy();
        self.orchestrator.shutdown();
    }
}
