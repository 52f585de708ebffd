//! Event types for the devflow engine event bus.
//!
//! `EngineEvent` is the single outbound event type. All variants are
//! Clone + Send + Sync for use with tokio broadcast channels, and serialize
//! with a kebab-case `type` tag (`run-start`, `step-update`, ...).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::workflow::{NotifyLevel, RunStatus, StepStatus, WorkflowRun};

/// Events emitted by the orchestrator and the graph engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EngineEvent {
    /// A run has been accepted and is about to execute.
    RunStart { run: WorkflowRun },

    /// A run has been finalized.
    RunEnd {
        run_id: Uuid,
        workflow_id: String,
        status: RunStatus,
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// A trigger was parked behind an active run (concurrency = queue).
    RunQueued { workflow_id: String, queue_length: usize },

    /// A step changed status.
    StepUpdate {
        run_id: Uuid,
        step_id: String,
        step_type: String,
        status: StepStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attempt: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Intermediate message streamed from an agent session.
    AgentMessage {
        run_id: Uuid,
        step_id: String,
        message: Value,
    },

    /// Desktop notification request.
    NotifyDesktop {
        title: String,
        message: String,
        level: NotifyLevel,
    },
}

impl EngineEvent {
    /// The run this event belongs to, if any.
    pub fn run_id(&self) -> Option<Uuid> {
        match self {
            EngineEvent::RunStart { run } => Some(run.id),
            EngineEvent::RunEnd { run_id, .. }
            | EngineEvent::StepUpdate { run_id, .. }
            | EngineEvent::AgentMessage { run_id, .. } => Some(*run_id),
            EngineEvent::RunQueued { .. } | EngineEvent::NotifyDesktop { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_update_uses_kebab_case_tag() {
        let run_id = Uuid::now_v7();
        let event = EngineEvent::StepUpdate {
            run_id,
            step_id: "build".to_string(),
            step_type: "shell".to_string(),
            status: StepStatus::Retrying,
            output: None,
            attempt: Some(2),
            error: Some("spawn failed".to_string()),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"step-update\""));
        assert!(json.contains("\"status\":\"retrying\""));
        assert!(!json.contains("\"output\""));
        let parsed: EngineEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.run_id(), Some(run_id));
    }

    #[test]
    fn run_end_omits_missing_error() {
        let event = EngineEvent::RunEnd {
            run_id: Uuid::now_v7(),
            workflow_id: "nightly".to_string(),
            status: RunStatus::Success,
            duration_ms: 1_500,
            error: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"run-end\""));
        assert!(!json.contains("error"));
    }

    #[test]
    fn queue_and_notify_events_have_no_run() {
        let queued = EngineEvent::RunQueued {
            workflow_id: "w".to_string(),
            queue_length: 3,
        };
        let notify = EngineEvent::NotifyDesktop {
            title: "Workflow failed".to_string(),
            message: "w: boom".to_string(),
            level: NotifyLevel::Error,
        };
        assert_eq!(queued.run_id(), None);
        assert_eq!(notify.run_id(), None);
        let json = serde_json::to_string(&notify).unwrap();
        assert!(json.contains("\"type\":\"notify-desktop\""));
        assert!(json.contains("\"level\":\"error\""));
    }
}
