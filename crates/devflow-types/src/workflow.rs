//! Workflow domain types for devflow.
//!
//! `WorkflowDefinition` is the canonical shape of a workflow, loaded from YAML
//! or JSON. A definition carries either a legacy linear `steps` list or a
//! node/link `graph`. Step property bags are deserialized into typed
//! [`StepKind`] configs when the definition is loaded, so the engine never
//! touches an untyped map. Execution tracking types (`WorkflowRun`,
//! `StepSnapshot`, `RunPatch`) live at the bottom of this module.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// The canonical workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Unique workflow identifier (e.g. "deploy-preview").
    pub id: String,
    /// Human-readable name. `on_workflow` chains match on this, not on `id`.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Disabled workflows reject manual triggers and never match schedules.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub trigger: TriggerSpec,
    /// Free-form scope label (e.g. "project", "global").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// What to do when triggered while a run is already active.
    #[serde(default)]
    pub concurrency: ConcurrencyPolicy,
    /// Workflows whose outputs must be available before this one runs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<WorkflowDependency>,
    /// Global run timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Legacy linear step list. Ignored when `graph` is present.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepDefinition>,
    /// Node/link graph representation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph: Option<WorkflowGraph>,
}

fn default_enabled() -> bool {
    true
}

impl WorkflowDefinition {
    /// True when this definition executes in graph mode.
    pub fn is_graph(&self) -> bool {
        self.graph.is_some()
    }

    /// IDs of the workflows this one depends on, in declaration order.
    pub fn dependency_ids(&self) -> Vec<String> {
        self.depends_on.iter().map(|d| d.workflow.clone()).collect()
    }
}

/// Trigger configuration for a workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerSpec {
    #[serde(rename = "type", default)]
    pub kind: TriggerKind,
    /// Cron expression for `cron`, source workflow name for `on_workflow`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Hook event type filter for `hook` triggers. `None` matches every hook.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook_type: Option<String>,
    /// Optional condition evaluated against the hook event or workflow result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    #[default]
    Manual,
    Cron,
    Hook,
    OnWorkflow,
}

/// Per-workflow concurrency policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyPolicy {
    /// Drop the trigger while a run is active.
    #[default]
    Skip,
    /// Park the trigger in a FIFO until the active run finalizes.
    Queue,
    /// Always start a new run.
    Parallel,
}

/// A declared dependency on another workflow's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDependency {
    /// Target workflow id.
    pub workflow: String,
    /// How old a cached result may be and still satisfy the dependency
    /// (e.g. "30s", "5m", "2h"). `None` accepts any cached result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<String>,
}

impl WorkflowDependency {
    /// Parsed `max_age`. `Ok(None)` when unset.
    pub fn max_age(&self) -> Result<Option<Duration>, String> {
        match &self.max_age {
            None => Ok(None),
            Some(raw) => parse_duration(raw)
                .map(Some)
                .ok_or_else(|| format!("invalid max_age '{raw}' for dependency '{}'", self.workflow)),
        }
    }
}

/// Parse a compact duration string: a number followed by `ms`, `s`, `m`,
/// `h` or `d`. A bare number is seconds.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let split = raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits.parse().ok()?;
    let secs = match unit.trim() {
        "" | "s" => value,
        "ms" => return Some(Duration::from_millis(value)),
        "m" => value.checked_mul(60)?,
        "h" => value.checked_mul(3_600)?,
        "d" => value.checked_mul(86_400)?,
        _ => return None,
    };
    Some(Duration::from_secs(secs))
}

// ---------------------------------------------------------------------------
// Graph representation
// ---------------------------------------------------------------------------

/// Output slot used for success edges and condition-true edges.
pub const SLOT_SUCCESS: u32 = 0;
/// Output slot used for error edges and condition-false edges.
pub const SLOT_ERROR: u32 = 1;

/// Node/link graph of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    pub nodes: Vec<StepDefinition>,
    #[serde(default)]
    pub links: Vec<GraphLink>,
}

/// A directed edge from one node's output slot to another node's input slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphLink {
    pub origin_node: String,
    #[serde(default)]
    pub origin_slot: u32,
    pub target_node: String,
    #[serde(default)]
    pub target_slot: u32,
}

impl WorkflowGraph {
    pub fn node(&self, id: &str) -> Option<&StepDefinition> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// The entry node (`type: trigger`).
    pub fn trigger_node(&self) -> Option<&StepDefinition> {
        self.nodes.iter().find(|n| matches!(n.kind, StepKind::Trigger))
    }

    /// Targets of edges leaving `node_id` from `slot`, in declaration order.
    pub fn successors<'a>(&'a self, node_id: &'a str, slot: u32) -> impl Iterator<Item = &'a str> + 'a {
        self.links
            .iter()
            .filter(move |l| l.origin_node == node_id && l.origin_slot == slot)
            .map(|l| l.target_node.as_str())
    }

    pub fn has_edge_from(&self, node_id: &str, slot: u32) -> bool {
        self.successors(node_id, slot).next().is_some()
    }
}

// ---------------------------------------------------------------------------
// Step Definition
// ---------------------------------------------------------------------------

/// A single step (linear mode) or node (graph mode).
///
/// On the wire a step is a flat object with a `type` string and a free-form
/// `config` bag:
/// ```yaml
/// id: build
/// type: shell
/// retry: 2
/// config:
///   command: cargo build --release
/// ```
/// The bag is turned into the matching [`StepKind`] at deserialization time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawStep", into = "RawStep")]
pub struct StepDefinition {
    pub id: String,
    pub name: Option<String>,
    pub kind: StepKind,
    /// Extra attempts after the first failure.
    pub retry: u32,
    /// Delay between attempts. Falls back to the engine default when unset.
    pub retry_delay_ms: Option<u64>,
    pub timeout_secs: Option<u64>,
    /// Guard condition; the step is skipped when it evaluates false.
    pub condition: Option<String>,
}

impl StepDefinition {
    pub fn new(id: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: id.into(),
            name: None,
            kind,
            retry: 0,
            retry_delay_ms: None,
            timeout_secs: None,
            condition: None,
        }
    }

    pub fn step_type(&self) -> &str {
        self.kind.type_name()
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Wire shape of a step.
#[derive(Serialize, Deserialize)]
struct RawStep {
    id: String,
    #[serde(rename = "type")]
    step_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    retry: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    retry_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    condition: Option<String>,
    #[serde(default, skip_serializing_if = "is_empty_config")]
    config: Value,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

fn is_empty_config(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

impl TryFrom<RawStep> for StepDefinition {
    type Error = String;

    fn try_from(raw: RawStep) -> Result<Self, Self::Error> {
        let kind = StepKind::from_config(&raw.step_type, raw.config)
            .map_err(|e| format!("step '{}': {e}", raw.id))?;
        Ok(Self {
            id: raw.id,
            name: raw.name,
            kind,
            retry: raw.retry,
            retry_delay_ms: raw.retry_delay_ms,
            timeout_secs: raw.timeout_secs,
            condition: raw.condition,
        })
    }
}

impl From<StepDefinition> for RawStep {
    fn from(step: StepDefinition) -> Self {
        let (step_type, config) = step.kind.into_config();
        Self {
            id: step.id,
            step_type,
            name: step.name,
            retry: step.retry,
            retry_delay_ms: step.retry_delay_ms,
            timeout_secs: step.timeout_secs,
            condition: step.condition,
            config,
        }
    }
}

/// Typed step configuration, selected by the step's `type`.
#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    /// Graph entry node. Carries no configuration.
    Trigger,
    Agent(AgentStepConfig),
    Shell(ShellStepConfig),
    Git(GitStepConfig),
    Http(HttpStepConfig),
    File(FileStepConfig),
    Db(DbStepConfig),
    Condition(ConditionStepConfig),
    Notify(NotifyStepConfig),
    Wait(WaitStepConfig),
    Loop(LoopStepConfig),
    Parallel(ParallelStepConfig),
    /// Vendor step (`vendor.action`), dispatched through the handler registry.
    Extension { step_type: String, config: Value },
}

impl StepKind {
    /// Build a typed config from a step type string and its property bag.
    pub fn from_config(step_type: &str, config: Value) -> Result<Self, String> {
        let config = if config.is_null() {
            Value::Object(Map::new())
        } else {
            config
        };
        fn typed<T: serde::de::DeserializeOwned>(step_type: &str, config: Value) -> Result<T, String> {
            serde_json::from_value(config).map_err(|e| format!("invalid {step_type} config: {e}"))
        }
        let kind = match step_type {
            "trigger" => StepKind::Trigger,
            "agent" => StepKind::Agent(typed(step_type, config)?),
            "shell" => StepKind::Shell(typed(step_type, config)?),
            "git" => StepKind::Git(typed(step_type, config)?),
            "http" => StepKind::Http(typed(step_type, config)?),
            "file" => StepKind::File(typed(step_type, config)?),
            "db" => StepKind::Db(typed(step_type, config)?),
            "condition" => StepKind::Condition(typed(step_type, config)?),
            "notify" => StepKind::Notify(typed(step_type, config)?),
            "wait" => StepKind::Wait(typed(step_type, config)?),
            "loop" => StepKind::Loop(typed(step_type, config)?),
            "parallel" => StepKind::Parallel(typed(step_type, config)?),
            other if is_extension_type(other) => StepKind::Extension {
                step_type: other.to_string(),
                config,
            },
            other => return Err(format!("unknown step type '{other}'")),
        };
        Ok(kind)
    }

    /// Inverse of [`StepKind::from_config`].
    pub fn into_config(self) -> (String, Value) {
        fn bag<T: Serialize>(config: &T) -> Value {
            serde_json::to_value(config).unwrap_or(Value::Null)
        }
        let name = self.type_name().to_string();
        let config = match self {
            StepKind::Trigger => Value::Null,
            StepKind::Agent(c) => bag(&c),
            StepKind::Shell(c) => bag(&c),
            StepKind::Git(c) => bag(&c),
            StepKind::Http(c) => bag(&c),
            StepKind::File(c) => bag(&c),
            StepKind::Db(c) => bag(&c),
            StepKind::Condition(c) => bag(&c),
            StepKind::Notify(c) => bag(&c),
            StepKind::Wait(c) => bag(&c),
            StepKind::Loop(c) => bag(&c),
            StepKind::Parallel(c) => bag(&c),
            StepKind::Extension { config, .. } => config,
        };
        (name, config)
    }

    pub fn type_name(&self) -> &str {
        match self {
            StepKind::Trigger => "trigger",
            StepKind::Agent(_) => "agent",
            StepKind::Shell(_) => "shell",
            StepKind::Git(_) => "git",
            StepKind::Http(_) => "http",
            StepKind::File(_) => "file",
            StepKind::Db(_) => "db",
            StepKind::Condition(_) => "condition",
            StepKind::Notify(_) => "notify",
            StepKind::Wait(_) => "wait",
            StepKind::Loop(_) => "loop",
            StepKind::Parallel(_) => "parallel",
            StepKind::Extension { step_type, .. } => step_type,
        }
    }
}

/// `vendor.action` with non-empty halves.
fn is_extension_type(step_type: &str) -> bool {
    match step_type.split_once('.') {
        Some((prefix, rest)) => !prefix.is_empty() && !rest.is_empty(),
        None => false,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStepConfig {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Working directory relative to the project dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// JSON schema for structured output. Structured fields are merged into
    /// the step output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShellStepConfig {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitStepConfig {
    pub actions: Vec<GitAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

/// One git sub-action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum GitAction {
    Pull {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        remote: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        branch: Option<String>,
    },
    Push {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        remote: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        branch: Option<String>,
    },
    /// Stage `paths` (everything when empty) and commit.
    Commit {
        message: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        paths: Vec<String>,
    },
    Checkout {
        branch: String,
        #[serde(default)]
        create: bool,
    },
    Branch {
        name: String,
    },
    /// Arbitrary git arguments, split like a shell command line.
    Raw {
        args: String,
    },
}

impl GitAction {
    pub fn name(&self) -> &'static str {
        match self {
            GitAction::Pull { .. } => "pull",
            GitAction::Push { .. } => "push",
            GitAction::Commit { .. } => "commit",
            GitAction::Checkout { .. } => "checkout",
            GitAction::Branch { .. } => "branch",
            GitAction::Raw { .. } => "raw",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpStepConfig {
    #[serde(default = "default_http_method")]
    pub method: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn default_http_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileStepConfig {
    pub action: FileAction,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Destination path for `copy`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAction {
    Read,
    Write,
    Append,
    Copy,
    Delete,
    Exists,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbStepConfig {
    /// Connection id known to the database provider.
    pub connection: String,
    pub action: DbAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Value>,
    /// Table filter for `schema`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbAction {
    Query,
    Schema,
    Tables,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionStepConfig {
    pub expression: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyStepConfig {
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub level: NotifyLevel,
    #[serde(default = "default_true")]
    pub desktop: bool,
    /// Webhook URLs that receive a JSON POST of the notification.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub webhooks: Vec<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyLevel {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WaitStepConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Resolve with `timed_out: true` after this many seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopStepConfig {
    /// Variable path of the array to iterate (`$fetch.body.items`).
    pub items: String,
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub mode: LoopMode,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopMode {
    #[default]
    Sequential,
    Parallel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelStepConfig {
    pub steps: Vec<StepDefinition>,
    /// Fail the step when any sub-step failed.
    #[serde(default = "default_true")]
    pub fail_fast: bool,
}

// ---------------------------------------------------------------------------
// Triggering
// ---------------------------------------------------------------------------

/// Where a run came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    #[default]
    Manual,
    Cron,
    Hook,
    OnWorkflow,
    /// Started by another workflow's dependency resolution.
    Dependency,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Manual => "manual",
            TriggerSource::Cron => "cron",
            TriggerSource::Hook => "hook",
            TriggerSource::OnWorkflow => "on_workflow",
            TriggerSource::Dependency => "dependency",
        }
    }
}

impl std::fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options accompanying a trigger request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerOptions {
    #[serde(default)]
    pub source: TriggerSource,
    #[serde(default)]
    pub trigger_data: Value,
    /// Project directory the run operates in. Defaults to the host's cwd.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_path: Option<PathBuf>,
}

impl TriggerOptions {
    pub fn manual(trigger_data: Value) -> Self {
        Self {
            source: TriggerSource::Manual,
            trigger_data,
            project_path: None,
        }
    }
}

/// An external lifecycle event delivered to hook triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookEvent {
    #[serde(rename = "type", alias = "hook_type")]
    pub hook_type: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

// ---------------------------------------------------------------------------
// Run tracking
// ---------------------------------------------------------------------------

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Queued,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Failed | RunStatus::Cancelled)
    }
}

/// Status of one step inside a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Retrying,
    Success,
    Failed,
    Skipped,
}

/// Last known state of a step within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSnapshot {
    pub step_type: String,
    pub status: StepStatus,
    /// 1-based attempt counter.
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// One execution of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    /// UUIDv7 run id.
    pub id: Uuid,
    pub workflow_id: String,
    /// Denormalized for display and `on_workflow` chaining.
    pub workflow_name: String,
    pub status: RunStatus,
    pub trigger: TriggerSource,
    #[serde(default)]
    pub trigger_data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub steps: BTreeMap<String, StepSnapshot>,
}

impl WorkflowRun {
    pub fn apply(&mut self, patch: RunPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if patch.finished_at.is_some() {
            self.finished_at = patch.finished_at;
        }
        if patch.duration_ms.is_some() {
            self.duration_ms = patch.duration_ms;
        }
        if patch.error.is_some() {
            self.error = patch.error;
        }
        if let Some(steps) = patch.steps {
            self.steps = steps;
        }
    }
}

/// Partial update applied to a stored run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<BTreeMap<String, StepSnapshot>>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const GRAPH_YAML: &str = r#"
id: release
name: Release
concurrency: queue
trigger:
  type: cron
  value: "0 8 * * 1"
depends_on:
  - workflow: build
    max_age: 5m
graph:
  nodes:
    - id: start
      type: trigger
    - id: test
      type: shell
      retry: 1
      retry_delay_ms: 10
      config:
        command: cargo test
    - id: recover
      type: shell
      config:
        command: echo recovered
    - id: ping
      type: notify
      config:
        title: Done
  links:
    - { origin_node: start, target_node: test }
    - { origin_node: test, origin_slot: 1, target_node: recover }
    - { origin_node: test, origin_slot: 0, target_node: ping }
"#;

    #[test]
    fn graph_definition_parses_typed_nodes() {
        let def: WorkflowDefinition = serde_yaml_ng::from_str(GRAPH_YAML).unwrap();
        assert!(def.enabled);
        assert_eq!(def.concurrency, ConcurrencyPolicy::Queue);
        assert_eq!(def.trigger.kind, TriggerKind::Cron);
        assert_eq!(def.dependency_ids(), vec!["build".to_string()]);

        let graph = def.graph.as_ref().unwrap();
        assert_eq!(graph.trigger_node().unwrap().id, "start");
        let test = graph.node("test").unwrap();
        assert_eq!(test.retry, 1);
        match &test.kind {
            StepKind::Shell(cfg) => assert_eq!(cfg.command, "cargo test"),
            other => panic!("expected shell, got {other:?}"),
        }
        let ok: Vec<_> = graph.successors("test", SLOT_SUCCESS).collect();
        let err: Vec<_> = graph.successors("test", SLOT_ERROR).collect();
        assert_eq!(ok, vec!["ping"]);
        assert_eq!(err, vec!["recover"]);
        assert!(!graph.has_edge_from("ping", SLOT_ERROR));
    }

    #[test]
    fn notify_defaults_apply() {
        let def: WorkflowDefinition = serde_yaml_ng::from_str(GRAPH_YAML).unwrap();
        let ping = def.graph.unwrap().node("ping").cloned().unwrap();
        match ping.kind {
            StepKind::Notify(cfg) => {
                assert!(cfg.desktop);
                assert_eq!(cfg.level, NotifyLevel::Info);
                assert!(cfg.webhooks.is_empty());
            }
            other => panic!("expected notify, got {other:?}"),
        }
    }

    #[test]
    fn unknown_step_type_is_rejected() {
        let err = serde_json::from_value::<StepDefinition>(json!({
            "id": "x",
            "type": "teleport",
        }))
        .unwrap_err();
        assert!(err.to_string().contains("unknown step type 'teleport'"));
    }

    #[test]
    fn dotted_step_type_becomes_extension() {
        let step: StepDefinition = serde_json::from_value(json!({
            "id": "deploy",
            "type": "vercel.deploy",
            "config": { "project": "web" }
        }))
        .unwrap();
        assert_eq!(step.step_type(), "vercel.deploy");
        match &step.kind {
            StepKind::Extension { config, .. } => assert_eq!(config["project"], "web"),
            other => panic!("expected extension, got {other:?}"),
        }
    }

    #[test]
    fn invalid_config_names_the_step() {
        let err = serde_json::from_value::<StepDefinition>(json!({
            "id": "bad",
            "type": "shell",
            "config": { "cwd": "/tmp" }
        }))
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("step 'bad'"), "{msg}");
        assert!(msg.contains("command"), "{msg}");
    }

    #[test]
    fn step_serializes_back_to_wire_shape() {
        let step = StepDefinition {
            retry: 2,
            ..StepDefinition::new(
                "sync",
                StepKind::Git(GitStepConfig {
                    actions: vec![
                        GitAction::Pull { remote: None, branch: None },
                        GitAction::Commit { message: "wip".into(), paths: vec![] },
                    ],
                    cwd: None,
                }),
            )
        };
        let value = serde_json::to_value(&step).unwrap();
        assert_eq!(value["type"], "git");
        assert_eq!(value["retry"], 2);
        assert_eq!(value["config"]["actions"][0]["action"], "pull");
        assert_eq!(value["config"]["actions"][1]["message"], "wip");
        let back: StepDefinition = serde_json::from_value(value).unwrap();
        assert_eq!(back, step);
    }

    #[test]
    fn loop_config_nests_steps() {
        let step: StepDefinition = serde_json::from_value(json!({
            "id": "each",
            "type": "loop",
            "config": {
                "items": "$list.files",
                "steps": [
                    { "id": "echo", "type": "shell", "config": { "command": "echo $item" } }
                ]
            }
        }))
        .unwrap();
        match step.kind {
            StepKind::Loop(cfg) => {
                assert_eq!(cfg.mode, LoopMode::Sequential);
                assert_eq!(cfg.steps.len(), 1);
                assert_eq!(cfg.steps[0].step_type(), "shell");
            }
            other => panic!("expected loop, got {other:?}"),
        }
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("30"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("2h"), Some(Duration::from_secs(7_200)));
        assert_eq!(parse_duration("1d"), Some(Duration::from_secs(86_400)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration("5w"), None);
    }

    #[test]
    fn dependency_max_age_errors_are_descriptive() {
        let dep = WorkflowDependency {
            workflow: "build".into(),
            max_age: Some("ages".into()),
        };
        assert!(dep.max_age().unwrap_err().contains("build"));
        let none = WorkflowDependency { workflow: "build".into(), max_age: None };
        assert_eq!(none.max_age().unwrap(), None);
    }

    #[test]
    fn hook_event_accepts_type_and_payload() {
        let event: HookEvent = serde_json::from_value(json!({
            "type": "post_tool_use",
            "tool": "Edit",
            "file": "src/main.rs"
        }))
        .unwrap();
        assert_eq!(event.hook_type, "post_tool_use");
        assert_eq!(event.payload["tool"], "Edit");
    }

    #[test]
    fn run_patch_only_touches_set_fields() {
        let mut run = WorkflowRun {
            id: Uuid::now_v7(),
            workflow_id: "w".into(),
            workflow_name: "W".into(),
            status: RunStatus::Running,
            trigger: TriggerSource::Manual,
            trigger_data: Value::Null,
            project_path: None,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: None,
            error: None,
            steps: BTreeMap::new(),
        };
        run.apply(RunPatch {
            status: Some(RunStatus::Cancelled),
            duration_ms: Some(42),
            ..Default::default()
        });
        assert_eq!(run.status, RunStatus::Cancelled);
        assert_eq!(run.duration_ms, Some(42));
        assert!(run.finished_at.is_none());
        assert!(run.status.is_terminal());
    }

    #[test]
    fn trigger_options_default_to_manual() {
        let opts: TriggerOptions = serde_json::from_value(json!({})).unwrap();
        assert_eq!(opts.source, TriggerSource::Manual);
        assert!(opts.trigger_data.is_null());
        assert_eq!(TriggerSource::OnWorkflow.to_string(), "on_workflow");
    }
}
