//! Workflow definition parsing, validation, and filesystem operations.
//!
//! Converts between YAML files and `WorkflowDefinition`, validates
//! structural constraints (unique ids, link endpoints, a single trigger
//! node), and discovers workflow files on disk.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use devflow_types::workflow::{
    StepDefinition, StepKind, TriggerKind, WorkflowDefinition, SLOT_ERROR,
};
use thiserror::Error;

use super::context::RESERVED_NAMES;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while loading or validating workflow definitions.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// YAML/JSON parse failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// `depends_on` graph contains a cycle.
    #[error("cycle detected: {0}")]
    CycleDetected(String),

    /// A link references a node that does not exist.
    #[error("unknown node: {0}")]
    UnknownNode(String),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated `WorkflowDefinition`.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDefinition, WorkflowError> {
    let def: WorkflowDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

/// Serialize a `WorkflowDefinition` to a YAML string.
pub fn serialize_workflow_yaml(def: &WorkflowDefinition) -> Result<String, WorkflowError> {
    serde_yaml_ng::to_string(def).map_err(|e| WorkflowError::ParseError(e.to_string()))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `WorkflowDefinition`.
///
/// Checks:
/// - id is non-empty and contains only alphanumerics, `-` and `_`
/// - name is non-empty
/// - graph mode: unique node ids, exactly one trigger node, links between
///   existing nodes, slots limited to 0 and 1
/// - linear mode: at least one step, no trigger steps
/// - step ids unique per list (nested lists included) and not reserved
/// - cron and `on_workflow` triggers carry a value
/// - dependency `max_age` values parse, no self-dependency
/// - timeout > 0 if set
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), WorkflowError> {
    if def.id.is_empty() {
        return Err(WorkflowError::ValidationError(
            "workflow id must not be empty".to_string(),
        ));
    }
    if !def
        .id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(WorkflowError::ValidationError(format!(
            "workflow id '{}' contains invalid characters (only alphanumerics, '-' and '_' allowed)",
            def.id
        )));
    }
    if def.name.trim().is_empty() {
        return Err(WorkflowError::ValidationError(format!(
            "workflow '{}' must have a name",
            def.id
        )));
    }

    match &def.graph {
        Some(graph) => {
            validate_steps(&graph.nodes, true)?;
            let triggers = graph
                .nodes
                .iter()
                .filter(|n| matches!(n.kind, StepKind::Trigger))
                .count();
            if triggers != 1 {
                return Err(WorkflowError::ValidationError(format!(
                    "graph must have exactly one trigger node, found {triggers}"
                )));
            }
            for link in &graph.links {
                for end in [&link.origin_node, &link.target_node] {
                    if graph.node(end).is_none() {
                        return Err(WorkflowError::UnknownNode(format!(
                            "link {} -> {} references unknown node '{end}'",
                            link.origin_node, link.target_node
                        )));
                    }
                }
                if link.origin_slot > SLOT_ERROR {
                    return Err(WorkflowError::ValidationError(format!(
                        "link from '{}' uses unsupported output slot {}",
                        link.origin_node, link.origin_slot
                    )));
                }
            }
        }
        None => {
            if def.steps.is_empty() {
                return Err(WorkflowError::ValidationError(
                    "workflow must have at least one step or a graph".to_string(),
                ));
            }
            validate_steps(&def.steps, false)?;
        }
    }

    match def.trigger.kind {
        TriggerKind::Cron | TriggerKind::OnWorkflow
            if def.trigger.value.as_deref().is_none_or(|v| v.trim().is_empty()) =>
        {
            return Err(WorkflowError::ValidationError(format!(
                "{:?} trigger requires a value",
                def.trigger.kind
            )));
        }
        _ => {}
    }

    for dep in &def.depends_on {
        if dep.workflow == def.id {
            return Err(WorkflowError::CycleDetected(format!(
                "workflow '{}' depends on itself",
                def.id
            )));
        }
        dep.max_age().map_err(WorkflowError::ValidationError)?;
    }

    if def.timeout_secs == Some(0) {
        return Err(WorkflowError::ValidationError(
            "timeout must be > 0".to_string(),
        ));
    }

    Ok(())
}

fn validate_steps(steps: &[StepDefinition], allow_trigger: bool) -> Result<(), WorkflowError> {
    let mut seen_ids = HashSet::new();
    for step in steps {
        if step.id.is_empty() {
            return Err(WorkflowError::ValidationError(
                "step id must not be empty".to_string(),
            ));
        }
        if RESERVED_NAMES.contains(&step.id.as_str()) {
            return Err(WorkflowError::ValidationError(format!(
                "step id '{}' is reserved",
                step.id
            )));
        }
        if !seen_ids.insert(step.id.as_str()) {
            return Err(WorkflowError::ValidationError(format!(
                "duplicate step ID: '{}'",
                step.id
            )));
        }
        match &step.kind {
            StepKind::Trigger if !allow_trigger => {
                return Err(WorkflowError::ValidationError(format!(
                    "step '{}': trigger steps are only valid in graph mode",
                    step.id
                )));
            }
            StepKind::Loop(cfg) => validate_steps(&cfg.steps, false)?,
            StepKind::Parallel(cfg) => validate_steps(&cfg.steps, false)?,
            _ => {}
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Load a workflow definition from a YAML file.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition, WorkflowError> {
    let content = std::fs::read_to_string(path)?;
    parse_workflow_yaml(&content)
}

/// Save a workflow definition to a YAML file.
///
/// Creates parent directories if they don't exist.
pub fn save_workflow_file(path: &Path, def: &WorkflowDefinition) -> Result<(), WorkflowError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let yaml = serialize_workflow_yaml(def)?;
    std::fs::write(path, yaml)?;
    Ok(())
}

/// Discover all workflow YAML files under `base_dir`.
///
/// Scans for `.yaml` and `.yml` files recursively. Files that fail to parse
/// are logged and skipped.
pub fn discover_workflows(
    base_dir: &Path,
) -> Result<Vec<(PathBuf, WorkflowDefinition)>, WorkflowError> {
    let mut results = Vec::new();
    if !base_dir.exists() {
        return Ok(results);
    }
    discover_recursive(base_dir, &mut results)?;
    results.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(results)
}

fn discover_recursive(
    dir: &Path,
    results: &mut Vec<(PathBuf, WorkflowDefinition)>,
) -> Result<(), WorkflowError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            discover_recursive(&path, results)?;
        } else if path
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml")
        {
            match load_workflow_file(&path) {
                Ok(def) => results.push((path, def)),
                Err(error) => {
                    tracing::warn!(?path, %error, "skipping unparseable workflow file");
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
