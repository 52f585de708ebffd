//! CLI workflow commands: run, list and validate.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;

use devflow_core::repository::workflow::WorkflowRepository;
use devflow_core::workflow::cron::CronSchedule;
use devflow_core::workflow::definition::load_workflow_file;
use devflow_core::workflow::orchestrator::{RunResult, TriggerOutcome};
use devflow_types::event::EngineEvent;
use devflow_types::workflow::{
    RunStatus, StepStatus, TriggerKind, TriggerOptions, TriggerSource, WorkflowDefinition,
};

use crate::state::AppState;

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Trigger `workflow_id` and stream its step events until it finishes.
///
/// Returns whether the run succeeded. Ctrl+C cancels the run and keeps
/// waiting for it to finalize.
pub async fn run_workflow(
    state: &AppState,
    workflow_id: &str,
    payload: Option<&str>,
    project: Option<PathBuf>,
    json: bool,
) -> Result<bool> {
    let trigger_data = match payload {
        Some(raw) => serde_json::from_str::<Value>(raw).context("Invalid JSON payload")?,
        None => json!({}),
    };
    let project_path = match project {
        Some(dir) => Some(
            dir.canonicalize()
                .with_context(|| format!("Project directory {} not found", dir.display()))?,
        ),
        None => None,
    };

    // Subscribe before triggering so the first step events are not missed.
    let mut events = state.orchestrator.events().subscribe();
    let options = TriggerOptions {
        source: TriggerSource::Manual,
        trigger_data,
        project_path,
    };
    let outcome = state
        .orchestrator
        .trigger(workflow_id, options)
        .await
        .with_context(|| format!("Failed to trigger workflow '{workflow_id}'"))?;

    let handle = match outcome {
        TriggerOutcome::Started(handle) => handle,
        TriggerOutcome::Skipped => {
            if json {
                println!("{}", json!({ "workflow_id": workflow_id, "status": "skipped" }));
            } else {
                println!();
                println!(
                    "  {} '{}' is already running, trigger skipped",
                    style("-").yellow().bold(),
                    style(workflow_id).cyan()
                );
                println!();
            }
            return Ok(true);
        }
    };

    let run_id = handle.run_id;
    if !json {
        println!();
        println!(
            "  {} Running '{}' {}",
            style("*").green().bold(),
            style(workflow_id).cyan(),
            style(format!("({run_id})")).dim()
        );
        println!();
    }

    let wait = handle.wait();
    tokio::pin!(wait);
    let mut cancel_requested = false;
    let mut events_open = true;

    let result = loop {
        tokio::select! {
            result = &mut wait => break result,
            event = events.recv(), if events_open => match event {
                Ok(event) if event.run_id() == Some(run_id) => print_event(&event, json),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event stream lagged, some step updates were not shown");
                }
                Err(RecvError::Closed) => events_open = false,
            },
            _ = tokio::signal::ctrl_c(), if !cancel_requested => {
                cancel_requested = true;
                if !json {
                    println!("  {} Cancelling...", style("!").yellow().bold());
                }
                if let Err(e) = state.orchestrator.cancel(run_id) {
                    tracing::debug!(error = %e, "run already finished");
                }
            }
        }
    };

    // Events published just before completion may still be buffered.
    while let Ok(event) = events.try_recv() {
        if event.run_id() == Some(run_id) {
            print_event(&event, json);
        }
    }

    let Some(result) = result else {
        bail!("Run {run_id} ended without a result");
    };
    print_result(&result, json)?;
    Ok(result.success)
}

fn print_event(event: &EngineEvent, json: bool) {
    if json {
        if let Ok(line) = serde_json::to_string(event) {
            println!("{line}");
        }
        return;
    }

    match event {
        EngineEvent::StepUpdate {
            step_id,
            step_type,
            status,
            attempt,
            error,
            ..
        } => {
            let label = format!("{step_id} {}", style(format!("({step_type})")).dim());
            match status {
                StepStatus::Running => println!("  {} {label}", style("...").dim()),
                StepStatus::Success => println!("  {} {label}", style("ok").green().bold()),
                StepStatus::Skipped => println!("  {} {label}", style("skip").dim()),
                StepStatus::Pending => {}
                StepStatus::Retrying => println!(
                    "  {} {label} attempt {} failed: {}",
                    style("retry").yellow().bold(),
                    attempt.unwrap_or(1),
                    error.as_deref().unwrap_or("unknown error")
                ),
                StepStatus::Failed => println!(
                    "  {} {label} {}",
                    style("fail").red().bold(),
                    style(error.as_deref().unwrap_or("unknown error")).red()
                ),
            }
        }
        EngineEvent::AgentMessage { step_id, message, .. } => {
            let text = message
                .get("text")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| message.to_string());
            println!("  {} {}", style(format!("[{step_id}]")).dim(), text);
        }
        _ => {}
    }
}

fn print_result(result: &RunResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(result)?);
        return Ok(());
    }

    println!();
    if result.success {
        println!(
            "  {} '{}' finished in {}",
            style("*").green().bold(),
            style(&result.workflow_name).cyan(),
            format_duration(result.duration_ms)
        );
    } else {
        println!(
            "  {} '{}' {} after {}: {}",
            style("x").red().bold(),
            style(&result.workflow_name).cyan(),
            status_label(result.status),
            format_duration(result.duration_ms),
            style(result.error.as_deref().unwrap_or("no error message")).red()
        );
    }
    println!();
    Ok(())
}

fn status_label(status: RunStatus) -> String {
    serde_json::to_value(status)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{status:?}"))
}

fn format_duration(ms: u64) -> String {
    if ms < 1_000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1_000.0)
    } else {
        format!("{}m{}s", ms / 60_000, (ms % 60_000) / 1_000)
    }
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

pub async fn list_workflows(state: &AppState, json: bool) -> Result<()> {
    let defs = state
        .store()
        .load_workflows()
        .await
        .context("Failed to load workflows")?;

    if json {
        let out: Vec<Value> = defs
            .iter()
            .map(|d| {
                json!({
                    "id": d.id,
                    "name": d.name,
                    "enabled": d.enabled,
                    "trigger": d.trigger.kind,
                    "trigger_value": d.trigger.value,
                    "concurrency": d.concurrency,
                    "steps": step_count(d),
                    "depends_on": d.dependency_ids(),
                    "path": state.store().path_for(&d.id),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if defs.is_empty() {
        println!();
        println!("  No workflows found in {}.", state.store().dir().display());
        println!(
            "  Check one with: {}",
            style("devflow validate <file.yaml>").dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID").fg(Color::Cyan),
            Cell::new("Name"),
            Cell::new("Trigger"),
            Cell::new("Concurrency"),
            Cell::new("Steps"),
            Cell::new("Depends on"),
            Cell::new("Enabled"),
        ]);

    for d in &defs {
        let enabled = if d.enabled {
            Cell::new("yes").fg(Color::Green)
        } else {
            Cell::new("no").fg(Color::DarkGrey)
        };
        table.add_row(vec![
            Cell::new(&d.id),
            Cell::new(&d.name),
            Cell::new(trigger_label(d)),
            Cell::new(format!("{:?}", d.concurrency).to_lowercase()),
            Cell::new(step_count(d)),
            Cell::new(d.dependency_ids().join(", ")),
            enabled,
        ]);
    }

    println!();
    println!("{table}");
    println!();

    Ok(())
}

fn step_count(def: &WorkflowDefinition) -> usize {
    match &def.graph {
        Some(graph) => graph.nodes.len(),
        None => def.steps.len(),
    }
}

fn trigger_label(def: &WorkflowDefinition) -> String {
    let trigger = &def.trigger;
    match trigger.kind {
        TriggerKind::Manual => "manual".to_string(),
        TriggerKind::Cron => format!("cron {}", trigger.value.as_deref().unwrap_or("?")),
        TriggerKind::Hook => format!("hook {}", trigger.hook_type.as_deref().unwrap_or("*")),
        TriggerKind::OnWorkflow => {
            format!("after {}", trigger.value.as_deref().unwrap_or("?"))
        }
    }
}

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

/// Problems that load-time validation lets through but that would keep the
/// workflow from ever triggering.
pub fn lint_definition(def: &WorkflowDefinition) -> Vec<String> {
    let mut warnings = Vec::new();

    if def.trigger.kind == TriggerKind::Cron {
        if let Some(expr) = &def.trigger.value {
            if let Err(e) = CronSchedule::parse(expr) {
                warnings.push(format!("cron trigger will never fire: {e}"));
            }
        }
    }
    if def.trigger.kind == TriggerKind::OnWorkflow && def.trigger.value.as_deref() == Some(def.name.as_str()) {
        warnings.push("on_workflow trigger names the workflow itself".to_string());
    }
    if !def.enabled {
        warnings.push("workflow is disabled".to_string());
    }
    warnings
}

/// Parse and validate a workflow file. Fails when the file does not load
/// or has lint warnings.
pub fn validate_workflow(file: &Path, json: bool) -> Result<()> {
    let def = load_workflow_file(file)
        .with_context(|| format!("{} is not a valid workflow", file.display()))?;
    let warnings = lint_definition(&def);

    if json {
        let out = json!({
            "file": file,
            "id": def.id,
            "valid": warnings.is_empty(),
            "warnings": warnings,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if warnings.is_empty() {
        println!();
        println!(
            "  {} {} is valid ({}, {} steps)",
            style("*").green().bold(),
            file.display(),
            style(&def.id).cyan(),
            step_count(&def)
        );
        println!();
    } else {
        println!();
        for warning in &warnings {
            println!("  {} {warning}", style("!").yellow().bold());
        }
        println!();
    }

    if !warnings.is_empty() {
        bail!("{} has {} problem(s)", file.display(), warnings.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use devflow_core::workflow::definition::parse_workflow_yaml;
    use tempfile::TempDir;

    #[test]
    fn lint_flags_bad_cron_and_self_chaining() {
        let def = parse_workflow_yaml(
            r#"
id: nightly
name: Nightly
enabled: false
trigger: { type: cron, value: "61 25 * * *" }
steps:
  - { id: s, type: shell, config: { command: "true" } }
"#,
        )
        .unwrap();
        let warnings = lint_definition(&def);
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].starts_with("cron trigger will never fire"));
        assert_eq!(warnings[1], "workflow is disabled");

        let looped = parse_workflow_yaml(
            "id: loop\nname: Loop\ntrigger: { type: on_workflow, value: Loop }\nsteps:\n  - { id: s, type: shell, config: { command: 'true' } }\n",
        )
        .unwrap();
        assert_eq!(lint_definition(&looped), vec!["on_workflow trigger names the workflow itself"]);
    }

    #[test]
    fn validate_accepts_good_file_and_rejects_broken_one() {
        let tmp = TempDir::new().unwrap();
        let good = tmp.path().join("good.yaml");
        std::fs::write(
            &good,
            "id: good\nname: Good\ntrigger: { type: cron, value: '0 8 * * 1' }\nsteps:\n  - { id: s, type: shell, config: { command: 'true' } }\n",
        )
        .unwrap();
        validate_workflow(&good, true).unwrap();

        let broken = tmp.path().join("broken.yaml");
        std::fs::write(&broken, "id: broken\nname: Broken\nsteps:\n  - { id: a, type: shell, config: { command: x } }\n  - { id: a, type: shell, config: { command: y } }\n").unwrap();
        let err = validate_workflow(&broken, true).unwrap_err();
        assert!(format!("{err:#}").contains("broken.yaml"));
    }

    #[test]
    fn durations_are_human_readable() {
        assert_eq!(format_duration(250), "250ms");
        assert_eq!(format_duration(1_500), "1.5s");
        assert_eq!(format_duration(125_000), "2m5s");
    }

    #[tokio::test]
    async fn run_reports_success_and_failure() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("workflows");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("ok.yaml"),
            "id: ok\nname: Ok\nsteps:\n  - { id: s, type: shell, config: { command: 'echo fine' } }\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("bad.yaml"),
            "id: bad\nname: Bad\nsteps:\n  - { id: s, type: shell, config: { command: 'exit 3' } }\n",
        )
        .unwrap();
        let state = AppState::from_config(
            tmp.path().to_path_buf(),
            devflow_types::config::EngineConfig::default(),
            Some(tmp.path()),
        )
        .unwrap();

        assert!(run_workflow(&state, "ok", Some(r#"{"n":1}"#), None, true).await.unwrap());
        assert!(!run_workflow(&state, "bad", None, None, true).await.unwrap());
        assert!(run_workflow(&state, "ok", Some("{not json"), None, true).await.is_err());
        assert!(run_workflow(&state, "missing", None, None, true).await.is_err());
    }
}
