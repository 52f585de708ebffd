//! `file` steps, confined to the run's project directory.

use std::path::{Component, Path, PathBuf};

use devflow_types::workflow::{FileAction, FileStepConfig};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;

use crate::workflow::context::VariableScope;
use crate::workflow::step_runner::{RunContext, StepError};

/// Resolve `raw` against `project_dir`, rejecting anything that lands
/// outside it, lexically or through a symlink. A relative project dir is
/// anchored at the current directory first.
pub(crate) async fn resolve_in_project(project_dir: &Path, raw: &str) -> Result<PathBuf, StepError> {
    let root = std::path::absolute(project_dir)
        .map(|abs| normalize(&abs))
        .map_err(|e| fs_err(project_dir, e))?;
    if !root.is_absolute() {
        return Err(StepError::ExecutionFailed(format!(
            "project directory {:?} cannot be resolved",
            project_dir
        )));
    }
    let candidate = normalize(&root.join(raw));
    if !candidate.starts_with(&root) {
        return Err(StepError::PathTraversal(raw.to_string()));
    }

    // Follow symlinks on the deepest existing ancestor.
    let canonical_root = tokio::fs::canonicalize(&root)
        .await
        .unwrap_or_else(|_| root.clone());
    let mut existing = candidate.as_path();
    while !tokio::fs::try_exists(existing).await.unwrap_or(false) {
        match existing.parent() {
            Some(parent) => existing = parent,
            None => break,
        }
    }
    if let Ok(real) = tokio::fs::canonicalize(existing).await {
        if !real.starts_with(&canonical_root) {
            return Err(StepError::PathTraversal(raw.to_string()));
        }
    }
    Ok(candidate)
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn fs_err(path: &Path, e: std::io::Error) -> StepError {
    StepError::ExecutionFailed(format!("{}: {e}", path.display()))
}

pub(crate) async fn run(
    cfg: &FileStepConfig,
    scope: &VariableScope,
    ctx: &RunContext,
) -> Result<Value, StepError> {
    let raw_path = scope.resolve_str(&cfg.path);
    let path = resolve_in_project(&ctx.project_dir, &raw_path).await?;
    let content = cfg.content.as_deref().map(|c| scope.resolve_str(c));

    match cfg.action {
        FileAction::Read => {
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| fs_err(&path, e))?;
            Ok(json!({ "path": raw_path, "content": content }))
        }
        FileAction::Write | FileAction::Append => {
            let content = content.unwrap_or_default();
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| fs_err(parent, e))?;
            }
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .append(cfg.action == FileAction::Append)
                .truncate(cfg.action == FileAction::Write)
                .open(&path)
                .await
                .map_err(|e| fs_err(&path, e))?;
            file.write_all(content.as_bytes())
                .await
                .map_err(|e| fs_err(&path, e))?;
            file.flush().await.map_err(|e| fs_err(&path, e))?;
            Ok(json!({ "path": raw_path, "bytes": content.len() }))
        }
        FileAction::Copy => {
            let raw_dest = cfg
                .destination
                .as_deref()
                .map(|d| scope.resolve_str(d))
                .ok_or_else(|| StepError::ExecutionFailed("copy requires a destination".into()))?;
            let dest = resolve_in_project(&ctx.project_dir, &raw_dest).await?;
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| fs_err(parent, e))?;
            }
            let bytes = tokio::fs::copy(&path, &dest)
                .await
                .map_err(|e| fs_err(&path, e))?;
            Ok(json!({ "path": raw_path, "destination": raw_dest, "bytes": bytes }))
        }
        FileAction::Delete => {
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| fs_err(&path, e))?;
            Ok(json!({ "path": raw_path, "deleted": true }))
        }
        FileAction::Exists => {
            let exists = tokio::fs::try_exists(&path).await.unwrap_or(false);
            Ok(json!({ "path": raw_path, "exists": exists }))
        }
    }
}
