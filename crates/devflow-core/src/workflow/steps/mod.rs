//! Executors for the built-in step types, one module per type.

pub(crate) mod agent;
pub(crate) mod control;
pub(crate) mod db;
pub(crate) mod extension;
pub(crate) mod file;
pub(crate) mod git;
pub(crate) mod http;
pub(crate) mod notify;
pub(crate) mod shell;
pub(crate) mod wait;

use std::path::{Path, PathBuf};

use super::context::VariableScope;

pub use shell::split_command_line;

/// Working directory for a step: `cwd` resolved against the project dir.
pub(crate) fn working_dir(cwd: Option<&str>, scope: &VariableScope, project_dir: &Path) -> PathBuf {
    match cwd {
        Some(raw) => {
            let resolved = PathBuf::from(scope.resolve_str(raw));
            if resolved.is_absolute() {
                resolved
            } else {
                project_dir.join(resolved)
            }
        }
        None => project_dir.to_path_buf(),
    }
}
