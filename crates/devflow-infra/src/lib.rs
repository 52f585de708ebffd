//! Infrastructure layer for devflow.
//!
//! Implements the ports defined in `devflow-core`: the YAML-file workflow
//! repository, a `reqwest` HTTP client, the `git` CLI helper, and the
//! `config.toml` loader.

pub mod config;
pub mod git;
pub mod http;
pub mod workflow_store;
