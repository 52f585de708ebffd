//! Workflow engine core and collaborator traits for devflow.
//!
//! This crate defines the "ports" (repository and provider traits) that the
//! infrastructure layer implements. It depends only on `devflow-types` --
//! never on `devflow-infra` or any database/IO client crate.

pub mod event;
pub mod repository;
pub mod workflow;
