//! Repository trait definitions (ports).
//!
//! `WorkflowRepository` is the storage interface the orchestrator persists
//! through. devflow-infra implements it over YAML files on disk; the
//! in-memory implementation here backs tests and embedded hosts.

pub mod memory;
pub mod workflow;
