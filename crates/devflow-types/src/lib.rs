//! Shared domain types for devflow.
//!
//! This crate contains the data model used across the devflow workspace:
//! workflow definitions, runs, engine events, configuration and the
//! repository error type.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod workflow;
