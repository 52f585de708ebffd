//! Workflow engine: definitions, execution and triggering.
//!
//! - `definition` -- YAML parsing, validation, filesystem load/save
//! - `dependency` -- `depends_on` cycle detection
//! - `context` -- variable scope and `$path` template resolution
//! - `condition` -- boolean condition evaluation
//! - `step_runner` / `steps` -- per-type step executors
//! - `retry` -- condition gate, retries and timeouts around one step
//! - `executor` -- graph and linear traversal of one run
//! - `orchestrator` -- run lifecycle, concurrency policy, dependency cache
//! - `cron` / `scheduler` -- cron, hook and `on_workflow` triggers
//! - `approval` -- pending `wait` steps
//! - `providers` -- traits for agent, database, git, HTTP and extension steps

pub mod approval;
pub mod condition;
pub mod context;
pub mod cron;
pub mod definition;
pub mod dependency;
pub mod executor;
pub mod orchestrator;
pub mod providers;
pub mod retry;
pub mod scheduler;
pub mod step_runner;
pub mod steps;
