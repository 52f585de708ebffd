//! Request handlers, one module per resource.

pub mod hook;
pub mod run;
pub mod workflow;
