//! Tracing and OpenTelemetry setup for devflow binaries.

pub mod tracing_setup;
