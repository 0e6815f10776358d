//! Runtime glue: configuration, telemetry, the per-worker lifecycle and the
//! signal-aware runner.

pub mod config;
pub mod lifecycle;
pub mod runner;
pub mod telemetry;
