//! Observability setup for flowrun.
//!
//! - `tracing_setup` -- global subscriber with optional OpenTelemetry export

pub mod tracing_setup;
