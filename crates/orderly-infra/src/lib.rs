//! Orderly Infrastructure Library
//!
//! Cross-cutting setup used by the binaries: currently the tracing subscriber.

#[cfg(feature = "observability-basic")]
pub mod telemetry;

#[cfg(feature = "observability-basic")]
pub use telemetry::init_telemetry;
