//! # Cadence Core
//!
//! Shared building blocks for the Cadence workspace: the cross-cutting
//! error type, tracing bootstrap, and the `shaku` interface re-export used
//! for dependency injection.

pub mod error;
pub mod telemetry;

pub use error::*;
pub use telemetry::{init_telemetry, LogFormat, TelemetryConfig};

// Re-export shaku for dependency injection
pub use shaku::Interface;
