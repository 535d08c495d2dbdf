//! # Cadence Server Library
//!
//! Built-in jobs and startup helpers for the `cadence-worker` binary.

pub mod startup;
pub mod system;
