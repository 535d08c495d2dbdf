//! # Cadence Config
//!
//! Layered configuration for the Cadence worker: TOML files, `.env`, and
//! `CADENCE_`-prefixed environment variables, reloadable at runtime.

mod app_config;
mod loader;

pub use app_config::*;
pub use loader::*;
