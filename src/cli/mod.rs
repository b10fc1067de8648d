//! Command-line interface for swe-verify.
//!
//! Provides commands for running trials, scoring existing test reports,
//! inspecting task bundles, and forwarding feedback.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli, Commands};
