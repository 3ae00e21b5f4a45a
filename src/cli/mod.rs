//! Command-line interface for flowforge.
//!
//! Provides commands for running pipelines and inspecting configuration and
//! registered stage types.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
