//! Command-line interface for milestone-flow.
//!
//! Provides the `serve` worker command and operator commands for schema
//! setup and manual stage intervention.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
