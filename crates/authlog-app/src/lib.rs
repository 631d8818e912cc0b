//! Authlog - command-line entry point.
//!
//! Argument parsing and terminal output for the `authlog` binary:
//!
//! - `authlog start` runs the capturing proxy and the dashboard API
//! - `authlog logs` prints recent entries, optionally following new ones

pub mod cli;
pub mod printer;

pub use cli::{Cli, Command, LogsArgs, StartArgs};
pub use printer::format_entry;
