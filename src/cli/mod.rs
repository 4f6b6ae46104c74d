//! CLI module for docquery
//!
//! Provides command-line interface for:
//! - validate: Load model descriptors, optionally check a query file
//! - compile: Lower a query file into a stage list

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{compile, run, run_command, validate};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{read_query, write_response, QueryFile};
