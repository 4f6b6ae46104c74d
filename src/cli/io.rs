//! JSON I/O handling for CLI
//!
//! - Input: a query file holding one JSON object
//! - Output: one JSON object per command on stdout

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::query::{Aggregation, Filter, Projection};

use super::errors::{CliError, CliResult};

/// Query file contents
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryFile {
    #[serde(default)]
    pub filter: Filter,
    #[serde(default)]
    pub projection: Option<Projection>,
    #[serde(default)]
    pub aggregation: Option<Aggregation>,
    #[serde(default)]
    pub limit: Option<usize>,
}

pub fn read_query(path: &Path) -> CliResult<QueryFile> {
    let content = fs::read_to_string(path).map_err(|e| {
        CliError::io_error(format!("Failed to read query '{}': {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        CliError::query_error(format!("Invalid query JSON in '{}': {}", path.display(), e))
    })
}

/// Write a success response to stdout
pub fn write_response(data: Value) -> CliResult<()> {
    let response = serde_json::json!({
        "status": "ok",
        "data": data
    });

    let mut stdout = io::stdout();
    serde_json::to_writer(&mut stdout, &response)?;
    writeln!(stdout)?;
    stdout.flush()?;

    Ok(())
}
