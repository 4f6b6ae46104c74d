//! Schema error types
//!
//! Error codes:
//! - DQ_SCHEMA_IO
//! - DQ_SCHEMA_PARSE
//! - DQ_SCHEMA_DUPLICATE_MODEL
//! - DQ_SCHEMA_INVALID_MODEL

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or registering model descriptors
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid model JSON in '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Model '{0}' is defined more than once")]
    DuplicateModel(String),

    #[error("Invalid model '{model}': {reason}")]
    InvalidModel { model: String, reason: String },
}

impl SchemaError {
    pub fn invalid_model(model: impl Into<String>, reason: impl Into<String>) -> Self {
        SchemaError::InvalidModel {
            model: model.into(),
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            SchemaError::Io { .. } => "DQ_SCHEMA_IO",
            SchemaError::Parse { .. } => "DQ_SCHEMA_PARSE",
            SchemaError::DuplicateModel(_) => "DQ_SCHEMA_DUPLICATE_MODEL",
            SchemaError::InvalidModel { .. } => "DQ_SCHEMA_INVALID_MODEL",
        }
    }
}

pub type SchemaResult<T> = Result<T, SchemaError>;
