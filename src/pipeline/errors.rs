//! Pipeline lowering errors
//!
//! Error codes:
//! - DQ_UNKNOWN_RELATION, DQ_UNKNOWN_MODEL, DQ_UNKNOWN_COLLECTION (schema)
//! - DQ_INVALID_STACK (structural)
//! - DQ_UNSUPPORTED (capability boundary)
//! - algebra errors keep their own codes

use thiserror::Error;

use crate::query::{ErrorCategory, QueryError};

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("Unknown relation '{relation}' on collection '{collection}'")]
    UnknownRelation { collection: String, relation: String },

    #[error("Unknown model '{0}'")]
    UnknownModel(String),

    #[error("Unknown collection '{0}'")]
    UnknownCollection(String),

    /// The path stack does not match the model it was built from
    #[error("Invalid path stack: {0}")]
    InvalidStack(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Query(#[from] QueryError),
}

impl PipelineError {
    pub fn unknown_relation(collection: impl Into<String>, relation: impl Into<String>) -> Self {
        PipelineError::UnknownRelation {
            collection: collection.into(),
            relation: relation.into(),
        }
    }

    pub fn unsupported(reason: impl Into<String>) -> Self {
        PipelineError::Unsupported(reason.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::UnknownRelation { .. } => "DQ_UNKNOWN_RELATION",
            PipelineError::UnknownModel(_) => "DQ_UNKNOWN_MODEL",
            PipelineError::UnknownCollection(_) => "DQ_UNKNOWN_COLLECTION",
            PipelineError::InvalidStack(_) => "DQ_INVALID_STACK",
            PipelineError::Unsupported(_) => "DQ_UNSUPPORTED",
            PipelineError::Query(err) => err.code(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            PipelineError::UnknownRelation { .. }
            | PipelineError::UnknownModel(_)
            | PipelineError::UnknownCollection(_) => ErrorCategory::Schema,
            PipelineError::InvalidStack(_) => ErrorCategory::Structural,
            PipelineError::Unsupported(_) => ErrorCategory::Unsupported,
            PipelineError::Query(err) => err.category(),
        }
    }
}
