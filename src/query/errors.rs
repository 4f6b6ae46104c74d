//! Query algebra errors
//!
//! Error codes:
//! - DQ_COLUMN_NOT_FOUND (schema)
//! - DQ_OPERATOR_NOT_SUPPORTED, DQ_OPERATOR_NOT_ALLOWED_FOR_TYPE,
//!   DQ_UNEXPECTED_VALUE, DQ_ENUM_VALUE_NOT_ALLOWED (validation)
//! - DQ_UNSUPPORTED (capability boundary)
//! - DQ_MALFORMED (structural)

use thiserror::Error;

/// Result type for algebra operations
pub type QueryResult<T> = Result<T, QueryError>;

/// Broad family an error belongs to.
///
/// Lets callers decide between "ask the user to change the query" and
/// "fail the request".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// A referenced field or relation does not exist
    Schema,
    /// Operator, type or value mismatch
    Validation,
    /// Deliberate capability boundary
    Unsupported,
    /// Malformed input or compiler structure
    Structural,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Schema => "SCHEMA",
            ErrorCategory::Validation => "VALIDATION",
            ErrorCategory::Unsupported => "UNSUPPORTED",
            ErrorCategory::Structural => "STRUCTURAL",
        }
    }
}

/// The specific contract a validation error violated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    /// Operator absent from the column's declared filter operators
    OperatorNotSupported,
    /// Operator illegal for the column's semantic type
    OperatorNotAllowedForType,
    /// Value shape or type does not fit the operator and column
    UnexpectedValue,
    /// Enum value outside the declared enum set
    EnumValueNotAllowed,
}

impl ValidationKind {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationKind::OperatorNotSupported => "DQ_OPERATOR_NOT_SUPPORTED",
            ValidationKind::OperatorNotAllowedForType => "DQ_OPERATOR_NOT_ALLOWED_FOR_TYPE",
            ValidationKind::UnexpectedValue => "DQ_UNEXPECTED_VALUE",
            ValidationKind::EnumValueNotAllowed => "DQ_ENUM_VALUE_NOT_ALLOWED",
        }
    }
}

/// Errors raised by the query algebra
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    /// A relation hop or the final column does not exist
    #[error("Column not found: '{collection}.{path}'")]
    ColumnNotFound { collection: String, path: String },

    /// Operator/type/value mismatch, message names what was expected
    #[error("{message}")]
    Validation { kind: ValidationKind, message: String },

    /// The request crosses a capability boundary
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Malformed branch, missing key, bad path
    #[error("{0}")]
    Malformed(String),
}

impl QueryError {
    pub fn column_not_found(collection: impl Into<String>, path: impl Into<String>) -> Self {
        QueryError::ColumnNotFound {
            collection: collection.into(),
            path: path.into(),
        }
    }

    pub fn validation(kind: ValidationKind, message: impl Into<String>) -> Self {
        QueryError::Validation {
            kind,
            message: message.into(),
        }
    }

    pub fn unsupported(reason: impl Into<String>) -> Self {
        QueryError::Unsupported(reason.into())
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        QueryError::Malformed(reason.into())
    }

    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::ColumnNotFound { .. } => "DQ_COLUMN_NOT_FOUND",
            QueryError::Validation { kind, .. } => kind.code(),
            QueryError::Unsupported(_) => "DQ_UNSUPPORTED",
            QueryError::Malformed(_) => "DQ_MALFORMED",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            QueryError::ColumnNotFound { .. } => ErrorCategory::Schema,
            QueryError::Validation { .. } => ErrorCategory::Validation,
            QueryError::Unsupported(_) => ErrorCategory::Unsupported,
            QueryError::Malformed(_) => ErrorCategory::Structural,
        }
    }

    /// The violated validation contract, if this is a validation error
    pub fn validation_kind(&self) -> Option<ValidationKind> {
        match self {
            QueryError::Validation { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
