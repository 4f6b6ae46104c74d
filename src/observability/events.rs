//! Observable events
//!
//! Events are explicit and typed. Each one carries the severity it is
//! logged at.

use std::fmt;

use super::logger::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Configuration
    /// Compiler configuration loaded
    ConfigLoaded,
    /// Model descriptors loaded from disk
    SchemasLoaded,

    // Algebra
    /// A condition tree passed validation
    QueryValidated,
    /// A condition tree failed validation
    QueryRejected,
    /// A leaf was rewritten into an equivalent tree
    RewriteApplied,
    /// No equivalent tree exists for a leaf
    RewriteUnavailable,

    // Pipeline lowering
    /// A stage list was produced
    PipelineLowered,
    /// Lowering failed
    PipelineRejected,

    // CLI
    CommandStart,
    CommandComplete,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::SchemasLoaded => "SCHEMAS_LOADED",
            Event::QueryValidated => "QUERY_VALIDATED",
            Event::QueryRejected => "QUERY_REJECTED",
            Event::RewriteApplied => "REWRITE_APPLIED",
            Event::RewriteUnavailable => "REWRITE_UNAVAILABLE",
            Event::PipelineLowered => "PIPELINE_LOWERED",
            Event::PipelineRejected => "PIPELINE_REJECTED",
            Event::CommandStart => "COMMAND_START",
            Event::CommandComplete => "COMMAND_COMPLETE",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Event::QueryValidated | Event::RewriteApplied => Severity::Trace,
            Event::QueryRejected | Event::RewriteUnavailable | Event::PipelineRejected => {
                Severity::Warn
            }
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
