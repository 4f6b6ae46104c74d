//! Pipeline lowering
//!
//! Compiles the query algebra into the stage list of a document store.
//! Embedded objects and arrays listed as `as_models` are exposed as flat
//! collections (`Book_reviews`), and the stages first promote them to the
//! document root before filtering, sorting and projecting.
//!
//! # Invariants
//!
//! - The stage list only reads paths the derived collection schema exposes
//! - Reparenting an array yields one record per element, with a stable
//!   synthetic `_id`
//! - A sort through a relation runs after every lookup it depends on
//! - Stage output is deterministic for a given input and clock

mod compiler;
mod context;
mod errors;
mod fields;
mod filter;
mod group;
mod lookup;
mod projection;
mod records;
mod reparent;
mod stack;
mod stage;
mod virtual_fields;

pub use compiler::DocumentQueryCompiler;
pub use context::{LoweringContext, ResolvedField, MANY_TO_ONE_SUFFIX, PARENT_RELATION};
pub use errors::{PipelineError, PipelineResult};
pub use fields::{build_datasource, collection_schema, column_schema, column_type_of};
pub use filter::{lower_tree, native_operators, NATIVE_OPERATORS};
pub use group::{sort_and_paginate, SortAndPaginate};
pub use lookup::LookupScope;
pub use records::normalize_records;
pub use reparent::flatten_fields;
pub use stack::{Cursor, CursorOrigin, Frame, PathStack};
pub use stage::{
    Accumulator, Expr, MatchExpr, Predicate, ProjectionValue, Stage, ARRAY_INDEX_FIELD,
    MISSING_RECORD_TAG,
};
