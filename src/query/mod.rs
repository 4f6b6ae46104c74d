//! Query algebra
//!
//! Value objects describing a read: condition trees, projections, sorts,
//! aggregations, filters and pages. Every backing store consumes the same
//! algebra. Each object can also be evaluated in memory against records that
//! were already fetched.
//!
//! # Invariants
//!
//! - A condition tree is validated against the schema before it reaches a
//!   backend, and validation never silently passes a bad leaf
//! - Operator rewriting either produces an equivalent tree or fails with
//!   `Unsupported`
//! - Projections are ordered and free of duplicates

mod aggregation;
mod condition_tree;
mod equivalence;
mod errors;
mod filter;
mod operators;
mod path;
mod projection;
mod record;
mod sort;
mod validator;
mod value_type;

pub use aggregation::{
    AggregateResult, Aggregation, AggregationGroup, AggregationOperation, DateOperation,
};
pub use condition_tree::{
    Aggregator, ConditionTree, ConditionTreeBranch, ConditionTreeLeaf, MATCHABLE_OPERATORS,
};
pub use equivalence::{like_to_regex, ConditionTreeEquivalent};
pub use errors::{ErrorCategory, QueryError, QueryResult, ValidationKind};
pub use filter::{Filter, Page};
pub use operators::{format_operators, Operator, ValueArity, ValueConstraint};
pub use path::{resolve_column, resolve_field};
pub use projection::{Projection, ALL_FIELDS};
pub use record::{compare_values, get_field_value, values_equal, RecordData};
pub use sort::{Sort, SortClause};
pub use validator::ConditionTreeValidator;
pub use value_type::ValueType;
