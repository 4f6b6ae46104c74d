//! docquery - A query algebra and a pipeline compiler for embedded-document stores
//!
//! The algebra (condition trees, projections, sorts, aggregations) is shared by
//! every backing store. The pipeline compiler lowers it into the stage list of a
//! document store whose embedded objects and arrays are exposed as flat collections.

pub mod cli;
pub mod config;
pub mod observability;
pub mod pipeline;
pub mod query;
pub mod schema;
