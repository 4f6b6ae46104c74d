//! Schemas
//!
//! Two views of the data:
//! - `CollectionSchema` / `Datasource`: the flat relational view the query
//!   algebra validates against
//! - `Model` / `ModelRegistry`: how documents are actually stored, read from
//!   JSON descriptors by `SchemaLoader`

mod errors;
mod loader;
mod model;
mod registry;
mod types;

pub use errors::{SchemaError, SchemaResult};
pub use loader::{load_model_file, SchemaLoader};
pub use model::{
    flattened_column, join_path, unflattened_path, LeafType, LevelChildren, Model, ModelField,
    ModelRegistry, RecordShape, FLATTEN_SEPARATOR, OBJECT_ID_FIELD, SYNTHETIC_ID_FIELD,
};
pub use registry::{Collection, Datasource, SchemaRegistry};
pub use types::{
    CollectionSchema, ColumnSchema, ColumnType, FieldSchema, RelationKind, RelationSchema,
};
