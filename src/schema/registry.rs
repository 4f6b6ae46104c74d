//! Collection lookup
//!
//! The algebra resolves relation hops through a `SchemaRegistry`; `Collection`
//! pairs a schema with the registry it came from.

use std::collections::BTreeMap;

use crate::query::{QueryError, QueryResult};

use super::types::CollectionSchema;

/// Read-only source of collection schemas
pub trait SchemaRegistry {
    fn collection_schema(&self, name: &str) -> Option<&CollectionSchema>;
}

/// An in-memory set of collections
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Datasource {
    collections: BTreeMap<String, CollectionSchema>,
}

impl Datasource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collection(mut self, schema: CollectionSchema) -> Self {
        self.add_collection(schema);
        self
    }

    /// Adds or replaces a collection
    pub fn add_collection(&mut self, schema: CollectionSchema) {
        self.collections.insert(schema.name.clone(), schema);
    }

    /// Handle on a named collection
    pub fn collection(&self, name: &str) -> QueryResult<Collection<'_>> {
        self.collections
            .get(name)
            .map(|schema| Collection::new(schema, self))
            .ok_or_else(|| QueryError::malformed(format!("Collection '{}' not found.", name)))
    }

    pub fn collection_names(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }
}

impl SchemaRegistry for Datasource {
    fn collection_schema(&self, name: &str) -> Option<&CollectionSchema> {
        self.collections.get(name)
    }
}

/// A collection schema together with the registry used to follow its relations
#[derive(Clone, Copy)]
pub struct Collection<'a> {
    schema: &'a CollectionSchema,
    registry: &'a dyn SchemaRegistry,
}

impl<'a> Collection<'a> {
    pub fn new(schema: &'a CollectionSchema, registry: &'a dyn SchemaRegistry) -> Self {
        Self { schema, registry }
    }

    pub fn name(&self) -> &'a str {
        &self.schema.name
    }

    pub fn schema(&self) -> &'a CollectionSchema {
        self.schema
    }

    /// Another collection of the same registry
    pub fn sibling(&self, name: &str) -> QueryResult<Collection<'a>> {
        self.registry
            .collection_schema(name)
            .map(|schema| Collection::new(schema, self.registry))
            .ok_or_else(|| QueryError::malformed(format!("Collection '{}' not found.", name)))
    }
}

impl std::fmt::Debug for Collection<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection").field("name", &self.schema.name).finish()
    }
}
