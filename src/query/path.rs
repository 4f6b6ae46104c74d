//! Field path resolution
//!
//! `author:address:city` follows the `author` then `address` relations and
//! ends on the `city` column. Only to-one relations can be traversed.

use crate::schema::{ColumnSchema, Collection, FieldSchema};

use super::errors::{QueryError, QueryResult};

/// Resolves a field path to its schema
pub fn resolve_field<'a>(collection: Collection<'a>, path: &str) -> QueryResult<&'a FieldSchema> {
    resolve(collection, path, collection.name(), path)
}

/// Resolves a field path that must end on a column
pub fn resolve_column<'a>(collection: Collection<'a>, path: &str) -> QueryResult<&'a ColumnSchema> {
    match resolve_field(collection, path)? {
        FieldSchema::Column(column) => Ok(column),
        FieldSchema::Relation(relation) => Err(QueryError::malformed(format!(
            "Unexpected field type: '{}.{}' is a {} relation, not a column",
            collection.name(),
            path,
            relation.kind
        ))),
    }
}

fn resolve<'a>(
    collection: Collection<'a>,
    path: &str,
    origin: &str,
    full_path: &str,
) -> QueryResult<&'a FieldSchema> {
    let Some((head, rest)) = path.split_once(':') else {
        return collection
            .schema()
            .field(path)
            .ok_or_else(|| QueryError::column_not_found(origin, full_path));
    };

    let field = collection
        .schema()
        .field(head)
        .ok_or_else(|| QueryError::column_not_found(origin, full_path))?;

    let relation = match field {
        FieldSchema::Relation(relation) => relation,
        FieldSchema::Column(_) => {
            return Err(QueryError::malformed(format!(
                "Unexpected field type: '{}.{}' is a column, not a relation",
                collection.name(),
                head
            )))
        }
    };

    if relation.kind.is_polymorphic_target() {
        return Err(QueryError::unsupported(format!(
            "Cannot traverse polymorphic relation '{}.{}'",
            collection.name(),
            head
        )));
    }
    if !relation.kind.is_to_one() {
        return Err(QueryError::malformed(format!(
            "Unexpected field type: '{}.{}' (found '{}' expected 'ManyToOne' or 'OneToOne')",
            collection.name(),
            head,
            relation.kind
        )));
    }

    let foreign = relation.foreign_collection.as_deref().ok_or_else(|| {
        QueryError::malformed(format!(
            "Relation '{}.{}' has no foreign collection",
            collection.name(),
            head
        ))
    })?;

    resolve(collection.sibling(foreign)?, rest, origin, full_path)
}
