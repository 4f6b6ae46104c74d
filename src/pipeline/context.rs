//! Lowering context
//!
//! Read-only state shared by the generators, and resolution of
//! `relation:…:column` paths into document paths and storage types.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::config::CompilerConfig;
use crate::query::QueryError;
use crate::schema::{
    join_path, unflattened_path, ModelField, ModelRegistry, RecordShape, FLATTEN_SEPARATOR,
    SYNTHETIC_ID_FIELD,
};

use super::errors::{PipelineError, PipelineResult};
use super::stack::{Cursor, CursorOrigin, PathStack};

/// Suffix of relations following a referencing `ObjectId` leaf
pub const MANY_TO_ONE_SUFFIX: &str = "__many_to_one";

/// Relation from a promoted record to the record it was promoted from
pub const PARENT_RELATION: &str = "parent";

/// Columns every promoted record gets without storing them
pub const SYNTHETIC_COLUMNS: &[&str] = &["_id", "parent_id", "content"];

pub struct LoweringContext<'a> {
    pub models: &'a ModelRegistry,
    pub stack: &'a PathStack<'a>,
    pub config: &'a CompilerConfig,
    pub timezone: Tz,
    /// Clock for relative date operators
    pub now: DateTime<Utc>,
}

/// A column reached from the queried record
#[derive(Debug, Clone)]
pub struct ResolvedField<'a> {
    /// Record owning the column
    pub cursor: Cursor<'a>,
    pub column: String,
    /// Relations crossed to reach the record
    pub hops: usize,
    /// Where the value sits in the current document
    pub doc_path: String,
    /// Stored shape of the value
    pub field: &'a ModelField,
}

impl ResolvedField<'_> {
    /// Computed by the virtual field stage rather than read from storage
    pub fn is_virtual(&self) -> bool {
        self.cursor.origin == CursorOrigin::Embedded
            && SYNTHETIC_COLUMNS.contains(&self.column.as_str())
    }
}

impl<'a> LoweringContext<'a> {
    pub fn new(
        models: &'a ModelRegistry,
        stack: &'a PathStack<'a>,
        config: &'a CompilerConfig,
        timezone: Tz,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            models,
            stack,
            config,
            timezone,
            now,
        }
    }

    pub fn collection_name(&self) -> String {
        self.stack.collection_name()
    }

    /// Cursor on the queried record
    pub fn cursor(&self) -> Cursor<'a> {
        self.stack.cursor()
    }

    /// Crosses one relation
    pub fn follow(&self, cursor: &Cursor<'a>, relation: &str) -> PipelineResult<Cursor<'a>> {
        if relation == PARENT_RELATION {
            return cursor
                .parent
                .as_ref()
                .map(|parent| (**parent).clone())
                .ok_or_else(|| PipelineError::unknown_relation(cursor.collection_name(), relation));
        }

        let model = cursor.model;
        let child = unflattened_path(relation);
        if model.children(cursor.level.as_deref()).as_models.contains(&child) {
            let level = join_path(cursor.level.as_deref(), &child);
            if model.schema_at(&level).map_or(false, ModelField::is_array) {
                return Err(QueryError::malformed(format!(
                    "Relation '{}' of '{}' is not a to-one relation",
                    relation,
                    cursor.collection_name()
                ))
                .into());
            }
            return Ok(Cursor {
                model,
                level: Some(level),
                doc_path: Some(cursor.field_path(&child)),
                origin: CursorOrigin::Embedded,
                parent: Some(Box::new(cursor.clone())),
            });
        }

        let reference = relation
            .strip_suffix(MANY_TO_ONE_SUFFIX)
            .and_then(|fk| column_field(cursor, fk))
            .and_then(ModelField::referenced_model);
        if let Some(target) = reference {
            let foreign = self
                .models
                .get(target)
                .ok_or_else(|| PipelineError::UnknownModel(target.to_string()))?;
            return Ok(Cursor {
                model: foreign,
                level: None,
                doc_path: Some(cursor.field_path(relation)),
                origin: CursorOrigin::Lookup,
                parent: None,
            });
        }

        Err(PipelineError::unknown_relation(cursor.collection_name(), relation))
    }

    /// Cursor at the end of a relation chain
    pub fn follow_all(&self, relations: &[&str]) -> PipelineResult<Cursor<'a>> {
        let mut cursor = self.cursor();
        for relation in relations {
            cursor = self.follow(&cursor, relation)?;
        }
        Ok(cursor)
    }

    /// Resolves a `relation:…:column` path
    pub fn resolve(&self, path: &str) -> PipelineResult<ResolvedField<'a>> {
        let mut segments: Vec<&str> = path.split(':').collect();
        let column = segments.pop().unwrap_or_default();
        let cursor = self.follow_all(&segments)?;

        let field = column_field(&cursor, column)
            .ok_or_else(|| QueryError::column_not_found(self.collection_name(), path))?;
        let doc_path = column_doc_path(&cursor, column);

        Ok(ResolvedField {
            cursor,
            column: column.to_string(),
            hops: segments.len(),
            doc_path,
            field,
        })
    }
}

/// Stored shape of a column of the record under `cursor`
pub fn column_field<'m>(cursor: &Cursor<'m>, column: &str) -> Option<&'m ModelField> {
    let model = cursor.model;
    let level = cursor.level.as_deref();

    match (column, level) {
        ("_id", None) => model.schema_at("_id"),
        ("_id", Some(_)) => Some(&SYNTHETIC_ID_FIELD),
        ("parent_id", Some(level)) => match model.promoted_parent(level) {
            None => model.schema_at("_id"),
            Some(_) => Some(&SYNTHETIC_ID_FIELD),
        },
        _ => match model.level_shape(level)? {
            RecordShape::Boxed(field) => (column == "content").then_some(field),
            RecordShape::Document(_) => {
                if column.contains('.') {
                    return None;
                }
                let path = unflattened_path(column);
                let flattened = column.contains(FLATTEN_SEPARATOR);
                if flattened && !model.children(level).as_fields.contains(&path) {
                    return None;
                }
                let absolute = join_path(level, &path);
                if model.is_promoted(&absolute) {
                    return None;
                }
                model.schema_at(&absolute)
            }
        },
    }
}

/// Document path of a column of the record under `cursor`.
///
/// Flattened columns are only materialized on frames and joined roots;
/// embedded records are read through the nested path.
pub fn column_doc_path(cursor: &Cursor<'_>, column: &str) -> String {
    if cursor.origin == CursorOrigin::Embedded && column.contains(FLATTEN_SEPARATOR) {
        cursor.field_path(&unflattened_path(column))
    } else {
        cursor.field_path(column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{LeafType, Model};

    fn registry() -> ModelRegistry {
        let book = Model::new("Book")
            .with_field("title", ModelField::leaf(LeafType::String))
            .with_field("owner", ModelField::reference("User"))
            .with_field(
                "author",
                ModelField::object([
                    ("name", ModelField::leaf(LeafType::String)),
                    (
                        "address",
                        ModelField::object([("city", ModelField::leaf(LeafType::String))]),
                    ),
                ]),
            )
            .with_field(
                "reviews",
                ModelField::array(ModelField::object([(
                    "rating",
                    ModelField::leaf(LeafType::Number),
                )])),
            )
            .with_as_model("author")
            .with_as_model("reviews")
            .with_as_field("author.address.city");
        let user = Model::new("User").with_field("email", ModelField::leaf(LeafType::String));
        ModelRegistry::from_models([book, user]).unwrap()
    }

    fn with_context<F: FnOnce(&LoweringContext<'_>)>(collection: &str, f: F) {
        let models = registry();
        let (model, level) = models.resolve_collection(collection).unwrap();
        let stack = PathStack::build(model, level).unwrap();
        let config = CompilerConfig::default();
        let ctx = LoweringContext::new(&models, &stack, &config, Tz::UTC, Utc::now());
        f(&ctx);
    }

    #[test]
    fn test_resolve_embedded_column() {
        with_context("Book", |ctx| {
            let resolved = ctx.resolve("author:name").unwrap();
            assert_eq!(resolved.doc_path, "author.name");
            assert_eq!(resolved.hops, 1);
            assert!(!resolved.is_virtual());

            let city = ctx.resolve("author:address@@@city").unwrap();
            assert_eq!(city.doc_path, "author.address.city");

            let id = ctx.resolve("author:_id").unwrap();
            assert!(id.is_virtual());
            assert_eq!(id.field.leaf_type(), Some(LeafType::String));
        });
    }

    #[test]
    fn test_resolve_parent_and_reference() {
        with_context("Book_reviews", |ctx| {
            let title = ctx.resolve("parent:title").unwrap();
            assert_eq!(title.doc_path, "parent.title");

            let email = ctx.resolve("parent:owner__many_to_one:email").unwrap();
            assert_eq!(email.doc_path, "parent.owner__many_to_one.email");
            assert_eq!(email.cursor.origin, CursorOrigin::Lookup);

            let parent_id = ctx.resolve("parent_id").unwrap();
            assert_eq!(parent_id.field.leaf_type(), Some(LeafType::ObjectId));
        });
    }

    #[test]
    fn test_resolve_errors() {
        with_context("Book", |ctx| {
            assert_eq!(ctx.resolve("ghost:name").unwrap_err().code(), "DQ_UNKNOWN_RELATION");
            assert_eq!(ctx.resolve("parent:title").unwrap_err().code(), "DQ_UNKNOWN_RELATION");
            assert_eq!(ctx.resolve("nope").unwrap_err().code(), "DQ_COLUMN_NOT_FOUND");
            assert_eq!(ctx.resolve("reviews:rating").unwrap_err().code(), "DQ_MALFORMED");
            // promoted paths are relations, not columns
            assert_eq!(ctx.resolve("author").unwrap_err().code(), "DQ_COLUMN_NOT_FOUND");
        });
    }
}
