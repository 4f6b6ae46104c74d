//! Semantic schemas of document collections
//!
//! Derives the flat `CollectionSchema` of every root and flattened collection
//! of a model, so that the validator and the compiler agree on what a query
//! may reference.

use crate::query::{ConditionTreeEquivalent, Operator};
use crate::schema::{
    flattened_column, join_path, ColumnSchema, ColumnType, CollectionSchema, Datasource,
    LeafType, Model, ModelField, ModelRegistry, RecordShape, RelationKind, RelationSchema,
    OBJECT_ID_FIELD, SYNTHETIC_ID_FIELD,
};

use super::context::{MANY_TO_ONE_SUFFIX, PARENT_RELATION};
use super::errors::{PipelineError, PipelineResult};
use super::filter::native_operators;

/// Operators that make sense on identifiers
const IDENTIFIER_OPERATORS: &[Operator] = &[
    Operator::Present,
    Operator::Blank,
    Operator::Missing,
    Operator::Equal,
    Operator::NotEqual,
    Operator::In,
    Operator::NotIn,
    Operator::IncludesAll,
    Operator::IncludesNone,
];

/// Semantic type of a stored field
pub fn column_type_of(field: &ModelField) -> ColumnType {
    match field {
        ModelField::Leaf {
            leaf_type,
            enum_values,
            ..
        } => match leaf_type {
            LeafType::String if !enum_values.is_empty() => ColumnType::Enum,
            LeafType::String | LeafType::ObjectId => ColumnType::String,
            LeafType::Number => ColumnType::Number,
            LeafType::Boolean => ColumnType::Boolean,
            LeafType::Date => ColumnType::Date,
            LeafType::Binary => ColumnType::Binary,
            LeafType::Mixed => ColumnType::Json,
        },
        // arrays of leaves are filtered element-wise
        ModelField::Array { items } if matches!(items.as_ref(), ModelField::Leaf { .. }) => {
            column_type_of(items)
        }
        _ => ColumnType::Json,
    }
}

/// Column of a stored field.
///
/// Filter operators are the type-legal ones the document backend can run,
/// natively or through an equivalent tree.
pub fn column_schema(field: &ModelField) -> ColumnSchema {
    let column_type = column_type_of(field);
    let candidates = if field.leaf_type() == Some(LeafType::ObjectId) {
        IDENTIFIER_OPERATORS
    } else {
        Operator::allowed_for(column_type)
    };
    let native = native_operators();

    let enum_values = match field {
        ModelField::Leaf { enum_values, .. } => enum_values.clone(),
        _ => Vec::new(),
    };

    ColumnSchema {
        column_type,
        filter_operators: candidates
            .iter()
            .copied()
            .filter(|op| ConditionTreeEquivalent::has_equivalent_tree(*op, &native, column_type))
            .collect(),
        enum_values,
        is_primary_key: false,
    }
}

/// Every root and flattened collection of every model
pub fn build_datasource(models: &ModelRegistry) -> PipelineResult<Datasource> {
    let mut datasource = Datasource::new();
    for model in models.models() {
        datasource.add_collection(collection_schema(models, model, None)?);
        for path in &model.as_models {
            datasource.add_collection(collection_schema(models, model, Some(path))?);
        }
    }
    Ok(datasource)
}

/// Schema of one level of a model; `None` is the root
pub fn collection_schema(
    models: &ModelRegistry,
    model: &Model,
    level: Option<&str>,
) -> PipelineResult<CollectionSchema> {
    let name = model.flattened_name(level);
    let shape = model
        .level_shape(level)
        .ok_or_else(|| PipelineError::UnknownCollection(name.clone()))?;

    let id_field = match level {
        None => model.schema_at("_id").unwrap_or(&OBJECT_ID_FIELD),
        Some(_) => &SYNTHETIC_ID_FIELD,
    };
    let mut schema =
        CollectionSchema::new(&name).with_column("_id", column_schema(id_field).primary_key());

    if let Some(level) = level {
        let parent_level = model.promoted_parent(level);
        let parent_id = match parent_level {
            None => model.schema_at("_id").unwrap_or(&OBJECT_ID_FIELD),
            Some(_) => &SYNTHETIC_ID_FIELD,
        };
        schema = schema
            .with_column("parent_id", column_schema(parent_id))
            .with_relation(
                PARENT_RELATION,
                RelationSchema::new(RelationKind::ManyToOne, model.flattened_name(parent_level))
                    .with_foreign_key("parent_id"),
            );
    }

    match shape {
        RecordShape::Boxed(field) => {
            schema = schema.with_column("content", column_schema(field));
        }
        RecordShape::Document(fields) => {
            for (field_name, field) in fields {
                if field_name == "_id" || model.is_promoted(&join_path(level, field_name)) {
                    continue;
                }
                schema = with_value_field(schema, models, field_name, field)?;
            }
        }
    }

    let children = model.children(level);
    for child in &children.as_models {
        let path = join_path(level, child);
        let kind = match model.schema_at(&path) {
            Some(field) if field.is_array() => RelationKind::OneToMany,
            _ => RelationKind::OneToOne,
        };
        schema = schema.with_relation(
            flattened_column(child),
            RelationSchema::new(kind, model.flattened_name(Some(&path))).with_origin_key("parent_id"),
        );
    }
    for flattened in &children.as_fields {
        let path = join_path(level, flattened);
        let field = model
            .schema_at(&path)
            .ok_or_else(|| PipelineError::InvalidStack(format!("'{}' is not a field of '{}'", path, model.name)))?;
        schema = with_value_field(schema, models, &flattened_column(flattened), field)?;
    }

    Ok(schema)
}

fn with_value_field(
    schema: CollectionSchema,
    models: &ModelRegistry,
    name: &str,
    field: &ModelField,
) -> PipelineResult<CollectionSchema> {
    let mut schema = schema.with_column(name, column_schema(field));
    if let Some(target) = field.referenced_model() {
        if models.get(target).is_none() {
            return Err(PipelineError::UnknownModel(target.to_string()));
        }
        schema = schema.with_relation(
            format!("{}{}", name, MANY_TO_ONE_SUFFIX),
            RelationSchema::new(RelationKind::ManyToOne, target).with_foreign_key(name),
        );
    }
    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldSchema;

    fn registry() -> ModelRegistry {
        let book = Model::new("Book")
            .with_field("title", ModelField::leaf(LeafType::String))
            .with_field("status", ModelField::enumeration(["draft", "published"]))
            .with_field("owner", ModelField::reference("User"))
            .with_field("tags", ModelField::array(ModelField::leaf(LeafType::String)))
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
            .with_as_model("tags")
            .with_as_field("author.address.city");
        let user = Model::new("User").with_field("email", ModelField::leaf(LeafType::String));
        ModelRegistry::from_models([book, user]).unwrap()
    }

    fn column<'a>(schema: &'a CollectionSchema, name: &str) -> &'a ColumnSchema {
        schema.field(name).and_then(FieldSchema::as_column).unwrap()
    }

    fn relation<'a>(schema: &'a CollectionSchema, name: &str) -> &'a RelationSchema {
        schema.field(name).and_then(FieldSchema::as_relation).unwrap()
    }

    #[test]
    fn test_collections() {
        let datasource = build_datasource(&registry()).unwrap();
        let names: Vec<&str> = datasource.collection_names().collect();
        assert_eq!(names, vec!["Book", "Book_author", "Book_reviews", "Book_tags", "User"]);
    }

    #[test]
    fn test_root_schema() {
        let datasource = build_datasource(&registry()).unwrap();
        let book = datasource.collection("Book").unwrap();
        let schema = book.schema();

        assert_eq!(schema.primary_keys(), vec!["_id"]);
        assert_eq!(column(schema, "status").column_type, ColumnType::Enum);
        assert_eq!(relation(schema, "author").kind, RelationKind::OneToOne);
        assert_eq!(relation(schema, "reviews").kind, RelationKind::OneToMany);
        assert_eq!(
            relation(schema, "owner__many_to_one").foreign_collection.as_deref(),
            Some("User")
        );
        assert!(schema.field("parent").is_none());
    }

    #[test]
    fn test_promoted_schemas() {
        let datasource = build_datasource(&registry()).unwrap();

        let author = datasource.collection("Book_author").unwrap();
        let schema = author.schema();
        assert_eq!(column(schema, "address@@@city").column_type, ColumnType::String);
        assert_eq!(column(schema, "address").column_type, ColumnType::Json);
        assert_eq!(relation(schema, "parent").foreign_collection.as_deref(), Some("Book"));
        assert!(schema.field("parent_id").is_some());

        let tags = datasource.collection("Book_tags").unwrap();
        assert_eq!(column(tags.schema(), "content").column_type, ColumnType::String);
    }

    #[test]
    fn test_filter_operators() {
        let native = native_operators();
        let datasource = build_datasource(&registry()).unwrap();
        let book = datasource.collection("Book").unwrap();

        let title = column(book.schema(), "title");
        assert!(title.filter_operators.contains(&Operator::Contains));
        assert!(title.filter_operators.contains(&Operator::Like));
        // no equivalent over the native set
        assert!(!title.filter_operators.contains(&Operator::LongerThan));
        assert!(!title.filter_operators.contains(&Operator::NotContains));

        let id = column(book.schema(), "_id");
        assert!(id.filter_operators.contains(&Operator::In));
        assert!(!id.filter_operators.contains(&Operator::Contains));

        for operator in &column(book.schema(), "owner").filter_operators {
            assert!(IDENTIFIER_OPERATORS.contains(operator));
            assert!(native.contains(operator) || operator.is_allowed_for(ColumnType::String));
        }
    }
}
