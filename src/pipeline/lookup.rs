//! Lookup generator
//!
//! Joins the records behind `<fk>__many_to_one` relations. `parent` and
//! embedded relations are already in the document and only recurse.

use std::collections::BTreeSet;

use crate::query::Projection;

use super::context::{column_doc_path, LoweringContext, MANY_TO_ONE_SUFFIX};
use super::errors::PipelineResult;
use super::reparent::flatten_fields;
use super::stack::{Cursor, CursorOrigin};
use super::stage::Stage;

/// Which top-level relations of the projection to join
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupScope {
    All,
    Only(BTreeSet<String>),
    Except(BTreeSet<String>),
}

impl LookupScope {
    fn includes(&self, relation: &str) -> bool {
        match self {
            LookupScope::All => true,
            LookupScope::Only(names) => names.contains(relation),
            LookupScope::Except(names) => !names.contains(relation),
        }
    }
}

pub fn lookups(
    ctx: &LoweringContext<'_>,
    projection: &Projection,
    scope: &LookupScope,
) -> PipelineResult<Vec<Stage>> {
    let cursor = ctx.cursor();
    let mut stages = Vec::new();
    for (relation, sub_projection) in projection.relations() {
        if scope.includes(&relation) {
            lookup_relation(ctx, &cursor, &relation, &sub_projection, &mut stages)?;
        }
    }
    Ok(stages)
}

fn lookup_relation<'a>(
    ctx: &LoweringContext<'a>,
    cursor: &Cursor<'a>,
    relation: &str,
    projection: &Projection,
    stages: &mut Vec<Stage>,
) -> PipelineResult<()> {
    let target = ctx.follow(cursor, relation)?;

    if target.origin == CursorOrigin::Lookup {
        let foreign_key = relation.strip_suffix(MANY_TO_ONE_SUFFIX).unwrap_or(relation);
        let as_field = target.doc_path.clone().unwrap_or_else(|| relation.to_string());

        stages.push(Stage::Lookup {
            from: target.model.storage_collection().to_string(),
            local_field: column_doc_path(cursor, foreign_key),
            foreign_field: "_id".to_string(),
            as_field: as_field.clone(),
        });
        stages.push(Stage::Unwind {
            path: as_field.clone(),
            include_array_index: None,
            preserve_null_and_empty_arrays: true,
        });
        stages.extend(flatten_fields(
            ctx.config.field_batch_size,
            &target.model.children(None).as_fields,
            Some(&as_field),
        ));
    }

    for (child, sub_projection) in projection.relations() {
        lookup_relation(ctx, &target, &child, &sub_projection, stages)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;
    use crate::pipeline::stack::PathStack;
    use crate::schema::{LeafType, Model, ModelField, ModelRegistry};
    use chrono::Utc;
    use chrono_tz::Tz;
    use serde_json::{json, Value};

    fn registry() -> ModelRegistry {
        let book = Model::new("Book")
            .with_field("title", ModelField::leaf(LeafType::String))
            .with_field("owner", ModelField::reference("User"))
            .with_field(
                "author",
                ModelField::object([
                    ("name", ModelField::leaf(LeafType::String)),
                    ("agent", ModelField::reference("User")),
                ]),
            )
            .with_field(
                "reviews",
                ModelField::array(ModelField::object([(
                    "reviewer",
                    ModelField::reference("User"),
                )])),
            )
            .with_as_model("author")
            .with_as_model("reviews");
        let user = Model::new("User")
            .with_collection("users")
            .with_field("email", ModelField::leaf(LeafType::String))
            .with_field(
                "address",
                ModelField::object([("city", ModelField::leaf(LeafType::String))]),
            )
            .with_as_field("address.city");
        ModelRegistry::from_models([book, user]).unwrap()
    }

    fn generate(collection: &str, paths: &[&str], scope: LookupScope) -> PipelineResult<Vec<Value>> {
        let models = registry();
        let (model, level) = models.resolve_collection(collection).unwrap();
        let stack = PathStack::build(model, level).unwrap();
        let config = CompilerConfig::default();
        let ctx = LoweringContext::new(&models, &stack, &config, Tz::UTC, Utc::now());
        let projection = Projection::new(paths.iter().copied());
        lookups(&ctx, &projection, &scope).map(|stages| stages.iter().map(Stage::to_json).collect())
    }

    #[test]
    fn test_many_to_one() {
        let stages = generate("Book", &["title", "owner__many_to_one:email"], LookupScope::All).unwrap();
        assert_eq!(
            stages,
            vec![
                json!({"$lookup": {
                    "from": "users",
                    "localField": "owner",
                    "foreignField": "_id",
                    "as": "owner__many_to_one"
                }}),
                json!({"$unwind": {
                    "path": "$owner__many_to_one",
                    "preserveNullAndEmptyArrays": true
                }}),
                json!({"$addFields": {
                    "owner__many_to_one.address@@@city": "$owner__many_to_one.address.city"
                }}),
            ]
        );
    }

    #[test]
    fn test_embedded_and_parent_hops_recurse() {
        let stages = generate("Book", &["author:agent__many_to_one:email"], LookupScope::All).unwrap();
        assert_eq!(stages[0]["$lookup"]["localField"], json!("author.agent"));
        assert_eq!(stages[0]["$lookup"]["as"], json!("author.agent__many_to_one"));

        let stages = generate("Book_reviews", &["parent:owner__many_to_one:email"], LookupScope::All).unwrap();
        assert_eq!(stages[0]["$lookup"]["localField"], json!("parent.owner"));

        assert!(generate("Book", &["author:name"], LookupScope::All).unwrap().is_empty());
    }

    #[test]
    fn test_scopes() {
        let paths = ["owner__many_to_one:email", "author:agent__many_to_one:email"];
        let filtered: BTreeSet<String> = ["author".to_string()].into_iter().collect();

        let only = generate("Book", &paths, LookupScope::Only(filtered.clone())).unwrap();
        assert_eq!(only[0]["$lookup"]["as"], json!("author.agent__many_to_one"));

        let except = generate("Book", &paths, LookupScope::Except(filtered)).unwrap();
        assert_eq!(except[0]["$lookup"]["as"], json!("owner__many_to_one"));
    }

    #[test]
    fn test_unknown_relation() {
        let err = generate("Book", &["ghost:name"], LookupScope::All).unwrap_err();
        assert_eq!(err.code(), "DQ_UNKNOWN_RELATION");
    }
}
