//! Reparent generator
//!
//! Walks the path stack from the root down and promotes each frame's embedded
//! value to the document root:
//!
//! - arrays: one record per element, `_id` suffixed with the element index
//! - objects and leaves: records without the value are dropped
//! - leaves and arrays of leaves are boxed under `content`
//!
//! Every promoted record carries `parent_id` and the whole previous record
//! under `parent`. Flattened fields of each frame are then materialized.

use crate::schema::{flattened_column, join_path, ModelField, RecordShape};

use super::context::{LoweringContext, PARENT_RELATION};
use super::errors::{PipelineError, PipelineResult};
use super::stage::{Expr, MatchExpr, Predicate, Stage, ARRAY_INDEX_FIELD};

pub fn reparent(ctx: &LoweringContext<'_>) -> PipelineResult<Vec<Stage>> {
    let model = ctx.stack.model();
    let mut stages = Vec::new();

    for frame in ctx.stack.frames() {
        if let (Some(prefix), Some(path)) = (&frame.prefix, &frame.path) {
            let field = model.schema_at(path).ok_or_else(|| {
                PipelineError::InvalidStack(format!("'{}' is not a field of '{}'", path, model.name))
            })?;
            stages.extend(promote(prefix, field));
        }
        stages.extend(flatten_fields(
            ctx.config.field_batch_size,
            &frame.as_fields,
            None,
        ));
    }

    Ok(stages)
}

fn promote(prefix: &str, field: &ModelField) -> Vec<Stage> {
    let value = match field.record_shape() {
        RecordShape::Document(_) => Expr::field(prefix),
        RecordShape::Boxed(_) => Expr::object([("content", Expr::field(prefix))]),
    };

    let mut stages = Vec::new();
    let mut id = vec![Expr::to_string_expr(Expr::field("_id"))];

    if field.is_array() {
        stages.push(Stage::Unwind {
            path: prefix.to_string(),
            include_array_index: Some(ARRAY_INDEX_FIELD.to_string()),
            preserve_null_and_empty_arrays: false,
        });
        id.push(Expr::string(format!(".{}.", prefix)));
        id.push(Expr::to_string_expr(Expr::field(ARRAY_INDEX_FIELD)));
    } else {
        stages.push(Stage::Match(MatchExpr::field(
            prefix,
            Predicate::Ne(serde_json::Value::Null),
        )));
        id.push(Expr::string(format!(".{}", prefix)));
    }

    stages.push(Stage::ReplaceRoot(Expr::MergeObjects(vec![
        value,
        Expr::object([
            ("_id", Expr::Concat(id)),
            ("parent_id", Expr::field("_id")),
            (PARENT_RELATION, Expr::Root),
        ]),
    ])));
    stages
}

/// `$addFields` copying flattened paths to their `@@@` columns.
///
/// Paths are relative to `base`; at most `batch_size` fields per stage.
pub fn flatten_fields(batch_size: usize, paths: &[String], base: Option<&str>) -> Vec<Stage> {
    paths
        .chunks(batch_size.max(1))
        .map(|chunk| {
            Stage::AddFields(
                chunk
                    .iter()
                    .map(|path| {
                        (
                            join_path(base, &flattened_column(path)),
                            Expr::field(join_path(base, path)),
                        )
                    })
                    .collect(),
            )
        })
        .collect()
}
