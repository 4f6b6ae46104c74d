//! Final projection generator

use serde_json::json;

use crate::query::{Projection, ALL_FIELDS};
use crate::schema::FLATTEN_SEPARATOR;

use super::context::LoweringContext;
use super::errors::PipelineResult;
use super::stack::CursorOrigin;
use super::stage::{Expr, ProjectionValue, Stage};

/// `$project` keeping exactly the requested paths.
///
/// `_id` is dropped unless requested and `relation:*` keeps the whole
/// related record. A root `*` keeps everything.
pub fn project(ctx: &LoweringContext<'_>, projection: &Projection) -> PipelineResult<Vec<Stage>> {
    if projection.is_empty() {
        return Ok(vec![Stage::ReplaceRoot(Expr::Literal(json!({})))]);
    }
    if projection.is_all_fields() {
        return Ok(Vec::new());
    }

    let mut whole: Vec<String> = Vec::new();
    let mut entries: Vec<(String, ProjectionValue)> = Vec::new();

    for path in projection.iter() {
        if let Some(relations) = path.strip_suffix(&format!(":{}", ALL_FIELDS)) {
            let relations: Vec<&str> = relations.split(':').collect();
            let cursor = ctx.follow_all(&relations)?;
            whole.push(cursor.doc_path.unwrap_or_default());
            continue;
        }

        let resolved = ctx.resolve(path)?;
        let embedded_flattened = resolved.cursor.origin == CursorOrigin::Embedded
            && resolved.column.contains(FLATTEN_SEPARATOR);
        let value = if embedded_flattened {
            ProjectionValue::Expr(Expr::field(&resolved.doc_path))
        } else {
            ProjectionValue::Include
        };
        let key = resolved.cursor.field_path(&resolved.column);
        entries.push((key, value));
    }

    // whole records win over their own fields
    entries.retain(|(key, _)| !whole.iter().any(|prefix| key.starts_with(&format!("{}.", prefix))));
    for prefix in whole {
        if !entries.iter().any(|(key, _)| *key == prefix) {
            entries.push((prefix, ProjectionValue::Include));
        }
    }

    if !projection.contains("_id") {
        entries.insert(0, ("_id".to_string(), ProjectionValue::Exclude));
    }

    Ok(vec![Stage::Project(entries)])
}
