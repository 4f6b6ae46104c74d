//! Virtual field generator
//!
//! Records reached through an embedded relation have no stored `_id`,
//! `parent_id` or `content`. When a path reads one of them, a single
//! `$addFields` computes it in place, or writes `Expr::Missing` when the
//! embedded record is absent.

use crate::query::Projection;

use super::context::LoweringContext;
use super::errors::{PipelineError, PipelineResult};
use super::stack::{Cursor, CursorOrigin};
use super::stage::{Expr, Stage};

pub fn virtual_fields(ctx: &LoweringContext<'_>, projection: &Projection) -> PipelineResult<Vec<Stage>> {
    let mut fields: Vec<(String, Expr)> = Vec::new();

    for path in projection.iter() {
        if !path.contains(':') || path.ends_with(":*") {
            continue;
        }
        let resolved = ctx.resolve(path)?;
        if !resolved.is_virtual() || fields.iter().any(|(p, _)| *p == resolved.doc_path) {
            continue;
        }

        let cursor = &resolved.cursor;
        let (anchor, relative) = cursor.anchor();
        if anchor.origin == CursorOrigin::Lookup {
            return Err(PipelineError::unsupported(format!(
                "'{}' reads an embedded record behind a referenced relation",
                path
            )));
        }

        let value = match resolved.column.as_str() {
            "_id" => Expr::Concat(vec![
                Expr::to_string_expr(Expr::field(anchor.field_path("_id"))),
                Expr::string(format!(".{}", relative)),
            ]),
            "parent_id" => {
                if resolved.hops > 1 {
                    return Err(PipelineError::unsupported(format!(
                        "'{}' reads a synthetic parent_id more than one relation away",
                        path
                    )));
                }
                Expr::field(anchor.field_path("_id"))
            }
            _ => Expr::field(record_path(cursor)),
        };

        let record = record_path(cursor);
        fields.push((
            resolved.doc_path.clone(),
            Expr::cond(Expr::is_present(&record), value, Expr::Missing),
        ));
    }

    if fields.is_empty() {
        Ok(Vec::new())
    } else {
        Ok(vec![Stage::AddFields(fields)])
    }
}

fn record_path(cursor: &Cursor<'_>) -> String {
    cursor.doc_path.clone().unwrap_or_default()
}
