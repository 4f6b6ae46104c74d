//! Group and sort/paginate generators

use serde_json::{json, Value};

use crate::query::{Aggregation, AggregationOperation, DateOperation, Filter, Page, QueryError, Sort};

use super::context::LoweringContext;
use super::errors::PipelineResult;
use super::stage::{Accumulator, Expr, ProjectionValue, Stage};

/// `$group` then `$project {_id: 0, value, group}`
pub fn group(ctx: &LoweringContext<'_>, aggregation: &Aggregation) -> PipelineResult<Vec<Stage>> {
    let timezone = ctx.timezone.name().to_string();

    let mut keys = Vec::new();
    let mut projected = Vec::new();
    for group in &aggregation.groups {
        let key = group_key(&group.field);
        let field = Expr::field(ctx.resolve(&group.field)?.doc_path);
        let value = match group.operation {
            Some(operation) => date_bucket(field, operation, &timezone),
            None => field,
        };
        keys.push((key.clone(), value));
        projected.push((group.field.clone(), Expr::field(format!("_id.{}", key))));
    }

    let field = match &aggregation.field {
        Some(field) => Some(Expr::field(ctx.resolve(field)?.doc_path)),
        None => None,
    };
    let accumulator = match (aggregation.operation, field) {
        (AggregationOperation::Count, None) => Accumulator::Sum(Expr::Literal(json!(1))),
        // an absent path is not equal to null, so both fold into null first
        (AggregationOperation::Count, Some(field)) => Accumulator::Sum(Expr::cond(
            Expr::ne(Expr::if_null(field, Expr::Literal(Value::Null)), Expr::Literal(Value::Null)),
            Expr::Literal(json!(1)),
            Expr::Literal(json!(0)),
        )),
        (AggregationOperation::Sum, Some(field)) => Accumulator::Sum(field),
        (AggregationOperation::Avg, Some(field)) => Accumulator::Avg(field),
        (AggregationOperation::Max, Some(field)) => Accumulator::Max(field),
        (AggregationOperation::Min, Some(field)) => Accumulator::Min(field),
        // rejected when the aggregation is built
        (operation, None) => {
            return Err(QueryError::malformed(format!(
                "A field must be provided to aggregate with '{}'",
                operation
            ))
            .into())
        }
    };

    let id = if keys.is_empty() {
        Expr::Literal(Value::Null)
    } else {
        Expr::Object(keys)
    };
    let group_value = if projected.is_empty() {
        Expr::Literal(json!({}))
    } else {
        Expr::Object(projected)
    };

    Ok(vec![
        Stage::Group {
            id,
            accumulators: vec![("value".to_string(), accumulator)],
        },
        Stage::Project(vec![
            ("_id".to_string(), ProjectionValue::Exclude),
            ("value".to_string(), ProjectionValue::Include),
            ("group".to_string(), ProjectionValue::Expr(group_value)),
        ]),
    ])
}

/// Group keys cannot contain dots
fn group_key(field: &str) -> String {
    field.replace(':', "__")
}

fn date_bucket(date: Expr, operation: DateOperation, timezone: &str) -> Expr {
    let format = |format: &str, date: Expr| Expr::DateToString {
        format: format.to_string(),
        date: Box::new(date),
        timezone: timezone.to_string(),
    };
    let truncate = |unit: &str, start_of_week: Option<&str>, date: Expr| Expr::DateTrunc {
        date: Box::new(date),
        unit: unit.to_string(),
        timezone: timezone.to_string(),
        start_of_week: start_of_week.map(str::to_string),
    };

    match operation {
        DateOperation::Year => format("%Y-01-01", date),
        DateOperation::Month => format("%Y-%m-01", date),
        DateOperation::Day => format("%Y-%m-%d", date),
        DateOperation::Week => format("%Y-%m-%d", truncate("week", Some("monday"), date)),
        DateOperation::Quarter => format("%Y-%m-%d", truncate("quarter", None, date)),
    }
}

/// Sort and pagination stages, split by where they can run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortAndPaginate {
    /// No sort: skip/limit right after the match
    pub paginate_only: Vec<Stage>,
    /// Sort on current-level columns: before the remaining lookups
    pub early: Vec<Stage>,
    /// Sort reaching through relations: after every lookup
    pub late: Vec<Stage>,
}

pub fn sort_and_paginate(ctx: &LoweringContext<'_>, filter: &Filter) -> PipelineResult<SortAndPaginate> {
    let page = page_stages(filter.page.as_ref());

    let sort = match filter.sort.as_ref().filter(|sort| !sort.is_empty()) {
        Some(sort) => sort,
        None => {
            return Ok(SortAndPaginate {
                paginate_only: page,
                ..SortAndPaginate::default()
            })
        }
    };

    let mut stages = vec![sort_stage(ctx, sort)?];
    stages.extend(page);

    if is_native_sort(sort) {
        Ok(SortAndPaginate {
            early: stages,
            ..SortAndPaginate::default()
        })
    } else {
        Ok(SortAndPaginate {
            late: stages,
            ..SortAndPaginate::default()
        })
    }
}

/// Every field is a column of the queried level. Any relation path sorts
/// late, embedded ones included, even when no lookup or reparent touches it.
fn is_native_sort(sort: &Sort) -> bool {
    sort.clauses().iter().all(|clause| !clause.field.contains(':'))
}

fn sort_stage(ctx: &LoweringContext<'_>, sort: &Sort) -> PipelineResult<Stage> {
    let clauses = sort
        .clauses()
        .iter()
        .map(|clause| Ok((ctx.resolve(&clause.field)?.doc_path, clause.ascending)))
        .collect::<PipelineResult<Vec<_>>>()?;
    Ok(Stage::Sort(clauses))
}

fn page_stages(page: Option<&Page>) -> Vec<Stage> {
    let mut stages = Vec::new();
    if let Some(page) = page {
        if page.skip > 0 {
            stages.push(Stage::Skip(page.skip));
        }
        if let Some(limit) = page.limit {
            stages.push(Stage::Limit(limit));
        }
    }
    stages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;
    use crate::pipeline::stack::PathStack;
    use crate::query::{AggregationGroup, SortClause};
    use crate::schema::{LeafType, Model, ModelField, ModelRegistry};
    use chrono::Utc;
    use chrono_tz::Tz;

    fn registry() -> ModelRegistry {
        let book = Model::new("Book")
            .with_field("title", ModelField::leaf(LeafType::String))
            .with_field("price", ModelField::leaf(LeafType::Number))
            .with_field("published_at", ModelField::leaf(LeafType::Date))
            .with_field(
                "author",
                ModelField::object([("name", ModelField::leaf(LeafType::String))]),
            )
            .with_as_model("author");
        ModelRegistry::from_models([book]).unwrap()
    }

    fn with_context<T, F: FnOnce(&LoweringContext<'_>) -> T>(timezone: Tz, f: F) -> T {
        let models = registry();
        let (model, level) = models.resolve_collection("Book").unwrap();
        let stack = PathStack::build(model, level).unwrap();
        let config = CompilerConfig::default();
        let ctx = LoweringContext::new(&models, &stack, &config, timezone, Utc::now());
        f(&ctx)
    }

    fn to_json(stages: &[Stage]) -> Vec<Value> {
        stages.iter().map(Stage::to_json).collect()
    }

    #[test]
    fn test_count_without_groups() {
        let stages = with_context(Tz::UTC, |ctx| group(ctx, &Aggregation::count()).unwrap());
        assert_eq!(
            to_json(&stages),
            vec![
                json!({"$group": {"_id": null, "value": {"$sum": 1}}}),
                json!({"$project": {"_id": 0, "value": 1, "group": {"$literal": {}}}}),
            ]
        );
    }

    #[test]
    fn test_grouped_sum() {
        let aggregation = Aggregation::new(
            AggregationOperation::Sum,
            Some("price".into()),
            vec![AggregationGroup::new("author:name")],
        )
        .unwrap();
        let stages = with_context(Tz::UTC, |ctx| group(ctx, &aggregation).unwrap());
        assert_eq!(
            to_json(&stages),
            vec![
                json!({"$group": {"_id": {"author__name": "$author.name"}, "value": {"$sum": "$price"}}}),
                json!({"$project": {"_id": 0, "value": 1, "group": {"author:name": "$_id.author__name"}}}),
            ]
        );
    }

    #[test]
    fn test_count_field_counts_non_null() {
        let aggregation = Aggregation::new(AggregationOperation::Count, Some("title".into()), vec![]).unwrap();
        let stages = with_context(Tz::UTC, |ctx| group(ctx, &aggregation).unwrap());
        assert_eq!(
            stages[0].to_json()["$group"]["value"],
            json!({"$sum": {"$cond": {
                "if": {"$ne": [{"$ifNull": ["$title", null]}, null]},
                "then": 1,
                "else": 0
            }}})
        );
    }

    #[test]
    fn test_date_groups() {
        let aggregation = Aggregation::count()
            .with_group(AggregationGroup::by_date("published_at", DateOperation::Week));
        let stages = with_context(chrono_tz::Europe::Paris, |ctx| group(ctx, &aggregation).unwrap());
        assert_eq!(
            stages[0].to_json()["$group"]["_id"]["published_at"],
            json!({"$dateToString": {
                "format": "%Y-%m-%d",
                "date": {"$dateTrunc": {
                    "date": "$published_at",
                    "unit": "week",
                    "timezone": "Europe/Paris",
                    "startOfWeek": "monday"
                }},
                "timezone": "Europe/Paris"
            }})
        );

        let aggregation = Aggregation::count()
            .with_group(AggregationGroup::by_date("published_at", DateOperation::Month));
        let stages = with_context(Tz::UTC, |ctx| group(ctx, &aggregation).unwrap());
        assert_eq!(
            stages[0].to_json()["$group"]["_id"]["published_at"]["$dateToString"]["format"],
            json!("%Y-%m-01")
        );
    }

    fn buckets(filter: Filter) -> SortAndPaginate {
        with_context(Tz::UTC, |ctx| sort_and_paginate(ctx, &filter).unwrap())
    }

    #[test]
    fn test_paginate_only() {
        let result = buckets(Filter::new().with_page(Page::new(20, Some(10))));
        assert_eq!(result.paginate_only, vec![Stage::Skip(20), Stage::Limit(10)]);
        assert!(result.early.is_empty() && result.late.is_empty());

        assert_eq!(buckets(Filter::new()), SortAndPaginate::default());
    }

    #[test]
    fn test_early_sort() {
        let filter = Filter::new()
            .with_sort(Sort::new(vec![SortClause::desc("price")]))
            .with_page(Page::new(0, Some(5)));
        let result = buckets(filter);
        assert_eq!(
            result.early,
            vec![Stage::Sort(vec![("price".into(), false)]), Stage::Limit(5)]
        );
        assert!(result.paginate_only.is_empty() && result.late.is_empty());
    }

    #[test]
    fn test_late_sort() {
        let filter = Filter::new().with_sort(Sort::new(vec![SortClause::asc("author:name")]));
        let result = buckets(filter);
        assert_eq!(result.late, vec![Stage::Sort(vec![("author.name".into(), true)])]);
        assert!(result.paginate_only.is_empty() && result.early.is_empty());
    }
}
