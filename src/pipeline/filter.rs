//! Filter generator
//!
//! Lowers a condition tree into a `$match`. Operators the store has no
//! predicate for are rewritten through the equivalence rules first.

use std::collections::BTreeSet;

use serde_json::{json, Value};

use crate::query::{
    Aggregator, ConditionTree, ConditionTreeEquivalent, ConditionTreeLeaf, Operator, QueryError,
};
use crate::schema::LeafType;

use super::context::LoweringContext;
use super::errors::PipelineResult;
use super::fields::column_type_of;
use super::stage::{MatchExpr, Predicate, Stage};

/// Operators with a direct `$match` predicate
pub const NATIVE_OPERATORS: &[Operator] = &[
    Operator::Equal,
    Operator::NotEqual,
    Operator::LessThan,
    Operator::GreaterThan,
    Operator::LessThanOrEqual,
    Operator::GreaterThanOrEqual,
    Operator::In,
    Operator::NotIn,
    Operator::IncludesAll,
    Operator::IncludesNone,
    Operator::Present,
    Operator::Blank,
    Operator::Missing,
    Operator::Match,
];

pub fn native_operators() -> BTreeSet<Operator> {
    NATIVE_OPERATORS.iter().copied().collect()
}

/// `$match` for the condition tree, nothing without one
pub fn filter(ctx: &LoweringContext<'_>, tree: Option<&ConditionTree>) -> PipelineResult<Vec<Stage>> {
    match tree {
        Some(tree) => Ok(vec![Stage::Match(lower_tree(ctx, tree)?)]),
        None => Ok(Vec::new()),
    }
}

pub fn lower_tree(ctx: &LoweringContext<'_>, tree: &ConditionTree) -> PipelineResult<MatchExpr> {
    match tree {
        ConditionTree::Branch(branch) => {
            let conditions = branch
                .conditions
                .iter()
                .map(|condition| lower_tree(ctx, condition))
                .collect::<PipelineResult<Vec<_>>>()?;
            Ok(match (branch.aggregator, conditions.is_empty()) {
                (Aggregator::And, true) => MatchExpr::All,
                (Aggregator::Or, true) => MatchExpr::Nothing,
                (Aggregator::And, false) => MatchExpr::And(conditions),
                (Aggregator::Or, false) => MatchExpr::Or(conditions),
            })
        }
        ConditionTree::Leaf(leaf) => lower_leaf(ctx, leaf),
    }
}

fn lower_leaf(ctx: &LoweringContext<'_>, leaf: &ConditionTreeLeaf) -> PipelineResult<MatchExpr> {
    let resolved = ctx.resolve(&leaf.field)?;

    if !NATIVE_OPERATORS.contains(&leaf.operator) {
        let rewritten = ConditionTreeEquivalent::get_equivalent_tree_at(
            leaf,
            &native_operators(),
            column_type_of(resolved.field),
            ctx.timezone,
            ctx.now,
        )?;
        return lower_tree(ctx, &rewritten);
    }

    let leaf_type = resolved.field.leaf_type();
    let scalar = || cast(&leaf.value, leaf_type);
    let list = || leaf.value_list().iter().map(|v| cast(v, leaf_type)).collect::<Vec<_>>();

    let predicate = match leaf.operator {
        Operator::Equal => Predicate::Eq(scalar()),
        Operator::NotEqual => Predicate::Ne(scalar()),
        Operator::LessThan => Predicate::Lt(scalar()),
        Operator::GreaterThan => Predicate::Gt(scalar()),
        Operator::LessThanOrEqual => Predicate::Lte(scalar()),
        Operator::GreaterThanOrEqual => Predicate::Gte(scalar()),
        Operator::In => Predicate::In(list()),
        Operator::NotIn | Operator::IncludesNone => Predicate::Nin(list()),
        Operator::IncludesAll => Predicate::All(list()),
        Operator::Present => Predicate::Present,
        Operator::Blank => Predicate::Blank,
        Operator::Missing => Predicate::Missing,
        Operator::Match => regex(leaf)?,
        other => {
            return Err(QueryError::unsupported(format!(
                "Operator '{}' has no native predicate",
                other
            ))
            .into())
        }
    };

    Ok(MatchExpr::field(resolved.doc_path, predicate))
}

/// `(?i)` becomes the `i` option
fn regex(leaf: &ConditionTreeLeaf) -> PipelineResult<Predicate> {
    let pattern = leaf.value.as_str().ok_or_else(|| {
        QueryError::malformed(format!("Match on '{}' expects a string", leaf.field))
    })?;
    Ok(match pattern.strip_prefix("(?i)") {
        Some(rest) => Predicate::Regex {
            pattern: rest.to_string(),
            options: "i".to_string(),
        },
        None => Predicate::Regex {
            pattern: pattern.to_string(),
            options: String::new(),
        },
    })
}

/// Extended JSON for identifiers and dates
fn cast(value: &Value, leaf_type: Option<LeafType>) -> Value {
    match (value, leaf_type) {
        (Value::String(s), Some(LeafType::ObjectId)) => json!({ "$oid": s }),
        (Value::String(s), Some(LeafType::Date)) => json!({ "$date": s }),
        _ => value.clone(),
    }
}
