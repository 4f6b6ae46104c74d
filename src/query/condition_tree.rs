//! Condition trees
//!
//! A condition tree is either a leaf `(field, operator, value)` or a branch
//! combining children with `And` / `Or`. An empty `And` matches everything,
//! an empty `Or` matches nothing.

use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::fmt;

use crate::schema::Collection;

use super::equivalence::ConditionTreeEquivalent;
use super::errors::{QueryError, QueryResult};
use super::operators::Operator;
use super::path::resolve_column;
use super::projection::Projection;
use super::record::{compare_values, get_field_value, values_equal, RecordData};

/// Boolean aggregator of a branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Aggregator {
    And,
    Or,
}

impl Aggregator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregator::And => "And",
            Aggregator::Or => "Or",
        }
    }

    fn parse(name: &str) -> Option<Aggregator> {
        match name {
            "And" | "and" => Some(Aggregator::And),
            "Or" | "or" => Some(Aggregator::Or),
            _ => None,
        }
    }

    fn inverse(self) -> Aggregator {
        match self {
            Aggregator::And => Aggregator::Or,
            Aggregator::Or => Aggregator::And,
        }
    }
}

impl fmt::Display for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionTreeLeaf {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionTreeBranch {
    pub aggregator: Aggregator,
    pub conditions: Vec<ConditionTree>,
}

/// Recursive boolean expression over record fields.
///
/// Equality is structural: two trees are equal when they have the same shape,
/// aggregators, fields, operators and values.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionTree {
    Leaf(ConditionTreeLeaf),
    Branch(ConditionTreeBranch),
}

/// Operators the in-memory evaluator handles without rewriting
pub const MATCHABLE_OPERATORS: &[Operator] = &[
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
    Operator::Match,
    Operator::NotContains,
    Operator::NotIContains,
    Operator::LongerThan,
    Operator::ShorterThan,
];

impl ConditionTreeLeaf {
    pub fn new(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    /// Same leaf, other operator and value
    pub fn override_with(&self, operator: Operator, value: Value) -> ConditionTree {
        ConditionTree::Leaf(ConditionTreeLeaf::new(self.field.clone(), operator, value))
    }

    /// Values of list operators, or the scalar as a single-element list
    pub fn value_list(&self) -> Vec<Value> {
        match &self.value {
            Value::Array(items) => items.clone(),
            other => vec![other.clone()],
        }
    }

    fn matches_native(&self, value: Option<&Value>) -> QueryResult<bool> {
        let actual = value.unwrap_or(&Value::Null);
        let matched = match self.operator {
            Operator::Equal => values_equal(actual, &self.value),
            Operator::NotEqual => !values_equal(actual, &self.value),
            Operator::LessThan
            | Operator::GreaterThan
            | Operator::LessThanOrEqual
            | Operator::GreaterThanOrEqual => {
                if actual.is_null() {
                    return Ok(false);
                }
                let ord = compare_values(Some(actual), Some(&self.value));
                match self.operator {
                    Operator::LessThan => ord.is_lt(),
                    Operator::GreaterThan => ord.is_gt(),
                    Operator::LessThanOrEqual => ord.is_le(),
                    _ => ord.is_ge(),
                }
            }
            Operator::In => self.value_list().iter().any(|v| values_equal(actual, v)),
            Operator::NotIn => !self.value_list().iter().any(|v| values_equal(actual, v)),
            Operator::IncludesAll | Operator::IncludesNone => {
                let items = match actual {
                    Value::Array(items) => items.clone(),
                    Value::Null => Vec::new(),
                    other => vec![other.clone()],
                };
                let contains = |v: &Value| items.iter().any(|item| values_equal(item, v));
                if self.operator == Operator::IncludesAll {
                    self.value_list().iter().all(contains)
                } else {
                    !self.value_list().iter().any(contains)
                }
            }
            Operator::Match => {
                let pattern = self.value.as_str().ok_or_else(|| {
                    QueryError::malformed(format!("Match on '{}' expects a pattern", self.field))
                })?;
                let regex = regex::Regex::new(pattern).map_err(|e| {
                    QueryError::malformed(format!("Invalid pattern '{}': {}", pattern, e))
                })?;
                actual.as_str().map_or(false, |s| regex.is_match(s))
            }
            Operator::NotContains | Operator::NotIContains => {
                let needle = self.value.as_str().unwrap_or_default();
                match actual.as_str() {
                    Some(s) if self.operator == Operator::NotIContains => {
                        !s.to_lowercase().contains(&needle.to_lowercase())
                    }
                    Some(s) => !s.contains(needle),
                    None => true,
                }
            }
            Operator::LongerThan | Operator::ShorterThan => {
                let limit = self.value.as_u64().ok_or_else(|| {
                    QueryError::malformed(format!("'{}' expects a length", self.operator))
                })?;
                match actual.as_str() {
                    Some(s) if self.operator == Operator::LongerThan => {
                        s.chars().count() as u64 > limit
                    }
                    Some(s) => (s.chars().count() as u64) < limit,
                    None => false,
                }
            }
            other => {
                return Err(QueryError::unsupported(format!(
                    "Operator '{}' cannot be evaluated in memory",
                    other
                )))
            }
        };
        Ok(matched)
    }
}

impl ConditionTree {
    pub fn leaf(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        ConditionTree::Leaf(ConditionTreeLeaf::new(field, operator, value))
    }

    pub fn branch(aggregator: Aggregator, conditions: Vec<ConditionTree>) -> Self {
        ConditionTree::Branch(ConditionTreeBranch {
            aggregator,
            conditions,
        })
    }

    pub fn and(conditions: Vec<ConditionTree>) -> Self {
        Self::branch(Aggregator::And, conditions)
    }

    pub fn or(conditions: Vec<ConditionTree>) -> Self {
        Self::branch(Aggregator::Or, conditions)
    }

    /// A tree matching every record
    pub fn match_all() -> Self {
        Self::and(Vec::new())
    }

    /// A tree matching no record
    pub fn match_none() -> Self {
        Self::or(Vec::new())
    }

    /// `Or` of the trees, merging nested `Or` branches
    pub fn union<I: IntoIterator<Item = ConditionTree>>(trees: I) -> Self {
        Self::group(Aggregator::Or, trees)
    }

    /// `And` of the trees, merging nested `And` branches
    pub fn intersect<I: IntoIterator<Item = ConditionTree>>(trees: I) -> Self {
        Self::group(Aggregator::And, trees)
    }

    fn group<I: IntoIterator<Item = ConditionTree>>(aggregator: Aggregator, trees: I) -> Self {
        let mut conditions = Vec::new();
        for tree in trees {
            match tree {
                ConditionTree::Branch(branch)
                    if branch.aggregator == aggregator || branch.conditions.len() == 1 =>
                {
                    conditions.extend(branch.conditions)
                }
                other => conditions.push(other),
            }
        }
        if conditions.len() == 1 {
            conditions.remove(0)
        } else {
            Self::branch(aggregator, conditions)
        }
    }

    /// Parses the plain JSON form:
    /// `{"field", "operator", "value"}` or `{"aggregator", "conditions"}`.
    pub fn from_plain(plain: &Value) -> QueryResult<Self> {
        let map = plain
            .as_object()
            .ok_or_else(|| QueryError::malformed("Condition tree must be a JSON object"))?;

        if let Some(aggregator) = map.get("aggregator") {
            let name = match aggregator {
                Value::String(name) => name.clone(),
                other => other.to_string(),
            };
            let aggregator = Aggregator::parse(&name).ok_or_else(|| {
                QueryError::malformed(format!(
                    "Invalid aggregator '{}', expected 'And' or 'Or'",
                    name
                ))
            })?;
            let conditions = map
                .get("conditions")
                .and_then(Value::as_array)
                .ok_or_else(|| QueryError::malformed("Branch 'conditions' must be an array"))?;
            let conditions = conditions
                .iter()
                .map(Self::from_plain)
                .collect::<QueryResult<Vec<_>>>()?;
            return Ok(Self::branch(aggregator, conditions));
        }

        let field = map
            .get("field")
            .and_then(Value::as_str)
            .ok_or_else(|| QueryError::malformed("Condition leaf is missing 'field'"))?;
        let operator_name = map
            .get("operator")
            .and_then(Value::as_str)
            .ok_or_else(|| QueryError::malformed("Condition leaf is missing 'operator'"))?;
        let operator = Operator::from_name(operator_name).ok_or_else(|| {
            QueryError::malformed(format!("Unknown operator '{}'", operator_name))
        })?;
        let value = map.get("value").cloned().unwrap_or(Value::Null);

        Ok(Self::leaf(field, operator, value))
    }

    pub fn to_plain(&self) -> Value {
        match self {
            ConditionTree::Leaf(leaf) => json!({
                "field": leaf.field,
                "operator": leaf.operator.as_str(),
                "value": leaf.value,
            }),
            ConditionTree::Branch(branch) => {
                let mut map = Map::new();
                map.insert("aggregator".into(), json!(branch.aggregator.as_str()));
                map.insert(
                    "conditions".into(),
                    Value::Array(branch.conditions.iter().map(Self::to_plain).collect()),
                );
                Value::Object(map)
            }
        }
    }

    pub fn for_each_leaf<F: FnMut(&ConditionTreeLeaf)>(&self, f: &mut F) {
        match self {
            ConditionTree::Leaf(leaf) => f(leaf),
            ConditionTree::Branch(branch) => {
                for child in &branch.conditions {
                    child.for_each_leaf(f);
                }
            }
        }
    }

    pub fn every_leaf<F: Fn(&ConditionTreeLeaf) -> bool>(&self, f: &F) -> bool {
        match self {
            ConditionTree::Leaf(leaf) => f(leaf),
            ConditionTree::Branch(branch) => branch.conditions.iter().all(|c| c.every_leaf(f)),
        }
    }

    pub fn some_leaf<F: Fn(&ConditionTreeLeaf) -> bool>(&self, f: &F) -> bool {
        match self {
            ConditionTree::Leaf(leaf) => f(leaf),
            ConditionTree::Branch(branch) => branch.conditions.iter().any(|c| c.some_leaf(f)),
        }
    }

    /// Rebuilds the tree, substituting every leaf with the handler's result
    pub fn replace_leaves<F>(&self, handler: &mut F) -> QueryResult<ConditionTree>
    where
        F: FnMut(&ConditionTreeLeaf) -> QueryResult<ConditionTree>,
    {
        match self {
            ConditionTree::Leaf(leaf) => handler(leaf),
            ConditionTree::Branch(branch) => {
                let conditions = branch
                    .conditions
                    .iter()
                    .map(|c| c.replace_leaves(handler))
                    .collect::<QueryResult<Vec<_>>>()?;
                Ok(Self::branch(branch.aggregator, conditions))
            }
        }
    }

    pub fn replace_fields<F: Fn(&str) -> String>(&self, f: &F) -> ConditionTree {
        match self {
            ConditionTree::Leaf(leaf) => {
                Self::leaf(f(&leaf.field), leaf.operator, leaf.value.clone())
            }
            ConditionTree::Branch(branch) => Self::branch(
                branch.aggregator,
                branch.conditions.iter().map(|c| c.replace_fields(f)).collect(),
            ),
        }
    }

    /// Re-roots every field under `prefix:`
    pub fn nest(&self, prefix: &str) -> ConditionTree {
        if prefix.is_empty() {
            return self.clone();
        }
        self.replace_fields(&|field| format!("{}:{}", prefix, field))
    }

    /// Strips the relation prefix shared by every field
    pub fn unnest(&self) -> QueryResult<ConditionTree> {
        let mut prefix: Option<String> = None;
        let mut shared = true;
        self.for_each_leaf(&mut |leaf| {
            let head = leaf.field.split_once(':').map(|(head, _)| head.to_string());
            match (&prefix, head) {
                (_, None) => shared = false,
                (None, Some(head)) => prefix = Some(head),
                (Some(p), Some(head)) if *p != head => shared = false,
                _ => {}
            }
        });

        match prefix {
            Some(prefix) if shared => {
                let strip = format!("{}:", prefix);
                Ok(self.replace_fields(&|field| field[strip.len()..].to_string()))
            }
            _ => Err(QueryError::malformed("Cannot unnest condition tree.")),
        }
    }

    /// Logical negation
    pub fn inverse(&self) -> QueryResult<ConditionTree> {
        match self {
            ConditionTree::Branch(branch) => {
                let conditions = branch
                    .conditions
                    .iter()
                    .map(Self::inverse)
                    .collect::<QueryResult<Vec<_>>>()?;
                Ok(Self::branch(branch.aggregator.inverse(), conditions))
            }
            ConditionTree::Leaf(leaf) => {
                let inverted = match leaf.operator {
                    Operator::Equal => Operator::NotEqual,
                    Operator::NotEqual => Operator::Equal,
                    Operator::In => Operator::NotIn,
                    Operator::NotIn => Operator::In,
                    Operator::Contains => Operator::NotContains,
                    Operator::NotContains => Operator::Contains,
                    Operator::IContains => Operator::NotIContains,
                    Operator::NotIContains => Operator::IContains,
                    Operator::Present => Operator::Blank,
                    Operator::Blank => Operator::Present,
                    Operator::LessThan => Operator::GreaterThanOrEqual,
                    Operator::GreaterThanOrEqual => Operator::LessThan,
                    Operator::GreaterThan => Operator::LessThanOrEqual,
                    Operator::LessThanOrEqual => Operator::GreaterThan,
                    other => {
                        return Err(QueryError::unsupported(format!(
                            "Operator '{}' cannot be inverted.",
                            other
                        )))
                    }
                };
                Ok(leaf.override_with(inverted, leaf.value.clone()))
            }
        }
    }

    /// Fields referenced by the leaves
    pub fn projection(&self) -> Projection {
        let mut fields = Vec::new();
        self.for_each_leaf(&mut |leaf| fields.push(leaf.field.clone()));
        Projection::new(fields)
    }

    /// Evaluates the tree against a materialized record.
    ///
    /// Operators the evaluator does not know natively are rewritten through
    /// the equivalence rules first, using the column type from `collection`.
    pub fn matches(&self, record: &RecordData, collection: Collection<'_>, timezone: Tz) -> QueryResult<bool> {
        match self {
            ConditionTree::Branch(branch) => {
                for child in &branch.conditions {
                    let matched = child.matches(record, collection, timezone)?;
                    match branch.aggregator {
                        Aggregator::And if !matched => return Ok(false),
                        Aggregator::Or if matched => return Ok(true),
                        _ => {}
                    }
                }
                Ok(branch.aggregator == Aggregator::And)
            }
            ConditionTree::Leaf(leaf) => {
                if MATCHABLE_OPERATORS.contains(&leaf.operator) {
                    return leaf.matches_native(get_field_value(record, &leaf.field));
                }
                let column = resolve_column(collection, &leaf.field)?;
                let allowed: BTreeSet<Operator> = MATCHABLE_OPERATORS.iter().copied().collect();
                let rewritten = ConditionTreeEquivalent::get_equivalent_tree(
                    leaf,
                    &allowed,
                    column.column_type,
                    timezone,
                )?;
                rewritten.matches(record, collection, timezone)
            }
        }
    }

    /// Keeps the records matching the tree, in order
    pub fn apply(
        &self,
        records: Vec<RecordData>,
        collection: Collection<'_>,
        timezone: Tz,
    ) -> QueryResult<Vec<RecordData>> {
        let mut kept = Vec::with_capacity(records.len());
        for record in records {
            if self.matches(&record, collection, timezone)? {
                kept.push(record);
            }
        }
        Ok(kept)
    }
}

impl Serialize for ConditionTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_plain().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ConditionTree {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let plain = Value::deserialize(deserializer)?;
        ConditionTree::from_plain(&plain).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CollectionSchema, ColumnSchema, ColumnType, Datasource};

    fn record(value: Value) -> RecordData {
        value.as_object().cloned().unwrap()
    }

    fn books() -> Datasource {
        Datasource::new().with_collection(
            CollectionSchema::new("books")
                .with_column("title", ColumnSchema::new(ColumnType::String))
                .with_column("pages", ColumnSchema::new(ColumnType::Number)),
        )
    }

    #[test]
    fn test_plain_round_shape() {
        let plain = json!({
            "aggregator": "And",
            "conditions": [
                {"field": "title", "operator": "Equal", "value": "Dune"},
                {"field": "pages", "operator": "greater_than", "value": 100}
            ]
        });
        let tree = ConditionTree::from_plain(&plain).unwrap();
        let expected = ConditionTree::and(vec![
            ConditionTree::leaf("title", Operator::Equal, json!("Dune")),
            ConditionTree::leaf("pages", Operator::GreaterThan, json!(100)),
        ]);
        assert_eq!(tree, expected);
        assert_eq!(tree.to_plain()["conditions"][1]["operator"], "GreaterThan");
    }

    #[test]
    fn test_invalid_aggregator_is_malformed() {
        let plain = json!({"aggregator": "Xor", "conditions": []});
        let err = ConditionTree::from_plain(&plain).unwrap_err();
        assert!(matches!(err, QueryError::Malformed(_)));
    }

    #[test]
    fn test_missing_conditions_is_malformed() {
        let plain = json!({"aggregator": "And"});
        assert!(ConditionTree::from_plain(&plain).is_err());
    }

    #[test]
    fn test_nest_unnest() {
        let tree = ConditionTree::or(vec![
            ConditionTree::leaf("name", Operator::Equal, json!("a")),
            ConditionTree::leaf("age", Operator::Present, Value::Null),
        ]);
        let nested = tree.nest("author");
        assert!(nested.every_leaf(&|leaf| leaf.field.starts_with("author:")));
        assert_eq!(nested.unnest().unwrap(), tree);
    }

    #[test]
    fn test_unnest_requires_shared_prefix() {
        let tree = ConditionTree::and(vec![
            ConditionTree::leaf("author:name", Operator::Equal, json!("a")),
            ConditionTree::leaf("publisher:name", Operator::Equal, json!("b")),
        ]);
        assert!(tree.unnest().is_err());
        assert!(ConditionTree::leaf("title", Operator::Present, Value::Null)
            .unnest()
            .is_err());
    }

    #[test]
    fn test_union_flattens() {
        let a = ConditionTree::leaf("a", Operator::Equal, json!(1));
        let b = ConditionTree::leaf("b", Operator::Equal, json!(2));
        let c = ConditionTree::leaf("c", Operator::Equal, json!(3));
        let tree = ConditionTree::union(vec![ConditionTree::or(vec![a.clone(), b.clone()]), c.clone()]);
        assert_eq!(tree, ConditionTree::or(vec![a.clone(), b, c]));
        assert_eq!(ConditionTree::intersect(vec![a.clone()]), a);
    }

    #[test]
    fn test_inverse() {
        let tree = ConditionTree::and(vec![
            ConditionTree::leaf("a", Operator::Equal, json!(1)),
            ConditionTree::leaf("b", Operator::In, json!([1, 2])),
        ]);
        let inverse = tree.inverse().unwrap();
        assert_eq!(
            inverse,
            ConditionTree::or(vec![
                ConditionTree::leaf("a", Operator::NotEqual, json!(1)),
                ConditionTree::leaf("b", Operator::NotIn, json!([1, 2])),
            ])
        );
        assert!(ConditionTree::leaf("a", Operator::Today, Value::Null).inverse().is_err());
    }

    #[test]
    fn test_projection_lists_fields() {
        let tree = ConditionTree::and(vec![
            ConditionTree::leaf("title", Operator::Equal, json!("a")),
            ConditionTree::leaf("author:name", Operator::Equal, json!("b")),
            ConditionTree::leaf("title", Operator::Present, Value::Null),
        ]);
        assert_eq!(tree.projection(), Projection::new(["title", "author:name"]));
    }

    #[test]
    fn test_empty_branches() {
        let ds = books();
        let collection = ds.collection("books").unwrap();
        let r = record(json!({"title": "Dune"}));
        assert!(ConditionTree::match_all().matches(&r, collection, Tz::UTC).unwrap());
        assert!(!ConditionTree::match_none().matches(&r, collection, Tz::UTC).unwrap());
    }

    #[test]
    fn test_apply_rewrites_unknown_operators() {
        let ds = books();
        let collection = ds.collection("books").unwrap();
        let records = vec![
            record(json!({"title": "Dune", "pages": 412})),
            record(json!({"title": "Dune Messiah", "pages": 256})),
            record(json!({"title": "Hyperion", "pages": null})),
        ];

        let tree = ConditionTree::leaf("title", Operator::StartsWith, json!("Dune"));
        let kept = tree.apply(records.clone(), collection, Tz::UTC).unwrap();
        assert_eq!(kept.len(), 2);

        let tree = ConditionTree::leaf("pages", Operator::Missing, Value::Null);
        let kept = tree.apply(records.clone(), collection, Tz::UTC).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0]["title"], "Hyperion");

        let tree = ConditionTree::leaf("title", Operator::IContains, json!("MESS"));
        let kept = tree.apply(records, collection, Tz::UTC).unwrap();
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_serde_uses_plain_form() {
        let tree = ConditionTree::leaf("title", Operator::Equal, json!("Dune"));
        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(json, json!({"field": "title", "operator": "Equal", "value": "Dune"}));
        let back: ConditionTree = serde_json::from_value(json).unwrap();
        assert_eq!(back, tree);
    }
}
