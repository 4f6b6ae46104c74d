//! Sort clauses

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::errors::{QueryError, QueryResult};
use super::projection::Projection;
use super::record::{compare_values, get_field_value, RecordData};

/// One sort key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortClause {
    pub field: String,
    pub ascending: bool,
}

impl SortClause {
    pub fn new(field: impl Into<String>, ascending: bool) -> Self {
        Self {
            field: field.into(),
            ascending,
        }
    }

    pub fn asc(field: impl Into<String>) -> Self {
        Self::new(field, true)
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self::new(field, false)
    }
}

/// Ordered list of sort clauses; the first clause is the primary key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sort {
    clauses: Vec<SortClause>,
}

impl Sort {
    pub fn new(clauses: Vec<SortClause>) -> Self {
        Self { clauses }
    }

    pub fn clauses(&self) -> &[SortClause] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Fields the sort reads
    pub fn projection(&self) -> Projection {
        Projection::new(self.clauses.iter().map(|c| c.field.as_str()))
    }

    pub fn nest(&self, prefix: &str) -> Sort {
        if prefix.is_empty() {
            return self.clone();
        }
        self.replace_fields(|field| format!("{}:{}", prefix, field))
    }

    /// Strips the single relation prefix every clause shares
    pub fn unnest(&self) -> QueryResult<Sort> {
        let Some(first) = self.clauses.first() else {
            return Ok(self.clone());
        };
        let prefix = match first.field.split_once(':') {
            Some((prefix, _)) => format!("{}:", prefix),
            None => return Err(QueryError::malformed("Cannot unnest sort.")),
        };
        if !self.clauses.iter().all(|c| c.field.starts_with(&prefix)) {
            return Err(QueryError::malformed("Cannot unnest sort."));
        }
        Ok(self.replace_fields(|field| field[prefix.len()..].to_string()))
    }

    /// Same keys, opposite directions
    pub fn inverse(&self) -> Sort {
        Sort::new(
            self.clauses
                .iter()
                .map(|c| SortClause::new(c.field.clone(), !c.ascending))
                .collect(),
        )
    }

    pub fn replace_fields<F: Fn(&str) -> String>(&self, f: F) -> Sort {
        Sort::new(
            self.clauses
                .iter()
                .map(|c| SortClause::new(f(&c.field), c.ascending))
                .collect(),
        )
    }

    /// Stable in-memory sort following clause order
    pub fn apply(&self, mut records: Vec<RecordData>) -> Vec<RecordData> {
        records.sort_by(|a, b| self.compare(a, b));
        records
    }

    fn compare(&self, a: &RecordData, b: &RecordData) -> Ordering {
        for clause in &self.clauses {
            let ord = compare_values(
                get_field_value(a, &clause.field),
                get_field_value(b, &clause.field),
            );
            let ord = if clause.ascending { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

impl FromIterator<SortClause> for Sort {
    fn from_iter<T: IntoIterator<Item = SortClause>>(iter: T) -> Self {
        Sort::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn records(values: Value) -> Vec<RecordData> {
        values
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().unwrap().clone())
            .collect()
    }

    fn titles(records: &[RecordData]) -> Vec<&str> {
        records
            .iter()
            .map(|r| r["title"].as_str().unwrap())
            .collect()
    }

    #[test]
    fn test_nest_unnest() {
        let sort = Sort::new(vec![SortClause::asc("name"), SortClause::desc("address:city")]);
        assert_eq!(sort.nest("author").unnest().unwrap(), sort);
        assert_eq!(Sort::default().nest("x").unnest().unwrap(), Sort::default());
    }

    #[test]
    fn test_unnest_requires_one_prefix() {
        let sort = Sort::new(vec![SortClause::asc("a:x"), SortClause::asc("b:y")]);
        assert!(sort.unnest().is_err());
        let sort = Sort::new(vec![SortClause::asc("a:x"), SortClause::asc("y")]);
        assert!(sort.unnest().is_err());
    }

    #[test]
    fn test_inverse() {
        let sort = Sort::new(vec![SortClause::asc("a"), SortClause::desc("b")]);
        assert_eq!(
            sort.inverse(),
            Sort::new(vec![SortClause::desc("a"), SortClause::asc("b")])
        );
    }

    #[test]
    fn test_apply_multi_key_is_stable() {
        let rows = records(json!([
            {"title": "c", "year": 1990, "author": {"name": "b"}},
            {"title": "a", "year": 1980, "author": {"name": "a"}},
            {"title": "b", "year": 1990, "author": {"name": "a"}},
            {"title": "d", "year": 1990, "author": {"name": "a"}},
        ]));
        let sort = Sort::new(vec![SortClause::desc("year"), SortClause::asc("author:name")]);
        assert_eq!(titles(&sort.apply(rows)), vec!["b", "d", "c", "a"]);
    }

    #[test]
    fn test_apply_nulls_first_and_dates_as_instants() {
        let rows = records(json!([
            {"title": "eight", "at": "2024-01-01T10:00:00+02:00"},
            {"title": "none"},
            {"title": "nine", "at": "2024-01-01T09:00:00Z"},
            {"title": "null", "at": null},
        ]));
        let sort = Sort::new(vec![SortClause::asc("at")]);
        assert_eq!(
            titles(&sort.apply(rows)),
            vec!["none", "null", "eight", "nine"]
        );
    }

    #[test]
    fn test_projection() {
        let sort = Sort::new(vec![SortClause::asc("a"), SortClause::desc("b:c"), SortClause::asc("a")]);
        assert_eq!(sort.projection(), Projection::new(["a", "b:c"]));
    }
}
