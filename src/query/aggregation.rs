//! Aggregations
//!
//! `Count`, `Sum`, `Avg`, `Max` or `Min` over an optional field, grouped by
//! zero or more fields. Date group keys can be truncated to a calendar bucket
//! computed in the caller's timezone.

use chrono::{Datelike, Duration};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use super::errors::{QueryError, QueryResult};
use super::projection::Projection;
use super::record::{compare_values, get_field_value, RecordData};
use super::value_type::parse_instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregationOperation {
    Count,
    Sum,
    Avg,
    Max,
    Min,
}

impl AggregationOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationOperation::Count => "Count",
            AggregationOperation::Sum => "Sum",
            AggregationOperation::Avg => "Avg",
            AggregationOperation::Max => "Max",
            AggregationOperation::Min => "Min",
        }
    }
}

impl fmt::Display for AggregationOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Calendar truncation applied to a date group key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DateOperation {
    Year,
    Quarter,
    Month,
    Week,
    Day,
}

impl DateOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            DateOperation::Year => "Year",
            DateOperation::Quarter => "Quarter",
            DateOperation::Month => "Month",
            DateOperation::Week => "Week",
            DateOperation::Day => "Day",
        }
    }

    /// Bucket of a date value, formatted `YYYY-MM-DD`.
    ///
    /// Values that are not dates yield `None`.
    pub fn bucket(&self, value: &Value, timezone: Tz) -> Option<String> {
        let instant = parse_instant(value.as_str()?)?;
        let date = instant.with_timezone(&timezone).date_naive();
        let start = match self {
            DateOperation::Year => date.with_ordinal(1)?,
            DateOperation::Quarter => {
                let month = (date.month0() / 3) * 3 + 1;
                date.with_day(1)?.with_month(month)?
            }
            DateOperation::Month => date.with_day(1)?,
            DateOperation::Week => {
                date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
            }
            DateOperation::Day => date,
        };
        Some(start.format("%Y-%m-%d").to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationGroup {
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<DateOperation>,
}

impl AggregationGroup {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            operation: None,
        }
    }

    pub fn by_date(field: impl Into<String>, operation: DateOperation) -> Self {
        Self {
            field: field.into(),
            operation: Some(operation),
        }
    }
}

/// An aggregation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawAggregation")]
pub struct Aggregation {
    pub operation: AggregationOperation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub groups: Vec<AggregationGroup>,
}

#[derive(Deserialize)]
struct RawAggregation {
    operation: AggregationOperation,
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    groups: Vec<AggregationGroup>,
}

impl TryFrom<RawAggregation> for Aggregation {
    type Error = QueryError;

    fn try_from(raw: RawAggregation) -> Result<Self, Self::Error> {
        Aggregation::new(raw.operation, raw.field, raw.groups)
    }
}

/// One output row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub value: Value,
    pub group: Map<String, Value>,
}

#[derive(Default)]
struct Summary {
    group: Map<String, Value>,
    star_count: u64,
    count: u64,
    sum: f64,
    min: Option<Value>,
    max: Option<Value>,
}

impl Aggregation {
    /// Fails unless a field is given for every operation but `Count`
    pub fn new(
        operation: AggregationOperation,
        field: Option<String>,
        groups: Vec<AggregationGroup>,
    ) -> QueryResult<Self> {
        if field.is_none() && operation != AggregationOperation::Count {
            return Err(QueryError::malformed(format!(
                "A field must be provided to aggregate with '{}'",
                operation
            )));
        }
        Ok(Self {
            operation,
            field,
            groups,
        })
    }

    /// `Count` of records
    pub fn count() -> Self {
        Self {
            operation: AggregationOperation::Count,
            field: None,
            groups: Vec::new(),
        }
    }

    pub fn with_group(mut self, group: AggregationGroup) -> Self {
        self.groups.push(group);
        self
    }

    /// Fields read by the aggregation
    pub fn projection(&self) -> Projection {
        Projection::new(
            self.field
                .iter()
                .map(String::as_str)
                .chain(self.groups.iter().map(|g| g.field.as_str())),
        )
    }

    pub fn replace_fields<F: Fn(&str) -> String>(&self, f: F) -> Aggregation {
        Aggregation {
            operation: self.operation,
            field: self.field.as_deref().map(&f),
            groups: self
                .groups
                .iter()
                .map(|g| AggregationGroup {
                    field: f(&g.field),
                    operation: g.operation,
                })
                .collect(),
        }
    }

    pub fn nest(&self, prefix: &str) -> Aggregation {
        if prefix.is_empty() {
            return self.clone();
        }
        self.replace_fields(|field| format!("{}:{}", prefix, field))
    }

    /// Aggregates materialized records; rows come out by value, descending
    pub fn apply(
        &self,
        records: &[RecordData],
        timezone: Tz,
        limit: Option<usize>,
    ) -> Vec<AggregateResult> {
        let mut summaries: Vec<Summary> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for record in records {
            let group = self.group_of(record, timezone);
            let key = Value::Object(group.clone()).to_string();
            let slot = *index.entry(key).or_insert_with(|| {
                summaries.push(Summary {
                    group,
                    ..Summary::default()
                });
                summaries.len() - 1
            });
            self.accumulate(&mut summaries[slot], record);
        }

        let mut rows: Vec<AggregateResult> = summaries
            .into_iter()
            .map(|summary| AggregateResult {
                value: self.finish(&summary),
                group: summary.group,
            })
            .collect();

        rows.sort_by(|a, b| compare_values(Some(&b.value), Some(&a.value)));
        if let Some(limit) = limit {
            rows.truncate(limit);
        }
        rows
    }

    fn group_of(&self, record: &RecordData, timezone: Tz) -> Map<String, Value> {
        let mut group = Map::new();
        for spec in &self.groups {
            let value = get_field_value(record, &spec.field).cloned().unwrap_or(Value::Null);
            let value = match spec.operation {
                Some(operation) => operation
                    .bucket(&value, timezone)
                    .map(Value::String)
                    .unwrap_or(Value::Null),
                None => value,
            };
            group.insert(spec.field.clone(), value);
        }
        group
    }

    fn accumulate(&self, summary: &mut Summary, record: &RecordData) {
        summary.star_count += 1;
        let Some(field) = &self.field else {
            return;
        };
        let value = match get_field_value(record, field) {
            Some(value) if !value.is_null() => value,
            _ => return,
        };

        summary.count += 1;
        if let Some(n) = value.as_f64() {
            summary.sum += n;
        }
        if summary
            .min
            .as_ref()
            .map_or(true, |min| compare_values(Some(value), Some(min)) == Ordering::Less)
        {
            summary.min = Some(value.clone());
        }
        if summary
            .max
            .as_ref()
            .map_or(true, |max| compare_values(Some(value), Some(max)) == Ordering::Greater)
        {
            summary.max = Some(value.clone());
        }
    }

    fn finish(&self, summary: &Summary) -> Value {
        match self.operation {
            AggregationOperation::Count if self.field.is_some() => Value::from(summary.count),
            AggregationOperation::Count => Value::from(summary.star_count),
            AggregationOperation::Sum => number(summary.sum),
            AggregationOperation::Avg if summary.count > 0 => {
                number(summary.sum / summary.count as f64)
            }
            AggregationOperation::Avg => Value::Null,
            AggregationOperation::Max => summary.max.clone().unwrap_or(Value::Null),
            AggregationOperation::Min => summary.min.clone().unwrap_or(Value::Null),
        }
    }
}

/// Integral results stay integers
fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}
