//! Runtime value typing
//!
//! Classifies a JSON value in the context of a column type, so that a string
//! can be told apart as a uuid, a date or an enum member.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value;
use std::fmt;

use crate::schema::ColumnType;

/// Runtime type of a condition value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Boolean,
    Binary,
    Date,
    Dateonly,
    Enum,
    Json,
    Number,
    Point,
    String,
    Timeonly,
    Uuid,
    Null,
    EmptyArray,
    ArrayOfBoolean,
    ArrayOfBinary,
    ArrayOfEnum,
    ArrayOfNumber,
    ArrayOfString,
    ArrayOfUuid,
    /// Heterogeneous or nested array
    MixedArray,
}

impl ValueType {
    /// Classify `value` for a column of type `context`
    pub fn of(value: &Value, context: ColumnType) -> ValueType {
        match value {
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Boolean,
            Value::Number(_) => ValueType::Number,
            Value::String(s) => Self::of_str(s, context),
            Value::Array(items) => Self::of_array(items, context),
            Value::Object(_) if context == ColumnType::Json => ValueType::Json,
            Value::Object(map) if context == ColumnType::Point => {
                if map.get("type").and_then(Value::as_str) == Some("Point") {
                    ValueType::Point
                } else {
                    ValueType::Json
                }
            }
            Value::Object(_) => ValueType::Json,
        }
    }

    fn of_str(s: &str, context: ColumnType) -> ValueType {
        match context {
            ColumnType::String => ValueType::String,
            ColumnType::Enum => ValueType::Enum,
            ColumnType::Binary => ValueType::Binary,
            ColumnType::Json => ValueType::Json,
            _ => {
                if uuid::Uuid::parse_str(s).is_ok() {
                    ValueType::Uuid
                } else if is_date_only(s) {
                    ValueType::Dateonly
                } else if is_datetime(s) {
                    ValueType::Date
                } else if context == ColumnType::Timeonly && is_time_only(s) {
                    ValueType::Timeonly
                } else if context == ColumnType::Point && is_point(s) {
                    ValueType::Point
                } else {
                    ValueType::String
                }
            }
        }
    }

    fn of_array(items: &[Value], context: ColumnType) -> ValueType {
        if items.is_empty() {
            return ValueType::EmptyArray;
        }
        if context == ColumnType::Json {
            return ValueType::Json;
        }
        if context == ColumnType::Point
            && items.len() == 2
            && items.iter().all(Value::is_number)
        {
            return ValueType::Point;
        }

        let first = Self::of(&items[0], context);
        if !items.iter().all(|item| Self::of(item, context) == first) {
            return ValueType::MixedArray;
        }
        match first {
            ValueType::Boolean => ValueType::ArrayOfBoolean,
            ValueType::Binary => ValueType::ArrayOfBinary,
            ValueType::Enum => ValueType::ArrayOfEnum,
            ValueType::Number => ValueType::ArrayOfNumber,
            ValueType::String => ValueType::ArrayOfString,
            ValueType::Uuid => ValueType::ArrayOfUuid,
            _ => ValueType::MixedArray,
        }
    }

    /// Scalar types a column accepts for column-typed operators
    pub fn allowed_for(column_type: ColumnType) -> &'static [ValueType] {
        match column_type {
            ColumnType::Boolean => &[ValueType::Boolean, ValueType::Null],
            ColumnType::Binary => &[ValueType::Binary, ValueType::Null],
            ColumnType::Date | ColumnType::Dateonly => {
                &[ValueType::Date, ValueType::Dateonly, ValueType::Null]
            }
            ColumnType::Enum => &[ValueType::Enum, ValueType::Null],
            ColumnType::Json => &[ValueType::Json, ValueType::Number, ValueType::Boolean, ValueType::Null],
            ColumnType::Number => &[ValueType::Number, ValueType::Null],
            ColumnType::Point => &[ValueType::Point, ValueType::Null],
            ColumnType::String => &[ValueType::String, ValueType::Null],
            ColumnType::Timeonly => &[ValueType::Timeonly, ValueType::Null],
            ColumnType::Uuid => &[ValueType::Uuid, ValueType::Null],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Boolean => "Boolean",
            ValueType::Binary => "Binary",
            ValueType::Date => "Date",
            ValueType::Dateonly => "Dateonly",
            ValueType::Enum => "Enum",
            ValueType::Json => "Json",
            ValueType::Number => "Number",
            ValueType::Point => "Point",
            ValueType::String => "String",
            ValueType::Timeonly => "Timeonly",
            ValueType::Uuid => "Uuid",
            ValueType::Null => "Null",
            ValueType::EmptyArray => "EmptyArray",
            ValueType::ArrayOfBoolean => "ArrayOfBoolean",
            ValueType::ArrayOfBinary => "ArrayOfBinary",
            ValueType::ArrayOfEnum => "ArrayOfEnum",
            ValueType::ArrayOfNumber => "ArrayOfNumber",
            ValueType::ArrayOfString => "ArrayOfString",
            ValueType::ArrayOfUuid => "ArrayOfUuid",
            ValueType::MixedArray => "MixedArray",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub fn format_value_types(types: &[ValueType]) -> String {
    let names: Vec<&str> = types.iter().map(|t| t.as_str()).collect();
    format!("[{}]", names.join(", "))
}

fn is_date_only(s: &str) -> bool {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

/// RFC 3339, or an ISO datetime without offset
pub(crate) fn is_datetime(s: &str) -> bool {
    parse_instant(s).is_some()
}

fn is_time_only(s: &str) -> bool {
    NaiveTime::parse_from_str(s, "%H:%M:%S").is_ok()
        || NaiveTime::parse_from_str(s, "%H:%M:%S%.f").is_ok()
        || NaiveTime::parse_from_str(s, "%H:%M").is_ok()
}

fn is_point(s: &str) -> bool {
    let parts: Vec<&str> = s.split(',').collect();
    parts.len() == 2 && parts.iter().all(|p| p.trim().parse::<f64>().is_ok())
}

/// Parses a datetime string into an UTC instant.
///
/// Datetimes without an offset, and bare dates, are read as UTC.
pub(crate) fn parse_instant(s: &str) -> Option<DateTime<chrono::Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&chrono::Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}
