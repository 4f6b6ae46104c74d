//! Record helpers shared by the in-memory evaluators

use serde_json::{Map, Value};
use std::cmp::Ordering;

use super::value_type::parse_instant;

/// A materialized record: relations are nested objects (or null)
pub type RecordData = Map<String, Value>;

/// Reads `a:b:c` from a nested record
pub fn get_field_value<'a>(record: &'a RecordData, path: &str) -> Option<&'a Value> {
    match path.split_once(':') {
        Some((relation, rest)) => match record.get(relation) {
            Some(Value::Object(sub)) => get_field_value(sub, rest),
            _ => None,
        },
        None => record.get(path),
    }
}

/// Total order over JSON values used by sorts and comparisons.
///
/// Absent < null < bool < number < string < array < object. Two strings that
/// both parse as datetimes compare as instants.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a_val), Some(b_val)) => {
            let type_order = |v: &Value| -> u8 {
                match v {
                    Value::Null => 0,
                    Value::Bool(_) => 1,
                    Value::Number(_) => 2,
                    Value::String(_) => 3,
                    Value::Array(_) => 4,
                    Value::Object(_) => 5,
                }
            };

            let a_type = type_order(a_val);
            let b_type = type_order(b_val);
            if a_type != b_type {
                return a_type.cmp(&b_type);
            }

            match (a_val, b_val) {
                (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
                (Value::Number(x), Value::Number(y)) => {
                    let x = x.as_f64().unwrap_or(0.0);
                    let y = y.as_f64().unwrap_or(0.0);
                    x.partial_cmp(&y).unwrap_or(Ordering::Equal)
                }
                (Value::String(x), Value::String(y)) => {
                    match (parse_instant(x), parse_instant(y)) {
                        (Some(x), Some(y)) => x.cmp(&y),
                        _ => x.cmp(y),
                    }
                }
                (Value::Array(x), Value::Array(y)) => {
                    for (xi, yi) in x.iter().zip(y.iter()) {
                        let ord = compare_values(Some(xi), Some(yi));
                        if ord != Ordering::Equal {
                            return ord;
                        }
                    }
                    x.len().cmp(&y.len())
                }
                _ => Ordering::Equal,
            }
        }
    }
}

/// Loose equality: numbers by value, datetimes by instant
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) | (Value::String(_), Value::String(_)) => {
            compare_values(Some(a), Some(b)) == Ordering::Equal
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> RecordData {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_get_nested_value() {
        let r = record(json!({"title": "Dune", "author": {"name": "Herbert"}}));
        assert_eq!(get_field_value(&r, "title"), Some(&json!("Dune")));
        assert_eq!(get_field_value(&r, "author:name"), Some(&json!("Herbert")));
        assert_eq!(get_field_value(&r, "author:age"), None);
        assert_eq!(get_field_value(&r, "publisher:name"), None);
    }

    #[test]
    fn test_type_ordering() {
        assert_eq!(compare_values(None, Some(&json!(null))), Ordering::Less);
        assert_eq!(compare_values(Some(&json!(null)), Some(&json!(false))), Ordering::Less);
        assert_eq!(compare_values(Some(&json!(1)), Some(&json!("a"))), Ordering::Less);
    }

    #[test]
    fn test_dates_compare_as_instants() {
        let a = json!("2024-01-01T10:00:00+02:00");
        let b = json!("2024-01-01T09:00:00Z");
        assert_eq!(compare_values(Some(&a), Some(&b)), Ordering::Less);
    }

    #[test]
    fn test_numbers_equal_across_representations() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(!values_equal(&json!(1), &json!("1")));
    }
}
