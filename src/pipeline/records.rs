//! Result normalisation

use serde_json::Value;

use crate::query::{QueryError, RecordData};

use super::errors::PipelineResult;
use super::stage::MISSING_RECORD_TAG;

/// Turns raw store results back into records.
///
/// The missing tag becomes `null`, and so does any object whose `_id` is the
/// tag: that embedded record did not exist.
pub fn normalize_records(values: Vec<Value>) -> PipelineResult<Vec<RecordData>> {
    values
        .into_iter()
        .map(|value| match value {
            Value::Object(record) => Ok(normalize_object(record)),
            other => Err(QueryError::malformed(format!(
                "Expected a record object, got '{}'",
                other
            ))
            .into()),
        })
        .collect()
}

fn normalize_object(record: RecordData) -> RecordData {
    record
        .into_iter()
        .map(|(key, value)| (key, normalize(value)))
        .collect()
}

fn normalize(value: Value) -> Value {
    match value {
        Value::String(s) if s == MISSING_RECORD_TAG => Value::Null,
        Value::Object(record) if is_missing_record(&record) => Value::Null,
        Value::Object(record) => Value::Object(normalize_object(record)),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize).collect()),
        other => other,
    }
}

fn is_missing_record(record: &RecordData) -> bool {
    matches!(record.get("_id"), Some(Value::String(id)) if id == MISSING_RECORD_TAG)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_tags_become_null() {
        let records = normalize_records(vec![json!({
            "_id": "b1",
            "author": {"_id": MISSING_RECORD_TAG, "parent_id": MISSING_RECORD_TAG},
            "subtitle": {"content": MISSING_RECORD_TAG},
            "tags": ["a", MISSING_RECORD_TAG]
        })])
        .unwrap();

        assert_eq!(
            Value::Object(records[0].clone()),
            json!({
                "_id": "b1",
                "author": null,
                "subtitle": {"content": null},
                "tags": ["a", null]
            })
        );
    }

    #[test]
    fn test_present_records_are_kept() {
        let records = normalize_records(vec![json!({"author": {"_id": "b1.author", "name": "Doe"}})]).unwrap();
        assert_eq!(records[0]["author"]["name"], json!("Doe"));
    }

    #[test]
    fn test_non_object_is_rejected() {
        let err = normalize_records(vec![json!(42)]).unwrap_err();
        assert_eq!(err.code(), "DQ_MALFORMED");
    }
}
