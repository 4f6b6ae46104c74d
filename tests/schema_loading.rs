//! Schema Loading Tests
//!
//! Model descriptors read from disk drive the whole chain:
//! - Loading is deterministic and rejects inconsistent descriptors
//! - Loaded models derive the same collections as built ones
//! - The CLI compiles a query file against loaded models

use std::fs;
use std::path::{Path, PathBuf};

use docquery::cli::{run_command, CliErrorCode, Command};
use docquery::pipeline::build_datasource;
use docquery::schema::{SchemaLoader, SchemaError};
use serde_json::{json, Value};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn write(dir: &Path, name: &str, content: Value) {
    fs::write(dir.join(name), content.to_string()).unwrap();
}

fn library_dir(tmp: &TempDir) -> PathBuf {
    let dir = tmp.path().join("models");
    fs::create_dir(&dir).unwrap();
    write(
        &dir,
        "book.json",
        json!({
            "name": "Book",
            "collection": "books",
            "fields": {
                "title": {"kind": "leaf", "type": "String"},
                "owner": {"kind": "leaf", "type": "ObjectId", "reference": "User"},
                "author": {"kind": "object", "fields": {
                    "name": {"kind": "leaf", "type": "String"}
                }},
                "reviews": {"kind": "array", "items": {"kind": "object", "fields": {
                    "rating": {"kind": "leaf", "type": "Number"}
                }}}
            },
            "as_models": ["author", "reviews"]
        }),
    );
    write(
        &dir,
        "user.json",
        json!({
            "name": "User",
            "collection": "users",
            "fields": {
                "email": {"kind": "leaf", "type": "String"},
                "role": {"kind": "leaf", "type": "String", "enum_values": ["admin", "reader"]}
            }
        }),
    );
    dir
}

// =============================================================================
// Loading
// =============================================================================

#[test]
fn test_loading_is_deterministic() {
    let tmp = TempDir::new().unwrap();
    let dir = library_dir(&tmp);

    let first = SchemaLoader::new(&dir).load_all().unwrap();
    for _ in 0..10 {
        let again = SchemaLoader::new(&dir).load_all().unwrap();
        assert_eq!(again.collection_names(), first.collection_names());
    }
    assert_eq!(
        first.collection_names(),
        vec!["Book", "Book_author", "Book_reviews", "User"]
    );
}

#[test]
fn test_loaded_models_derive_collections() {
    let tmp = TempDir::new().unwrap();
    let models = SchemaLoader::new(&library_dir(&tmp)).load_all().unwrap();
    let datasource = build_datasource(&models).unwrap();

    let book = datasource.collection("Book").unwrap();
    assert!(book.schema().field("owner__many_to_one").is_some());
    assert!(book.schema().field("author").is_some());
    assert_eq!(book.schema().primary_keys(), vec!["_id"]);

    let reviews = datasource.collection("Book_reviews").unwrap();
    assert!(reviews.schema().field("parent_id").is_some());
    assert!(reviews.schema().field("parent").is_some());
}

#[test]
fn test_inconsistent_descriptors_are_rejected() {
    let tmp = TempDir::new().unwrap();
    let dir = library_dir(&tmp);
    write(
        &dir,
        "broken.json",
        json!({
            "name": "Broken",
            "fields": {"title": {"kind": "leaf", "type": "String"}},
            "as_models": ["ghost"]
        }),
    );

    let err = SchemaLoader::new(&dir).load_all().unwrap_err();
    assert!(matches!(err, SchemaError::InvalidModel { .. }));
    assert_eq!(err.code(), "DQ_SCHEMA_INVALID_MODEL");
}

// =============================================================================
// CLI
// =============================================================================

#[test]
fn test_compile_command() {
    let tmp = TempDir::new().unwrap();
    let models = library_dir(&tmp);
    let query = tmp.path().join("query.json");
    write(
        tmp.path(),
        "query.json",
        json!({
            "filter": {
                "condition_tree": {"aggregator": "And", "conditions": [
                    {"field": "author:name", "operator": "Equal", "value": "Doe"},
                    {"field": "owner__many_to_one:role", "operator": "In", "value": ["admin"]}
                ]},
                "sort": [{"field": "title", "ascending": true}]
            },
            "projection": ["title"]
        }),
    );

    let data = run_command(Command::Compile {
        models,
        config: None,
        collection: "Book".to_string(),
        query,
        timezone: None,
    })
    .unwrap();

    assert_eq!(data["collection"], json!("Book"));
    let names: Vec<&str> = data["stages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|stage| stage.as_object().unwrap().keys().next().unwrap().as_str())
        .collect();
    assert_eq!(names, vec!["$lookup", "$unwind", "$match", "$sort", "$project"]);
}

#[test]
fn test_validate_command_reports_collections() {
    let tmp = TempDir::new().unwrap();
    let models = library_dir(&tmp);

    let data = run_command(Command::Validate {
        models,
        config: None,
        collection: None,
        query: None,
    })
    .unwrap();
    assert_eq!(data["models"], json!(2));
    assert_eq!(
        data["collections"],
        json!(["Book", "Book_author", "Book_reviews", "User"])
    );
}

#[test]
fn test_command_errors_are_typed() {
    let tmp = TempDir::new().unwrap();
    let models = library_dir(&tmp);
    let query = tmp.path().join("query.json");
    write(
        tmp.path(),
        "query.json",
        json!({"filter": {"condition_tree": {"field": "title", "operator": "Teleport"}}}),
    );

    let err = run_command(Command::Compile {
        models,
        config: None,
        collection: "Book".to_string(),
        query,
        timezone: None,
    })
    .unwrap_err();
    assert_eq!(err.code(), CliErrorCode::QueryError);
}
