//! Reference evaluator for stage lists
//!
//! Executes typed `Stage` values on in-memory documents with the store's
//! semantics for the subset the compiler emits. Date expressions are not
//! supported.

#![allow(dead_code)]

use std::cmp::Ordering;
use std::collections::BTreeMap;

use docquery::pipeline::{Accumulator, Expr, MatchExpr, Predicate, ProjectionValue, Stage};
use docquery::query::compare_values;
use docquery::schema::{LeafType, Model, ModelField, ModelRegistry};
use regex::RegexBuilder;
use serde_json::{json, Map, Value};

pub type Document = Map<String, Value>;

/// Documents of every store collection, by collection name
#[derive(Debug, Default)]
pub struct Store {
    collections: BTreeMap<String, Vec<Value>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, collection: &str, documents: Vec<Value>) -> Self {
        self.collections.insert(collection.to_string(), documents);
        self
    }

    /// Runs `stages` over the documents of `collection`
    pub fn run(&self, collection: &str, stages: &[Stage]) -> Vec<Value> {
        let mut documents: Vec<Document> = self
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|value| value.as_object().cloned().expect("documents are objects"))
            .collect();
        for stage in stages {
            documents = self.apply(stage, documents);
        }
        documents.into_iter().map(Value::Object).collect()
    }

    fn apply(&self, stage: &Stage, documents: Vec<Document>) -> Vec<Document> {
        match stage {
            Stage::Match(expr) => documents
                .into_iter()
                .filter(|doc| matches(expr, doc))
                .collect(),
            Stage::AddFields(fields) => documents
                .into_iter()
                .map(|mut doc| {
                    let root = Value::Object(doc.clone());
                    for (path, expr) in fields {
                        match eval(expr, &root) {
                            Some(value) => set_path(&mut doc, path, value),
                            None => remove_path(&mut doc, path),
                        }
                    }
                    doc
                })
                .collect(),
            Stage::Unwind {
                path,
                include_array_index,
                preserve_null_and_empty_arrays,
            } => unwind(
                documents,
                path,
                include_array_index.as_deref(),
                *preserve_null_and_empty_arrays,
            ),
            Stage::ReplaceRoot(expr) => documents
                .into_iter()
                .map(|doc| match eval(expr, &Value::Object(doc)) {
                    Some(Value::Object(root)) => root,
                    other => panic!("replaceRoot needs an object, got {:?}", other),
                })
                .collect(),
            Stage::Lookup {
                from,
                local_field,
                foreign_field,
                as_field,
            } => {
                let foreign = self.collections.get(from).cloned().unwrap_or_default();
                documents
                    .into_iter()
                    .map(|mut doc| {
                        let local = get_path(&Value::Object(doc.clone()), local_field)
                            .unwrap_or(Value::Null);
                        let joined: Vec<Value> = foreign
                            .iter()
                            .filter(|candidate| {
                                get_path(candidate, foreign_field).unwrap_or(Value::Null) == local
                            })
                            .cloned()
                            .collect();
                        set_path(&mut doc, as_field, Value::Array(joined));
                        doc
                    })
                    .collect()
            }
            Stage::Sort(clauses) => {
                let mut documents = documents;
                documents.sort_by(|a, b| {
                    let (a, b) = (Value::Object(a.clone()), Value::Object(b.clone()));
                    for (path, ascending) in clauses {
                        let ordering =
                            compare_values(get_path(&a, path).as_ref(), get_path(&b, path).as_ref());
                        let ordering = if *ascending { ordering } else { ordering.reverse() };
                        if ordering != Ordering::Equal {
                            return ordering;
                        }
                    }
                    Ordering::Equal
                });
                documents
            }
            Stage::Skip(n) => documents.into_iter().skip(*n).collect(),
            Stage::Limit(n) => documents.into_iter().take(*n).collect(),
            Stage::Group { id, accumulators } => group(documents, id, accumulators),
            Stage::Project(entries) => documents
                .into_iter()
                .map(|doc| project(&doc, entries))
                .collect(),
        }
    }
}

fn unwind(
    documents: Vec<Document>,
    path: &str,
    index_field: Option<&str>,
    preserve: bool,
) -> Vec<Document> {
    let mut output = Vec::new();
    for doc in documents {
        match get_path(&Value::Object(doc.clone()), path) {
            Some(Value::Array(items)) if !items.is_empty() => {
                for (index, item) in items.into_iter().enumerate() {
                    let mut copy = doc.clone();
                    set_path(&mut copy, path, item);
                    if let Some(field) = index_field {
                        set_path(&mut copy, field, json!(index));
                    }
                    output.push(copy);
                }
            }
            Some(Value::Array(_)) | Some(Value::Null) | None => {
                if preserve {
                    let mut copy = doc;
                    if matches!(get_path(&Value::Object(copy.clone()), path), Some(Value::Array(_))) {
                        remove_path(&mut copy, path);
                    }
                    if let Some(field) = index_field {
                        set_path(&mut copy, field, Value::Null);
                    }
                    output.push(copy);
                }
            }
            Some(_) => {
                let mut copy = doc;
                if let Some(field) = index_field {
                    set_path(&mut copy, field, Value::Null);
                }
                output.push(copy);
            }
        }
    }
    output
}

fn group(documents: Vec<Document>, id: &Expr, accumulators: &[(String, Accumulator)]) -> Vec<Document> {
    let mut groups: Vec<(Value, Vec<Value>)> = Vec::new();
    for doc in documents {
        let root = Value::Object(doc);
        let key = eval(id, &root).unwrap_or(Value::Null);
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(root),
            None => groups.push((key, vec![root])),
        }
    }

    groups
        .into_iter()
        .map(|(key, members)| {
            let mut doc = Document::new();
            doc.insert("_id".to_string(), key);
            for (name, accumulator) in accumulators {
                doc.insert(name.clone(), accumulate(accumulator, &members));
            }
            doc
        })
        .collect()
}

fn accumulate(accumulator: &Accumulator, members: &[Value]) -> Value {
    let values = |expr: &Expr| -> Vec<Value> {
        members
            .iter()
            .filter_map(|root| eval(expr, root))
            .filter(|value| !value.is_null())
            .collect()
    };
    match accumulator {
        Accumulator::Sum(expr) => {
            let sum: f64 = values(expr).iter().filter_map(Value::as_f64).sum();
            number(sum)
        }
        Accumulator::Avg(expr) => {
            let numbers: Vec<f64> = values(expr).iter().filter_map(Value::as_f64).collect();
            if numbers.is_empty() {
                Value::Null
            } else {
                json!(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
        Accumulator::Max(expr) => values(expr)
            .into_iter()
            .max_by(|a, b| compare_values(Some(a), Some(b)))
            .unwrap_or(Value::Null),
        Accumulator::Min(expr) => values(expr)
            .into_iter()
            .min_by(|a, b| compare_values(Some(a), Some(b)))
            .unwrap_or(Value::Null),
    }
}

fn number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        json!(value as i64)
    } else {
        json!(value)
    }
}

fn project(doc: &Document, entries: &[(String, ProjectionValue)]) -> Document {
    let root = Value::Object(doc.clone());
    let mut output = Document::new();
    let mut keep_id = true;
    for (path, value) in entries {
        match value {
            ProjectionValue::Exclude if path == "_id" => keep_id = false,
            ProjectionValue::Exclude => {}
            ProjectionValue::Include => {
                if let Some(found) = get_path(&root, path) {
                    set_path(&mut output, path, found);
                }
            }
            ProjectionValue::Expr(expr) => {
                if let Some(found) = eval(expr, &root) {
                    set_path(&mut output, path, found);
                }
            }
        }
    }
    if keep_id && !output.contains_key("_id") {
        if let Some(id) = doc.get("_id") {
            let mut with_id = Document::new();
            with_id.insert("_id".to_string(), id.clone());
            with_id.extend(output);
            return with_id;
        }
    }
    output
}

/// Evaluates an expression; `None` is an absent value
pub fn eval(expr: &Expr, root: &Value) -> Option<Value> {
    match expr {
        Expr::Field(path) => get_path(root, path),
        Expr::Root => Some(root.clone()),
        Expr::Literal(value) => Some(value.clone()),
        Expr::Missing => Some(Expr::Missing.to_json()),
        Expr::Object(entries) => {
            let mut doc = Document::new();
            for (key, value) in entries {
                if let Some(value) = eval(value, root) {
                    doc.insert(key.clone(), value);
                }
            }
            Some(Value::Object(doc))
        }
        Expr::Concat(parts) => {
            let mut result = String::new();
            for part in parts {
                match eval(part, root) {
                    Some(Value::String(s)) => result.push_str(&s),
                    _ => return Some(Value::Null),
                }
            }
            Some(Value::String(result))
        }
        Expr::ToString(inner) => match eval(inner, root) {
            Some(Value::String(s)) => Some(Value::String(s)),
            Some(Value::Null) | None => Some(Value::Null),
            Some(other) => Some(Value::String(other.to_string())),
        },
        Expr::MergeObjects(parts) => {
            let mut doc = Document::new();
            for part in parts {
                if let Some(Value::Object(map)) = eval(part, root) {
                    doc.extend(map);
                }
            }
            Some(Value::Object(doc))
        }
        Expr::Cond {
            condition,
            then,
            otherwise,
        } => {
            if truthy(eval(condition, root)) {
                eval(then, root)
            } else {
                eval(otherwise, root)
            }
        }
        Expr::And(parts) => Some(Value::Bool(parts.iter().all(|p| truthy(eval(p, root))))),
        // missing and null are distinct values for the store
        Expr::Ne(left, right) => Some(Value::Bool(eval(left, root) != eval(right, root))),
        Expr::IfNull(expr, replacement) => match eval(expr, root) {
            None | Some(Value::Null) => eval(replacement, root),
            value => value,
        },
        Expr::Type(inner) => Some(Value::String(
            match eval(inner, root) {
                None => "missing",
                Some(Value::Null) => "null",
                Some(Value::Bool(_)) => "bool",
                Some(Value::Number(_)) => "double",
                Some(Value::String(_)) => "string",
                Some(Value::Array(_)) => "array",
                Some(Value::Object(_)) => "object",
            }
            .to_string(),
        )),
        Expr::DateToString { .. } | Expr::DateTrunc { .. } => {
            panic!("date expressions are not evaluated in memory")
        }
    }
}

fn truthy(value: Option<Value>) -> bool {
    !matches!(value, None | Some(Value::Null) | Some(Value::Bool(false)))
}

pub fn matches(expr: &MatchExpr, doc: &Document) -> bool {
    let root = Value::Object(doc.clone());
    match_value(expr, &root)
}

fn match_value(expr: &MatchExpr, root: &Value) -> bool {
    match expr {
        MatchExpr::All => true,
        MatchExpr::Nothing => false,
        MatchExpr::And(parts) => parts.iter().all(|p| match_value(p, root)),
        MatchExpr::Or(parts) => parts.iter().any(|p| match_value(p, root)),
        MatchExpr::Field { path, predicate } => test_predicate(predicate, get_path(root, path)),
    }
}

fn test_predicate(predicate: &Predicate, value: Option<Value>) -> bool {
    let present = value.clone().unwrap_or(Value::Null);
    let cmp = |other: &Value| compare_values(Some(&present), Some(other));
    match predicate {
        Predicate::Eq(expected) => present == *expected,
        Predicate::Ne(expected) => present != *expected,
        Predicate::Lt(bound) => !present.is_null() && cmp(bound) == Ordering::Less,
        Predicate::Gt(bound) => !present.is_null() && cmp(bound) == Ordering::Greater,
        Predicate::Lte(bound) => !present.is_null() && cmp(bound) != Ordering::Greater,
        Predicate::Gte(bound) => !present.is_null() && cmp(bound) != Ordering::Less,
        Predicate::In(values) => values.contains(&present),
        Predicate::Nin(values) => !values.contains(&present),
        Predicate::All(values) => match &present {
            Value::Array(items) => values.iter().all(|v| items.contains(v)),
            _ => false,
        },
        Predicate::Present => !present.is_null(),
        Predicate::Blank => present.is_null() || present == json!(""),
        Predicate::Missing => value.is_none(),
        Predicate::Regex { pattern, options } => match &present {
            Value::String(s) => RegexBuilder::new(pattern)
                .case_insensitive(options.contains('i'))
                .build()
                .map(|re| re.is_match(s))
                .unwrap_or(false),
            _ => false,
        },
    }
}

/// Reads a dotted path; `None` when any segment is absent
pub fn get_path(root: &Value, path: &str) -> Option<Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current.clone())
}

/// Writes a dotted path, creating intermediate objects
pub fn set_path(doc: &mut Document, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            doc.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = doc
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Document::new()));
            if !entry.is_object() {
                *entry = Value::Object(Document::new());
            }
            if let Value::Object(child) = entry {
                set_path(child, rest, value);
            }
        }
    }
}

fn remove_path(doc: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Value::Object(child)) = doc.get_mut(head) {
                remove_path(child, rest);
            }
        }
    }
}

/// Books with an embedded author, reviews, tags and a referenced owner
pub fn library() -> ModelRegistry {
    let book = Model::new("Book")
        .with_collection("books")
        .with_field("title", ModelField::leaf(LeafType::String))
        .with_field("price", ModelField::leaf(LeafType::Number))
        .with_field("published_at", ModelField::leaf(LeafType::Date))
        .with_field("owner", ModelField::reference("User"))
        .with_field(
            "author",
            ModelField::object([
                ("name", ModelField::leaf(LeafType::String)),
                ("picture", ModelField::leaf(LeafType::Binary)),
                (
                    "address",
                    ModelField::object([("city", ModelField::leaf(LeafType::String))]),
                ),
            ]),
        )
        .with_field(
            "reviews",
            ModelField::array(ModelField::object([
                ("rating", ModelField::leaf(LeafType::Number)),
                ("comment", ModelField::leaf(LeafType::String)),
            ])),
        )
        .with_field("tags", ModelField::array(ModelField::leaf(LeafType::String)))
        .with_as_model("author")
        .with_as_model("reviews")
        .with_as_model("tags")
        .with_as_field("author.address.city");
    let user = Model::new("User")
        .with_collection("users")
        .with_field("email", ModelField::leaf(LeafType::String))
        .with_field(
            "role",
            ModelField::enumeration(["admin", "reader"]),
        );
    ModelRegistry::from_models([book, user]).expect("library models are valid")
}

/// Store content matching [`library`]
pub fn library_store() -> Store {
    Store::new()
        .with(
            "books",
            vec![
                json!({
                    "_id": "b1",
                    "title": "Dune",
                    "price": 12,
                    "owner": "u1",
                    "author": {"name": "Herbert", "address": {"city": "Tacoma"}},
                    "reviews": [
                        {"rating": 5, "comment": "classic"},
                        {"rating": 3, "comment": "long"},
                        {"rating": 4, "comment": "dense"}
                    ],
                    "tags": ["sf", "desert"]
                }),
                json!({
                    "_id": "b2",
                    "title": "Emma",
                    "price": 8,
                    "owner": "u2",
                    "author": {"name": "Austen"},
                    "reviews": [{"rating": 2, "comment": "slow"}],
                    "tags": []
                }),
                json!({
                    "_id": "b3",
                    "title": "Anonymous",
                    "price": 3,
                    "owner": "u9",
                    "reviews": []
                }),
            ],
        )
        .with(
            "users",
            vec![
                json!({"_id": "u1", "email": "ada@example.com", "role": "admin"}),
                json!({"_id": "u2", "email": "bob@example.com", "role": "reader"}),
            ],
        )
}
