//! Document model descriptors
//!
//! A model describes how documents of one store collection are shaped:
//! scalar leaves, embedded objects and embedded arrays. Two lists flatten the
//! model into the relational view the query algebra expects:
//!
//! - `as_models`: embedded paths promoted to collections of their own, named
//!   `<Model>_<path with '.' replaced by '_'>`
//! - `as_fields`: nested paths exposed as columns, named with `@@@` in place
//!   of dots, on the nearest promoted ancestor
//!
//! Paths are dotted and absolute from the document root.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::errors::{SchemaError, SchemaResult};

/// Separator of flattened column names
pub const FLATTEN_SEPARATOR: &str = "@@@";

/// Storage type of a leaf value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeafType {
    String,
    Number,
    Boolean,
    Date,
    ObjectId,
    Binary,
    Mixed,
}

impl LeafType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeafType::String => "String",
            LeafType::Number => "Number",
            LeafType::Boolean => "Boolean",
            LeafType::Date => "Date",
            LeafType::ObjectId => "ObjectId",
            LeafType::Binary => "Binary",
            LeafType::Mixed => "Mixed",
        }
    }
}

impl fmt::Display for LeafType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Shape of a stored field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ModelField {
    Leaf {
        #[serde(rename = "type")]
        leaf_type: LeafType,
        /// Model referenced by an `ObjectId` leaf
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reference: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        enum_values: Vec<String>,
    },
    Object {
        fields: BTreeMap<String, ModelField>,
    },
    Array {
        items: Box<ModelField>,
    },
}

/// Implicit `_id` of every root document
pub static OBJECT_ID_FIELD: ModelField = ModelField::Leaf {
    leaf_type: LeafType::ObjectId,
    reference: None,
    enum_values: Vec::new(),
};

/// `_id` of promoted records, built from the parent id and the path
pub static SYNTHETIC_ID_FIELD: ModelField = ModelField::Leaf {
    leaf_type: LeafType::String,
    reference: None,
    enum_values: Vec::new(),
};

impl ModelField {
    pub fn leaf(leaf_type: LeafType) -> Self {
        ModelField::Leaf {
            leaf_type,
            reference: None,
            enum_values: Vec::new(),
        }
    }

    pub fn reference(model: impl Into<String>) -> Self {
        ModelField::Leaf {
            leaf_type: LeafType::ObjectId,
            reference: Some(model.into()),
            enum_values: Vec::new(),
        }
    }

    pub fn enumeration<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ModelField::Leaf {
            leaf_type: LeafType::String,
            reference: None,
            enum_values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn object<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, ModelField)>,
        S: Into<String>,
    {
        ModelField::Object {
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn array(items: ModelField) -> Self {
        ModelField::Array {
            items: Box::new(items),
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, ModelField::Array { .. })
    }

    /// Leaf type of a leaf, or of the items of an array of leaves
    pub fn leaf_type(&self) -> Option<LeafType> {
        match self {
            ModelField::Leaf { leaf_type, .. } => Some(*leaf_type),
            ModelField::Array { items } => match items.as_ref() {
                ModelField::Leaf { leaf_type, .. } => Some(*leaf_type),
                _ => None,
            },
            ModelField::Object { .. } => None,
        }
    }

    pub fn referenced_model(&self) -> Option<&str> {
        match self {
            ModelField::Leaf { reference, .. } => reference.as_deref(),
            _ => None,
        }
    }

    /// Fields of the records this field turns into once promoted
    pub fn record_shape(&self) -> RecordShape<'_> {
        match self {
            ModelField::Object { fields } => RecordShape::Document(fields),
            ModelField::Array { items } => match items.as_ref() {
                ModelField::Object { fields } => RecordShape::Document(fields),
                other => RecordShape::Boxed(other),
            },
            leaf @ ModelField::Leaf { .. } => RecordShape::Boxed(leaf),
        }
    }
}

/// What a promoted record looks like
#[derive(Debug, Clone, Copy)]
pub enum RecordShape<'a> {
    /// Sub-document fields become the record's fields
    Document(&'a BTreeMap<String, ModelField>),
    /// The value is boxed under `content`
    Boxed(&'a ModelField),
}

/// A document model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub name: String,
    /// Store collection; defaults to the model name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    pub fields: BTreeMap<String, ModelField>,
    #[serde(default)]
    pub as_models: Vec<String>,
    #[serde(default)]
    pub as_fields: Vec<String>,
}

/// Promoted and flattened paths directly owned by one level, relative to it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LevelChildren {
    pub as_models: Vec<String>,
    pub as_fields: Vec<String>,
}

impl Model {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collection: None,
            fields: BTreeMap::new(),
            as_models: Vec::new(),
            as_fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, field: ModelField) -> Self {
        self.fields.insert(name.into(), field);
        self
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn with_as_model(mut self, path: impl Into<String>) -> Self {
        self.as_models.push(path.into());
        self
    }

    pub fn with_as_field(mut self, path: impl Into<String>) -> Self {
        self.as_fields.push(path.into());
        self
    }

    pub fn storage_collection(&self) -> &str {
        self.collection.as_deref().unwrap_or(&self.name)
    }

    /// Collection name of a level; `None` is the root
    pub fn flattened_name(&self, level: Option<&str>) -> String {
        match level {
            None => self.name.clone(),
            Some(path) => format!("{}_{}", self.name, path.replace('.', "_")),
        }
    }

    /// Field at a dotted path; arrays are crossed through their items
    pub fn schema_at(&self, path: &str) -> Option<&ModelField> {
        if path == "_id" && !self.fields.contains_key("_id") {
            return Some(&OBJECT_ID_FIELD);
        }
        let mut segments = path.split('.');
        let mut current = self.fields.get(segments.next()?)?;
        for segment in segments {
            current = child(current, segment)?;
        }
        Some(current)
    }

    pub fn is_promoted(&self, path: &str) -> bool {
        self.as_models.iter().any(|p| p == path)
    }

    /// Nearest promoted strict ancestor of a path; `None` is the root
    pub fn promoted_parent(&self, path: &str) -> Option<&str> {
        self.as_models
            .iter()
            .filter(|p| is_strict_prefix(p, path))
            .max_by_key(|p| p.len())
            .map(String::as_str)
    }

    /// Promoted levels from the root down to `path`, `path` included
    pub fn promoted_chain(&self, path: &str) -> Vec<&str> {
        let mut chain: Vec<&str> = self
            .as_models
            .iter()
            .filter(|p| is_strict_prefix(p, path) || p.as_str() == path)
            .map(String::as_str)
            .collect();
        chain.sort_by_key(|p| p.len());
        chain.dedup();
        chain
    }

    /// Paths whose nearest promoted ancestor is `level`, relative to it
    pub fn children(&self, level: Option<&str>) -> LevelChildren {
        let owned_by_level = |path: &&String| self.promoted_parent(path) == level;
        LevelChildren {
            as_models: self
                .as_models
                .iter()
                .filter(owned_by_level)
                .map(|p| relative(level, p))
                .collect(),
            as_fields: self
                .as_fields
                .iter()
                .filter(owned_by_level)
                .map(|p| relative(level, p))
                .collect(),
        }
    }

    /// Shape of the records of a level
    pub fn level_shape(&self, level: Option<&str>) -> Option<RecordShape<'_>> {
        match level {
            None => Some(RecordShape::Document(&self.fields)),
            Some(path) => self.schema_at(path).map(ModelField::record_shape),
        }
    }

    /// Checks every promoted and flattened path against the fields
    pub fn validate(&self) -> SchemaResult<()> {
        if self.name.is_empty() {
            return Err(SchemaError::invalid_model("<unnamed>", "model name is empty"));
        }
        for path in &self.as_models {
            self.validate_path(path, "as_models")?;
        }
        for path in &self.as_fields {
            self.validate_path(path, "as_fields")?;
            if self.is_promoted(path) {
                return Err(SchemaError::invalid_model(
                    &self.name,
                    format!("'{}' is listed in both as_models and as_fields", path),
                ));
            }
        }
        Ok(())
    }

    fn validate_path(&self, path: &str, list: &str) -> SchemaResult<()> {
        if self.schema_at(path).is_none() {
            return Err(SchemaError::invalid_model(
                &self.name,
                format!("{} path '{}' does not exist", list, path),
            ));
        }

        // Only promoted arrays may be crossed: the others cannot be unwound
        let mut prefix = String::new();
        let segments: Vec<&str> = path.split('.').collect();
        for segment in &segments[..segments.len() - 1] {
            if !prefix.is_empty() {
                prefix.push('.');
            }
            prefix.push_str(segment);
            let crosses_array = self.schema_at(&prefix).map_or(false, ModelField::is_array);
            if crosses_array && !self.is_promoted(&prefix) {
                return Err(SchemaError::invalid_model(
                    &self.name,
                    format!(
                        "{} path '{}' crosses the array '{}', which is not in as_models",
                        list, path, prefix
                    ),
                ));
            }
        }
        Ok(())
    }
}

fn child<'a>(field: &'a ModelField, name: &str) -> Option<&'a ModelField> {
    match field {
        ModelField::Object { fields } => fields.get(name),
        ModelField::Array { items } => child(items, name),
        ModelField::Leaf { .. } => None,
    }
}

fn is_strict_prefix(prefix: &str, path: &str) -> bool {
    path.len() > prefix.len() && path.starts_with(prefix) && path.as_bytes()[prefix.len()] == b'.'
}

fn relative(level: Option<&str>, path: &str) -> String {
    match level {
        Some(level) => path[level.len() + 1..].to_string(),
        None => path.to_string(),
    }
}

/// Joins two optional dotted paths
pub fn join_path(base: Option<&str>, path: &str) -> String {
    match base {
        Some(base) if !base.is_empty() => format!("{}.{}", base, path),
        _ => path.to_string(),
    }
}

/// Column name of a flattened path
pub fn flattened_column(path: &str) -> String {
    path.replace('.', FLATTEN_SEPARATOR)
}

/// Dotted path of a flattened column name
pub fn unflattened_path(column: &str) -> String {
    column.replace(FLATTEN_SEPARATOR, ".")
}

/// Every model, keyed by name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelRegistry {
    models: BTreeMap<String, Model>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry and checks references between models
    pub fn from_models<I: IntoIterator<Item = Model>>(models: I) -> SchemaResult<Self> {
        let mut registry = Self::new();
        for model in models {
            registry.add_model(model)?;
        }
        registry.validate_references()?;
        Ok(registry)
    }

    pub fn add_model(&mut self, model: Model) -> SchemaResult<()> {
        model.validate()?;
        if self.models.contains_key(&model.name) {
            return Err(SchemaError::DuplicateModel(model.name));
        }
        self.models.insert(model.name.clone(), model);
        Ok(())
    }

    /// Every `reference` must name a registered model
    pub fn validate_references(&self) -> SchemaResult<()> {
        for model in self.models.values() {
            let mut missing = None;
            visit_references(&model.fields, &mut |target| {
                if missing.is_none() && !self.models.contains_key(target) {
                    missing = Some(target.to_string());
                }
            });
            if let Some(target) = missing {
                return Err(SchemaError::invalid_model(
                    &model.name,
                    format!("references unknown model '{}'", target),
                ));
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Model> {
        self.models.get(name)
    }

    pub fn models(&self) -> impl Iterator<Item = &Model> {
        self.models.values()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Finds the model and promoted path behind a collection name
    pub fn resolve_collection(&self, name: &str) -> Option<(&Model, Option<&str>)> {
        if let Some(model) = self.models.get(name) {
            return Some((model, None));
        }
        self.models.values().find_map(|model| {
            model
                .as_models
                .iter()
                .find(|path| model.flattened_name(Some(path)) == name)
                .map(|path| (model, Some(path.as_str())))
        })
    }

    /// Root and flattened collection names
    pub fn collection_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for model in self.models.values() {
            names.push(model.flattened_name(None));
            for path in &model.as_models {
                names.push(model.flattened_name(Some(path)));
            }
        }
        names
    }
}

fn visit_references<F: FnMut(&str)>(fields: &BTreeMap<String, ModelField>, f: &mut F) {
    for field in fields.values() {
        visit_field(field, f);
    }
}

fn visit_field<F: FnMut(&str)>(field: &ModelField, f: &mut F) {
    match field {
        ModelField::Leaf {
            reference: Some(target),
            ..
        } => f(target),
        ModelField::Leaf { .. } => {}
        ModelField::Object { fields } => visit_references(fields, f),
        ModelField::Array { items } => visit_field(items, f),
    }
}
