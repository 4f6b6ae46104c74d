//! Semantic collection schema
//!
//! The flat relational view every backing store exposes:
//! - columns carry a semantic type, declared filter operators and enum values
//! - relations carry a kind and their target collection(s)

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::query::Operator;

/// Semantic column types
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ColumnType {
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
}

impl ColumnType {
    pub const ALL: [ColumnType; 11] = [
        ColumnType::Boolean,
        ColumnType::Binary,
        ColumnType::Date,
        ColumnType::Dateonly,
        ColumnType::Enum,
        ColumnType::Json,
        ColumnType::Number,
        ColumnType::Point,
        ColumnType::String,
        ColumnType::Timeonly,
        ColumnType::Uuid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Boolean => "Boolean",
            ColumnType::Binary => "Binary",
            ColumnType::Date => "Date",
            ColumnType::Dateonly => "Dateonly",
            ColumnType::Enum => "Enum",
            ColumnType::Json => "Json",
            ColumnType::Number => "Number",
            ColumnType::Point => "Point",
            ColumnType::String => "String",
            ColumnType::Timeonly => "Timeonly",
            ColumnType::Uuid => "Uuid",
        }
    }

    /// Date-like types accept the relative date operators
    pub fn is_date(&self) -> bool {
        matches!(self, ColumnType::Date | ColumnType::Dateonly)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A concrete column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub column_type: ColumnType,
    /// Operators the backing store accepts for this column
    #[serde(default)]
    pub filter_operators: BTreeSet<Operator>,
    #[serde(default)]
    pub enum_values: Vec<String>,
    #[serde(default)]
    pub is_primary_key: bool,
}

impl ColumnSchema {
    /// A column accepting every operator legal for its type
    pub fn new(column_type: ColumnType) -> Self {
        Self {
            column_type,
            filter_operators: Operator::allowed_for(column_type).iter().copied().collect(),
            enum_values: Vec::new(),
            is_primary_key: false,
        }
    }

    /// An enum column with the given members
    pub fn enumeration<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            enum_values: values.into_iter().map(Into::into).collect(),
            ..Self::new(ColumnType::Enum)
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self
    }

    pub fn with_operators<I: IntoIterator<Item = Operator>>(mut self, operators: I) -> Self {
        self.filter_operators = operators.into_iter().collect();
        self
    }

    pub fn is_filterable(&self) -> bool {
        !self.filter_operators.is_empty()
    }
}

/// Relation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationKind {
    ManyToOne,
    OneToMany,
    ManyToMany,
    OneToOne,
    PolymorphicManyToOne,
    PolymorphicOneToOne,
    PolymorphicOneToMany,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::ManyToOne => "ManyToOne",
            RelationKind::OneToMany => "OneToMany",
            RelationKind::ManyToMany => "ManyToMany",
            RelationKind::OneToOne => "OneToOne",
            RelationKind::PolymorphicManyToOne => "PolymorphicManyToOne",
            RelationKind::PolymorphicOneToOne => "PolymorphicOneToOne",
            RelationKind::PolymorphicOneToMany => "PolymorphicOneToMany",
        }
    }

    /// Relations a field path may traverse
    pub fn is_to_one(&self) -> bool {
        matches!(
            self,
            RelationKind::ManyToOne
                | RelationKind::OneToOne
                | RelationKind::PolymorphicManyToOne
                | RelationKind::PolymorphicOneToOne
        )
    }

    /// The target collection is only known when a record is read
    pub fn is_polymorphic_target(&self) -> bool {
        matches!(self, RelationKind::PolymorphicManyToOne)
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A relation to one or more other collections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationSchema {
    pub kind: RelationKind,
    /// Target collection, absent for polymorphic many-to-one
    #[serde(default)]
    pub foreign_collection: Option<String>,
    /// Candidate targets of a polymorphic many-to-one
    #[serde(default)]
    pub foreign_collections: Vec<String>,
    #[serde(default)]
    pub foreign_key: Option<String>,
    #[serde(default)]
    pub origin_key: Option<String>,
}

impl RelationSchema {
    pub fn new(kind: RelationKind, foreign_collection: impl Into<String>) -> Self {
        Self {
            kind,
            foreign_collection: Some(foreign_collection.into()),
            foreign_collections: Vec::new(),
            foreign_key: None,
            origin_key: None,
        }
    }

    pub fn polymorphic<I, S>(targets: I, foreign_key: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: RelationKind::PolymorphicManyToOne,
            foreign_collection: None,
            foreign_collections: targets.into_iter().map(Into::into).collect(),
            foreign_key: Some(foreign_key.into()),
            origin_key: None,
        }
    }

    pub fn with_foreign_key(mut self, key: impl Into<String>) -> Self {
        self.foreign_key = Some(key.into());
        self
    }

    pub fn with_origin_key(mut self, key: impl Into<String>) -> Self {
        self.origin_key = Some(key.into());
        self
    }
}

/// A field of a collection: a column or a relation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field_kind", rename_all = "lowercase")]
pub enum FieldSchema {
    Column(ColumnSchema),
    Relation(RelationSchema),
}

impl FieldSchema {
    pub fn as_column(&self) -> Option<&ColumnSchema> {
        match self {
            FieldSchema::Column(column) => Some(column),
            FieldSchema::Relation(_) => None,
        }
    }

    pub fn as_relation(&self) -> Option<&RelationSchema> {
        match self {
            FieldSchema::Relation(relation) => Some(relation),
            FieldSchema::Column(_) => None,
        }
    }
}

/// A collection as seen by the query algebra
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub name: String,
    pub fields: BTreeMap<String, FieldSchema>,
}

impl CollectionSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_column(mut self, name: impl Into<String>, column: ColumnSchema) -> Self {
        self.fields.insert(name.into(), FieldSchema::Column(column));
        self
    }

    pub fn with_relation(mut self, name: impl Into<String>, relation: RelationSchema) -> Self {
        self.fields.insert(name.into(), FieldSchema::Relation(relation));
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.get(name)
    }

    /// Primary key column names, in field order
    pub fn primary_keys(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(_, field)| matches!(field, FieldSchema::Column(c) if c.is_primary_key))
            .map(|(name, _)| name.as_str())
            .collect()
    }
}
