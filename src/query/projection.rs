//! Projections
//!
//! A projection is the ordered, deduplicated list of field paths a query
//! returns. `title` is a column of the collection, `author:name` is the
//! `name` column reached through the `author` relation. A relation whose
//! sub-projection is `*` asks for every field of the related record; this is
//! how polymorphic relations are requested, since their target is only known
//! when the record is read.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::schema::{Collection, FieldSchema};

use super::errors::{QueryError, QueryResult};
use super::record::RecordData;

/// Marker for "every field of the related record"
pub const ALL_FIELDS: &str = "*";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Projection {
    fields: Vec<String>,
}

impl Projection {
    /// Builds a projection, dropping duplicates and keeping first occurrences
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut projection = Self::default();
        for field in fields {
            projection.push(field.into());
        }
        projection
    }

    fn push(&mut self, field: String) {
        if !self.fields.contains(&field) {
            self.fields.push(field);
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f == field)
    }

    /// Paths without a relation hop
    pub fn columns(&self) -> Vec<&str> {
        self.iter().filter(|f| !f.contains(':')).collect()
    }

    /// Sub-projection of every relation, keyed by relation name
    pub fn relations(&self) -> BTreeMap<String, Projection> {
        let mut relations: BTreeMap<String, Projection> = BTreeMap::new();
        for field in &self.fields {
            if let Some((relation, rest)) = field.split_once(':') {
                relations
                    .entry(relation.to_string())
                    .or_default()
                    .push(rest.to_string());
            }
        }
        relations
    }

    pub fn relation_names(&self) -> Vec<String> {
        self.relations().into_keys().collect()
    }

    /// True when this projection requests every field of the record
    pub fn is_all_fields(&self) -> bool {
        self.contains(ALL_FIELDS)
    }

    /// Paths of both projections, ours first
    pub fn union<'a, I>(&self, others: I) -> Projection
    where
        I: IntoIterator<Item = &'a Projection>,
    {
        let mut result = self.clone();
        for other in others {
            for field in &other.fields {
                result.push(field.clone());
            }
        }
        result
    }

    /// Re-roots every path under `prefix:`
    pub fn nest(&self, prefix: &str) -> Projection {
        if prefix.is_empty() {
            return self.clone();
        }
        Projection::new(self.iter().map(|f| format!("{}:{}", prefix, f)))
    }

    /// Strips the relation prefix shared by every path
    pub fn unnest(&self) -> QueryResult<Projection> {
        let Some(first) = self.fields.first() else {
            return Ok(self.clone());
        };
        let prefix = match first.split_once(':') {
            Some((prefix, _)) => format!("{}:", prefix),
            None => return Err(QueryError::malformed("Cannot unnest projection.")),
        };
        if !self.fields.iter().all(|f| f.starts_with(&prefix)) {
            return Err(QueryError::malformed("Cannot unnest projection."));
        }
        Ok(Projection::new(self.iter().map(|f| &f[prefix.len()..])))
    }

    /// Maps every path to zero or more paths
    pub fn replace<F, I>(&self, mut handler: F) -> Projection
    where
        F: FnMut(&str) -> I,
        I: IntoIterator<Item = String>,
    {
        Projection::new(self.iter().flat_map(|f| handler(f)))
    }

    /// Adds the primary keys of the collection and of every related collection.
    ///
    /// Relations requested with `*` are left alone: their primary key depends
    /// on which collection the record points to.
    pub fn with_pks(&self, collection: Collection<'_>) -> QueryResult<Projection> {
        let mut result = self.clone();
        for pk in collection.schema().primary_keys() {
            result.push(pk.to_string());
        }

        for (name, sub) in self.relations() {
            let relation = match collection.schema().field(&name) {
                Some(FieldSchema::Relation(relation)) => relation,
                Some(FieldSchema::Column(_)) => {
                    return Err(QueryError::malformed(format!(
                        "Unexpected field type: '{}.{}' is a column, not a relation",
                        collection.name(),
                        name
                    )))
                }
                None => return Err(QueryError::column_not_found(collection.name(), name)),
            };
            if sub.is_all_fields() || relation.kind.is_polymorphic_target() {
                continue;
            }
            let Some(foreign) = relation.foreign_collection.as_deref() else {
                continue;
            };
            let nested = sub.with_pks(collection.sibling(foreign)?)?.nest(&name);
            for field in nested.fields {
                result.push(field);
            }
        }

        Ok(result)
    }

    /// Reshapes records so they carry exactly the requested paths.
    ///
    /// Absent columns come back as `null`, and so does a relation whose
    /// record is absent.
    pub fn apply(&self, records: &[RecordData]) -> Vec<RecordData> {
        records.iter().map(|record| self.reproject(record)).collect()
    }

    fn reproject(&self, record: &RecordData) -> RecordData {
        let mut result = RecordData::new();
        for column in self.columns() {
            if column == ALL_FIELDS {
                continue;
            }
            result.insert(
                column.to_string(),
                record.get(column).cloned().unwrap_or(Value::Null),
            );
        }

        for (relation, sub) in self.relations() {
            let value = match record.get(&relation) {
                Some(Value::Object(related)) if sub.is_all_fields() => {
                    Value::Object(related.clone())
                }
                Some(Value::Object(related)) => Value::Object(sub.reproject(related)),
                _ => Value::Null,
            };
            result.insert(relation, value);
        }
        result
    }
}

impl From<Vec<String>> for Projection {
    fn from(fields: Vec<String>) -> Self {
        Projection::new(fields)
    }
}

impl From<Projection> for Vec<String> {
    fn from(projection: Projection) -> Self {
        projection.fields
    }
}

impl<'a> FromIterator<&'a str> for Projection {
    fn from_iter<T: IntoIterator<Item = &'a str>>(iter: T) -> Self {
        Projection::new(iter)
    }
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.fields.join(", "))
    }
}
