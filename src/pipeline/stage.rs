//! Stage descriptors
//!
//! Typed form of the document store's aggregation stages. `to_json` produces
//! the store syntax; `Serialize` goes through it so a `Vec<Stage>` can be
//! written out directly.

use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};

/// Written in place of a record that does not exist.
///
/// Mapped back to `null` by `normalize_records`.
pub const MISSING_RECORD_TAG: &str = "__docquery_missing_record__";

/// Receives the position of an unwound array element
pub const ARRAY_INDEX_FIELD: &str = "__array_index";

/// Aggregation expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `$path`
    Field(String),
    /// `$$ROOT`
    Root,
    Literal(Value),
    /// The record does not exist
    Missing,
    Object(Vec<(String, Expr)>),
    Concat(Vec<Expr>),
    ToString(Box<Expr>),
    MergeObjects(Vec<Expr>),
    Cond {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    And(Vec<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    /// First operand unless absent or null
    IfNull(Box<Expr>, Box<Expr>),
    Type(Box<Expr>),
    DateToString {
        format: String,
        date: Box<Expr>,
        timezone: String,
    },
    DateTrunc {
        date: Box<Expr>,
        unit: String,
        timezone: String,
        start_of_week: Option<String>,
    },
}

impl Expr {
    pub fn field(path: impl Into<String>) -> Self {
        Expr::Field(path.into())
    }

    pub fn string(value: impl Into<String>) -> Self {
        Expr::Literal(Value::String(value.into()))
    }

    pub fn to_string_expr(expr: Expr) -> Self {
        Expr::ToString(Box::new(expr))
    }

    pub fn object<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, Expr)>,
        S: Into<String>,
    {
        Expr::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn cond(condition: Expr, then: Expr, otherwise: Expr) -> Self {
        Expr::Cond {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    pub fn ne(left: Expr, right: Expr) -> Self {
        Expr::Ne(Box::new(left), Box::new(right))
    }

    pub fn if_null(expr: Expr, replacement: Expr) -> Self {
        Expr::IfNull(Box::new(expr), Box::new(replacement))
    }

    /// True when `path` holds a value that is neither absent nor null
    pub fn is_present(path: &str) -> Self {
        Expr::And(vec![
            Expr::ne(Expr::Type(Box::new(Expr::field(path))), Expr::string("missing")),
            Expr::ne(Expr::field(path), Expr::Literal(Value::Null)),
        ])
    }

    pub fn to_json(&self) -> Value {
        match self {
            Expr::Field(path) => Value::String(format!("${}", path)),
            Expr::Root => Value::String("$$ROOT".to_string()),
            Expr::Literal(value) => literal(value),
            Expr::Missing => Value::String(MISSING_RECORD_TAG.to_string()),
            Expr::Object(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(key, expr)| (key.clone(), expr.to_json()))
                    .collect(),
            ),
            Expr::Concat(parts) => json!({ "$concat": to_json_list(parts) }),
            Expr::ToString(expr) => json!({ "$toString": expr.to_json() }),
            Expr::MergeObjects(parts) => json!({ "$mergeObjects": to_json_list(parts) }),
            Expr::Cond {
                condition,
                then,
                otherwise,
            } => json!({
                "$cond": {
                    "if": condition.to_json(),
                    "then": then.to_json(),
                    "else": otherwise.to_json(),
                }
            }),
            Expr::And(parts) => json!({ "$and": to_json_list(parts) }),
            Expr::Ne(left, right) => json!({ "$ne": [left.to_json(), right.to_json()] }),
            Expr::IfNull(expr, replacement) => {
                json!({ "$ifNull": [expr.to_json(), replacement.to_json()] })
            }
            Expr::Type(expr) => json!({ "$type": expr.to_json() }),
            Expr::DateToString {
                format,
                date,
                timezone,
            } => json!({
                "$dateToString": {
                    "format": format,
                    "date": date.to_json(),
                    "timezone": timezone,
                }
            }),
            Expr::DateTrunc {
                date,
                unit,
                timezone,
                start_of_week,
            } => {
                let mut body = Map::new();
                body.insert("date".to_string(), date.to_json());
                body.insert("unit".to_string(), Value::String(unit.clone()));
                body.insert("timezone".to_string(), Value::String(timezone.clone()));
                if let Some(day) = start_of_week {
                    body.insert("startOfWeek".to_string(), Value::String(day.clone()));
                }
                json!({ "$dateTrunc": body })
            }
        }
    }
}

/// Constants that the store could read as a path or an operator are wrapped
fn literal(value: &Value) -> Value {
    match value {
        Value::String(s) if !s.starts_with('$') => value.clone(),
        Value::Null | Value::Bool(_) | Value::Number(_) => value.clone(),
        _ => json!({ "$literal": value }),
    }
}

fn to_json_list(exprs: &[Expr]) -> Value {
    Value::Array(exprs.iter().map(Expr::to_json).collect())
}

/// Condition on a single field of a `$match`
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(Value),
    Ne(Value),
    Lt(Value),
    Gt(Value),
    Lte(Value),
    Gte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    All(Vec<Value>),
    /// Present and not null
    Present,
    /// Null, absent or empty string
    Blank,
    /// Absent
    Missing,
    Regex { pattern: String, options: String },
}

impl Predicate {
    pub fn to_json(&self) -> Value {
        match self {
            Predicate::Eq(v) => json!({ "$eq": v }),
            Predicate::Ne(v) => json!({ "$ne": v }),
            Predicate::Lt(v) => json!({ "$lt": v }),
            Predicate::Gt(v) => json!({ "$gt": v }),
            Predicate::Lte(v) => json!({ "$lte": v }),
            Predicate::Gte(v) => json!({ "$gte": v }),
            Predicate::In(values) => json!({ "$in": values }),
            Predicate::Nin(values) => json!({ "$nin": values }),
            Predicate::All(values) => json!({ "$all": values }),
            Predicate::Present => json!({ "$exists": true, "$ne": null }),
            Predicate::Blank => json!({ "$in": [null, ""] }),
            Predicate::Missing => json!({ "$exists": false }),
            Predicate::Regex { pattern, options } if options.is_empty() => {
                json!({ "$regex": pattern })
            }
            Predicate::Regex { pattern, options } => {
                json!({ "$regex": pattern, "$options": options })
            }
        }
    }
}

/// Body of a `$match` stage
#[derive(Debug, Clone, PartialEq)]
pub enum MatchExpr {
    /// Matches every record
    All,
    /// Matches no record
    Nothing,
    And(Vec<MatchExpr>),
    Or(Vec<MatchExpr>),
    Field { path: String, predicate: Predicate },
}

impl MatchExpr {
    pub fn field(path: impl Into<String>, predicate: Predicate) -> Self {
        MatchExpr::Field {
            path: path.into(),
            predicate,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            MatchExpr::All => json!({}),
            MatchExpr::Nothing => json!({ "$expr": false }),
            MatchExpr::And(parts) => {
                json!({ "$and": parts.iter().map(MatchExpr::to_json).collect::<Vec<_>>() })
            }
            MatchExpr::Or(parts) => {
                json!({ "$or": parts.iter().map(MatchExpr::to_json).collect::<Vec<_>>() })
            }
            MatchExpr::Field { path, predicate } => {
                let mut body = Map::new();
                body.insert(path.clone(), predicate.to_json());
                Value::Object(body)
            }
        }
    }
}

/// `$group` accumulators
#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    Sum(Expr),
    Avg(Expr),
    Max(Expr),
    Min(Expr),
}

impl Accumulator {
    pub fn to_json(&self) -> Value {
        match self {
            Accumulator::Sum(e) => json!({ "$sum": e.to_json() }),
            Accumulator::Avg(e) => json!({ "$avg": e.to_json() }),
            Accumulator::Max(e) => json!({ "$max": e.to_json() }),
            Accumulator::Min(e) => json!({ "$min": e.to_json() }),
        }
    }
}

/// Value of a `$project` entry
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionValue {
    Include,
    Exclude,
    Expr(Expr),
}

impl ProjectionValue {
    pub fn to_json(&self) -> Value {
        match self {
            ProjectionValue::Include => json!(1),
            ProjectionValue::Exclude => json!(0),
            ProjectionValue::Expr(e) => e.to_json(),
        }
    }
}

/// One pipeline stage
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(MatchExpr),
    AddFields(Vec<(String, Expr)>),
    Unwind {
        path: String,
        include_array_index: Option<String>,
        preserve_null_and_empty_arrays: bool,
    },
    ReplaceRoot(Expr),
    Lookup {
        from: String,
        local_field: String,
        foreign_field: String,
        as_field: String,
    },
    /// Field paths with `true` for ascending
    Sort(Vec<(String, bool)>),
    Skip(usize),
    Limit(usize),
    Group {
        id: Expr,
        accumulators: Vec<(String, Accumulator)>,
    },
    Project(Vec<(String, ProjectionValue)>),
}

impl Stage {
    /// Store operator of the stage
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Match(_) => "$match",
            Stage::AddFields(_) => "$addFields",
            Stage::Unwind { .. } => "$unwind",
            Stage::ReplaceRoot(_) => "$replaceRoot",
            Stage::Lookup { .. } => "$lookup",
            Stage::Sort(_) => "$sort",
            Stage::Skip(_) => "$skip",
            Stage::Limit(_) => "$limit",
            Stage::Group { .. } => "$group",
            Stage::Project(_) => "$project",
        }
    }

    pub fn to_json(&self) -> Value {
        let body = match self {
            Stage::Match(expr) => expr.to_json(),
            Stage::AddFields(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(name, expr)| (name.clone(), expr.to_json()))
                    .collect(),
            ),
            Stage::Unwind {
                path,
                include_array_index,
                preserve_null_and_empty_arrays,
            } => {
                let mut body = Map::new();
                body.insert("path".to_string(), Value::String(format!("${}", path)));
                if let Some(index) = include_array_index {
                    body.insert("includeArrayIndex".to_string(), Value::String(index.clone()));
                }
                body.insert(
                    "preserveNullAndEmptyArrays".to_string(),
                    Value::Bool(*preserve_null_and_empty_arrays),
                );
                Value::Object(body)
            }
            Stage::ReplaceRoot(expr) => json!({ "newRoot": expr.to_json() }),
            Stage::Lookup {
                from,
                local_field,
                foreign_field,
                as_field,
            } => json!({
                "from": from,
                "localField": local_field,
                "foreignField": foreign_field,
                "as": as_field,
            }),
            Stage::Sort(clauses) => Value::Object(
                clauses
                    .iter()
                    .map(|(path, ascending)| (path.clone(), json!(if *ascending { 1 } else { -1 })))
                    .collect(),
            ),
            Stage::Skip(n) => json!(n),
            Stage::Limit(n) => json!(n),
            Stage::Group { id, accumulators } => {
                let mut body = Map::new();
                body.insert("_id".to_string(), id.to_json());
                for (name, accumulator) in accumulators {
                    body.insert(name.clone(), accumulator.to_json());
                }
                Value::Object(body)
            }
            Stage::Project(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(path, value)| (path.clone(), value.to_json()))
                    .collect(),
            ),
        };
        let mut stage = Map::new();
        stage.insert(self.name().to_string(), body);
        Value::Object(stage)
    }
}

impl Serialize for Stage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}
