//! Operator catalog
//!
//! Every operator has a value arity, a value constraint and a fixed set of
//! column types for which it is legal.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::schema::ColumnType;

/// Comparison and predicate operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Operator {
    // Presence
    Present,
    Blank,
    Missing,

    // Equality and ordering
    Equal,
    NotEqual,
    LessThan,
    GreaterThan,
    LessThanOrEqual,
    GreaterThanOrEqual,
    Between,

    // Lists
    In,
    NotIn,
    IncludesAll,
    IncludesNone,

    // Strings
    Like,
    ILike,
    Contains,
    NotContains,
    IContains,
    NotIContains,
    StartsWith,
    IStartsWith,
    EndsWith,
    IEndsWith,
    Match,
    LongerThan,
    ShorterThan,

    // Dates
    Before,
    After,
    BeforeXHoursAgo,
    AfterXHoursAgo,
    Past,
    Future,
    Today,
    Yesterday,
    PreviousXDays,
    PreviousXDaysToDate,
    PreviousWeek,
    PreviousWeekToDate,
    PreviousMonth,
    PreviousMonthToDate,
    PreviousQuarter,
    PreviousQuarterToDate,
    PreviousYear,
    PreviousYearToDate,
}

/// Shape of the value an operator expects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueArity {
    None,
    Scalar,
    List,
    /// `[low, high]`
    Range,
}

/// What the value must contain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueConstraint {
    NoValue,
    /// Value must fit the column type
    ColumnTyped,
    /// Non-negative integer (days, hours, characters)
    Count,
    /// String pattern
    Pattern,
    /// Concrete date or datetime
    AbsoluteDate,
}

const BASE: &[Operator] = &[
    Operator::Present,
    Operator::Blank,
    Operator::Missing,
    Operator::Equal,
    Operator::NotEqual,
];

const LIST: &[Operator] = &[
    Operator::In,
    Operator::NotIn,
    Operator::IncludesAll,
    Operator::IncludesNone,
];

const ORDERING: &[Operator] = &[
    Operator::LessThan,
    Operator::GreaterThan,
    Operator::LessThanOrEqual,
    Operator::GreaterThanOrEqual,
];

const STRING: &[Operator] = &[
    Operator::Contains,
    Operator::NotContains,
    Operator::IContains,
    Operator::NotIContains,
    Operator::StartsWith,
    Operator::IStartsWith,
    Operator::EndsWith,
    Operator::IEndsWith,
    Operator::Like,
    Operator::ILike,
    Operator::Match,
    Operator::LongerThan,
    Operator::ShorterThan,
];

const DATE: &[Operator] = &[
    Operator::Before,
    Operator::After,
    Operator::BeforeXHoursAgo,
    Operator::AfterXHoursAgo,
    Operator::Past,
    Operator::Future,
    Operator::Today,
    Operator::Yesterday,
    Operator::PreviousXDays,
    Operator::PreviousXDaysToDate,
    Operator::PreviousWeek,
    Operator::PreviousWeekToDate,
    Operator::PreviousMonth,
    Operator::PreviousMonthToDate,
    Operator::PreviousQuarter,
    Operator::PreviousQuarterToDate,
    Operator::PreviousYear,
    Operator::PreviousYearToDate,
];

/// Per-type tables, computed once.
struct Catalog {
    by_type: Vec<(ColumnType, Vec<Operator>)>,
}

fn catalog() -> &'static Catalog {
    static CATALOG: std::sync::OnceLock<Catalog> = std::sync::OnceLock::new();
    CATALOG.get_or_init(|| {
        let join = |parts: &[&[Operator]]| -> Vec<Operator> {
            parts.iter().flat_map(|p| p.iter().copied()).collect()
        };
        let by_type = ColumnType::ALL
            .iter()
            .map(|column_type| {
                let operators = match column_type {
                    ColumnType::String => join(&[BASE, LIST, STRING]),
                    ColumnType::Number => join(&[BASE, LIST, ORDERING, &[Operator::Between]]),
                    ColumnType::Date | ColumnType::Dateonly => {
                        join(&[BASE, DATE, ORDERING, &[Operator::Between]])
                    }
                    ColumnType::Timeonly => join(&[BASE, ORDERING]),
                    ColumnType::Enum | ColumnType::Uuid | ColumnType::Binary => {
                        join(&[BASE, LIST])
                    }
                    ColumnType::Boolean | ColumnType::Json => BASE.to_vec(),
                    ColumnType::Point => Vec::new(),
                };
                (*column_type, operators)
            })
            .collect();
        Catalog { by_type }
    })
}

impl Operator {
    pub const ALL: [Operator; 45] = [
        Operator::Present,
        Operator::Blank,
        Operator::Missing,
        Operator::Equal,
        Operator::NotEqual,
        Operator::LessThan,
        Operator::GreaterThan,
        Operator::LessThanOrEqual,
        Operator::GreaterThanOrEqual,
        Operator::Between,
        Operator::In,
        Operator::NotIn,
        Operator::IncludesAll,
        Operator::IncludesNone,
        Operator::Like,
        Operator::ILike,
        Operator::Contains,
        Operator::NotContains,
        Operator::IContains,
        Operator::NotIContains,
        Operator::StartsWith,
        Operator::IStartsWith,
        Operator::EndsWith,
        Operator::IEndsWith,
        Operator::Match,
        Operator::LongerThan,
        Operator::ShorterThan,
        Operator::Before,
        Operator::After,
        Operator::BeforeXHoursAgo,
        Operator::AfterXHoursAgo,
        Operator::Past,
        Operator::Future,
        Operator::Today,
        Operator::Yesterday,
        Operator::PreviousXDays,
        Operator::PreviousXDaysToDate,
        Operator::PreviousWeek,
        Operator::PreviousWeekToDate,
        Operator::PreviousMonth,
        Operator::PreviousMonthToDate,
        Operator::PreviousQuarter,
        Operator::PreviousQuarterToDate,
        Operator::PreviousYear,
        Operator::PreviousYearToDate,
    ];

    /// Parses `NotEqual` as well as `not_equal`
    pub fn from_name(name: &str) -> Option<Operator> {
        let pascal: String = name
            .split('_')
            .filter(|part| !part.is_empty())
            .map(|part| {
                let mut chars = part.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect();
        Self::ALL.iter().copied().find(|op| op.as_str() == pascal)
    }

    /// Operators legal for a column type
    pub fn allowed_for(column_type: ColumnType) -> &'static [Operator] {
        catalog()
            .by_type
            .iter()
            .find(|(t, _)| *t == column_type)
            .map(|(_, ops)| ops.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_allowed_for(self, column_type: ColumnType) -> bool {
        Self::allowed_for(column_type).contains(&self)
    }

    pub fn arity(self) -> ValueArity {
        match self.constraint() {
            ValueConstraint::NoValue => ValueArity::None,
            _ => match self {
                Operator::In | Operator::NotIn | Operator::IncludesAll | Operator::IncludesNone => {
                    ValueArity::List
                }
                Operator::Between => ValueArity::Range,
                _ => ValueArity::Scalar,
            },
        }
    }

    pub fn constraint(self) -> ValueConstraint {
        match self {
            Operator::Present
            | Operator::Blank
            | Operator::Missing
            | Operator::Past
            | Operator::Future
            | Operator::Today
            | Operator::Yesterday
            | Operator::PreviousWeek
            | Operator::PreviousWeekToDate
            | Operator::PreviousMonth
            | Operator::PreviousMonthToDate
            | Operator::PreviousQuarter
            | Operator::PreviousQuarterToDate
            | Operator::PreviousYear
            | Operator::PreviousYearToDate => ValueConstraint::NoValue,

            Operator::PreviousXDays
            | Operator::PreviousXDaysToDate
            | Operator::BeforeXHoursAgo
            | Operator::AfterXHoursAgo
            | Operator::LongerThan
            | Operator::ShorterThan => ValueConstraint::Count,

            Operator::Like
            | Operator::ILike
            | Operator::Contains
            | Operator::NotContains
            | Operator::IContains
            | Operator::NotIContains
            | Operator::StartsWith
            | Operator::IStartsWith
            | Operator::EndsWith
            | Operator::IEndsWith
            | Operator::Match => ValueConstraint::Pattern,

            Operator::Before | Operator::After => ValueConstraint::AbsoluteDate,

            _ => ValueConstraint::ColumnTyped,
        }
    }

    /// Relative date operators denoting an interval ending around "now"
    pub fn is_interval(self) -> bool {
        matches!(
            self,
            Operator::Today
                | Operator::Yesterday
                | Operator::PreviousXDays
                | Operator::PreviousXDaysToDate
                | Operator::PreviousWeek
                | Operator::PreviousWeekToDate
                | Operator::PreviousMonth
                | Operator::PreviousMonthToDate
                | Operator::PreviousQuarter
                | Operator::PreviousQuarterToDate
                | Operator::PreviousYear
                | Operator::PreviousYearToDate
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Present => "Present",
            Operator::Blank => "Blank",
            Operator::Missing => "Missing",
            Operator::Equal => "Equal",
            Operator::NotEqual => "NotEqual",
            Operator::LessThan => "LessThan",
            Operator::GreaterThan => "GreaterThan",
            Operator::LessThanOrEqual => "LessThanOrEqual",
            Operator::GreaterThanOrEqual => "GreaterThanOrEqual",
            Operator::Between => "Between",
            Operator::In => "In",
            Operator::NotIn => "NotIn",
            Operator::IncludesAll => "IncludesAll",
            Operator::IncludesNone => "IncludesNone",
            Operator::Like => "Like",
            Operator::ILike => "ILike",
            Operator::Contains => "Contains",
            Operator::NotContains => "NotContains",
            Operator::IContains => "IContains",
            Operator::NotIContains => "NotIContains",
            Operator::StartsWith => "StartsWith",
            Operator::IStartsWith => "IStartsWith",
            Operator::EndsWith => "EndsWith",
            Operator::IEndsWith => "IEndsWith",
            Operator::Match => "Match",
            Operator::LongerThan => "LongerThan",
            Operator::ShorterThan => "ShorterThan",
            Operator::Before => "Before",
            Operator::After => "After",
            Operator::BeforeXHoursAgo => "BeforeXHoursAgo",
            Operator::AfterXHoursAgo => "AfterXHoursAgo",
            Operator::Past => "Past",
            Operator::Future => "Future",
            Operator::Today => "Today",
            Operator::Yesterday => "Yesterday",
            Operator::PreviousXDays => "PreviousXDays",
            Operator::PreviousXDaysToDate => "PreviousXDaysToDate",
            Operator::PreviousWeek => "PreviousWeek",
            Operator::PreviousWeekToDate => "PreviousWeekToDate",
            Operator::PreviousMonth => "PreviousMonth",
            Operator::PreviousMonthToDate => "PreviousMonthToDate",
            Operator::PreviousQuarter => "PreviousQuarter",
            Operator::PreviousQuarterToDate => "PreviousQuarterToDate",
            Operator::PreviousYear => "PreviousYear",
            Operator::PreviousYearToDate => "PreviousYearToDate",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Formats an operator list for error messages: `[Equal, In]`
pub fn format_operators<'a, I: IntoIterator<Item = &'a Operator>>(operators: I) -> String {
    let names: Vec<&str> = operators.into_iter().map(|op| op.as_str()).collect();
    format!("[{}]", names.join(", "))
}
