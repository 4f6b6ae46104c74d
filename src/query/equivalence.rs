//! Operator equivalence rewriting
//!
//! Rewrites a leaf whose operator is not allowed into an equivalent tree made
//! only of allowed operators. Rules are looked up by operator, optionally
//! restricted to column types, and chained recursively: `Contains` becomes
//! `Like`, which becomes `Match` when `Like` itself is not allowed.
//!
//! The rule table is built once and only read afterwards.
//!
//! # Time intervals
//!
//! Relative date operators are rewritten against "now" in the caller's
//! timezone. Days start at local midnight, weeks on Monday, quarters in
//! January, April, July and October. Bounds are emitted as UTC RFC 3339
//! strings with millisecond precision.

use chrono::{
    DateTime, Datelike, Days, Duration, Months, NaiveDate, SecondsFormat, TimeZone, Utc,
};
use chrono_tz::Tz;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use crate::observability::{log_event_with_fields, Event};
use crate::schema::ColumnType;

use super::condition_tree::{ConditionTree, ConditionTreeLeaf};
use super::errors::{QueryError, QueryResult};
use super::operators::Operator;

type Replacer =
    Box<dyn Fn(&ConditionTreeLeaf, &RewriteContext) -> QueryResult<ConditionTree> + Send + Sync>;

/// One way of expressing an operator through others
struct Alternative {
    depends_on: &'static [Operator],
    for_types: Option<&'static [ColumnType]>,
    replacer: Replacer,
}

struct RewriteContext {
    timezone: Tz,
    now: DateTime<Utc>,
}

/// Resolved rewrite for one operator
enum Plan {
    Keep,
    Replace {
        alternative: &'static Alternative,
        dependencies: Vec<(Operator, Plan)>,
    },
}

const STRING_ONLY: &[ColumnType] = &[ColumnType::String];
const DATES: &[ColumnType] = &[ColumnType::Date, ColumnType::Dateonly];

pub struct ConditionTreeEquivalent;

impl ConditionTreeEquivalent {
    /// Equivalent tree for `leaf` using only `operators`, evaluated at the current time
    pub fn get_equivalent_tree(
        leaf: &ConditionTreeLeaf,
        operators: &BTreeSet<Operator>,
        column_type: ColumnType,
        timezone: Tz,
    ) -> QueryResult<ConditionTree> {
        Self::get_equivalent_tree_at(leaf, operators, column_type, timezone, Utc::now())
    }

    /// Same as [`get_equivalent_tree`](Self::get_equivalent_tree) with an explicit clock
    pub fn get_equivalent_tree_at(
        leaf: &ConditionTreeLeaf,
        operators: &BTreeSet<Operator>,
        column_type: ColumnType,
        timezone: Tz,
        now: DateTime<Utc>,
    ) -> QueryResult<ConditionTree> {
        let plan = find_plan(leaf.operator, operators, column_type, &mut Vec::new());

        let Some(plan) = plan else {
            log_event_with_fields(
                Event::RewriteUnavailable,
                &[
                    ("column_type", column_type.as_str()),
                    ("field", &leaf.field),
                    ("operator", leaf.operator.as_str()),
                ],
            );
            return Err(QueryError::unsupported(format!(
                "No equivalent tree for operator '{}' on column '{}' of type '{}' using {}",
                leaf.operator,
                leaf.field,
                column_type,
                super::operators::format_operators(operators)
            )));
        };

        if let Plan::Replace { .. } = plan {
            log_event_with_fields(
                Event::RewriteApplied,
                &[("field", &leaf.field), ("operator", leaf.operator.as_str())],
            );
        }

        let context = RewriteContext { timezone, now };
        execute(&plan, leaf, &context)
    }

    /// Whether a rewrite exists, without computing it
    pub fn has_equivalent_tree(
        operator: Operator,
        operators: &BTreeSet<Operator>,
        column_type: ColumnType,
    ) -> bool {
        find_plan(operator, operators, column_type, &mut Vec::new()).is_some()
    }
}

fn find_plan(
    operator: Operator,
    allowed: &BTreeSet<Operator>,
    column_type: ColumnType,
    visited: &mut Vec<Operator>,
) -> Option<Plan> {
    if allowed.contains(&operator) {
        return Some(Plan::Keep);
    }
    if visited.contains(&operator) {
        return None;
    }

    visited.push(operator);
    let found = rules().get(&operator).and_then(|alternatives| {
        alternatives.iter().find_map(|alternative| {
            if let Some(types) = alternative.for_types {
                if !types.contains(&column_type) {
                    return None;
                }
            }
            let dependencies = alternative
                .depends_on
                .iter()
                .map(|dep| find_plan(*dep, allowed, column_type, visited).map(|plan| (*dep, plan)))
                .collect::<Option<Vec<_>>>()?;
            Some(Plan::Replace {
                alternative,
                dependencies,
            })
        })
    });
    visited.pop();
    found
}

fn execute(plan: &Plan, leaf: &ConditionTreeLeaf, context: &RewriteContext) -> QueryResult<ConditionTree> {
    match plan {
        Plan::Keep => Ok(ConditionTree::Leaf(leaf.clone())),
        Plan::Replace {
            alternative,
            dependencies,
        } => {
            let tree = (alternative.replacer)(leaf, context)?;
            tree.replace_leaves(&mut |sub| {
                match dependencies.iter().find(|(op, _)| *op == sub.operator) {
                    Some((_, sub_plan)) => execute(sub_plan, sub, context),
                    None => Ok(ConditionTree::Leaf(sub.clone())),
                }
            })
        }
    }
}

fn rules() -> &'static BTreeMap<Operator, Vec<Alternative>> {
    static RULES: OnceLock<BTreeMap<Operator, Vec<Alternative>>> = OnceLock::new();
    RULES.get_or_init(|| {
        let mut rules = BTreeMap::new();
        comparison_rules(&mut rules);
        pattern_rules(&mut rules);
        time_rules(&mut rules);
        rules
    })
}

fn rule<F>(depends_on: &'static [Operator], for_types: Option<&'static [ColumnType]>, replacer: F) -> Alternative
where
    F: Fn(&ConditionTreeLeaf, &RewriteContext) -> QueryResult<ConditionTree> + Send + Sync + 'static,
{
    Alternative {
        depends_on,
        for_types,
        replacer: Box::new(replacer),
    }
}

// =============================================================================
// Comparison
// =============================================================================

fn comparison_rules(rules: &mut BTreeMap<Operator, Vec<Alternative>>) {
    use Operator::*;

    rules.insert(
        Blank,
        vec![
            rule(&[In], Some(STRING_ONLY), |leaf, _| Ok(leaf.override_with(In, json!([null, ""])))),
            rule(&[Missing], None, |leaf, _| Ok(leaf.override_with(Missing, Value::Null))),
        ],
    );
    rules.insert(
        Missing,
        vec![rule(&[Equal], None, |leaf, _| Ok(leaf.override_with(Equal, Value::Null)))],
    );
    rules.insert(
        Present,
        vec![
            rule(&[NotIn], Some(STRING_ONLY), |leaf, _| {
                Ok(leaf.override_with(NotIn, json!([null, ""])))
            }),
            rule(&[NotEqual], None, |leaf, _| Ok(leaf.override_with(NotEqual, Value::Null))),
        ],
    );
    rules.insert(
        Equal,
        vec![rule(&[In], None, |leaf, _| {
            Ok(leaf.override_with(In, Value::Array(vec![leaf.value.clone()])))
        })],
    );
    rules.insert(
        In,
        vec![rule(&[Equal], None, |leaf, _| {
            Ok(ConditionTree::union(
                leaf.value_list().into_iter().map(|v| leaf.override_with(Equal, v)),
            ))
        })],
    );
    rules.insert(
        NotEqual,
        vec![rule(&[NotIn], None, |leaf, _| {
            Ok(leaf.override_with(NotIn, Value::Array(vec![leaf.value.clone()])))
        })],
    );
    rules.insert(
        NotIn,
        vec![rule(&[NotEqual], None, |leaf, _| {
            Ok(ConditionTree::intersect(
                leaf.value_list().into_iter().map(|v| leaf.override_with(NotEqual, v)),
            ))
        })],
    );
    rules.insert(
        LessThanOrEqual,
        vec![rule(&[LessThan, Equal], None, |leaf, _| {
            Ok(ConditionTree::or(vec![
                leaf.override_with(LessThan, leaf.value.clone()),
                leaf.override_with(Equal, leaf.value.clone()),
            ]))
        })],
    );
    rules.insert(
        GreaterThanOrEqual,
        vec![rule(&[GreaterThan, Equal], None, |leaf, _| {
            Ok(ConditionTree::or(vec![
                leaf.override_with(GreaterThan, leaf.value.clone()),
                leaf.override_with(Equal, leaf.value.clone()),
            ]))
        })],
    );
    rules.insert(
        Between,
        vec![rule(&[GreaterThanOrEqual, LessThanOrEqual], None, |leaf, _| {
            let (low, high) = match leaf.value.as_array().map(Vec::as_slice) {
                Some([low, high]) => (low.clone(), high.clone()),
                _ => {
                    return Err(QueryError::malformed(format!(
                        "Between on '{}' expects [low, high]",
                        leaf.field
                    )))
                }
            };
            Ok(ConditionTree::and(vec![
                leaf.override_with(GreaterThanOrEqual, low),
                leaf.override_with(LessThanOrEqual, high),
            ]))
        })],
    );
}

// =============================================================================
// Patterns
// =============================================================================

fn pattern_rules(rules: &mut BTreeMap<Operator, Vec<Alternative>>) {
    use Operator::*;

    fn like(leaf: &ConditionTreeLeaf, operator: Operator, prefix: &str, suffix: &str) -> QueryResult<ConditionTree> {
        let value = pattern_value(leaf)?;
        Ok(leaf.override_with(operator, json!(format!("{}{}{}", prefix, value, suffix))))
    }

    rules.insert(Contains, vec![rule(&[Like], Some(STRING_ONLY), |l, _| like(l, Like, "%", "%"))]);
    rules.insert(StartsWith, vec![rule(&[Like], Some(STRING_ONLY), |l, _| like(l, Like, "", "%"))]);
    rules.insert(EndsWith, vec![rule(&[Like], Some(STRING_ONLY), |l, _| like(l, Like, "%", ""))]);
    rules.insert(IContains, vec![rule(&[ILike], Some(STRING_ONLY), |l, _| like(l, ILike, "%", "%"))]);
    rules.insert(IStartsWith, vec![rule(&[ILike], Some(STRING_ONLY), |l, _| like(l, ILike, "", "%"))]);
    rules.insert(IEndsWith, vec![rule(&[ILike], Some(STRING_ONLY), |l, _| like(l, ILike, "%", ""))]);

    rules.insert(
        Like,
        vec![rule(&[Match], Some(STRING_ONLY), |leaf, _| {
            Ok(leaf.override_with(Match, json!(like_to_regex(pattern_value(leaf)?, false))))
        })],
    );
    rules.insert(
        ILike,
        vec![rule(&[Match], Some(STRING_ONLY), |leaf, _| {
            Ok(leaf.override_with(Match, json!(like_to_regex(pattern_value(leaf)?, true))))
        })],
    );
}

fn pattern_value(leaf: &ConditionTreeLeaf) -> QueryResult<&str> {
    leaf.value.as_str().ok_or_else(|| {
        QueryError::malformed(format!("'{}' on '{}' expects a string", leaf.operator, leaf.field))
    })
}

/// `%` matches any run of characters, `_` a single one
pub fn like_to_regex(pattern: &str, case_insensitive: bool) -> String {
    let mut regex = String::from(if case_insensitive { "(?i)^" } else { "^" });
    let mut buffer = [0u8; 4];
    for c in pattern.chars() {
        match c {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            c => regex.push_str(&regex::escape(c.encode_utf8(&mut buffer))),
        }
    }
    regex.push('$');
    regex
}

// =============================================================================
// Time
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum Unit {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

fn time_rules(rules: &mut BTreeMap<Operator, Vec<Alternative>>) {
    use Operator::*;

    rules.insert(
        Before,
        vec![rule(&[LessThan], Some(DATES), |leaf, _| Ok(leaf.override_with(LessThan, leaf.value.clone())))],
    );
    rules.insert(
        After,
        vec![rule(&[GreaterThan], Some(DATES), |leaf, _| {
            Ok(leaf.override_with(GreaterThan, leaf.value.clone()))
        })],
    );
    rules.insert(
        Past,
        vec![rule(&[LessThan], Some(DATES), |leaf, ctx| Ok(leaf.override_with(LessThan, format_instant(ctx.now))))],
    );
    rules.insert(
        Future,
        vec![rule(&[GreaterThan], Some(DATES), |leaf, ctx| {
            Ok(leaf.override_with(GreaterThan, format_instant(ctx.now)))
        })],
    );
    rules.insert(
        BeforeXHoursAgo,
        vec![rule(&[LessThan], Some(DATES), |leaf, ctx| {
            let hours = count_value(leaf)?;
            Ok(leaf.override_with(LessThan, format_instant(ctx.now - Duration::hours(hours))))
        })],
    );
    rules.insert(
        AfterXHoursAgo,
        vec![rule(&[GreaterThan], Some(DATES), |leaf, ctx| {
            let hours = count_value(leaf)?;
            Ok(leaf.override_with(GreaterThan, format_instant(ctx.now - Duration::hours(hours))))
        })],
    );

    rules.insert(Today, interval(|_, ctx| {
        let today = ctx.today();
        Ok((ctx.midnight(today)?, ctx.midnight(shift(today, Unit::Day, -1)?)?))
    }));
    rules.insert(Yesterday, interval(|_, ctx| previous(ctx, Unit::Day)));
    rules.insert(PreviousWeek, interval(|_, ctx| previous(ctx, Unit::Week)));
    rules.insert(PreviousMonth, interval(|_, ctx| previous(ctx, Unit::Month)));
    rules.insert(PreviousQuarter, interval(|_, ctx| previous(ctx, Unit::Quarter)));
    rules.insert(PreviousYear, interval(|_, ctx| previous(ctx, Unit::Year)));
    rules.insert(PreviousWeekToDate, interval(|_, ctx| to_date(ctx, Unit::Week)));
    rules.insert(PreviousMonthToDate, interval(|_, ctx| to_date(ctx, Unit::Month)));
    rules.insert(PreviousQuarterToDate, interval(|_, ctx| to_date(ctx, Unit::Quarter)));
    rules.insert(PreviousYearToDate, interval(|_, ctx| to_date(ctx, Unit::Year)));
    rules.insert(PreviousXDays, interval(|leaf, ctx| {
        let days = count_value(leaf)?;
        let today = ctx.today();
        Ok((ctx.midnight(shift(today, Unit::Day, days)?)?, ctx.midnight(today)?))
    }));
    rules.insert(PreviousXDaysToDate, interval(|leaf, ctx| {
        let days = count_value(leaf)?;
        let start = ctx.midnight(shift(ctx.today(), Unit::Day, days)?)?;
        Ok((start, ctx.now))
    }));
}

type Bounds = fn(&ConditionTreeLeaf, &RewriteContext) -> QueryResult<(DateTime<Utc>, DateTime<Utc>)>;

/// `[start, end)` when `GreaterThanOrEqual` is reachable, `(start, end)` otherwise
fn interval(bounds: Bounds) -> Vec<Alternative> {
    vec![
        rule(
            &[Operator::GreaterThanOrEqual, Operator::LessThan],
            Some(DATES),
            move |leaf, ctx| build_interval(leaf, ctx, Operator::GreaterThanOrEqual, bounds),
        ),
        rule(
            &[Operator::GreaterThan, Operator::LessThan],
            Some(DATES),
            move |leaf, ctx| build_interval(leaf, ctx, Operator::GreaterThan, bounds),
        ),
    ]
}

fn build_interval(
    leaf: &ConditionTreeLeaf,
    ctx: &RewriteContext,
    lower: Operator,
    bounds: Bounds,
) -> QueryResult<ConditionTree> {
    let (start, end) = bounds(leaf, ctx)?;
    Ok(ConditionTree::and(vec![
        leaf.override_with(lower, format_instant(start)),
        leaf.override_with(Operator::LessThan, format_instant(end)),
    ]))
}

impl RewriteContext {
    fn today(&self) -> NaiveDate {
        self.now.with_timezone(&self.timezone).date_naive()
    }

    /// Local midnight of `date`, or the first instant of the day when midnight
    /// falls in a DST gap
    fn midnight(&self, date: NaiveDate) -> QueryResult<DateTime<Utc>> {
        let naive = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| QueryError::malformed(format!("Invalid date {}", date)))?;
        self.timezone
            .from_local_datetime(&naive)
            .earliest()
            .or_else(|| self.timezone.from_local_datetime(&(naive + Duration::hours(1))).earliest())
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| {
                QueryError::malformed(format!("No local midnight on {} in {}", date, self.timezone))
            })
    }
}

fn unit_start(date: NaiveDate, unit: Unit) -> QueryResult<NaiveDate> {
    let start = match unit {
        Unit::Day => Some(date),
        Unit::Week => date.checked_sub_days(Days::new(u64::from(date.weekday().num_days_from_monday()))),
        Unit::Month => date.with_day(1),
        Unit::Quarter => NaiveDate::from_ymd_opt(date.year(), (date.month0() / 3) * 3 + 1, 1),
        Unit::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1),
    };
    start.ok_or_else(|| QueryError::malformed(format!("Cannot compute {:?} start of {}", unit, date)))
}

/// Moves `date` back by `count` units (forward when negative)
fn shift(date: NaiveDate, unit: Unit, count: i64) -> QueryResult<NaiveDate> {
    let months = |n: i64| Months::new(n.unsigned_abs() as u32);
    let days = |n: i64| Days::new(n.unsigned_abs());
    let shifted = match (unit, count >= 0) {
        (Unit::Day, true) => date.checked_sub_days(days(count)),
        (Unit::Day, false) => date.checked_add_days(days(count)),
        (Unit::Week, true) => date.checked_sub_days(days(count * 7)),
        (Unit::Week, false) => date.checked_add_days(days(count * 7)),
        (Unit::Month, true) => date.checked_sub_months(months(count)),
        (Unit::Month, false) => date.checked_add_months(months(count)),
        (Unit::Quarter, true) => date.checked_sub_months(months(count * 3)),
        (Unit::Quarter, false) => date.checked_add_months(months(count * 3)),
        (Unit::Year, true) => date.checked_sub_months(months(count * 12)),
        (Unit::Year, false) => date.checked_add_months(months(count * 12)),
    };
    shifted.ok_or_else(|| QueryError::malformed(format!("Date out of range shifting {}", date)))
}

/// The whole previous unit
fn previous(ctx: &RewriteContext, unit: Unit) -> QueryResult<(DateTime<Utc>, DateTime<Utc>)> {
    let current = unit_start(ctx.today(), unit)?;
    let start = shift(current, unit, 1)?;
    Ok((ctx.midnight(start)?, ctx.midnight(current)?))
}

/// From the start of the current unit to now
fn to_date(ctx: &RewriteContext, unit: Unit) -> QueryResult<(DateTime<Utc>, DateTime<Utc>)> {
    let current = unit_start(ctx.today(), unit)?;
    Ok((ctx.midnight(current)?, ctx.now))
}

fn count_value(leaf: &ConditionTreeLeaf) -> QueryResult<i64> {
    leaf.value
        .as_i64()
        .filter(|n| *n >= 0)
        .ok_or_else(|| {
            QueryError::malformed(format!(
                "'{}' on '{}' expects a non-negative count",
                leaf.operator, leaf.field
            ))
        })
}

fn format_instant(instant: DateTime<Utc>) -> Value {
    json!(instant.to_rfc3339_opts(SecondsFormat::Millis, true))
}
