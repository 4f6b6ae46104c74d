//! Condition tree validation
//!
//! Checks a tree against the schema of the collection it targets, leaf by
//! leaf, in this order:
//!
//! 1. the field resolves to a column, possibly through to-one relations
//! 2. the column accepts the operator for filtering
//! 3. the operator is legal for the column type
//! 4. the value has the shape the operator expects
//! 5. enum values belong to the column's enumeration
//!
//! The first violation is returned; nothing is downgraded to a warning.

use serde_json::Value;

use crate::observability::{log_event_with_fields, Event};
use crate::schema::{ColumnSchema, ColumnType, Collection};

use super::condition_tree::{ConditionTree, ConditionTreeLeaf};
use super::errors::{QueryError, QueryResult, ValidationKind};
use super::operators::{format_operators, Operator, ValueArity, ValueConstraint};
use super::path::resolve_column;
use super::value_type::{format_value_types, ValueType};

pub struct ConditionTreeValidator;

impl ConditionTreeValidator {
    /// Validates every leaf of `tree` against `collection`
    pub fn validate(tree: &ConditionTree, collection: Collection<'_>) -> QueryResult<()> {
        match Self::validate_tree(tree, collection) {
            Ok(()) => {
                log_event_with_fields(Event::QueryValidated, &[("collection", collection.name())]);
                Ok(())
            }
            Err(err) => {
                log_event_with_fields(
                    Event::QueryRejected,
                    &[
                        ("collection", collection.name()),
                        ("error_code", err.code()),
                        ("message", &err.to_string()),
                    ],
                );
                Err(err)
            }
        }
    }

    fn validate_tree(tree: &ConditionTree, collection: Collection<'_>) -> QueryResult<()> {
        match tree {
            ConditionTree::Branch(branch) => branch
                .conditions
                .iter()
                .try_for_each(|child| Self::validate_tree(child, collection)),
            ConditionTree::Leaf(leaf) => Self::validate_leaf(leaf, collection),
        }
    }

    fn validate_leaf(leaf: &ConditionTreeLeaf, collection: Collection<'_>) -> QueryResult<()> {
        let column = resolve_column(collection, &leaf.field)?;
        Self::validate_operator(leaf, column, collection)?;
        Self::validate_value(leaf, column)?;
        Self::validate_enum(leaf, column)
    }

    fn validate_operator(
        leaf: &ConditionTreeLeaf,
        column: &ColumnSchema,
        collection: Collection<'_>,
    ) -> QueryResult<()> {
        if !column.filter_operators.contains(&leaf.operator) {
            let message = if column.is_filterable() {
                format!(
                    "The given operator '{}' is not supported by the column: '{}'. The allowed operators are: {}",
                    leaf.operator,
                    leaf.field,
                    format_operators(&column.filter_operators)
                )
            } else {
                format!(
                    "The field '{}.{}' is not filterable",
                    collection.name(),
                    leaf.field
                )
            };
            return Err(QueryError::validation(ValidationKind::OperatorNotSupported, message));
        }

        if !leaf.operator.is_allowed_for(column.column_type) {
            return Err(QueryError::validation(
                ValidationKind::OperatorNotAllowedForType,
                format!(
                    "The given operator '{}' is not allowed with the column type '{}'. The allowed operators are: {}",
                    leaf.operator,
                    column.column_type,
                    format_operators(Operator::allowed_for(column.column_type))
                ),
            ));
        }
        Ok(())
    }

    fn validate_value(leaf: &ConditionTreeLeaf, column: &ColumnSchema) -> QueryResult<()> {
        let column_type = column.column_type;
        let accepted = match leaf.operator.constraint() {
            ValueConstraint::NoValue => leaf.value.is_null(),
            ValueConstraint::Count => leaf.value.as_u64().is_some(),
            ValueConstraint::Pattern => leaf.value.is_string(),
            ValueConstraint::AbsoluteDate => matches!(
                ValueType::of(&leaf.value, ColumnType::Date),
                ValueType::Date | ValueType::Dateonly
            ),
            ValueConstraint::ColumnTyped => match leaf.operator.arity() {
                ValueArity::List => match &leaf.value {
                    Value::Array(items) => items.iter().all(|item| fits(item, column_type)),
                    _ => false,
                },
                ValueArity::Range => match &leaf.value {
                    Value::Array(bounds) => {
                        bounds.len() == 2
                            && bounds.iter().all(|b| !b.is_null() && fits(b, column_type))
                    }
                    _ => false,
                },
                ValueArity::Scalar | ValueArity::None => fits(&leaf.value, column_type),
            },
        };

        if accepted {
            return Ok(());
        }
        Err(QueryError::validation(
            ValidationKind::UnexpectedValue,
            format!(
                "Wrong type for '{}': {}. Expects {}",
                leaf.field,
                leaf.value,
                expected_types(leaf.operator, column_type)
            ),
        ))
    }

    fn validate_enum(leaf: &ConditionTreeLeaf, column: &ColumnSchema) -> QueryResult<()> {
        if column.column_type != ColumnType::Enum
            || leaf.operator.constraint() != ValueConstraint::ColumnTyped
        {
            return Ok(());
        }

        let rejected: Vec<String> = leaf
            .value_list()
            .iter()
            .filter_map(Value::as_str)
            .filter(|v| !column.enum_values.iter().any(|allowed| allowed == v))
            .map(str::to_string)
            .collect();

        if rejected.is_empty() {
            return Ok(());
        }
        Err(QueryError::validation(
            ValidationKind::EnumValueNotAllowed,
            format!(
                "The given enum value(s) [{}] is not listed in [{}]",
                rejected.join(", "),
                column.enum_values.join(", ")
            ),
        ))
    }
}

fn fits(value: &Value, column_type: ColumnType) -> bool {
    ValueType::allowed_for(column_type).contains(&ValueType::of(value, column_type))
}

fn expected_types(operator: Operator, column_type: ColumnType) -> String {
    match operator.constraint() {
        ValueConstraint::NoValue => format_value_types(&[ValueType::Null]),
        ValueConstraint::Count => format_value_types(&[ValueType::Number]),
        ValueConstraint::Pattern => format_value_types(&[ValueType::String]),
        ValueConstraint::AbsoluteDate => {
            format_value_types(&[ValueType::Date, ValueType::Dateonly])
        }
        ValueConstraint::ColumnTyped => match operator.arity() {
            ValueArity::List => format!(
                "an array of {}",
                format_value_types(ValueType::allowed_for(column_type))
            ),
            ValueArity::Range => format!(
                "two bounds of {}",
                format_value_types(ValueType::allowed_for(column_type))
            ),
            _ => format_value_types(ValueType::allowed_for(column_type)),
        },
    }
}
