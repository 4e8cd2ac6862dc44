//! Declarative notification filters.
//!
//! A filter spec maps prefixed field names to bound values:
//!
//! | key            | condition            |
//! |----------------|----------------------|
//! | `max_<field>`  | `<field> <= value`   |
//! | `min_<field>`  | `<field> >= value`   |
//! | `list_<field>` | `<field> in values`  |
//! | `<field>`      | `<field> == value`   |
//!
//! Null-bound entries impose no constraint. All conditions are AND-ed.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use rentwatch_core::{FieldValue, ReconciledRecord};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::table::ReconciledTable;

/// Bound value of one filter entry: a scalar, or a list for `list_` keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterBound {
    List(Vec<FieldValue>),
    Scalar(FieldValue),
}

pub type FilterSpec = BTreeMap<String, Option<FilterBound>>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterCompileError {
    #[error("filter `{key}` names no field")]
    EmptyField { key: String },
    #[error("filter `{key}` needs a list of values")]
    ExpectedList { key: String },
    #[error("filter `{key}` needs a single value, not a list")]
    ExpectedScalar { key: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterEvaluationError {
    #[error("filter references field `{field}` which no record carries")]
    UnknownField { field: String },
    #[error("filter on `{field}` compares a {actual} value with a {bound} bound")]
    TypeMismatch {
        field: String,
        actual: &'static str,
        bound: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Equals { field: String, value: FieldValue },
    LessOrEqual { field: String, bound: FieldValue },
    GreaterOrEqual { field: String, bound: FieldValue },
    MemberOf { field: String, values: Vec<FieldValue> },
}

impl Condition {
    pub fn field(&self) -> &str {
        match self {
            Self::Equals { field, .. }
            | Self::LessOrEqual { field, .. }
            | Self::GreaterOrEqual { field, .. }
            | Self::MemberOf { field, .. } => field,
        }
    }

    /// NULL never satisfies a condition.
    pub fn matches(&self, actual: Option<&FieldValue>) -> Result<bool, FilterEvaluationError> {
        let Some(actual) = actual else {
            return Ok(false);
        };
        match self {
            Self::Equals { value, .. } => Ok(values_equal(actual, value)),
            Self::LessOrEqual { field, bound } => {
                Ok(compare(field, actual, bound)?.is_some_and(|o| o != Ordering::Greater))
            }
            Self::GreaterOrEqual { field, bound } => {
                Ok(compare(field, actual, bound)?.is_some_and(|o| o != Ordering::Less))
            }
            Self::MemberOf { values, .. } => Ok(values.iter().any(|v| values_equal(actual, v))),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals { field, value } => write!(f, "{field} == {value}"),
            Self::LessOrEqual { field, bound } => write!(f, "{field} <= {bound}"),
            Self::GreaterOrEqual { field, bound } => write!(f, "{field} >= {bound}"),
            Self::MemberOf { field, values } => {
                let values = values.iter().map(ToString::to_string).collect::<Vec<_>>();
                write!(f, "{field} in [{}]", values.join(", "))
            }
        }
    }
}

fn values_equal(a: &FieldValue, b: &FieldValue) -> bool {
    match (a, b) {
        (FieldValue::Text(a), FieldValue::Text(b)) => a == b,
        (FieldValue::Bool(a), FieldValue::Bool(b)) => a == b,
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
    }
}

/// `Ok(None)` when the numbers are unordered (NaN).
fn compare(
    field: &str,
    actual: &FieldValue,
    bound: &FieldValue,
) -> Result<Option<Ordering>, FilterEvaluationError> {
    match (actual, bound) {
        (FieldValue::Text(a), FieldValue::Text(b)) => Ok(Some(a.cmp(b))),
        _ => match (actual.as_f64(), bound.as_f64()) {
            (Some(a), Some(b)) => Ok(a.partial_cmp(&b)),
            _ => Err(FilterEvaluationError::TypeMismatch {
                field: field.to_string(),
                actual: actual.kind(),
                bound: bound.kind(),
            }),
        },
    }
}

/// Conjunction of compiled conditions. An empty predicate accepts every record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    conditions: Vec<Condition>,
}

impl Predicate {
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn evaluate(&self, record: &ReconciledRecord) -> Result<bool, FilterEvaluationError> {
        for condition in &self.conditions {
            let actual = ReconciledTable::column_value(record, condition.field());
            if !condition.matches(actual.as_ref())? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Records of `table` satisfying every condition, newest first.
    ///
    /// Every referenced field must be a column of the table, even if NULL for
    /// all records; otherwise the filter and the data have drifted apart.
    pub fn apply(
        &self,
        table: &ReconciledTable,
    ) -> Result<Vec<ReconciledRecord>, FilterEvaluationError> {
        self.apply_where(table, |_| true)
    }

    /// Like [`Self::apply`], restricted to records accepted by `candidate`.
    /// The column check still covers the whole table.
    pub fn apply_where(
        &self,
        table: &ReconciledTable,
        candidate: impl Fn(&ReconciledRecord) -> bool,
    ) -> Result<Vec<ReconciledRecord>, FilterEvaluationError> {
        let columns = table.columns();
        if let Some(missing) = self
            .conditions
            .iter()
            .find(|c| !columns.contains(c.field()))
        {
            return Err(FilterEvaluationError::UnknownField {
                field: missing.field().to_string(),
            });
        }

        let mut selected = Vec::new();
        for record in table.iter().filter(|r| candidate(*r)) {
            if self.evaluate(record)? {
                selected.push(record.clone());
            }
        }
        selected.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(selected)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.conditions.is_empty() {
            return write!(f, "true");
        }
        let parts = self
            .conditions
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        write!(f, "{}", parts.join(" AND "))
    }
}

fn field_name(key: &str, field: &str) -> Result<String, FilterCompileError> {
    if field.is_empty() {
        Err(FilterCompileError::EmptyField {
            key: key.to_string(),
        })
    } else {
        Ok(field.to_string())
    }
}

fn scalar(key: &str, bound: &FilterBound) -> Result<FieldValue, FilterCompileError> {
    match bound {
        FilterBound::Scalar(value) => Ok(value.clone()),
        FilterBound::List(_) => Err(FilterCompileError::ExpectedScalar {
            key: key.to_string(),
        }),
    }
}

pub fn compile(spec: &FilterSpec) -> Result<Predicate, FilterCompileError> {
    let mut conditions = Vec::new();
    for (key, bound) in spec {
        let Some(bound) = bound else {
            continue;
        };
        let condition = if let Some(field) = key.strip_prefix("max_") {
            Condition::LessOrEqual {
                field: field_name(key, field)?,
                bound: scalar(key, bound)?,
            }
        } else if let Some(field) = key.strip_prefix("min_") {
            Condition::GreaterOrEqual {
                field: field_name(key, field)?,
                bound: scalar(key, bound)?,
            }
        } else if let Some(field) = key.strip_prefix("list_") {
            let FilterBound::List(values) = bound else {
                return Err(FilterCompileError::ExpectedList { key: key.clone() });
            };
            Condition::MemberOf {
                field: field_name(key, field)?,
                values: values.clone(),
            }
        } else {
            Condition::Equals {
                field: field_name(key, key)?,
                value: scalar(key, bound)?,
            }
        };
        conditions.push(condition);
    }
    Ok(Predicate { conditions })
}
