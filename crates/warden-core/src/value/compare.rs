use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, fmt};

///
/// CompareOp
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    NotIn,
}

impl CompareOp {
    /// Operator with operands swapped (`a < b` ⇔ `b > a`).
    /// Membership operators have no mirror and return `None`.
    #[must_use]
    pub const fn flip(self) -> Option<Self> {
        match self {
            Self::Eq => Some(Self::Eq),
            Self::Ne => Some(Self::Ne),
            Self::Lt => Some(Self::Gt),
            Self::Lte => Some(Self::Gte),
            Self::Gt => Some(Self::Lt),
            Self::Gte => Some(Self::Lte),
            Self::In | Self::NotIn => None,
        }
    }

    #[must_use]
    pub const fn is_ordering(self) -> bool {
        matches!(self, Self::Lt | Self::Lte | Self::Gt | Self::Gte)
    }

    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::In => "in",
            Self::NotIn => "not in",
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

///
/// TextOp
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextOp {
    Contains,
    StartsWith,
    EndsWith,
}

///
/// ListOp
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListOp {
    Has,
    HasEvery,
    HasSome,
    IsEmpty,
}

/// Equality with Int/Float widening; every other pair compares structurally.
#[must_use]
pub fn compare_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            matches!(numeric_order(left, right), Some(Ordering::Equal))
        }
        (Value::List(a), Value::List(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| compare_eq(x, y))
        }
        _ => left == right,
    }
}

/// Ordering for numeric and text pairs. Null and mismatched kinds are unordered.
#[must_use]
pub fn compare_order(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            numeric_order(left, right)
        }
        (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn numeric_order(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        _ => left.as_f64()?.partial_cmp(&right.as_f64()?),
    }
}

/// Evaluate a comparison; invalid pairs evaluate to false.
#[must_use]
pub fn eval_compare(op: CompareOp, left: &Value, right: &Value) -> bool {
    match op {
        CompareOp::Eq => compare_eq(left, right),
        CompareOp::Ne => !compare_eq(left, right),
        CompareOp::Lt => compare_order(left, right).is_some_and(Ordering::is_lt),
        CompareOp::Lte => compare_order(left, right).is_some_and(Ordering::is_le),
        CompareOp::Gt => compare_order(left, right).is_some_and(Ordering::is_gt),
        CompareOp::Gte => compare_order(left, right).is_some_and(Ordering::is_ge),
        CompareOp::In => right
            .as_list()
            .is_some_and(|items| items.iter().any(|item| compare_eq(left, item))),
        CompareOp::NotIn => right
            .as_list()
            .is_some_and(|items| !items.iter().any(|item| compare_eq(left, item))),
    }
}

/// Evaluate a text predicate. Returns `None` when either side is not text.
#[must_use]
pub fn eval_text(op: TextOp, actual: &Value, needle: &Value, case_insensitive: bool) -> Option<bool> {
    let (actual, needle) = (actual.as_text()?, needle.as_text()?);

    let (actual, needle) = if case_insensitive {
        (actual.to_lowercase(), needle.to_lowercase())
    } else {
        (actual.to_string(), needle.to_string())
    };

    Some(match op {
        TextOp::Contains => actual.contains(&needle),
        TextOp::StartsWith => actual.starts_with(&needle),
        TextOp::EndsWith => actual.ends_with(&needle),
    })
}

/// Evaluate a list predicate. Returns `None` when the field is not a list
/// or the argument has the wrong shape.
#[must_use]
pub fn eval_list(op: ListOp, actual: &Value, arg: &Value) -> Option<bool> {
    let items = actual.as_list()?;
    let contains = |needle: &Value| items.iter().any(|item| compare_eq(item, needle));

    match op {
        ListOp::Has => {
            if arg.is_null() {
                return None;
            }
            Some(contains(arg))
        }
        ListOp::HasEvery => Some(arg.as_list()?.iter().all(contains)),
        ListOp::HasSome => Some(arg.as_list()?.iter().any(contains)),
        ListOp::IsEmpty => Some(items.is_empty()),
    }
}
