//! Logical query filters (entity fields and relations) and their physical
//! lowering (tables, columns and existence sub-filters).

mod lowered;
mod simplify;


use crate::{
    expr::{self, Expr, Function, Quantifier},
    policy::Operation,
    value::{CompareOp, ListOp, TextOp, Value},
};
use serde::{Deserialize, Serialize};
use std::ops::{BitAnd, BitOr, Not};

// re-exports
pub use lowered::{LoweredFilter, RowSource};

///
/// Filter
///
/// Logical filter over an entity's fields and relations. Callers build
/// these for reads and bulk writes; the guard lowering produces them from
/// conditions. `Permitted` is internal and only appears in lowered guards.
///

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    True,
    False,
    And(Vec<Self>),
    Or(Vec<Self>),
    Not(Box<Self>),
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
    },
    Columns {
        left: String,
        op: CompareOp,
        right: String,
    },
    Text {
        field: String,
        op: TextOp,
        value: String,
        #[serde(default)]
        case_insensitive: bool,
    },
    List {
        field: String,
        op: ListOp,
        value: Value,
    },
    Relation {
        relation: String,
        quantifier: Quantifier,
        filter: Box<Self>,
    },
    Permitted {
        operation: Operation,
    },
}

impl Filter {
    // ------------------------------------------------------------------
    // Constructors
    // ------------------------------------------------------------------

    fn compare(field: &str, op: CompareOp, value: impl Into<Value>) -> Self {
        Self::Compare {
            field: field.to_string(),
            op,
            value: value.into(),
        }
    }

    #[must_use]
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Eq, value)
    }

    #[must_use]
    pub fn ne(field: &str, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Ne, value)
    }

    #[must_use]
    pub fn lt(field: &str, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Lt, value)
    }

    #[must_use]
    pub fn lte(field: &str, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Lte, value)
    }

    #[must_use]
    pub fn gt(field: &str, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Gt, value)
    }

    #[must_use]
    pub fn gte(field: &str, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Gte, value)
    }

    #[must_use]
    pub fn in_list(field: &str, values: impl IntoIterator<Item = Value>) -> Self {
        Self::compare(field, CompareOp::In, Value::List(values.into_iter().collect()))
    }

    #[must_use]
    pub fn is_null(field: &str) -> Self {
        Self::compare(field, CompareOp::Eq, Value::Null)
    }

    #[must_use]
    pub fn contains(field: &str, needle: &str) -> Self {
        Self::Text {
            field: field.to_string(),
            op: TextOp::Contains,
            value: needle.to_string(),
            case_insensitive: false,
        }
    }

    #[must_use]
    pub fn starts_with(field: &str, prefix: &str) -> Self {
        Self::Text {
            field: field.to_string(),
            op: TextOp::StartsWith,
            value: prefix.to_string(),
            case_insensitive: false,
        }
    }

    #[must_use]
    pub fn has(field: &str, value: impl Into<Value>) -> Self {
        Self::List {
            field: field.to_string(),
            op: ListOp::Has,
            value: value.into(),
        }
    }

    fn relation(relation: &str, quantifier: Quantifier, filter: Self) -> Self {
        Self::Relation {
            relation: relation.to_string(),
            quantifier,
            filter: Box::new(filter),
        }
    }

    /// Some visible related row matches (`is` for to-one relations).
    #[must_use]
    pub fn some(relation: &str, filter: Self) -> Self {
        Self::relation(relation, Quantifier::Any, filter)
    }

    #[must_use]
    pub fn every(relation: &str, filter: Self) -> Self {
        Self::relation(relation, Quantifier::All, filter)
    }

    #[must_use]
    pub fn none(relation: &str, filter: Self) -> Self {
        Self::relation(relation, Quantifier::None, filter)
    }

    #[must_use]
    pub fn and(filters: impl IntoIterator<Item = Self>) -> Self {
        Self::And(filters.into_iter().collect())
    }

    #[must_use]
    pub fn or(filters: impl IntoIterator<Item = Self>) -> Self {
        Self::Or(filters.into_iter().collect())
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    #[must_use]
    pub const fn is_true(&self) -> bool {
        matches!(self, Self::True)
    }

    #[must_use]
    pub const fn is_false(&self) -> bool {
        matches!(self, Self::False)
    }

    /// True if any `Permitted` node appears in the tree.
    #[must_use]
    pub fn has_permission_check(&self) -> bool {
        match self {
            Self::Permitted { .. } => true,
            Self::And(items) | Self::Or(items) => items.iter().any(Self::has_permission_check),
            Self::Not(inner) | Self::Relation { filter: inner, .. } => {
                inner.has_permission_check()
            }
            _ => false,
        }
    }

    /// Equivalent condition tree, used for in-memory evaluation.
    /// Returns `None` for trees containing `Permitted`.
    #[must_use]
    pub fn to_expr(&self) -> Option<Expr> {
        Some(match self {
            Self::True => expr::lit(true),
            Self::False => expr::lit(false),
            Self::And(items) => Expr::and_all(items.iter().map(Self::to_expr).collect::<Option<Vec<_>>>()?),
            Self::Or(items) => Expr::or_any(items.iter().map(Self::to_expr).collect::<Option<Vec<_>>>()?),
            Self::Not(inner) => !inner.to_expr()?,
            Self::Compare { field, op, value } => {
                let lhs = expr::field(field);
                let rhs = expr::lit(value.clone());
                match op {
                    CompareOp::Eq => lhs.eq(rhs),
                    CompareOp::Ne => lhs.ne(rhs),
                    CompareOp::Lt => lhs.lt(rhs),
                    CompareOp::Lte => lhs.lte(rhs),
                    CompareOp::Gt => lhs.gt(rhs),
                    CompareOp::Gte => lhs.gte(rhs),
                    CompareOp::In => lhs.is_in(rhs),
                    CompareOp::NotIn => {
                        // a NotIn over a non-list is false, like In
                        let is_list = value.as_list().is_some();
                        !lhs.is_in(rhs) & expr::lit(is_list)
                    }
                }
            }
            Self::Columns { left, op, right } => {
                let (lhs, rhs) = (expr::field(left), expr::field(right));
                match op {
                    CompareOp::Eq => lhs.eq(rhs),
                    CompareOp::Ne => lhs.ne(rhs),
                    CompareOp::Lt => lhs.lt(rhs),
                    CompareOp::Lte => lhs.lte(rhs),
                    CompareOp::Gt => lhs.gt(rhs),
                    CompareOp::Gte => lhs.gte(rhs),
                    CompareOp::In => lhs.is_in(rhs),
                    CompareOp::NotIn => {
                        let is_empty = expr::call(Function::IsEmpty, [rhs.clone()]);
                        let is_list = is_empty.clone().eq(true) | is_empty.eq(false);
                        !lhs.is_in(rhs) & is_list
                    }
                }
            }
            Self::Text {
                field,
                op,
                value,
                case_insensitive,
            } => {
                let function = match op {
                    TextOp::Contains => Function::Contains,
                    TextOp::StartsWith => Function::StartsWith,
                    TextOp::EndsWith => Function::EndsWith,
                };
                expr::call(
                    function,
                    [
                        expr::field(field),
                        expr::lit(value.as_str()),
                        expr::lit(*case_insensitive),
                    ],
                )
            }
            Self::List { field, op, value } => {
                let function = match op {
                    ListOp::Has => Function::Has,
                    ListOp::HasEvery => Function::HasEvery,
                    ListOp::HasSome => Function::HasSome,
                    ListOp::IsEmpty => Function::IsEmpty,
                };
                let mut args = vec![expr::field(field)];
                if *op != ListOp::IsEmpty {
                    args.push(expr::lit(value.clone()));
                }
                expr::call(function, args)
            }
            Self::Relation {
                relation,
                quantifier,
                filter,
            } => Expr::Relation {
                path: vec![relation.clone()],
                quantifier: *quantifier,
                predicate: Box::new(filter.to_expr()?),
            },
            Self::Permitted { .. } => return None,
        })
    }
}

impl BitAnd for Filter {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        Self::And(vec![self, rhs])
    }
}

impl BitOr for Filter {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self::Or(vec![self, rhs])
    }
}

impl Not for Filter {
    type Output = Self;

    fn not(self) -> Self::Output {
        Self::Not(Box::new(self))
    }
}
