use crate::{
    expr::{BinaryOp, Expr, Function, Quantifier, UnaryOp},
    policy::Operation,
    value::Value,
};
use std::ops::{BitAnd, BitOr, Not};

fn split_path(path: &str) -> Vec<String> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

/// Field of the current row; dots traverse to-one relations (`author.name`).
#[must_use]
pub fn field(path: &str) -> Expr {
    Expr::Field {
        path: split_path(path),
    }
}

/// The acting principal (`auth()`); `Null` when anonymous.
#[must_use]
pub const fn auth() -> Expr {
    Expr::Principal { path: Vec::new() }
}

/// Member of the acting principal (`auth().role`).
#[must_use]
pub fn auth_field(path: &str) -> Expr {
    Expr::Principal {
        path: split_path(path),
    }
}

/// Post-update value of a field (`future().role`).
#[must_use]
pub fn future(field: &str) -> Expr {
    Expr::Prospective {
        path: split_path(field),
    }
}

#[must_use]
pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::Literal {
        value: value.into(),
    }
}

#[must_use]
pub const fn null() -> Expr {
    Expr::Literal { value: Value::Null }
}

#[must_use]
pub fn array(items: impl IntoIterator<Item = Expr>) -> Expr {
    Expr::Array {
        items: items.into_iter().collect(),
    }
}

fn quantified(relation: &str, quantifier: Quantifier, predicate: Expr) -> Expr {
    Expr::Relation {
        path: split_path(relation),
        quantifier,
        predicate: Box::new(predicate),
    }
}

/// `relation?[predicate]`: some visible related row satisfies `predicate`.
#[must_use]
pub fn any(relation: &str, predicate: Expr) -> Expr {
    quantified(relation, Quantifier::Any, predicate)
}

/// `relation![predicate]`: every visible related row satisfies `predicate`.
#[must_use]
pub fn all(relation: &str, predicate: Expr) -> Expr {
    quantified(relation, Quantifier::All, predicate)
}

/// `relation^[predicate]`: no visible related row satisfies `predicate`.
#[must_use]
pub fn none(relation: &str, predicate: Expr) -> Expr {
    quantified(relation, Quantifier::None, predicate)
}

#[must_use]
pub fn call(function: Function, args: impl IntoIterator<Item = Expr>) -> Expr {
    Expr::Call {
        function,
        args: args.into_iter().collect(),
    }
}

/// `check(relation, op?)`: delegate to the related entity's guard.
#[must_use]
pub fn check(relation: &str, operation: Option<Operation>) -> Expr {
    let mut args = vec![field(relation)];
    if let Some(op) = operation {
        args.push(lit(op.as_str()));
    }

    call(Function::Check, args)
}

#[must_use]
pub fn current_model() -> Expr {
    call(Function::CurrentModel, [])
}

#[must_use]
pub fn current_operation() -> Expr {
    call(Function::CurrentOperation, [])
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

impl Expr {
    #[must_use]
    pub fn eq(self, other: impl Into<Self>) -> Self {
        binary(BinaryOp::Eq, self, other.into())
    }

    #[must_use]
    pub fn ne(self, other: impl Into<Self>) -> Self {
        binary(BinaryOp::Ne, self, other.into())
    }

    #[must_use]
    pub fn lt(self, other: impl Into<Self>) -> Self {
        binary(BinaryOp::Lt, self, other.into())
    }

    #[must_use]
    pub fn lte(self, other: impl Into<Self>) -> Self {
        binary(BinaryOp::Lte, self, other.into())
    }

    #[must_use]
    pub fn gt(self, other: impl Into<Self>) -> Self {
        binary(BinaryOp::Gt, self, other.into())
    }

    #[must_use]
    pub fn gte(self, other: impl Into<Self>) -> Self {
        binary(BinaryOp::Gte, self, other.into())
    }

    #[must_use]
    pub fn is_in(self, other: impl Into<Self>) -> Self {
        binary(BinaryOp::In, self, other.into())
    }

    #[must_use]
    pub fn and(self, other: impl Into<Self>) -> Self {
        binary(BinaryOp::And, self, other.into())
    }

    #[must_use]
    pub fn or(self, other: impl Into<Self>) -> Self {
        binary(BinaryOp::Or, self, other.into())
    }

    /// Fold `exprs` with `&&`; empty input is `true`.
    #[must_use]
    pub fn and_all(exprs: impl IntoIterator<Item = Self>) -> Self {
        exprs
            .into_iter()
            .reduce(|acc, next| acc.and(next))
            .unwrap_or_else(|| lit(true))
    }

    /// Fold `exprs` with `||`; empty input is `false`.
    #[must_use]
    pub fn or_any(exprs: impl IntoIterator<Item = Self>) -> Self {
        exprs
            .into_iter()
            .reduce(|acc, next| acc.or(next))
            .unwrap_or_else(|| lit(false))
    }
}

impl BitAnd for Expr {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        self.and(rhs)
    }
}

impl BitOr for Expr {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.or(rhs)
    }
}

impl Not for Expr {
    type Output = Self;

    fn not(self) -> Self::Output {
        Self::Unary {
            op: UnaryOp::Not,
            operand: Box::new(self),
        }
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Self::Literal { value }
    }
}

impl From<bool> for Expr {
    fn from(value: bool) -> Self {
        lit(value)
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        lit(value)
    }
}

impl From<i32> for Expr {
    fn from(value: i32) -> Self {
        lit(value)
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        lit(value)
    }
}

impl From<&str> for Expr {
    fn from(value: &str) -> Self {
        lit(value)
    }
}
