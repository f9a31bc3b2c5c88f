//! Typed expression trees for policy and validation conditions.

mod build;
mod function;
mod walk;


use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

// re-exports
pub use build::*;
pub use function::{Casing, Function, FunctionContext};
pub use walk::ExprRefs;

///
/// Quantifier
/// `?` (any), `!` (all) and `^` (none) over a relation's visible rows.
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantifier {
    Any,
    All,
    None,
}

impl Quantifier {
    #[must_use]
    pub const fn sigil(self) -> char {
        match self {
            Self::Any => '?',
            Self::All => '!',
            Self::None => '^',
        }
    }
}

///
/// BinaryOp
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
}

impl BinaryOp {
    #[must_use]
    pub const fn is_logical(self) -> bool {
        matches!(self, Self::And | Self::Or)
    }

    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::And => "&&",
            Self::Or => "||",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::In => "in",
        }
    }
}

///
/// UnaryOp
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Not,
}

///
/// Expr
///
/// Condition tree evaluated against {current row, principal, prospective row}.
/// Paths are split into segments; every segment except the last of a field
/// path names a to-one relation.
///

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expr {
    Literal {
        value: Value,
    },
    Array {
        items: Vec<Self>,
    },
    Field {
        path: Vec<String>,
    },
    Relation {
        path: Vec<String>,
        quantifier: Quantifier,
        predicate: Box<Self>,
    },
    Principal {
        #[serde(default)]
        path: Vec<String>,
    },
    Prospective {
        path: Vec<String>,
    },
    Call {
        function: Function,
        #[serde(default)]
        args: Vec<Self>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Self>,
        right: Box<Self>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Self>,
    },
}

impl Expr {
    #[must_use]
    pub const fn is_literal_true(&self) -> bool {
        matches!(self, Self::Literal { value: Value::Bool(true) })
    }

    #[must_use]
    pub const fn is_literal_false(&self) -> bool {
        matches!(self, Self::Literal { value: Value::Bool(false) })
    }

    /// Literal value, if this node is one.
    #[must_use]
    pub const fn as_literal(&self) -> Option<&Value> {
        match self {
            Self::Literal { value } => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal { value } => write!(f, "{value}"),
            Self::Array { items } => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Field { path } => f.write_str(&path.join(".")),
            Self::Relation {
                path,
                quantifier,
                predicate,
            } => write!(f, "{}{}[{predicate}]", path.join("."), quantifier.sigil()),
            Self::Principal { path } => {
                f.write_str("auth()")?;
                for segment in path {
                    write!(f, ".{segment}")?;
                }
                Ok(())
            }
            Self::Prospective { path } => write!(f, "future().{}", path.join(".")),
            Self::Call { function, args } => {
                write!(f, "{}(", function.name())?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
            Self::Binary { op, left, right } => write!(f, "({left} {} {right})", op.symbol()),
            Self::Unary { operand, .. } => write!(f, "!{operand}"),
        }
    }
}
