use crate::expr::{Expr, Function};
use std::collections::BTreeSet;

///
/// ExprRefs
/// What a condition touches, collected in one pass.
///
/// Only references that resolve against the condition's own row are
/// recorded in `fields`; names inside relation predicates belong to the
/// related entity and are not included.
///

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExprRefs {
    /// First path segment of every `Field` / `Relation` / `check()` reference.
    pub fields: BTreeSet<String>,
    pub prospective: BTreeSet<String>,
    pub functions: BTreeSet<&'static str>,
    pub principal: bool,
    pub relations: bool,
}

impl ExprRefs {
    #[must_use]
    pub fn collect(expr: &Expr) -> Self {
        let mut refs = Self::default();
        refs.visit(expr, true);
        refs
    }

    fn visit(&mut self, expr: &Expr, top: bool) {
        match expr {
            Expr::Literal { .. } => {}
            Expr::Array { items } => {
                for item in items {
                    self.visit(item, top);
                }
            }
            Expr::Field { path } => {
                if top && let Some(first) = path.first() {
                    self.fields.insert(first.clone());
                }
                if path.len() > 1 {
                    self.relations = true;
                }
            }
            Expr::Relation {
                path, predicate, ..
            } => {
                self.relations = true;
                if top && let Some(first) = path.first() {
                    self.fields.insert(first.clone());
                }
                self.visit(predicate, false);
            }
            Expr::Principal { .. } => self.principal = true,
            Expr::Prospective { path } => {
                if let Some(first) = path.first() {
                    self.prospective.insert(first.clone());
                }
            }
            Expr::Call { function, args } => {
                self.functions.insert(function.name());
                if *function == Function::Check {
                    self.relations = true;
                }
                for arg in args {
                    self.visit(arg, top);
                }
            }
            Expr::Binary { left, right, .. } => {
                self.visit(left, top);
                self.visit(right, top);
            }
            Expr::Unary { operand, .. } => self.visit(operand, top),
        }
    }

    #[must_use]
    pub fn has_prospective(&self) -> bool {
        !self.prospective.is_empty()
    }
}

impl Expr {
    /// True if any `future()` reference appears anywhere in the tree.
    #[must_use]
    pub fn references_prospective(&self) -> bool {
        ExprRefs::collect(self).has_prospective()
    }

    /// Visit every node in pre-order.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Self)) {
        f(self);
        match self {
            Self::Array { items } => items.iter().for_each(|item| item.walk(f)),
            Self::Relation { predicate, .. } => predicate.walk(f),
            Self::Call { args, .. } => args.iter().for_each(|arg| arg.walk(f)),
            Self::Binary { left, right, .. } => {
                left.walk(f);
                right.walk(f);
            }
            Self::Unary { operand, .. } => operand.walk(f),
            Self::Literal { .. }
            | Self::Field { .. }
            | Self::Principal { .. }
            | Self::Prospective { .. } => {}
        }
    }
}
