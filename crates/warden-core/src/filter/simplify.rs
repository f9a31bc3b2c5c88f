use crate::filter::{Filter, LoweredFilter};

impl Filter {
    /// Constant-fold and flatten without changing meaning.
    #[must_use]
    pub fn simplify(self) -> Self {
        match self {
            Self::And(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items.into_iter().map(Self::simplify) {
                    match item {
                        Self::True => {}
                        Self::False => return Self::False,
                        Self::And(nested) => out.extend(nested),
                        other => out.push(other),
                    }
                }
                collapse(out, Self::True, Self::And)
            }
            Self::Or(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items.into_iter().map(Self::simplify) {
                    match item {
                        Self::False => {}
                        Self::True => return Self::True,
                        Self::Or(nested) => out.extend(nested),
                        other => out.push(other),
                    }
                }
                collapse(out, Self::False, Self::Or)
            }
            Self::Not(inner) => match inner.simplify() {
                Self::True => Self::False,
                Self::False => Self::True,
                Self::Not(double) => *double,
                other => Self::Not(Box::new(other)),
            },
            Self::Relation {
                relation,
                quantifier,
                filter,
            } => Self::Relation {
                relation,
                quantifier,
                filter: Box::new(filter.simplify()),
            },
            other => other,
        }
    }
}

impl LoweredFilter {
    /// Constant-fold and flatten without changing meaning.
    #[must_use]
    pub fn simplify(self) -> Self {
        match self {
            Self::And(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items.into_iter().map(Self::simplify) {
                    match item {
                        Self::True => {}
                        Self::False => return Self::False,
                        Self::And(nested) => out.extend(nested),
                        other => out.push(other),
                    }
                }
                collapse(out, Self::True, Self::And)
            }
            Self::Or(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items.into_iter().map(Self::simplify) {
                    match item {
                        Self::False => {}
                        Self::True => return Self::True,
                        Self::Or(nested) => out.extend(nested),
                        other => out.push(other),
                    }
                }
                collapse(out, Self::False, Self::Or)
            }
            Self::Not(inner) => match inner.simplify() {
                Self::True => Self::False,
                Self::False => Self::True,
                Self::Not(double) => *double,
                other => Self::Not(Box::new(other)),
            },
            Self::Exists {
                table,
                join,
                quantifier,
                filter,
            } => Self::Exists {
                table,
                join,
                quantifier,
                filter: Box::new(filter.simplify()),
            },
            other => other,
        }
    }
}

fn collapse<T>(mut items: Vec<T>, empty: T, wrap: impl FnOnce(Vec<T>) -> T) -> T {
    match items.len() {
        0 => empty,
        1 => items.pop().unwrap_or(empty),
        _ => wrap(items),
    }
}
