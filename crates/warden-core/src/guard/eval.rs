use crate::{
    error::Error,
    expr::{BinaryOp, Casing, Expr, Function, Quantifier, UnaryOp},
    model::{EntityModel, RelationModel, Schema},
    policy::Operation,
    value::{CompareOp, Row, StorageKey, Value, eval_compare},
};

///
/// VisitStack
///
/// Guards currently being expanded, innermost last. Entering a guard that
/// is already on the stack resolves to "not permitted", which gives cyclic
/// relation visibility its inductive meaning. In-memory evaluation keys
/// guards per row, so a relation back into the same entity only stops at
/// the row it started from.
///

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VisitStack(Vec<String>);

impl VisitStack {
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Stack key for the guard of `(entity, op)`.
    #[must_use]
    pub fn key(entity: &str, op: Operation) -> String {
        if op == Operation::Read {
            entity.to_string()
        } else {
            format!("{entity}#{op}")
        }
    }

    /// Stack key for the guard of `(entity, op)` on one row. A row without
    /// a complete primary key shares the entity-wide key.
    #[must_use]
    pub fn row_key(entity: &EntityModel, op: Operation, row: &Row) -> String {
        let key = Self::key(&entity.name, op);
        match StorageKey::from_row(&entity.primary_key, row) {
            Some(pk) => format!("{key}@{pk}"),
            None => key,
        }
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.iter().any(|k| k == key)
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn push(&self, key: String) -> Self {
        let mut next = self.0.clone();
        next.push(key);
        Self(next)
    }
}

///
/// EvalEnv
/// Data and guard access needed by in-memory evaluation.
///

pub trait EvalEnv {
    fn schema(&self) -> &Schema;

    /// `auth()` value: a record, or `Null` when anonymous.
    fn principal(&self) -> &Value;

    /// Related rows reachable from `row` through `relation`, restricted to
    /// rows the principal may read.
    fn related(
        &self,
        entity: &EntityModel,
        relation: &RelationModel,
        row: &Row,
        stack: &VisitStack,
    ) -> Result<Vec<Row>, Error>;

    /// Whether `row` of `entity` passes the row guard for `op`.
    fn permits(
        &self,
        entity: &EntityModel,
        op: Operation,
        row: &Row,
        stack: &VisitStack,
    ) -> Result<bool, Error>;
}

///
/// Scope
/// Rows a condition is evaluated against.
///

#[derive(Clone, Copy, Debug)]
pub struct Scope<'a> {
    pub entity: &'a EntityModel,
    pub row: &'a Row,
    pub prospective: Option<&'a Row>,

    /// Entity named by `currentModel()`.
    pub model: &'a str,
    pub operation: Operation,
    pub stack: &'a VisitStack,
}

impl<'a> Scope<'a> {
    #[must_use]
    pub fn new(entity: &'a EntityModel, row: &'a Row, operation: Operation, stack: &'a VisitStack) -> Self {
        Self {
            entity,
            row,
            prospective: None,
            model: &entity.name,
            operation,
            stack,
        }
    }

    #[must_use]
    pub const fn with_prospective(mut self, prospective: &'a Row) -> Self {
        self.prospective = Some(prospective);
        self
    }

    // Same condition context, different row.
    const fn nested(self, entity: &'a EntityModel, row: &'a Row) -> Self {
        Self {
            entity,
            row,
            prospective: None,
            ..self
        }
    }
}

///
/// Evaluator
///

pub struct Evaluator<'e> {
    env: &'e dyn EvalEnv,
}

impl<'e> Evaluator<'e> {
    #[must_use]
    pub const fn new(env: &'e dyn EvalEnv) -> Self {
        Self { env }
    }

    /// Boolean result: only `true` counts as satisfied.
    pub fn holds(&self, expr: &Expr, scope: Scope<'_>) -> Result<bool, Error> {
        Ok(self.eval(expr, scope)?.is_true())
    }

    pub fn eval(&self, expr: &Expr, scope: Scope<'_>) -> Result<Value, Error> {
        match expr {
            Expr::Literal { value } => Ok(value.clone()),
            Expr::Array { items } => items
                .iter()
                .map(|item| self.eval(item, scope))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            Expr::Field { path } => self.path_value(scope.entity, scope.row, path, scope),
            Expr::Relation {
                path,
                quantifier,
                predicate,
            } => self.quantify(path, *quantifier, predicate, scope),
            Expr::Principal { path } => Ok(self.env.principal().member_path(path)),
            Expr::Prospective { path } => Ok(match (scope.prospective, path.first()) {
                (Some(post), Some(field)) => post.value(field),
                _ => Value::Null,
            }),
            Expr::Call { function, args } => self.call(*function, args, scope),
            Expr::Binary { op, left, right } => self.binary(*op, left, right, scope),
            Expr::Unary {
                op: UnaryOp::Not,
                operand,
            } => Ok(Value::Bool(!self.holds(operand, scope)?)),
        }
    }

    fn relation<'m>(
        &self,
        entity: &'m EntityModel,
        name: &str,
    ) -> Result<(&'m RelationModel, &'e EntityModel), Error> {
        let relation = entity.get_relation(name).ok_or_else(|| {
            Error::internal(format!("relation '{}.{name}' not resolved", entity.name))
        })?;
        let target = self.env.schema().entity(&relation.target).ok_or_else(|| {
            Error::internal(format!("relation target '{}' not resolved", relation.target))
        })?;

        Ok((relation, target))
    }

    // Value at a to-one path; Null when any hop is missing or invisible.
    fn path_value(
        &self,
        entity: &EntityModel,
        row: &Row,
        path: &[String],
        scope: Scope<'_>,
    ) -> Result<Value, Error> {
        match path {
            [] => Ok(Value::Null),
            [field] => Ok(row.value(field)),
            [first, rest @ ..] => {
                let (relation, target) = self.relation(entity, first)?;
                let related = self.env.related(entity, relation, row, scope.stack)?;
                match related.first() {
                    Some(next) => self.path_value(target, next, rest, scope),
                    None => Ok(Value::Null),
                }
            }
        }
    }

    fn quantify(
        &self,
        path: &[String],
        quantifier: Quantifier,
        predicate: &Expr,
        scope: Scope<'_>,
    ) -> Result<Value, Error> {
        // walk the to-one prefix; a missing hop is an empty relation
        let Some((last, prefix)) = path.split_last() else {
            return Ok(Value::Bool(quantifier != Quantifier::Any));
        };
        let mut entity = scope.entity;
        let mut owned;
        let mut row = scope.row;
        for segment in prefix {
            let (relation, target) = self.relation(entity, segment)?;
            let related = self.env.related(entity, relation, row, scope.stack)?;
            let Some(next) = related.into_iter().next() else {
                return Ok(Value::Bool(quantifier != Quantifier::Any));
            };
            owned = next;
            row = &owned;
            entity = target;
        }

        let (relation, target) = self.relation(entity, last)?;
        let related = self.env.related(entity, relation, row, scope.stack)?;

        let mut matched = 0usize;
        for candidate in &related {
            if self.holds(predicate, scope.nested(target, candidate))? {
                matched += 1;
                if quantifier != Quantifier::All {
                    break;
                }
            } else if quantifier == Quantifier::All {
                return Ok(Value::Bool(false));
            }
        }

        Ok(Value::Bool(match quantifier {
            Quantifier::Any => matched > 0,
            Quantifier::All => true,
            Quantifier::None => matched == 0,
        }))
    }

    fn call(&self, function: Function, args: &[Expr], scope: Scope<'_>) -> Result<Value, Error> {
        match function {
            Function::CurrentModel | Function::CurrentOperation => {
                let casing = match args.first() {
                    Some(arg) => self
                        .eval(arg, scope)?
                        .as_text()
                        .and_then(Casing::parse)
                        .unwrap_or_default(),
                    None => Casing::Original,
                };
                let name = if function == Function::CurrentModel {
                    scope.model
                } else {
                    scope.operation.as_str()
                };
                Ok(Value::Text(casing.apply(name)))
            }
            Function::Check => self.check(args, scope),
            _ => {
                let values = args
                    .iter()
                    .map(|arg| self.eval(arg, scope))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(function.eval_pure(&values))
            }
        }
    }

    // check(relation, op?): some visible related row passes its guard for op.
    fn check(&self, args: &[Expr], scope: Scope<'_>) -> Result<Value, Error> {
        let Some(Expr::Field { path }) = args.first() else {
            return Ok(Value::Null);
        };
        let Some(name) = path.first() else {
            return Ok(Value::Null);
        };
        let op = match args.get(1) {
            Some(arg) => self
                .eval(arg, scope)?
                .as_text()
                .and_then(|s| s.parse::<Operation>().ok())
                .unwrap_or(scope.operation),
            None => scope.operation,
        };

        let (relation, target) = self.relation(scope.entity, name)?;
        let related = self.env.related(scope.entity, relation, scope.row, scope.stack)?;
        for candidate in &related {
            if op == Operation::Read || self.env.permits(target, op, candidate, scope.stack)? {
                return Ok(Value::Bool(true));
            }
        }

        Ok(Value::Bool(false))
    }

    fn binary(&self, op: BinaryOp, left: &Expr, right: &Expr, scope: Scope<'_>) -> Result<Value, Error> {
        let compare = match op {
            BinaryOp::And => {
                return Ok(Value::Bool(self.holds(left, scope)? && self.holds(right, scope)?));
            }
            BinaryOp::Or => {
                return Ok(Value::Bool(self.holds(left, scope)? || self.holds(right, scope)?));
            }
            BinaryOp::Eq => CompareOp::Eq,
            BinaryOp::Ne => CompareOp::Ne,
            BinaryOp::Lt => CompareOp::Lt,
            BinaryOp::Lte => CompareOp::Lte,
            BinaryOp::Gt => CompareOp::Gt,
            BinaryOp::Gte => CompareOp::Gte,
            BinaryOp::In => CompareOp::In,
        };

        let lhs = self.eval(left, scope)?;
        let rhs = self.eval(right, scope)?;

        Ok(Value::Bool(eval_compare(compare, &lhs, &rhs)))
    }
}

/// Comparison operator for a binary expression node, if it is one.
#[must_use]
pub const fn compare_op(op: BinaryOp) -> Option<CompareOp> {
    match op {
        BinaryOp::Eq => Some(CompareOp::Eq),
        BinaryOp::Ne => Some(CompareOp::Ne),
        BinaryOp::Lt => Some(CompareOp::Lt),
        BinaryOp::Lte => Some(CompareOp::Lte),
        BinaryOp::Gt => Some(CompareOp::Gt),
        BinaryOp::Gte => Some(CompareOp::Gte),
        BinaryOp::In => Some(CompareOp::In),
        BinaryOp::And | BinaryOp::Or => None,
    }
}
