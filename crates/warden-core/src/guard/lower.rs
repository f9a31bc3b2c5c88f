use crate::{
    expr::{BinaryOp, Casing, Expr, Function, Quantifier, UnaryOp},
    filter::Filter,
    guard::eval::compare_op,
    model::{EntityModel, Schema},
    policy::Operation,
    value::{CompareOp, ListOp, TextOp, Value, eval_compare},
};

///
/// Term
/// Value-position operand after principal and context folding.
///

#[derive(Clone, Debug)]
enum Term {
    Const(Value),
    Column(String),
    /// Field reached through one or more to-one relations.
    Path(Vec<String>),
}

///
/// Lowering
///
/// Translates a condition into a logical `Filter` for one principal.
/// `auth()`, `currentModel()` and `currentOperation()` fold to constants;
/// anything the filter language cannot express yields `None` and the
/// caller falls back to in-memory evaluation.
///

pub struct Lowering<'a> {
    pub schema: &'a Schema,
    pub principal: &'a Value,
    pub model: &'a str,
    pub operation: Operation,
}

impl Lowering<'_> {
    /// Lower a condition in boolean context.
    #[must_use]
    pub fn lower(&self, entity: &EntityModel, expr: &Expr) -> Option<Filter> {
        self.boolean(entity, expr).map(Filter::simplify)
    }

    fn boolean(&self, entity: &EntityModel, expr: &Expr) -> Option<Filter> {
        match expr {
            Expr::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => Some(Filter::And(vec![
                self.boolean(entity, left)?,
                self.boolean(entity, right)?,
            ])),
            Expr::Binary {
                op: BinaryOp::Or,
                left,
                right,
            } => Some(Filter::Or(vec![
                self.boolean(entity, left)?,
                self.boolean(entity, right)?,
            ])),
            Expr::Binary { op, left, right } => {
                let op = compare_op(*op)?;
                self.comparison(entity, op, left, right)
            }
            Expr::Unary {
                op: UnaryOp::Not,
                operand,
            } => Some(Filter::Not(Box::new(self.boolean(entity, operand)?))),
            Expr::Relation {
                path,
                quantifier,
                predicate,
            } => self.relation(entity, path, *quantifier, predicate),
            Expr::Call { function, args } => self.call(entity, *function, args),
            _ => match self.term(expr)? {
                Term::Const(value) => Some(bool_filter(value.is_true())),
                Term::Column(field) => Some(Filter::eq(&field, true)),
                Term::Path(path) => {
                    self.path(entity, &path, false, &|field| Filter::eq(field, true))
                }
            },
        }
    }

    fn term(&self, expr: &Expr) -> Option<Term> {
        match expr {
            Expr::Literal { value } => Some(Term::Const(value.clone())),
            Expr::Array { items } => items
                .iter()
                .map(|item| match self.term(item)? {
                    Term::Const(value) => Some(value),
                    _ => None,
                })
                .collect::<Option<Vec<_>>>()
                .map(|values| Term::Const(Value::List(values))),
            Expr::Field { path } => match path.as_slice() {
                [field] => Some(Term::Column(field.clone())),
                _ => Some(Term::Path(path.clone())),
            },
            Expr::Principal { path } => Some(Term::Const(self.principal.member_path(path))),
            Expr::Call { function, args } => self.const_call(*function, args).map(Term::Const),
            _ => None,
        }
    }

    // Call whose result is a constant for this principal and operation.
    fn const_call(&self, function: Function, args: &[Expr]) -> Option<Value> {
        match function {
            Function::CurrentModel | Function::CurrentOperation => {
                let casing = match args.first() {
                    Some(arg) => match self.term(arg)? {
                        Term::Const(value) => {
                            value.as_text().and_then(Casing::parse).unwrap_or_default()
                        }
                        _ => return None,
                    },
                    None => Casing::Original,
                };
                let name = if function == Function::CurrentModel {
                    self.model
                } else {
                    self.operation.as_str()
                };
                Some(Value::Text(casing.apply(name)))
            }
            Function::Check => None,
            _ => {
                let values = args
                    .iter()
                    .map(|arg| match self.term(arg)? {
                        Term::Const(value) => Some(value),
                        _ => None,
                    })
                    .collect::<Option<Vec<_>>>()?;
                Some(function.eval_pure(&values))
            }
        }
    }

    fn comparison(
        &self,
        entity: &EntityModel,
        op: CompareOp,
        left: &Expr,
        right: &Expr,
    ) -> Option<Filter> {
        match (self.term(left)?, self.term(right)?) {
            (Term::Const(a), Term::Const(b)) => Some(bool_filter(eval_compare(op, &a, &b))),
            (Term::Column(field), Term::Const(value)) => Some(compare(&field, op, value)),
            (Term::Const(value), Term::Column(field)) => match op.flip() {
                Some(flipped) => Some(compare(&field, flipped, value)),
                // `const in listField`
                None if !value.is_null() => Some(Filter::has(&field, value)),
                None => None,
            },
            (Term::Column(left), Term::Column(right)) => Some(Filter::Columns { left, op, right }),
            (Term::Path(path), Term::Const(value)) => {
                let on_null = eval_compare(op, &Value::Null, &value);
                self.path(entity, &path, on_null, &|field| compare(field, op, value.clone()))
            }
            (Term::Const(value), Term::Path(path)) => {
                let flipped = op.flip()?;
                let on_null = eval_compare(flipped, &Value::Null, &value);
                self.path(entity, &path, on_null, &|field| {
                    compare(field, flipped, value.clone())
                })
            }
            _ => None,
        }
    }

    // Lower a predicate over the field at the end of a to-one path. A
    // missing or invisible hop makes the field Null, so `on_null` says
    // whether the predicate holds in that case.
    fn path(
        &self,
        entity: &EntityModel,
        path: &[String],
        on_null: bool,
        leaf: &dyn Fn(&str) -> Filter,
    ) -> Option<Filter> {
        let (field, hops) = path.split_last()?;
        self.through(entity, hops, on_null, leaf(field))
    }

    // Wrap `inner` in one existence filter per to-one hop.
    fn through(
        &self,
        entity: &EntityModel,
        hops: &[String],
        on_null: bool,
        inner: Filter,
    ) -> Option<Filter> {
        let Some((first, rest)) = hops.split_first() else {
            return Some(inner);
        };
        let relation = entity.get_relation(first)?;
        let target = self.schema.entity(&relation.target)?;
        let present = Filter::some(first, self.through(target, rest, on_null, inner)?);

        Some(if on_null {
            present | Filter::none(first, Filter::True)
        } else {
            present
        })
    }

    fn relation(
        &self,
        entity: &EntityModel,
        path: &[String],
        quantifier: Quantifier,
        predicate: &Expr,
    ) -> Option<Filter> {
        let (last, prefix) = path.split_last()?;

        let mut holder = entity;
        for segment in prefix {
            let relation = holder.get_relation(segment)?;
            holder = self.schema.entity(&relation.target)?;
        }
        let relation = holder.get_relation(last)?;
        let target = self.schema.entity(&relation.target)?;

        let quantified = Filter::Relation {
            relation: last.clone(),
            quantifier,
            filter: Box::new(self.boolean(target, predicate)?),
        };

        // an unreachable holder is an empty relation
        self.through(entity, prefix, quantifier != Quantifier::Any, quantified)
    }

    fn call(&self, entity: &EntityModel, function: Function, args: &[Expr]) -> Option<Filter> {
        if let Some(value) = self.const_call(function, args) {
            return Some(bool_filter(value.is_true()));
        }

        let arg_const = |i: usize| match args.get(i).map(|a| self.term(a)) {
            Some(Some(Term::Const(value))) => Some(value),
            None => Some(Value::Null),
            _ => None,
        };

        match function {
            Function::Check => {
                let Some(Expr::Field { path }) = args.first() else {
                    return None;
                };
                let relation = path.first()?;
                let op = match arg_const(1)? {
                    Value::Null => self.operation,
                    value => value.as_text()?.parse().ok()?,
                };
                Some(Filter::some(relation, Filter::Permitted { operation: op }))
            }
            Function::Contains | Function::StartsWith | Function::EndsWith => {
                let op = match function {
                    Function::Contains => TextOp::Contains,
                    Function::StartsWith => TextOp::StartsWith,
                    _ => TextOp::EndsWith,
                };
                let needle = arg_const(1)?.as_text()?.to_string();
                let case_insensitive = arg_const(2)?.as_bool().unwrap_or(false);
                let leaf = move |field: &str| Filter::Text {
                    field: field.to_string(),
                    op,
                    value: needle.clone(),
                    case_insensitive,
                };
                self.field_predicate(entity, args.first()?, &leaf)
            }
            Function::Has | Function::HasEvery | Function::HasSome | Function::IsEmpty => {
                let op = match function {
                    Function::Has => ListOp::Has,
                    Function::HasEvery => ListOp::HasEvery,
                    Function::HasSome => ListOp::HasSome,
                    _ => ListOp::IsEmpty,
                };
                let value = arg_const(1)?;
                if op == ListOp::Has && value.is_null() {
                    return None;
                }
                let leaf = move |field: &str| Filter::List {
                    field: field.to_string(),
                    op,
                    value: value.clone(),
                };
                self.field_predicate(entity, args.first()?, &leaf)
            }
            _ => None,
        }
    }

    // Apply `leaf` to a field operand. These functions return Null on a Null
    // field, so a missing hop never satisfies them.
    fn field_predicate(
        &self,
        entity: &EntityModel,
        operand: &Expr,
        leaf: &dyn Fn(&str) -> Filter,
    ) -> Option<Filter> {
        match self.term(operand)? {
            Term::Column(field) => Some(leaf(&field)),
            Term::Path(path) => self.path(entity, &path, false, leaf),
            Term::Const(_) => None,
        }
    }
}

fn compare(field: &str, op: CompareOp, value: Value) -> Filter {
    Filter::Compare {
        field: field.to_string(),
        op,
        value,
    }
}

const fn bool_filter(value: bool) -> Filter {
    if value { Filter::True } else { Filter::False }
}
