use crate::{
    expr::{BinaryOp, Casing, Expr, Function, Quantifier, UnaryOp},
    guard::compare_op,
    model::{EntityModel, FieldKind, Schema},
    policy::{Operation, PolicyRepository},
    value::{CompareOp, Value, eval_compare},
};
use std::collections::BTreeMap;

///
/// Formula
/// Finite-domain boolean formula over search variables.
///

#[derive(Clone, Debug)]
pub(super) enum Formula {
    Const(bool),
    And(Vec<Self>),
    Or(Vec<Self>),
    Not(Box<Self>),
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
}

#[derive(Clone, Debug)]
pub(super) enum Operand {
    Const(Value),
    Var(usize),
}

///
/// Domain
/// Value space of a variable before candidate expansion.
///

#[derive(Clone, Debug)]
pub(super) enum Domain {
    Bool,
    Int,
    Float,
    Text,
    Enum(Vec<String>),
    /// Fixed by the caller's partial input.
    Fixed(Value),
}

///
/// Var
///

#[derive(Clone, Debug)]
pub(super) struct Var {
    pub name: String,
    pub domain: Domain,
    pub nullable: bool,
    pub constants: Vec<Value>,
}

///
/// Encoder
///
/// Translates a guard condition into a `Formula`. Anything whose value the
/// checker cannot enumerate becomes a fresh boolean variable, which keeps
/// the encoding an over-approximation.
///

pub(super) struct Encoder<'a> {
    pub schema: &'a Schema,
    pub principal: &'a Value,
    pub operation: Operation,
    pub model: &'a str,
    pub vars: Vec<Var>,
    index: BTreeMap<String, usize>,
}

#[derive(Clone, Debug)]
enum Term {
    Const(Value),
    Var(usize),
    Opaque,
}

impl<'a> Encoder<'a> {
    pub(super) const fn new(
        schema: &'a Schema,
        principal: &'a Value,
        operation: Operation,
        model: &'a str,
    ) -> Self {
        Self {
            schema,
            principal,
            operation,
            model,
            vars: Vec::new(),
            index: BTreeMap::new(),
        }
    }

    /// Fix a row field to a caller-supplied value.
    pub(super) fn fix(&mut self, field: &str, value: Value) {
        let var = Var {
            name: field.to_string(),
            domain: Domain::Fixed(value),
            nullable: false,
            constants: Vec::new(),
        };
        self.insert(var);
    }

    fn insert(&mut self, var: Var) -> usize {
        let id = self.vars.len();
        self.index.insert(var.name.clone(), id);
        self.vars.push(var);
        id
    }

    fn fresh_bool(&mut self) -> Formula {
        let id = self.vars.len();
        self.vars.push(Var {
            name: format!("#atom{id}"),
            domain: Domain::Bool,
            nullable: false,
            constants: Vec::new(),
        });

        Formula::Compare {
            left: Operand::Var(id),
            op: CompareOp::Eq,
            right: Operand::Const(Value::Bool(true)),
        }
    }

    // Variable for a field path (or `future.<field>`), created on first use.
    fn var(&mut self, entity: &EntityModel, key: String, path: &[String]) -> Option<usize> {
        if let Some(id) = self.index.get(&key) {
            return Some(*id);
        }

        let (field, hops) = path.split_last()?;
        let mut holder = entity;
        for hop in hops {
            let relation = holder.get_relation(hop)?;
            holder = self.schema.entity(&relation.target)?;
        }
        let model = holder.get_field(field)?;
        let domain = match &model.kind {
            FieldKind::Bool => Domain::Bool,
            FieldKind::Int => Domain::Int,
            FieldKind::Float => Domain::Float,
            FieldKind::Text => Domain::Text,
            FieldKind::Enum { variants } => Domain::Enum(variants.clone()),
            FieldKind::List { .. } | FieldKind::Json => return None,
        };

        Some(self.insert(Var {
            name: key,
            domain,
            // a missing or invisible hop reads as Null
            nullable: model.optional || !hops.is_empty(),
            constants: Vec::new(),
        }))
    }

    pub(super) fn encode(&mut self, entity: &EntityModel, expr: &Expr) -> Formula {
        match expr {
            Expr::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => Formula::And(vec![self.encode(entity, left), self.encode(entity, right)]),
            Expr::Binary {
                op: BinaryOp::Or,
                left,
                right,
            } => Formula::Or(vec![self.encode(entity, left), self.encode(entity, right)]),
            Expr::Binary { op, left, right } => match compare_op(*op) {
                Some(op) => self.comparison(entity, op, left, right),
                None => self.fresh_bool(),
            },
            Expr::Unary {
                op: UnaryOp::Not,
                operand,
            } => Formula::Not(Box::new(self.encode(entity, operand))),
            Expr::Relation {
                path, quantifier, ..
            } => self.relation(entity, path, *quantifier),
            _ => match self.term(entity, expr) {
                Term::Const(value) => Formula::Const(value.is_true()),
                Term::Var(id) => Formula::Compare {
                    left: Operand::Var(id),
                    op: CompareOp::Eq,
                    right: Operand::Const(Value::Bool(true)),
                },
                Term::Opaque => self.fresh_bool(),
            },
        }
    }

    fn term(&mut self, entity: &EntityModel, expr: &Expr) -> Term {
        match expr {
            Expr::Literal { value } => Term::Const(value.clone()),
            Expr::Array { items } => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    match self.term(entity, item) {
                        Term::Const(value) => values.push(value),
                        _ => return Term::Opaque,
                    }
                }
                Term::Const(Value::List(values))
            }
            Expr::Principal { path } => Term::Const(self.principal.member_path(path)),
            Expr::Field { path } => self
                .var(entity, path.join("."), path)
                .map_or(Term::Opaque, Term::Var),
            Expr::Prospective { path } => self
                .var(entity, format!("future.{}", path.join(".")), path)
                .map_or(Term::Opaque, Term::Var),
            Expr::Call { function, args } => match function {
                Function::CurrentModel | Function::CurrentOperation => {
                    let casing = match args.first().map(|a| self.term(entity, a)) {
                        None => Casing::Original,
                        Some(Term::Const(value)) => {
                            value.as_text().and_then(Casing::parse).unwrap_or_default()
                        }
                        Some(_) => return Term::Opaque,
                    };
                    let name = if *function == Function::CurrentModel {
                        self.model
                    } else {
                        self.operation.as_str()
                    };
                    Term::Const(Value::Text(casing.apply(name)))
                }
                _ => Term::Opaque,
            },
            _ => Term::Opaque,
        }
    }

    fn comparison(&mut self, entity: &EntityModel, op: CompareOp, left: &Expr, right: &Expr) -> Formula {
        match (self.term(entity, left), self.term(entity, right)) {
            (Term::Const(a), Term::Const(b)) => Formula::Const(eval_compare(op, &a, &b)),
            (Term::Var(id), Term::Const(value)) => {
                self.note_constant(id, &value, op);
                Formula::Compare {
                    left: Operand::Var(id),
                    op,
                    right: Operand::Const(value),
                }
            }
            (Term::Const(value), Term::Var(id)) if op != CompareOp::In => {
                self.note_constant(id, &value, op);
                Formula::Compare {
                    left: Operand::Const(value),
                    op,
                    right: Operand::Var(id),
                }
            }
            // field-to-field comparisons and list membership stay opaque
            _ => self.fresh_bool(),
        }
    }

    fn note_constant(&mut self, id: usize, value: &Value, op: CompareOp) {
        let Some(var) = self.vars.get_mut(id) else {
            return;
        };
        match (op, value) {
            (CompareOp::In | CompareOp::NotIn, Value::List(items)) => {
                var.constants.extend(items.iter().cloned());
            }
            _ => var.constants.push(value.clone()),
        }
    }

    // A relation to an entity nobody may read has no visible rows. Delegate
    // targets are readable through any concrete subtype.
    fn relation(&mut self, entity: &EntityModel, path: &[String], quantifier: Quantifier) -> Formula {
        let mut holder = Some(entity);
        for segment in path {
            holder = holder
                .and_then(|h| h.get_relation(segment))
                .and_then(|r| self.schema.entity(&r.target));
        }

        let repo = PolicyRepository::new(self.schema);
        let readable = holder.is_none_or(|target| {
            repo.has_allow(target, Operation::Read)
                || self
                    .schema
                    .concrete_subtypes(target)
                    .into_iter()
                    .any(|sub| repo.has_allow(sub, Operation::Read))
        });
        if readable {
            self.fresh_bool()
        } else {
            Formula::Const(quantifier != Quantifier::Any)
        }
    }
}
