//! Static checks run once per schema build.

use crate::{
    error::PolicyCompilationError,
    expr::{BinaryOp, Casing, Expr, ExprRefs, Function, FunctionContext},
    model::{EntityModel, Schema, require_field, require_relation},
    policy::{Operation, PolicyRepository, PolicyRule, ValidationRule},
};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};

/// Check every rule and validation of every entity.
pub fn check_schema(schema: &Schema) -> Result<(), PolicyCompilationError> {
    for entity in schema.entities() {
        for rule in &entity.rules {
            check_rule(schema, entity, rule)?;
        }
        for rule in &entity.validations {
            check_validation(schema, entity, rule)?;
        }
    }
    check_cycles(schema)
}

fn check_rule(
    schema: &Schema,
    entity: &EntityModel,
    rule: &PolicyRule,
) -> Result<(), PolicyCompilationError> {
    if let Some(field) = &rule.field {
        require_field(entity, field)?;
        if let Some(op) = rule
            .operations
            .iter()
            .find(|op| !matches!(op, Operation::Read | Operation::Update))
        {
            return Err(PolicyCompilationError::InvalidFieldRule {
                entity: entity.name.clone(),
                field: field.clone(),
                operation: op,
            });
        }
    }

    let refs = ExprRefs::collect(&rule.condition);
    if refs.has_prospective() {
        let outside = rule
            .operations
            .iter()
            .find(|op| !op.has_prospective())
            .map(|op| op.as_str().to_string())
            .or_else(|| rule.field.as_ref().map(|f| format!("field rule on '{f}'")));
        if let Some(operation) = outside {
            return Err(PolicyCompilationError::ProspectiveOutsideUpdate {
                entity: entity.name.clone(),
                operation,
            });
        }
    }

    Checker {
        schema,
        context: FunctionContext::Policy,
    }
    .expr(entity, &rule.condition, true)
}

fn check_validation(
    schema: &Schema,
    entity: &EntityModel,
    rule: &ValidationRule,
) -> Result<(), PolicyCompilationError> {
    if let Some(field) = &rule.field {
        require_field(entity, field)?;
    }

    let refs = ExprRefs::collect(&rule.condition);
    let forbidden = if refs.principal {
        Some("auth()")
    } else if refs.has_prospective() {
        Some("future()")
    } else if refs.relations {
        Some("relations")
    } else {
        None
    };
    if let Some(what) = forbidden {
        return Err(PolicyCompilationError::InvalidValidationRule {
            entity: entity.name.clone(),
            what,
        });
    }

    Checker {
        schema,
        context: FunctionContext::Validation,
    }
    .expr(entity, &rule.condition, false)
}

///
/// Checker
/// Resolves every reference in a condition against the schema.
///

struct Checker<'a> {
    schema: &'a Schema,
    context: FunctionContext,
}

impl<'a> Checker<'a> {
    fn target(&self, name: &str) -> Result<&'a EntityModel, PolicyCompilationError> {
        self.schema
            .entity(name)
            .ok_or_else(|| PolicyCompilationError::UnknownEntity {
                entity: name.to_string(),
            })
    }

    // Follow to-one relations along `path`, returning the entity reached.
    fn navigate(
        &self,
        mut entity: &'a EntityModel,
        path: &[String],
    ) -> Result<&'a EntityModel, PolicyCompilationError> {
        for segment in path {
            let relation = require_relation(entity, segment)?;
            if relation.aux {
                return Err(PolicyCompilationError::UnknownRelation {
                    entity: entity.name.clone(),
                    relation: segment.clone(),
                });
            }
            if relation.is_to_many() {
                return Err(PolicyCompilationError::ToManyInPath {
                    entity: entity.name.clone(),
                    relation: segment.clone(),
                });
            }
            entity = self.target(&relation.target)?;
        }

        Ok(entity)
    }

    fn expr(
        &self,
        entity: &'a EntityModel,
        expr: &Expr,
        allow_prospective: bool,
    ) -> Result<(), PolicyCompilationError> {
        match expr {
            Expr::Literal { .. } | Expr::Principal { .. } => Ok(()),
            Expr::Array { items } => items
                .iter()
                .try_for_each(|item| self.expr(entity, item, allow_prospective)),
            Expr::Field { path } => {
                let Some((field, relations)) = path.split_last() else {
                    return Err(PolicyCompilationError::UnknownField {
                        entity: entity.name.clone(),
                        field: String::new(),
                    });
                };
                let owner = self.navigate(entity, relations)?;
                require_field(owner, field).map(|_| ())
            }
            Expr::Relation {
                path, predicate, ..
            } => {
                let Some((last, prefix)) = path.split_last() else {
                    return Err(PolicyCompilationError::UnknownRelation {
                        entity: entity.name.clone(),
                        relation: String::new(),
                    });
                };
                let holder = self.navigate(entity, prefix)?;
                let relation = require_relation(holder, last)?;
                if relation.aux {
                    return Err(PolicyCompilationError::UnknownRelation {
                        entity: holder.name.clone(),
                        relation: last.clone(),
                    });
                }
                let target = self.target(&relation.target)?;
                self.expr(target, predicate, false)
            }
            Expr::Prospective { path } => {
                if !allow_prospective {
                    return Err(PolicyCompilationError::ProspectiveOutsideUpdate {
                        entity: entity.name.clone(),
                        operation: "relation predicate".to_string(),
                    });
                }
                match path.as_slice() {
                    [field] => require_field(entity, field).map(|_| ()),
                    _ => Err(PolicyCompilationError::InvalidProspectivePath {
                        entity: entity.name.clone(),
                        path: path.join("."),
                    }),
                }
            }
            Expr::Call { function, args } => self.call(entity, *function, args, allow_prospective),
            Expr::Binary { left, right, .. } => {
                self.expr(entity, left, allow_prospective)?;
                self.expr(entity, right, allow_prospective)
            }
            Expr::Unary { operand, .. } => self.expr(entity, operand, allow_prospective),
        }
    }

    fn call(
        &self,
        entity: &'a EntityModel,
        function: Function,
        args: &[Expr],
        allow_prospective: bool,
    ) -> Result<(), PolicyCompilationError> {
        if !function.allowed_in(self.context) {
            return Err(PolicyCompilationError::FunctionNotAllowed {
                entity: entity.name.clone(),
                function: function.name().to_string(),
                context: self.context.label(),
            });
        }

        let arity = function.arity();
        if !arity.contains(&args.len()) {
            let expected = if arity.start() == arity.end() {
                arity.start().to_string()
            } else {
                format!("{}..={}", arity.start(), arity.end())
            };
            return Err(PolicyCompilationError::InvalidArity {
                function: function.name().to_string(),
                expected,
                found: args.len(),
            });
        }

        let invalid = |message: &str| PolicyCompilationError::InvalidArgument {
            function: function.name().to_string(),
            message: message.to_string(),
        };

        match function {
            Function::CurrentModel | Function::CurrentOperation => {
                if let Some(arg) = args.first() {
                    let casing = arg.as_literal().and_then(|v| v.as_text()).and_then(Casing::parse);
                    if casing.is_none() {
                        return Err(invalid(
                            "casing must be one of original, upper, lower, capitalize, uncapitalize",
                        ));
                    }
                }
                Ok(())
            }
            Function::Check => {
                let Some(Expr::Field { path }) = args.first() else {
                    return Err(invalid("first argument must be a relation field"));
                };
                let [name] = path.as_slice() else {
                    return Err(invalid("relation must be a direct member"));
                };
                let relation = require_relation(entity, name)?;
                if relation.is_to_many() {
                    return Err(PolicyCompilationError::ToManyInPath {
                        entity: entity.name.clone(),
                        relation: name.clone(),
                    });
                }
                if let Some(op) = args.get(1) {
                    let parsed = op
                        .as_literal()
                        .and_then(|v| v.as_text())
                        .and_then(|s| s.parse::<Operation>().ok());
                    if parsed.is_none() {
                        return Err(invalid("operation must be a literal operation name"));
                    }
                }
                Ok(())
            }
            Function::Regex => {
                if let Some(pattern) = args.get(1).and_then(Expr::as_literal) {
                    let compiles = pattern.as_text().is_some_and(|p| Regex::new(p).is_ok());
                    if !compiles {
                        return Err(invalid("pattern is not a valid regular expression"));
                    }
                }
                args.iter()
                    .try_for_each(|arg| self.expr(entity, arg, allow_prospective))
            }
            _ => args
                .iter()
                .try_for_each(|arg| self.expr(entity, arg, allow_prospective)),
        }
    }
}

// ---------------------------------------------------------------------------
// Relation-predicate cycles
// ---------------------------------------------------------------------------

// Edges E -> T when E's read rules reach T's visibility. A cycle is
// accepted when some member has a read allow rule with a disjunct that
// traverses no relation, giving the inductive evaluation a base case.
fn check_cycles(schema: &Schema) -> Result<(), PolicyCompilationError> {
    let repo = PolicyRepository::new(schema);
    let mut edges: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
    let mut grounded: BTreeSet<&str> = BTreeSet::new();

    for entity in schema.entities() {
        let rules = repo.row_rules(entity, Operation::Read);
        for rule in &rules {
            let mut targets = BTreeSet::new();
            collect_targets(schema, entity, &rule.condition, &mut targets);
            if rule.is_allow() && grounded_branch(schema, entity, &rule.condition) {
                grounded.insert(&entity.name);
            }
            edges.entry(&entity.name).or_default().extend(targets);
        }
    }

    for start in edges.keys() {
        let mut path = vec![(*start).to_string()];
        if let Some(cycle) = find_cycle(&edges, start, &mut path) {
            let has_base = cycle.iter().any(|name| grounded.contains(name.as_str()));
            if !has_base {
                return Err(PolicyCompilationError::RelationCycle { cycle });
            }
        }
    }

    Ok(())
}

// Whether some way of satisfying `expr` needs no related row.
fn grounded_branch(schema: &Schema, entity: &EntityModel, expr: &Expr) -> bool {
    match expr {
        Expr::Binary {
            op: BinaryOp::Or,
            left,
            right,
        } => grounded_branch(schema, entity, left) || grounded_branch(schema, entity, right),
        Expr::Binary {
            op: BinaryOp::And,
            left,
            right,
        } => grounded_branch(schema, entity, left) && grounded_branch(schema, entity, right),
        _ => {
            let mut targets = BTreeSet::new();
            collect_targets(schema, entity, expr, &mut targets);
            targets.is_empty()
        }
    }
}

fn collect_targets<'s>(
    schema: &'s Schema,
    entity: &'s EntityModel,
    expr: &Expr,
    out: &mut BTreeSet<String>,
) {
    match expr {
        Expr::Field { path } if path.len() > 1 => {
            hop(schema, entity, &path[..path.len() - 1], out);
        }
        Expr::Relation {
            path, predicate, ..
        } => {
            if let Some(target) = hop(schema, entity, path, out) {
                collect_targets(schema, target, predicate, out);
            }
        }
        Expr::Call {
            function: Function::Check,
            args,
        } => {
            if let Some(Expr::Field { path }) = args.first() {
                hop(schema, entity, path, out);
            }
        }
        _ => {}
    }

    match expr {
        Expr::Array { items } => {
            for item in items {
                collect_targets(schema, entity, item, out);
            }
        }
        Expr::Call { args, .. } => {
            for arg in args {
                collect_targets(schema, entity, arg, out);
            }
        }
        Expr::Binary { left, right, .. } => {
            collect_targets(schema, entity, left, out);
            collect_targets(schema, entity, right, out);
        }
        Expr::Unary { operand, .. } => collect_targets(schema, entity, operand, out),
        _ => {}
    }
}

// Walk `path` from `from`, recording every entity whose visibility it needs.
fn hop<'s>(
    schema: &'s Schema,
    from: &'s EntityModel,
    path: &[String],
    out: &mut BTreeSet<String>,
) -> Option<&'s EntityModel> {
    let mut current = from;
    for segment in path {
        let target = current
            .get_relation(segment)
            .and_then(|r| schema.entity(&r.target))?;
        out.insert(target.name.clone());
        for sub in schema.concrete_subtypes(target) {
            out.insert(sub.name.clone());
        }
        current = target;
    }

    Some(current)
}

fn find_cycle(
    edges: &BTreeMap<&str, BTreeSet<String>>,
    start: &str,
    path: &mut Vec<String>,
) -> Option<Vec<String>> {
    let current = path.last()?.clone();
    for next in edges.get(current.as_str()).into_iter().flatten() {
        if next == start {
            let mut cycle = path.clone();
            cycle.push(start.to_string());
            return Some(cycle);
        }
        if path.contains(next) {
            continue;
        }
        path.push(next.clone());
        if let Some(cycle) = find_cycle(edges, start, path) {
            return Some(cycle);
        }
        path.pop();
    }

    None
}
