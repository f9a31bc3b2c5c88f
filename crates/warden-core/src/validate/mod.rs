//! Model- and field-level validation of prospective rows.


use crate::{
    error::{Error, ValidationError},
    expr::ExprRefs,
    guard::{EvalEnv, Evaluator, Scope, VisitStack},
    model::{EntityModel, FieldKind, RelationModel, Schema},
    obs::sink::{self, MetricsEvent},
    policy::{Operation, PolicyRepository},
    value::{Row, Value},
};
use std::collections::{BTreeMap, BTreeSet};

///
/// Validator
///
/// Runs every validation rule of an entity (inherited first) against one
/// row and aggregates the failures by field path. A rule fails only when
/// its condition evaluates to `false`; a `Null` outcome passes.
///

pub struct Validator<'a> {
    schema: &'a Schema,
}

impl<'a> Validator<'a> {
    #[must_use]
    pub const fn new(schema: &'a Schema) -> Self {
        Self { schema }
    }

    /// Validate `row` as the prospective state of `entity`.
    ///
    /// With `supplied`, only rules whose inputs were all supplied run:
    /// field rules need their field, model rules every field they read.
    pub fn validate(
        &self,
        entity: &EntityModel,
        row: &Row,
        supplied: Option<&BTreeSet<String>>,
    ) -> Result<(), Error> {
        let mut issues: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for field in &entity.fields {
            if !covered(supplied, [&field.name]) {
                continue;
            }
            let value = row.value(&field.name);
            if !value.is_null() && !field.kind.admits(&value) {
                issues
                    .entry(field.name.clone())
                    .or_default()
                    .push(format!("expected {}, found {}", kind_label(&field.kind), value.kind_name()));
            }
        }

        let env = RowEnv {
            schema: self.schema,
            principal: Value::Null,
        };
        let evaluator = Evaluator::new(&env);
        let stack = VisitStack::new();
        let scope = Scope::new(entity, row, Operation::Create, &stack);

        for rule in PolicyRepository::new(self.schema).validation_rules(entity) {
            let should_run = match &rule.field {
                Some(field) => covered(supplied, [field]),
                None => covered(supplied, &ExprRefs::collect(&rule.condition).fields),
            };
            if !should_run {
                continue;
            }

            if evaluator.eval(&rule.condition, scope)? == Value::Bool(false) {
                issues
                    .entry(rule.field.clone().unwrap_or_default())
                    .or_default()
                    .push(rule.describe());
            }
        }

        if issues.is_empty() {
            return Ok(());
        }

        let err = ValidationError {
            entity: entity.name.clone(),
            issues,
        };
        let count = err.issue_count();
        sink::record(MetricsEvent::ValidationFailed {
            entity: &entity.name,
            issues: u64::try_from(count).unwrap_or(u64::MAX),
        });
        tracing::debug!(entity = %entity.name, issues = count, "validation failed");

        Err(err.into())
    }
}

// Whether every input of a rule was supplied (always, outside input-only mode).
fn covered<'s>(supplied: Option<&BTreeSet<String>>, fields: impl IntoIterator<Item = &'s String>) -> bool {
    supplied.is_none_or(|s| fields.into_iter().all(|f| s.contains(f)))
}

fn kind_label(kind: &FieldKind) -> String {
    match kind {
        FieldKind::Bool => "bool".to_string(),
        FieldKind::Int => "int".to_string(),
        FieldKind::Float => "float".to_string(),
        FieldKind::Text => "text".to_string(),
        FieldKind::Enum { variants } => format!("one of [{}]", variants.join(", ")),
        FieldKind::List { item } => format!("list of {}", kind_label(item)),
        FieldKind::Json => "json".to_string(),
    }
}

///
/// RowEnv
/// Validation conditions never reach past their own row.
///

struct RowEnv<'a> {
    schema: &'a Schema,
    principal: Value,
}

impl EvalEnv for RowEnv<'_> {
    fn schema(&self) -> &Schema {
        self.schema
    }

    fn principal(&self) -> &Value {
        &self.principal
    }

    fn related(
        &self,
        entity: &EntityModel,
        relation: &RelationModel,
        _: &Row,
        _: &VisitStack,
    ) -> Result<Vec<Row>, Error> {
        Err(Error::internal(format!(
            "validation of '{}' reached relation '{}'",
            entity.name, relation.name
        )))
    }

    fn permits(&self, entity: &EntityModel, _: Operation, _: &Row, _: &VisitStack) -> Result<bool, Error> {
        Err(Error::internal(format!(
            "validation of '{}' reached a permission check",
            entity.name
        )))
    }
}
