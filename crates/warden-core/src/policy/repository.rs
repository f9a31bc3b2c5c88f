use crate::{
    model::{EntityModel, Schema},
    policy::{Effect, Operation, PolicyRule, ValidationRule},
};
use std::collections::BTreeMap;

///
/// PolicyRepository
///
/// Read-only view answering "which rules govern (entity, operation)".
/// Effective rules are the flat merge of every ancestor's rules (root first,
/// abstract and delegate alike) followed by the entity's own.
///

#[derive(Clone, Copy, Debug)]
pub struct PolicyRepository<'a> {
    schema: &'a Schema,
}

impl<'a> PolicyRepository<'a> {
    #[must_use]
    pub const fn new(schema: &'a Schema) -> Self {
        Self { schema }
    }

    fn lineage(&self, entity: &'a EntityModel) -> impl Iterator<Item = &'a EntityModel> {
        let schema = self.schema;
        entity
            .ancestors
            .iter()
            .rev()
            .filter_map(move |name| schema.entity(name))
            .chain(std::iter::once(entity))
    }

    /// Every rule declared on the entity or inherited.
    pub fn all_rules(&self, entity: &'a EntityModel) -> impl Iterator<Item = &'a PolicyRule> {
        self.lineage(entity).flat_map(|e| e.rules.iter())
    }

    /// Row-level rules matching `op`, in declaration order.
    #[must_use]
    pub fn row_rules(&self, entity: &'a EntityModel, op: Operation) -> Vec<&'a PolicyRule> {
        self.all_rules(entity)
            .filter(|r| !r.is_field_rule() && r.applies_to(op))
            .collect()
    }

    /// Field-level rules matching `op`, grouped by field.
    #[must_use]
    pub fn field_rules(
        &self,
        entity: &'a EntityModel,
        op: Operation,
    ) -> BTreeMap<&'a str, Vec<&'a PolicyRule>> {
        let mut out: BTreeMap<&str, Vec<&PolicyRule>> = BTreeMap::new();
        for rule in self.all_rules(entity).filter(|r| r.applies_to(op)) {
            if let Some(field) = rule.field.as_deref() {
                out.entry(field).or_default().push(rule);
            }
        }

        out
    }

    /// True if at least one row-level allow rule exists for `op`.
    /// Without one, no row of the entity is ever permitted.
    #[must_use]
    pub fn has_allow(&self, entity: &'a EntityModel, op: Operation) -> bool {
        self.row_rules(entity, op)
            .iter()
            .any(|r| r.effect == Effect::Allow)
    }

    /// Model- and field-level validation rules, inherited first.
    #[must_use]
    pub fn validation_rules(&self, entity: &'a EntityModel) -> Vec<&'a ValidationRule> {
        self.lineage(entity)
            .flat_map(|e| e.validations.iter())
            .collect()
    }
}
