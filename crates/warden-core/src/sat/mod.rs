//! "Could this guard ever pass?" over a partially known row.
//!
//! The check is one-directional: `false` is a proof that no row completing
//! the partial input passes, `true` only means none was ruled out.

mod encode;
mod search;


use crate::{
    error::{Error, StructuralError},
    expr::Expr,
    guard::{CompiledGuard, GuardCache},
    model::{EntityModel, Schema},
    policy::Operation,
    value::{Row, Value, compare_eq},
};
use encode::Encoder;
use search::{Outcome, Search};

///
/// Satisfiability
///

pub struct Satisfiability<'a> {
    pub schema: &'a Schema,
    pub principal: &'a Value,
    pub max_steps: u64,
}

impl Satisfiability<'_> {
    /// Whether some completion of `partial` passes `operation` on `entity`.
    /// Rows of a delegate base are governed by their concrete subtype, so
    /// each subtype the discriminator still admits is tried as well.
    pub fn check_entity(
        &self,
        guards: &GuardCache,
        entity: &EntityModel,
        operation: Operation,
        partial: &Row,
    ) -> Result<bool, Error> {
        let subtypes = if entity.is_delegate() {
            self.schema.concrete_subtypes(entity)
        } else {
            Vec::new()
        };
        let tag = entity
            .delegate
            .as_deref()
            .map(|disc| partial.value(disc))
            .filter(|tag| !tag.is_null());
        let names = |sub: &EntityModel| {
            tag.as_ref()
                .is_none_or(|tag| compare_eq(tag, &Value::from(sub.name.as_str())))
        };

        // a tag naming a subtype takes the row away from the base guard
        let base_applies = tag.is_none() || !subtypes.iter().any(|sub| names(*sub));
        if base_applies {
            let guard = guards.get_or_compile(self.schema, entity, operation);
            if self.check_guard(entity, &guard, partial)? {
                return Ok(true);
            }
        }

        for sub in subtypes.into_iter().filter(|sub| names(*sub)) {
            let guard = guards.get_or_compile(self.schema, sub, operation);
            if self.check_guard(sub, &guard, partial)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Whether some completion of `partial` passes the row guard.
    pub fn check_guard(
        &self,
        entity: &EntityModel,
        guard: &CompiledGuard,
        partial: &Row,
    ) -> Result<bool, Error> {
        if guard.denies_all() {
            return Ok(false);
        }

        let condition = guard.post.as_ref().unwrap_or(&guard.pre);
        self.check(entity, guard.operation, condition, partial)
    }

    /// Whether some completion of `partial` satisfies `condition`.
    pub fn check(
        &self,
        entity: &EntityModel,
        operation: Operation,
        condition: &Expr,
        partial: &Row,
    ) -> Result<bool, Error> {
        let mut encoder = Encoder::new(self.schema, self.principal, operation, &entity.name);
        for (field, value) in partial.iter() {
            if entity.get_field(field).is_none() {
                return Err(StructuralError::UnknownField {
                    entity: entity.name.clone(),
                    field: field.clone(),
                }
                .into());
            }
            encoder.fix(field, value.clone());
        }

        let formula = encoder.encode(entity, condition);
        let outcome = Search::new(&formula, &encoder.vars, self.max_steps).run();

        tracing::debug!(
            entity = %entity.name,
            operation = %operation,
            vars = encoder.vars.len(),
            outcome = ?outcome,
            "satisfiability check"
        );

        Ok(outcome != Outcome::Unsatisfiable)
    }
}
