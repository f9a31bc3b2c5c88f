use crate::{
    config::Redaction,
    enforce::{
        Include,
        access::{Access, Loaded, selector_key},
    },
    error::{Error, StructuralError},
    filter::{Filter, LoweredFilter},
    guard::{Evaluator, Scope, VisitStack},
    model::EntityModel,
    obs::sink::{self, MetricsEvent},
    policy::Operation,
    value::{Row, Value},
};
use std::collections::BTreeSet;

///
/// Candidate
/// A fetched row and whether it passed the row-level read guard. Rows
/// that failed are only kept while some field guard may override.
///

pub(crate) struct Candidate<'a> {
    pub loaded: Loaded<'a>,
    pub visible: bool,
}

impl<'a> Access<'a> {
    pub(crate) fn read(&self, entity: &'a EntityModel, filter: &Filter, include: &[Include]) -> Result<Vec<Row>, Error> {
        let mut out = Vec::new();
        for candidate in self.readable(entity, filter)? {
            if let Some(row) = self.present(&candidate.loaded, candidate.visible, include)? {
                out.push(row);
            }
        }

        Ok(out)
    }

    pub(crate) fn read_unique(&self, entity: &'a EntityModel, selector: &Row) -> Result<Option<Row>, Error> {
        selector_key(entity, selector)?;
        let filter = Filter::and(
            selector
                .iter()
                .map(|(field, value)| Filter::eq(field, value.clone())),
        );

        Ok(self.read(entity, &filter, &[])?.into_iter().next())
    }

    pub(crate) fn count(&self, entity: &'a EntityModel, filter: &Filter) -> Result<usize, Error> {
        let mut count = 0;
        for candidate in self.readable(entity, filter)? {
            if candidate.visible
                || self
                    .hidden_fields(&candidate.loaded, false)?
                    .is_some()
            {
                count += 1;
            }
        }

        Ok(count)
    }

    /// Rows matching `filter` that the principal may see at least in part.
    ///
    /// Caller filter and read guard are pushed into one store filter when
    /// both lower and no field can be re-permitted by an override; anything
    /// else is fetched by the caller filter and checked row by row.
    pub(crate) fn readable(&self, entity: &'a EntityModel, filter: &Filter) -> Result<Vec<Candidate<'a>>, Error> {
        if filter.has_permission_check() {
            return Err(StructuralError::PermissionInFilter.into());
        }

        let resolver = self.resolver();
        let lowered = resolver.expand(entity, filter)?;
        let overrides = self.has_overrides(entity);

        if !overrides
            && let Some(user) = &lowered
            && let Some(guard) = resolver.guard_filter(entity, Operation::Read)?
        {
            let pushed = LoweredFilter::And(vec![user.clone(), guard]).simplify();
            tracing::trace!(entity = %entity.name, filter = ?pushed, "read pushdown");

            return Ok(self
                .find(entity, &pushed)?
                .into_iter()
                .map(|loaded| Candidate {
                    loaded,
                    visible: true,
                })
                .collect());
        }

        let mut out = Vec::new();
        let mut dropped = 0u64;
        for loaded in self.matching(entity, filter, lowered.as_ref())? {
            let visible = self.guard_holds(loaded.entity, Operation::Read, &loaded.row, &VisitStack::new())?;
            if visible || overrides {
                out.push(Candidate { loaded, visible });
            } else {
                dropped += 1;
            }
        }

        if dropped > 0 {
            sink::record(MetricsEvent::RowsFiltered {
                entity: &entity.name,
                rows: dropped,
            });
        }

        Ok(out)
    }

    fn has_overrides(&self, entity: &EntityModel) -> bool {
        std::iter::once(entity)
            .chain(self.schema.concrete_subtypes(entity))
            .any(|e| self.guard(e, Operation::Read).has_overrides())
    }

    /// Fields of a loaded row the principal may not see. `None` when the
    /// row guard denies and no override re-permits any field.
    pub(crate) fn hidden_fields(&self, loaded: &Loaded<'_>, visible: bool) -> Result<Option<BTreeSet<String>>, Error> {
        let entity = loaded.entity;
        let guard = self.guard(entity, Operation::Read);
        let stack = VisitStack::new().push(VisitStack::row_key(entity, Operation::Read, &loaded.row));
        let scope = Scope::new(entity, &loaded.row, Operation::Read, &stack);
        let evaluator = Evaluator::new(self);

        let mut hidden = BTreeSet::new();
        if visible {
            for (field, field_guard) in &guard.fields {
                if !evaluator.holds(&field_guard.permit, scope)? {
                    hidden.insert(field.clone());
                }
            }

            return Ok(Some(hidden));
        }

        let mut kept = 0usize;
        for field in &entity.fields {
            let overridden = match guard.field(&field.name).and_then(|g| g.override_permit.as_ref()) {
                Some(permit) => evaluator.holds(permit, scope)?,
                None => false,
            };
            if overridden {
                kept += 1;
            } else {
                hidden.insert(field.name.clone());
            }
        }

        Ok((kept > 0).then_some(hidden))
    }

    /// Caller-facing copy of a loaded row: includes attached, hidden fields
    /// redacted. `None` when nothing of the row is visible.
    pub(crate) fn present(&self, loaded: &Loaded<'_>, visible: bool, include: &[Include]) -> Result<Option<Row>, Error> {
        let Some(hidden) = self.hidden_fields(loaded, visible)? else {
            return Ok(None);
        };

        let mut row = loaded.row.clone();
        if visible {
            for inc in include {
                let value = self.include(loaded, inc)?;
                row.insert(inc.relation.clone(), value);
            }
        }

        if !hidden.is_empty() {
            redact(&mut row, &hidden, self.config.policy.redaction);
            sink::record(MetricsEvent::FieldsRedacted {
                entity: &loaded.entity.name,
                fields: u64::try_from(hidden.len()).unwrap_or(u64::MAX),
            });
        }

        Ok(Some(row))
    }

    /// Result row of a write, if the principal may read it.
    pub(crate) fn present_written(&self, loaded: &Loaded<'_>) -> Result<Option<Row>, Error> {
        if !self.guard_holds(loaded.entity, Operation::Read, &loaded.row, &VisitStack::new())? {
            return Ok(None);
        }

        self.present(loaded, true, &[])
    }

    fn include(&self, loaded: &Loaded<'_>, include: &Include) -> Result<Value, Error> {
        let relation = loaded
            .entity
            .get_relation(&include.relation)
            .filter(|r| !r.aux)
            .ok_or_else(|| StructuralError::UnknownField {
                entity: loaded.entity.name.clone(),
                field: include.relation.clone(),
            })?;
        let target = self.entity(&relation.target)?;
        let condition = include
            .filter
            .to_expr()
            .ok_or(StructuralError::PermissionInFilter)?;

        let evaluator = Evaluator::new(self);
        let stack = VisitStack::new();
        let mut items = Vec::new();
        for related in self.related_rows(relation, &loaded.row, &stack)? {
            let scope = Scope::new(target, &related.row, Operation::Read, &stack);
            if !evaluator.holds(&condition, scope)? {
                continue;
            }
            if let Some(row) = self.present(&related, true, &include.include)? {
                items.push(Value::from(row));
            }
        }

        Ok(if relation.is_to_many() {
            Value::List(items)
        } else {
            items.into_iter().next().unwrap_or(Value::Null)
        })
    }
}

/// Apply a redaction to `row`. Applying the same hidden set again leaves
/// the row unchanged.
pub fn redact(row: &mut Row, hidden: &BTreeSet<String>, mode: Redaction) {
    for field in hidden {
        match mode {
            Redaction::Remove => {
                row.remove(field);
            }
            Redaction::Null => {
                if let Some(value) = row.get_mut(field) {
                    *value = Value::Null;
                }
            }
        }
    }
}
