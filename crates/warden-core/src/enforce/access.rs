use crate::{
    config::EnforcerConfig,
    error::{DenyReason, Error, PolicyDeniedError, StructuralError},
    filter::{Filter, LoweredFilter},
    guard::{CompiledGuard, EvalEnv, Evaluator, GuardCache, Scope, VisitStack},
    model::{EntityModel, RelationModel, Schema},
    policy::Operation,
    resolve::{self, Resolver},
    store::Transaction,
    value::{Row, StorageKey, Value, compare_eq},
};
use std::{cell::RefCell, collections::BTreeSet, sync::Arc};

///
/// Loaded
/// Logical row of an entity, merged across its delegate chain and tagged
/// with the concrete type it was stored as.
///

#[derive(Clone, Debug)]
pub(crate) struct Loaded<'a> {
    pub entity: &'a EntityModel,
    pub key: StorageKey,
    pub row: Row,
}

///
/// Access
///
/// Everything one top-level call needs: the schema snapshot, the guard
/// cache, the open transaction and the acting principal. Guard
/// evaluation reads related rows through the same transaction.
///

pub(crate) struct Access<'a> {
    pub schema: &'a Schema,
    pub guards: &'a GuardCache,
    pub tx: &'a dyn Transaction,
    pub principal: &'a Value,
    pub config: &'a EnforcerConfig,

    // rows of an in-flight delete, so cascades never revisit them
    pub deleting: RefCell<BTreeSet<(String, StorageKey)>>,
}

impl<'a> Access<'a> {
    pub(crate) fn entity(&self, name: &str) -> Result<&'a EntityModel, Error> {
        Ok(self.schema.try_entity(name)?)
    }

    /// Entity that owns storage; abstract entities are rejected.
    pub(crate) fn stored_entity(&self, name: &str) -> Result<&'a EntityModel, Error> {
        let entity = self.entity(name)?;
        if entity.is_abstract {
            return Err(StructuralError::AbstractEntity {
                entity: entity.name.clone(),
            }
            .into());
        }

        Ok(entity)
    }

    pub(crate) fn guard(&self, entity: &EntityModel, op: Operation) -> Arc<CompiledGuard> {
        self.guards.get_or_compile(self.schema, entity, op)
    }

    pub(crate) const fn resolver(&self) -> Resolver<'a> {
        Resolver {
            schema: self.schema,
            guards: self.guards,
            principal: self.principal,
            max_depth: self.config.policy.max_relation_depth,
        }
    }

    pub(crate) fn denied(entity: &EntityModel, op: Operation, reason: DenyReason) -> Error {
        tracing::debug!(entity = %entity.name, operation = %op, reason = %reason, "policy denied");

        PolicyDeniedError::new(&entity.name, op, reason).into()
    }

    // ---------------------------------------------------------------------
    // Loading
    // ---------------------------------------------------------------------

    /// Concrete type of a logical row, read from the discriminator.
    pub(crate) fn concrete_of<'e>(&self, entity: &'e EntityModel, row: &Row) -> &'e EntityModel
    where
        'a: 'e,
    {
        let Some(disc) = entity.delegate.as_deref() else {
            return entity;
        };

        row.value(disc)
            .as_text()
            .and_then(|tag| self.schema.entity(tag))
            .filter(|sub| sub.ancestors.iter().any(|a| *a == entity.name))
            .unwrap_or(entity)
    }

    fn fetch(&self, table: &str, key: &StorageKey, lock: bool) -> Result<Option<Row>, Error> {
        Ok(if lock {
            self.tx.lock(table, key)?
        } else {
            self.tx.get(table, key)?
        })
    }

    /// Merge the rows of `entity`'s delegate chain, then descend to the
    /// concrete type named by the discriminator. `lock` pins every table
    /// row read for the commit-time conflict check.
    pub(crate) fn load(&self, entity: &'a EntityModel, key: &StorageKey, lock: bool) -> Result<Option<Loaded<'a>>, Error> {
        let mut row = Row::new();
        for member in self.schema.delegate_chain(entity) {
            match self.fetch(&member.name, key, lock)? {
                Some(part) => row.merge(part),
                None => return Ok(None),
            }
        }

        let concrete = self.concrete_of(entity, &row);
        if concrete.name != entity.name {
            let chain = self.schema.delegate_chain(concrete);
            let below = chain.iter().skip_while(|m| m.name != entity.name).skip(1);

            let mut full = row.clone();
            for member in below {
                match self.fetch(&member.name, key, lock)? {
                    Some(part) => full.merge(part),
                    None => {
                        tracing::debug!(entity = %concrete.name, key = %key, "subtype row missing");
                        return Ok(Some(Loaded {
                            entity,
                            key: key.clone(),
                            row,
                        }));
                    }
                }
            }

            return Ok(Some(Loaded {
                entity: concrete,
                key: key.clone(),
                row: full,
            }));
        }

        Ok(Some(Loaded {
            entity,
            key: key.clone(),
            row,
        }))
    }

    /// Load the row named by `selector`. The selector must carry the whole
    /// primary key; any further fields must match as well.
    pub(crate) fn find_unique(&self, entity: &'a EntityModel, selector: &Row, lock: bool) -> Result<Option<Loaded<'a>>, Error> {
        let key = selector_key(entity, selector)?;
        let Some(loaded) = self.load(entity, &key, lock)? else {
            return Ok(None);
        };

        let matches = selector
            .iter()
            .all(|(field, value)| compare_eq(&loaded.row.value(field), value));

        Ok(matches.then_some(loaded))
    }

    /// Logical rows of `entity` whose own-table row matches `filter`.
    pub(crate) fn find(&self, entity: &'a EntityModel, filter: &LoweredFilter) -> Result<Vec<Loaded<'a>>, Error> {
        let mut out = Vec::new();
        for part in self.tx.find(&entity.name, filter)? {
            let Some(key) = StorageKey::from_row(&entity.primary_key, &part) else {
                continue;
            };
            if let Some(loaded) = self.load(entity, &key, false)? {
                out.push(loaded);
            }
        }

        Ok(out)
    }

    /// Rows matching a caller filter, before any visibility check.
    /// `lowered` is the filter's pushdown form when it has one.
    pub(crate) fn matching(
        &self,
        entity: &'a EntityModel,
        filter: &Filter,
        lowered: Option<&LoweredFilter>,
    ) -> Result<Vec<Loaded<'a>>, Error> {
        if let Some(lowered) = lowered {
            return self.find(entity, lowered);
        }

        let condition = filter.to_expr().ok_or(StructuralError::PermissionInFilter)?;
        let evaluator = Evaluator::new(self);
        let stack = VisitStack::new();

        let mut out = Vec::new();
        for loaded in self.find(entity, &LoweredFilter::True)? {
            if evaluator.holds(&condition, Scope::new(entity, &loaded.row, Operation::Read, &stack))? {
                out.push(loaded);
            }
        }

        Ok(out)
    }

    /// Readable rows of `target` joined to `row` through `relation`.
    pub(crate) fn related_rows(
        &self,
        relation: &RelationModel,
        row: &Row,
        stack: &VisitStack,
    ) -> Result<Vec<Loaded<'a>>, Error> {
        let target = self.entity(&relation.target)?;
        let table = resolve::remote_table(target, relation)?;

        let mut keys = Vec::with_capacity(relation.join.len());
        for join in &relation.join {
            let value = row.value(&join.local);
            if value.is_null() {
                return Ok(Vec::new());
            }
            keys.push(LoweredFilter::column_eq(&join.remote, value));
        }

        let mut out = Vec::new();
        for part in self.tx.find(table, &LoweredFilter::And(keys))? {
            let Some(key) = StorageKey::from_row(&target.primary_key, &part) else {
                continue;
            };
            // a shared base row only counts when the target table has it too
            let Some(loaded) = self.load(target, &key, false)? else {
                continue;
            };
            if self.guard_holds(loaded.entity, Operation::Read, &loaded.row, stack)? {
                out.push(loaded);
            }
        }

        Ok(out)
    }

    // ---------------------------------------------------------------------
    // Guards
    // ---------------------------------------------------------------------

    /// Row guard `pre` of `(entity, op)` on `row`. Re-entering the guard
    /// of a row already on the stack is "not permitted".
    pub(crate) fn guard_holds(
        &self,
        entity: &EntityModel,
        op: Operation,
        row: &Row,
        stack: &VisitStack,
    ) -> Result<bool, Error> {
        let key = VisitStack::row_key(entity, op, row);
        if stack.contains(&key) {
            return Ok(false);
        }
        let max_depth = self.config.policy.max_relation_depth;
        if stack.depth() >= max_depth {
            return Err(resolve::depth_exceeded(entity, op, max_depth));
        }

        let guard = self.guard(entity, op);
        if guard.denies_all() {
            return Ok(false);
        }

        let stack = stack.push(key);
        Evaluator::new(self).holds(&guard.pre, Scope::new(entity, row, op, &stack))
    }

    /// Update/delete post-check with `prospective` as the future row.
    pub(crate) fn post_holds(
        &self,
        entity: &EntityModel,
        guard: &CompiledGuard,
        pre: &Row,
        prospective: &Row,
    ) -> Result<bool, Error> {
        let Some(post) = &guard.post else {
            return Ok(true);
        };

        let stack = VisitStack::new().push(VisitStack::row_key(entity, guard.operation, pre));
        let scope = Scope::new(entity, pre, guard.operation, &stack).with_prospective(prospective);

        Evaluator::new(self).holds(post, scope)
    }
}

impl EvalEnv for Access<'_> {
    fn schema(&self) -> &Schema {
        self.schema
    }

    fn principal(&self) -> &Value {
        self.principal
    }

    fn related(
        &self,
        _: &EntityModel,
        relation: &RelationModel,
        row: &Row,
        stack: &VisitStack,
    ) -> Result<Vec<Row>, Error> {
        Ok(self
            .related_rows(relation, row, stack)?
            .into_iter()
            .map(|loaded| loaded.row)
            .collect())
    }

    fn permits(&self, entity: &EntityModel, op: Operation, row: &Row, stack: &VisitStack) -> Result<bool, Error> {
        let concrete = self.concrete_of(entity, row);

        self.guard_holds(concrete, op, row, stack)
    }
}

/// Storage key named by a selector.
pub(crate) fn selector_key(entity: &EntityModel, selector: &Row) -> Result<StorageKey, Error> {
    StorageKey::from_row(&entity.primary_key, selector).ok_or_else(|| {
        StructuralError::MissingPrimaryKey {
            entity: entity.name.clone(),
        }
        .into()
    })
}
