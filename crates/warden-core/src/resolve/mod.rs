//! Relation and delegate expansion of logical filters into physical,
//! visibility-scoped table filters.

#[cfg(test)]
mod tests;

use crate::{
    error::{DenyReason, Error, PolicyDeniedError, StructuralError},
    expr::Quantifier,
    filter::{Filter, LoweredFilter},
    guard::{GuardCache, Lowering, VisitStack},
    model::{EntityModel, JoinColumn, RelationModel, Schema},
    policy::Operation,
    value::{CompareOp, Value},
};

///
/// ExpandError
///

#[derive(Debug)]
enum ExpandError {
    /// Some guard on the path cannot be expressed as a filter.
    Unlowerable,
    Failed(Error),
}

impl From<Error> for ExpandError {
    fn from(err: Error) -> Self {
        Self::Failed(err)
    }
}

impl From<StructuralError> for ExpandError {
    fn from(err: StructuralError) -> Self {
        Self::Failed(err.into())
    }
}

type Expanded = Result<LoweredFilter, ExpandError>;

///
/// Resolver
///
/// Expands a logical `Filter` over an entity into a `LoweredFilter` bound
/// to one physical table. Fields stored in another table of the delegate
/// chain are reached through primary-key existence filters; relation
/// predicates only count related rows the principal may read.
///
/// `Ok(None)` means some guard on the way is not lowerable, or refers back
/// to a guard still being expanded, and the caller must evaluate in memory
/// instead.
///

pub struct Resolver<'a> {
    pub schema: &'a Schema,
    pub guards: &'a GuardCache,
    pub principal: &'a Value,
    pub max_depth: usize,
}

impl Resolver<'_> {
    /// Expand a caller filter over `entity`'s own table.
    pub fn expand(&self, entity: &EntityModel, filter: &Filter) -> Result<Option<LoweredFilter>, Error> {
        finish(self.expand_at(&entity.name, entity, filter, &VisitStack::new()))
    }

    /// Row guard of `(entity, op)` as a filter over `entity`'s own table.
    /// Delegate bases fan out to the guard of each row's concrete type.
    pub fn guard_filter(&self, entity: &EntityModel, op: Operation) -> Result<Option<LoweredFilter>, Error> {
        finish(self.guard_at(&entity.name, entity, op, &VisitStack::new()))
    }

    fn entity(&self, name: &str) -> Result<&EntityModel, ExpandError> {
        Ok(self.schema.try_entity(name)?)
    }

    fn guard_at(&self, table: &str, entity: &EntityModel, op: Operation, stack: &VisitStack) -> Expanded {
        let subtypes = self.schema.concrete_subtypes(entity);
        let Some(disc) = entity.delegate.as_deref().filter(|_| !subtypes.is_empty()) else {
            return self.single_guard_at(table, entity, op, stack);
        };

        let mut branches = Vec::with_capacity(subtypes.len() + 1);
        for sub in &subtypes {
            let tag = self.expand_at(table, entity, &Filter::eq(disc, sub.name.as_str()), stack)?;
            branches.push(LoweredFilter::And(vec![
                tag,
                self.single_guard_at(table, sub, op, stack)?,
            ]));
        }

        // rows tagged with an unknown type fall back to the base guard
        let names = subtypes.iter().map(|s| Value::from(s.name.as_str()));
        let untagged = Filter::Compare {
            field: disc.to_string(),
            op: CompareOp::NotIn,
            value: Value::List(names.collect()),
        };
        branches.push(LoweredFilter::And(vec![
            self.expand_at(table, entity, &untagged, stack)?,
            self.single_guard_at(table, entity, op, stack)?,
        ]));

        Ok(LoweredFilter::Or(branches).simplify())
    }

    fn single_guard_at(&self, table: &str, entity: &EntityModel, op: Operation, stack: &VisitStack) -> Expanded {
        // a filter cannot tell rows apart, so re-entry is left to the
        // per-row evaluation
        let key = VisitStack::key(&entity.name, op);
        if stack.contains(&key) {
            return Err(ExpandError::Unlowerable);
        }
        if stack.depth() >= self.max_depth {
            return Err(depth_exceeded(entity, op, self.max_depth).into());
        }

        let guard = self.guards.get_or_compile(self.schema, entity, op);
        if guard.denies_all() {
            return Ok(LoweredFilter::False);
        }

        let lowering = Lowering {
            schema: self.schema,
            principal: self.principal,
            model: &entity.name,
            operation: op,
        };
        let filter = lowering
            .lower(entity, &guard.pre)
            .ok_or(ExpandError::Unlowerable)?;

        self.expand_at(table, entity, &filter, &stack.push(key))
    }

    fn expand_at(&self, table: &str, entity: &EntityModel, filter: &Filter, stack: &VisitStack) -> Expanded {
        Ok(match filter {
            Filter::True => LoweredFilter::True,
            Filter::False => LoweredFilter::False,
            Filter::And(items) => LoweredFilter::And(
                items
                    .iter()
                    .map(|f| self.expand_at(table, entity, f, stack))
                    .collect::<Result<_, _>>()?,
            ),
            Filter::Or(items) => LoweredFilter::Or(
                items
                    .iter()
                    .map(|f| self.expand_at(table, entity, f, stack))
                    .collect::<Result<_, _>>()?,
            ),
            Filter::Not(inner) => {
                LoweredFilter::Not(Box::new(self.expand_at(table, entity, inner, stack)?))
            }
            Filter::Compare { field, op, value } => self.route(
                table,
                entity,
                field,
                LoweredFilter::Compare {
                    column: field.clone(),
                    op: *op,
                    value: value.clone(),
                },
            )?,
            Filter::Columns { left, op, right } => {
                let owner = self.column_table(table, entity, left)?;
                if owner != self.column_table(table, entity, right)? {
                    return Err(ExpandError::Unlowerable);
                }
                self.route(
                    table,
                    entity,
                    left,
                    LoweredFilter::Columns {
                        left: left.clone(),
                        op: *op,
                        right: right.clone(),
                    },
                )?
            }
            Filter::Text {
                field,
                op,
                value,
                case_insensitive,
            } => self.route(
                table,
                entity,
                field,
                LoweredFilter::Text {
                    column: field.clone(),
                    op: *op,
                    value: value.clone(),
                    case_insensitive: *case_insensitive,
                },
            )?,
            Filter::List { field, op, value } => self.route(
                table,
                entity,
                field,
                LoweredFilter::List {
                    column: field.clone(),
                    op: *op,
                    value: value.clone(),
                },
            )?,
            Filter::Relation {
                relation,
                quantifier,
                filter,
            } => self.relation_at(table, entity, relation, *quantifier, filter, stack)?,
            Filter::Permitted { operation } => {
                // relation bodies are already scoped to readable rows
                if *operation == Operation::Read {
                    LoweredFilter::True
                } else {
                    self.guard_at(table, entity, *operation, stack)?
                }
            }
        })
    }

    fn relation_at(
        &self,
        table: &str,
        entity: &EntityModel,
        name: &str,
        quantifier: Quantifier,
        filter: &Filter,
        stack: &VisitStack,
    ) -> Expanded {
        let relation = entity
            .get_relation(name)
            .filter(|r| !r.aux)
            .ok_or_else(|| StructuralError::UnknownField {
                entity: entity.name.clone(),
                field: name.to_string(),
            })?;
        let target = self.entity(&relation.target)?;
        let remote = remote_table(target, relation)?;

        let inner = self.expand_at(remote, target, filter, stack)?;
        let visible = self.guard_at(remote, target, Operation::Read, stack)?;

        // rows of a shared base table only count when they belong to the target
        let member = if remote == target.name {
            LoweredFilter::True
        } else {
            exists_by_key(&target.name, target, LoweredFilter::True)
        };

        let body = match quantifier {
            Quantifier::Any | Quantifier::None => LoweredFilter::And(vec![member, visible, inner]),
            Quantifier::All => LoweredFilter::Or(vec![
                LoweredFilter::Not(Box::new(member)),
                LoweredFilter::Not(Box::new(visible)),
                inner,
            ]),
        }
        .simplify();

        let exists = LoweredFilter::Exists {
            table: remote.to_string(),
            join: relation.join.clone(),
            quantifier,
            filter: Box::new(body),
        };

        let local_here = relation.holder == table
            || relation.local_columns().all(|c| entity.is_primary_key(c));

        Ok(if local_here {
            exists
        } else {
            exists_by_key(&relation.holder, entity, exists)
        })
    }

    // Table holding `field` when scanning `table` for `entity`.
    fn column_table<'m>(
        &self,
        table: &'m str,
        entity: &'m EntityModel,
        field: &str,
    ) -> Result<&'m str, ExpandError> {
        let model = entity
            .get_field(field)
            .ok_or_else(|| StructuralError::UnknownField {
                entity: entity.name.clone(),
                field: field.to_string(),
            })?;

        Ok(if entity.is_primary_key(field) {
            table
        } else {
            &model.owner
        })
    }

    fn route(&self, table: &str, entity: &EntityModel, field: &str, leaf: LoweredFilter) -> Expanded {
        let owner = self.column_table(table, entity, field)?;

        Ok(if owner == table {
            leaf
        } else {
            exists_by_key(owner, entity, leaf)
        })
    }
}

fn finish(result: Expanded) -> Result<Option<LoweredFilter>, Error> {
    match result {
        Ok(filter) => Ok(Some(filter.simplify())),
        Err(ExpandError::Unlowerable) => Ok(None),
        Err(ExpandError::Failed(err)) => Err(err),
    }
}

pub(crate) fn depth_exceeded(entity: &EntityModel, op: Operation, depth: usize) -> Error {
    tracing::debug!(entity = %entity.name, operation = %op, depth, "relation depth exceeded");

    PolicyDeniedError::new(&entity.name, op, DenyReason::DepthExceeded(depth)).into()
}

/// Table that stores the remote join columns of `relation` on `target`.
pub(crate) fn remote_table<'m>(
    target: &'m EntityModel,
    relation: &RelationModel,
) -> Result<&'m str, Error> {
    let mut owner: Option<&str> = None;
    for column in relation.remote_columns() {
        let table = if target.is_primary_key(column) {
            target.name.as_str()
        } else {
            target
                .get_field(column)
                .map(|f| f.owner.as_str())
                .ok_or_else(|| {
                    Error::internal(format!("join column '{}.{column}' not resolved", target.name))
                })?
        };
        match owner {
            Some(existing) if existing != table => {
                return Err(Error::internal(format!(
                    "relation '{}' joins columns from several tables",
                    relation.name
                )));
            }
            _ => owner = Some(table),
        }
    }

    owner.ok_or_else(|| Error::internal(format!("relation '{}' has no join", relation.name)))
}

/// Primary-key self join into another table of the same delegate chain.
pub(crate) fn pk_join(entity: &EntityModel) -> Vec<JoinColumn> {
    entity
        .primary_key
        .iter()
        .map(|k| JoinColumn {
            local: k.clone(),
            remote: k.clone(),
        })
        .collect()
}

fn exists_by_key(table: &str, entity: &EntityModel, filter: LoweredFilter) -> LoweredFilter {
    LoweredFilter::Exists {
        table: table.to_string(),
        join: pk_join(entity),
        quantifier: Quantifier::Any,
        filter: Box::new(filter),
    }
}
