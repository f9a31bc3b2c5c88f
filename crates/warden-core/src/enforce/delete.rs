use crate::{
    enforce::{
        WriteData,
        access::{Access, Loaded},
    },
    error::{DenyReason, Error, StoreError, StructuralError},
    filter::{Filter, LoweredFilter},
    guard::VisitStack,
    model::{EntityModel, ReferentialAction},
    obs::sink::{self, MetricsEvent},
    policy::Operation,
    value::{Row, StorageKey, Value},
};

impl<'a> Access<'a> {
    /// Delete a locked logical row and apply the referential actions of
    /// every relation that points at it.
    pub(crate) fn delete(&self, pre: Loaded<'a>) -> Result<(), Error> {
        let entity = pre.entity;
        if !self.guard_holds(entity, Operation::Delete, &pre.row, &VisitStack::new())? {
            return Err(Self::denied(entity, Operation::Delete, DenyReason::Row));
        }
        let guard = self.guard(entity, Operation::Delete);
        if !self.post_holds(entity, &guard, &pre.row, &Row::new())? {
            return Err(Self::denied(entity, Operation::Delete, DenyReason::PostCheck));
        }

        self.deleting
            .borrow_mut()
            .insert((entity.name.clone(), pre.key.clone()));

        for member in self.schema.delegate_chain(entity) {
            for (holder, relation) in self.schema.referencing_relations(&member.name) {
                let mut keys = Vec::with_capacity(relation.join.len());
                for join in &relation.join {
                    let value = pre.row.value(&join.remote);
                    if value.is_null() {
                        keys.clear();
                        break;
                    }
                    keys.push(LoweredFilter::column_eq(&join.local, value));
                }
                if keys.is_empty() {
                    continue;
                }

                let referencing = self.tx.find(&holder.name, &LoweredFilter::And(keys))?;
                if referencing.is_empty() {
                    continue;
                }

                match relation.on_delete {
                    ReferentialAction::NoAction => {}
                    ReferentialAction::Restrict => {
                        return Err(StoreError::Restricted {
                            table: holder.name.clone(),
                            relation: relation.name.clone(),
                        }
                        .into());
                    }
                    ReferentialAction::Cascade => {
                        for part in referencing {
                            self.cascade(holder, &part)?;
                        }
                    }
                    ReferentialAction::SetNull => {
                        for mut part in referencing {
                            let Some(key) = StorageKey::from_row(&holder.primary_key, &part) else {
                                continue;
                            };
                            for column in relation.local_columns() {
                                part.insert(column.to_string(), Value::Null);
                            }
                            self.tx.update(&holder.name, &key, part)?;
                        }
                    }
                }
            }
        }

        for member in self.schema.delegate_chain(entity).into_iter().rev() {
            self.tx.delete(&member.name, &pre.key)?;
        }

        tracing::debug!(entity = %entity.name, key = %pre.key, "row deleted");

        Ok(())
    }

    // Cascaded rows are deleted under their own delete guard.
    fn cascade(&self, holder: &'a EntityModel, part: &Row) -> Result<(), Error> {
        let Some(key) = StorageKey::from_row(&holder.primary_key, part) else {
            return Ok(());
        };
        if self.deleting.borrow().contains(&(holder.name.clone(), key.clone())) {
            return Ok(());
        }

        // load from the chain root so the row is seen at its concrete type
        let root = self
            .schema
            .delegate_chain(holder)
            .into_iter()
            .next()
            .unwrap_or(holder);
        let Some(loaded) = self.load(root, &key, true)? else {
            return Ok(());
        };
        if self
            .deleting
            .borrow()
            .contains(&(loaded.entity.name.clone(), key))
        {
            return Ok(());
        }

        self.delete(loaded)
    }

    // ---------------------------------------------------------------------
    // Bulk
    // ---------------------------------------------------------------------

    /// Update every matching row the principal may update. Rows failing
    /// the row guard are skipped, not reported.
    pub(crate) fn update_many(&self, entity: &'a EntityModel, filter: &Filter, data: &WriteData) -> Result<usize, Error> {
        reject_nested(entity, data)?;
        let candidates = self.candidates(entity, filter)?;

        let mut updated = 0;
        let mut skipped = 0u64;
        for pre in candidates {
            if self.guard_holds(pre.entity, Operation::Update, &pre.row, &VisitStack::new())? {
                self.update(entity, pre, data)?;
                updated += 1;
            } else {
                skipped += 1;
            }
        }
        record_skipped(entity, skipped);

        Ok(updated)
    }

    /// Delete every matching row the principal may delete.
    pub(crate) fn delete_many(&self, entity: &'a EntityModel, filter: &Filter) -> Result<usize, Error> {
        let candidates = self.candidates(entity, filter)?;

        let mut deleted = 0;
        let mut skipped = 0u64;
        for pre in candidates {
            // already removed by a cascade from an earlier row
            let Some(pre) = self.load(entity, &pre.key, true)? else {
                continue;
            };
            if self.guard_holds(pre.entity, Operation::Delete, &pre.row, &VisitStack::new())? {
                self.delete(pre)?;
                deleted += 1;
            } else {
                skipped += 1;
            }
        }
        record_skipped(entity, skipped);

        Ok(deleted)
    }

    // Rows matching a bulk filter, re-read with their versions pinned.
    fn candidates(&self, entity: &'a EntityModel, filter: &Filter) -> Result<Vec<Loaded<'a>>, Error> {
        if filter.has_permission_check() {
            return Err(StructuralError::PermissionInFilter.into());
        }
        let lowered = self.resolver().expand(entity, filter)?;

        let mut out = Vec::new();
        for found in self.matching(entity, filter, lowered.as_ref())? {
            if let Some(locked) = self.load(entity, &found.key, true)? {
                out.push(locked);
            }
        }

        Ok(out)
    }
}

fn reject_nested(entity: &EntityModel, data: &WriteData) -> Result<(), Error> {
    match data.relations.keys().next() {
        Some(relation) => Err(StructuralError::InvalidNestedWrite {
            entity: entity.name.clone(),
            relation: relation.clone(),
            message: "bulk updates take scalar fields only".to_string(),
        }
        .into()),
        None => Ok(()),
    }
}

fn record_skipped(entity: &EntityModel, rows: u64) {
    if rows > 0 {
        sink::record(MetricsEvent::RowsFiltered {
            entity: &entity.name,
            rows,
        });
    }
}
