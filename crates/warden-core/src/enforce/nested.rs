use crate::{
    enforce::{
        NestedWrite, WriteData,
        access::{Access, Loaded, selector_key},
    },
    error::{DenyReason, Error, StoreError, StructuralError},
    guard::VisitStack,
    model::{EntityModel, RelationModel},
    policy::Operation,
    value::{Row, Value, compare_eq},
};
use std::collections::BTreeSet;

impl<'a> Access<'a> {
    /// Nested writes on foreign-key owning relations. They run before the
    /// parent row is written and leave the resolved key in `row`.
    pub(crate) fn write_owned(
        &self,
        entity: &EntityModel,
        op: Operation,
        data: &WriteData,
        row: &mut Row,
        supplied: &mut BTreeSet<String>,
    ) -> Result<(), Error> {
        for (name, writes) in &data.relations {
            let relation = self.relation(entity, name)?;
            if !relation.owner {
                continue;
            }
            let target = self.entity(&relation.target)?;

            let mut linked = false;
            for write in writes {
                let link = match write {
                    NestedWrite::Create(nested) => {
                        let created = self.create(target, nested)?;
                        Some(created.row)
                    }
                    NestedWrite::Connect(selector) => {
                        let found = self.connect_target(entity, op, relation, target, selector)?;
                        Some(found.row)
                    }
                    NestedWrite::Disconnect(selector) if op == Operation::Update => {
                        self.related_target(relation, target, row, selector)?;
                        None
                    }
                    NestedWrite::Update { .. } | NestedWrite::Delete(_) if op == Operation::Update => continue,
                    other => {
                        return Err(invalid(entity, relation, format!("{} requires an existing row", other.label())));
                    }
                };

                if linked {
                    return Err(invalid(entity, relation, "more than one link write".to_string()));
                }
                linked = true;

                for join in &relation.join {
                    let value = link.as_ref().map_or(Value::Null, |r| r.value(&join.remote));
                    row.insert(join.local.clone(), value);
                    supplied.insert(join.local.clone());
                }
            }
        }

        Ok(())
    }

    /// Nested writes that need the parent row to exist: everything on
    /// inverse relations, plus update/delete through an owned link.
    pub(crate) fn write_related(
        &self,
        entity: &EntityModel,
        op: Operation,
        row: &Row,
        data: &WriteData,
    ) -> Result<(), Error> {
        for (name, writes) in &data.relations {
            let relation = self.relation(entity, name)?;
            let target = self.entity(&relation.target)?;

            for write in writes {
                tracing::trace!(entity = %entity.name, relation = %name, write = write.label(), "nested write");

                match write {
                    NestedWrite::Update { selector, data } if relation.owner || op == Operation::Update => {
                        let pre = self.related_target(relation, target, row, selector)?;
                        self.update(target, pre, data)?;
                    }
                    NestedWrite::Delete(selector) if relation.owner || op == Operation::Update => {
                        let pre = self.related_target(relation, target, row, selector)?;
                        self.delete(pre)?;
                    }
                    _ if relation.owner => {}

                    NestedWrite::Create(nested) => {
                        let mut nested = nested.clone();
                        for join in &relation.join {
                            nested.fields.insert(join.remote.clone(), row.value(&join.local));
                        }
                        self.create(target, &nested)?;
                    }
                    NestedWrite::Connect(selector) => {
                        let pre = self.connect_target(entity, op, relation, target, selector)?;
                        let mut link = WriteData::new();
                        for join in &relation.join {
                            link.fields.insert(join.remote.clone(), row.value(&join.local));
                        }
                        self.update(target, pre, &link)?;
                    }
                    NestedWrite::Disconnect(selector) if op == Operation::Update => {
                        let pre = self.related_target(relation, target, row, selector)?;
                        let mut unlink = WriteData::new();
                        for join in &relation.join {
                            unlink.fields.insert(join.remote.clone(), Value::Null);
                        }
                        self.update(target, pre, &unlink)?;
                    }
                    other => {
                        return Err(invalid(entity, relation, format!("{} requires an existing row", other.label())));
                    }
                }
            }
        }

        Ok(())
    }

    fn relation<'e>(&self, entity: &'e EntityModel, name: &str) -> Result<&'e RelationModel, Error> {
        entity
            .get_relation(name)
            .filter(|r| !r.aux)
            .ok_or_else(|| {
                StructuralError::UnknownField {
                    entity: entity.name.clone(),
                    field: name.to_string(),
                }
                .into()
            })
    }

    /// Row a connect points at. It must exist and be readable.
    fn connect_target(
        &self,
        entity: &EntityModel,
        op: Operation,
        relation: &RelationModel,
        target: &'a EntityModel,
        selector: &Row,
    ) -> Result<Loaded<'a>, Error> {
        let denied = || Self::denied(entity, op, DenyReason::ConnectTarget(relation.name.clone()));

        let Some(found) = self.find_unique(target, selector, true)? else {
            return Err(denied());
        };
        if !self.guard_holds(found.entity, Operation::Read, &found.row, &VisitStack::new())? {
            return Err(denied());
        }

        Ok(found)
    }

    /// Related row named by `selector` that is currently linked to `row`.
    fn related_target(
        &self,
        relation: &RelationModel,
        target: &'a EntityModel,
        row: &Row,
        selector: &Row,
    ) -> Result<Loaded<'a>, Error> {
        let key = selector_key(target, selector)?;
        let linked = self.find_unique(target, selector, true)?.filter(|found| {
            relation.join.iter().all(|join| {
                let local = row.value(&join.local);
                !local.is_null() && compare_eq(&found.row.value(&join.remote), &local)
            })
        });

        linked.ok_or_else(|| {
            StoreError::NotFound {
                table: target.name.clone(),
                key: key.to_string(),
            }
            .into()
        })
    }
}

fn invalid(entity: &EntityModel, relation: &RelationModel, message: String) -> Error {
    StructuralError::InvalidNestedWrite {
        entity: entity.name.clone(),
        relation: relation.name.clone(),
        message,
    }
    .into()
}
