use crate::{
    enforce::{
        WriteData,
        access::{Access, Loaded},
    },
    error::{DenyReason, Error, StructuralError},
    guard::{CompiledGuard, Evaluator, Scope, VisitStack},
    model::{DefaultValue, EntityModel},
    policy::Operation,
    validate::Validator,
    value::{Row, StorageKey, Value, compare_eq},
};
use std::collections::BTreeSet;

impl<'a> Access<'a> {
    // ---------------------------------------------------------------------
    // Create
    // ---------------------------------------------------------------------

    /// Insert a row of `entity` and run its nested writes.
    ///
    /// Owner-side relations are written first so the foreign key is known;
    /// the create guard then runs against the read-back row.
    pub(crate) fn create(&self, entity: &'a EntityModel, data: &WriteData) -> Result<Loaded<'a>, Error> {
        if entity.is_abstract {
            return Err(StructuralError::AbstractEntity {
                entity: entity.name.clone(),
            }
            .into());
        }
        if entity.is_delegate() {
            return Err(StructuralError::DelegateBaseCreate {
                entity: entity.name.clone(),
            }
            .into());
        }
        self.check_shape(entity, data, Operation::Create)?;

        let mut row = data.fields.clone();
        let mut supplied: BTreeSet<String> = data.fields.keys().cloned().collect();
        self.write_owned(entity, Operation::Create, data, &mut row, &mut supplied)?;

        self.apply_defaults(entity, &mut row)?;
        for member in self.schema.delegate_chain(entity) {
            if let Some(disc) = &member.delegate {
                row.insert(disc.clone(), Value::from(entity.name.as_str()));
            }
        }
        for field in &entity.fields {
            if row.value(&field.name).is_null() {
                if !field.optional {
                    return Err(StructuralError::MissingField {
                        entity: entity.name.clone(),
                        field: field.name.clone(),
                    }
                    .into());
                }
                row.insert(field.name.clone(), Value::Null);
            }
        }

        Validator::new(self.schema).validate(entity, &row, None)?;

        let key = StorageKey::from_row(&entity.primary_key, &row).ok_or_else(|| {
            StructuralError::MissingPrimaryKey {
                entity: entity.name.clone(),
            }
        })?;
        for member in self.schema.delegate_chain(entity) {
            let columns = self.schema.table_columns(member);
            let part = row.project(columns.iter().map(String::as_str));
            self.tx.insert(&member.name, key.clone(), part)?;
        }

        let created = self.reload(entity, &key)?;
        self.check_create(entity, &created.row, &supplied)?;
        self.write_related(entity, Operation::Create, &created.row, data)?;

        tracing::debug!(entity = %entity.name, key = %key, "row created");

        self.reload(entity, &key)
    }

    // Literal, sequence, ulid and principal defaults for absent fields.
    fn apply_defaults(&self, entity: &EntityModel, row: &mut Row) -> Result<(), Error> {
        for field in &entity.fields {
            if row.contains_key(&field.name) {
                continue;
            }
            let value = match &field.default {
                None => continue,
                Some(DefaultValue::Value { value }) => value.clone(),
                Some(DefaultValue::AutoIncrement) => {
                    let sequence = format!("{}.{}", field.owner, field.name);
                    Value::Int(self.tx.next_sequence(&sequence)?)
                }
                Some(DefaultValue::Ulid) => Value::Text(ulid::Ulid::new().to_string()),
                Some(DefaultValue::Auth { path }) => self.principal.member_path(path),
            };
            if !value.is_null() {
                row.insert(field.name.clone(), value);
            }
        }

        Ok(())
    }

    // Field write restrictions, then the row-level create guard.
    fn check_create(&self, entity: &EntityModel, row: &Row, supplied: &BTreeSet<String>) -> Result<(), Error> {
        let update = self.guard(entity, Operation::Update);
        let stack = VisitStack::new().push(VisitStack::row_key(entity, Operation::Update, row));
        let scope = Scope::new(entity, row, Operation::Update, &stack);
        let evaluator = Evaluator::new(self);

        for field in supplied {
            let Some(field_guard) = update.field(field) else {
                continue;
            };
            let is_default = entity
                .get_field(field)
                .and_then(|f| f.literal_default())
                .is_some_and(|default| compare_eq(default, &row.value(field)));
            if !is_default && !evaluator.holds(&field_guard.permit, scope)? {
                return Err(Self::denied(
                    entity,
                    Operation::Create,
                    DenyReason::Field(field.clone()),
                ));
            }
        }

        if !self.guard_holds(entity, Operation::Create, row, &VisitStack::new())? {
            return Err(Self::denied(entity, Operation::Create, DenyReason::Row));
        }

        Ok(())
    }

    // ---------------------------------------------------------------------
    // Update
    // ---------------------------------------------------------------------

    /// Apply `data` to the locked pre-image `pre`. Fields are checked
    /// against `requested`, the entity the caller addressed.
    pub(crate) fn update(&self, requested: &'a EntityModel, pre: Loaded<'a>, data: &WriteData) -> Result<Loaded<'a>, Error> {
        self.check_shape(requested, data, Operation::Update)?;

        let entity = pre.entity;
        let guard = self.guard(entity, Operation::Update);
        let row_ok = self.guard_holds(entity, Operation::Update, &pre.row, &VisitStack::new())?;

        let mut post = pre.row.clone();
        post.merge(data.fields.clone());
        let mut supplied: BTreeSet<String> = data.fields.keys().cloned().collect();
        self.write_owned(requested, Operation::Update, data, &mut post, &mut supplied)?;

        self.check_field_writes(entity, &guard, &pre.row, &supplied, row_ok)?;

        for field in &supplied {
            let optional = entity.get_field(field).is_none_or(|f| f.optional);
            if !optional && post.value(field).is_null() {
                return Err(StructuralError::MissingField {
                    entity: entity.name.clone(),
                    field: field.clone(),
                }
                .into());
            }
        }

        let input_only = self.config.validation.input_only_for_update;
        Validator::new(self.schema).validate(entity, &post, input_only.then_some(&supplied))?;

        for member in self.schema.delegate_chain(entity) {
            let columns = self.schema.table_columns(member);
            let before = pre.row.project(columns.iter().map(String::as_str));
            let after = post.project(columns.iter().map(String::as_str));
            if before != after {
                self.tx.update(&member.name, &pre.key, after)?;
            }
        }

        let updated = self.reload(entity, &pre.key)?;

        // an override-permitted update has no row guard to post-check
        if row_ok && !self.post_holds(entity, &guard, &pre.row, &updated.row)? {
            return Err(Self::denied(entity, Operation::Update, DenyReason::PostCheck));
        }

        self.write_related(requested, Operation::Update, &updated.row, data)?;

        tracing::debug!(entity = %entity.name, key = %pre.key, fields = supplied.len(), "row updated");

        self.reload(entity, &pre.key)
    }

    // Field-level update guards. When the row guard denies, every written
    // field must be re-permitted by an overridable allow.
    fn check_field_writes(
        &self,
        entity: &EntityModel,
        guard: &CompiledGuard,
        row: &Row,
        supplied: &BTreeSet<String>,
        row_ok: bool,
    ) -> Result<(), Error> {
        let stack = VisitStack::new().push(VisitStack::row_key(entity, Operation::Update, row));
        let scope = Scope::new(entity, row, Operation::Update, &stack);
        let evaluator = Evaluator::new(self);

        if !row_ok {
            if supplied.is_empty() {
                return Err(Self::denied(entity, Operation::Update, DenyReason::Row));
            }
            for field in supplied {
                let overridden = match guard.field(field).and_then(|g| g.override_permit.as_ref()) {
                    Some(permit) => evaluator.holds(permit, scope)?,
                    None => false,
                };
                if !overridden {
                    return Err(Self::denied(entity, Operation::Update, DenyReason::Row));
                }
            }

            return Ok(());
        }

        for field in supplied {
            if let Some(field_guard) = guard.field(field)
                && !evaluator.holds(&field_guard.permit, scope)?
            {
                return Err(Self::denied(
                    entity,
                    Operation::Update,
                    DenyReason::Field(field.clone()),
                ));
            }
        }

        Ok(())
    }

    // ---------------------------------------------------------------------
    // Shared
    // ---------------------------------------------------------------------

    /// Reject writes the schema does not allow, before any guard runs.
    pub(crate) fn check_shape(&self, entity: &EntityModel, data: &WriteData, op: Operation) -> Result<(), Error> {
        let chain = self.schema.delegate_chain(entity);

        for field in data.fields.keys() {
            if entity.get_field(field).is_none() {
                return Err(StructuralError::UnknownField {
                    entity: entity.name.clone(),
                    field: field.clone(),
                }
                .into());
            }
            if chain.iter().any(|m| m.delegate.as_ref() == Some(field)) {
                return Err(StructuralError::DiscriminatorWrite {
                    entity: entity.name.clone(),
                    field: field.clone(),
                }
                .into());
            }
            if op == Operation::Update && entity.is_primary_key(field) {
                return Err(StructuralError::PrimaryKeyWrite {
                    entity: entity.name.clone(),
                    field: field.clone(),
                }
                .into());
            }
        }

        for name in data.relations.keys() {
            let relation = entity
                .get_relation(name)
                .ok_or_else(|| StructuralError::UnknownField {
                    entity: entity.name.clone(),
                    field: name.clone(),
                })?;
            if relation.aux {
                return Err(StructuralError::AuxRelationWrite {
                    entity: entity.name.clone(),
                    relation: name.clone(),
                }
                .into());
            }
        }

        Ok(())
    }

    /// Logical row that must exist inside this transaction.
    pub(crate) fn reload(&self, entity: &'a EntityModel, key: &StorageKey) -> Result<Loaded<'a>, Error> {
        self.load(entity, key, false)?.ok_or_else(|| {
            Error::internal(format!("row '{}' {key} vanished inside its transaction", entity.name))
        })
    }
}
