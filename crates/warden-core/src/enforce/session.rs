use crate::{
    enforce::{
        PolicyDb, Query, WriteData,
        access::{Access, Loaded, selector_key},
    },
    error::{Error, StoreError},
    filter::Filter,
    model::EntityModel,
    obs::sink::{self, MetricsEvent, MetricsSink, OpKind, Span},
    policy::Operation,
    sat::Satisfiability,
    store::{Store, TxGuard},
    value::{Row, Value},
};
use std::{cell::RefCell, sync::Arc};

///
/// PolicySession
///
/// Caller-facing handle bound to one principal. Every operation runs in
/// its own transaction: it either commits as a whole or leaves the store
/// unchanged.
///

pub struct PolicySession<'a, S: Store> {
    db: &'a PolicyDb<S>,
    principal: Value,
    metrics: Option<Arc<dyn MetricsSink + Send + Sync>>,
}

impl<'a, S: Store> PolicySession<'a, S> {
    pub(crate) const fn new(db: &'a PolicyDb<S>, principal: Value) -> Self {
        Self {
            db,
            principal,
            metrics: None,
        }
    }

    /// Route metrics for this session to `sink` instead of the global one.
    #[must_use]
    pub fn metrics_sink(mut self, sink: Arc<dyn MetricsSink + Send + Sync>) -> Self {
        self.metrics = Some(sink);
        self
    }

    #[must_use]
    pub const fn principal(&self) -> &Value {
        &self.principal
    }

    fn with_metrics<T>(&self, f: impl FnOnce() -> T) -> T {
        match &self.metrics {
            Some(sink) => sink::with_metrics_sink(sink.clone(), f),
            None => f(),
        }
    }

    //
    // Operations
    //

    /// Create a row. Returns the created row as the principal may read it,
    /// or `None` when the row was created but is not readable.
    pub fn create(&self, entity: &str, data: &WriteData) -> Result<Option<Row>, Error> {
        self.execute(OpKind::Create, entity, |access| {
            let entity = access.entity(entity)?;
            let created = access.create(entity, data)?;

            access.present_written(&created)
        })
    }

    /// Readable rows matching the query, redacted per field.
    pub fn read(&self, entity: &str, query: &Query) -> Result<Vec<Row>, Error> {
        self.execute(OpKind::Read, entity, |access| {
            let entity = access.stored_entity(entity)?;

            access.read(entity, &query.filter, &query.include)
        })
    }

    /// Row named by a primary-key selector, if it is readable.
    pub fn read_unique(&self, entity: &str, selector: &Row) -> Result<Option<Row>, Error> {
        self.execute(OpKind::Read, entity, |access| {
            let entity = access.stored_entity(entity)?;

            access.read_unique(entity, selector)
        })
    }

    /// Number of rows `read` would return.
    pub fn count(&self, entity: &str, filter: &Filter) -> Result<usize, Error> {
        self.execute(OpKind::Read, entity, |access| {
            let entity = access.stored_entity(entity)?;

            access.count(entity, filter)
        })
    }

    /// Update the row named by `selector`. A missing row is a store
    /// `NotFound`; the result is `None` when the updated row is not readable.
    pub fn update(&self, entity: &str, selector: &Row, data: &WriteData) -> Result<Option<Row>, Error> {
        self.execute(OpKind::Update, entity, |access| {
            let entity = access.stored_entity(entity)?;
            let pre = found(access, entity, selector)?;
            let updated = access.update(entity, pre, data)?;

            access.present_written(&updated)
        })
    }

    /// Update every matching row the principal may update.
    pub fn update_many(&self, entity: &str, filter: &Filter, data: &WriteData) -> Result<usize, Error> {
        self.execute(OpKind::Update, entity, |access| {
            let entity = access.stored_entity(entity)?;

            access.update_many(entity, filter, data)
        })
    }

    /// Delete the row named by `selector`, returning it as it was before
    /// the delete when the principal could read it.
    pub fn delete(&self, entity: &str, selector: &Row) -> Result<Option<Row>, Error> {
        self.execute(OpKind::Delete, entity, |access| {
            let entity = access.stored_entity(entity)?;
            let pre = found(access, entity, selector)?;
            let before = access.present_written(&pre)?;
            access.delete(pre)?;

            Ok(before)
        })
    }

    /// Delete every matching row the principal may delete.
    pub fn delete_many(&self, entity: &str, filter: &Filter) -> Result<usize, Error> {
        self.execute(OpKind::Delete, entity, |access| {
            let entity = access.stored_entity(entity)?;

            access.delete_many(entity, filter)
        })
    }

    /// Whether some row agreeing with `partial` could pass the `op` guard.
    /// `false` is definite; nothing is written.
    pub fn check(&self, entity: &str, op: Operation, partial: &Row) -> Result<bool, Error> {
        self.with_metrics(|| {
            let schema = self.db.engine().schema();
            let _span = Span::new(OpKind::Check, entity);

            let model = schema.try_entity(entity)?;
            let checker = Satisfiability {
                schema: &schema,
                principal: &self.principal,
                max_steps: self.db.config().checker.max_search_steps,
            };

            checker.check_entity(self.db.engine().guards(), model, op, partial)
        })
    }

    //
    // Execution
    //

    // One transaction per call; commits on success, rolls back otherwise.
    fn execute<T: Affected>(
        &self,
        kind: OpKind,
        entity: &str,
        f: impl FnOnce(&Access<'_>) -> Result<T, Error>,
    ) -> Result<T, Error> {
        self.with_metrics(|| {
            let schema = self.db.engine().schema();
            let mut span = Span::new(kind, entity);

            let tx = TxGuard::begin(self.db.store())?;
            let access = Access {
                schema: &schema,
                guards: self.db.engine().guards(),
                tx: tx.tx()?,
                principal: &self.principal,
                config: self.db.config(),
                deleting: RefCell::default(),
            };

            let result = f(&access);
            drop(access);

            match result {
                Ok(value) => {
                    tx.commit()?;
                    span.set_rows(value.rows());

                    Ok(value)
                }
                Err(err) => {
                    drop(tx);
                    sink::record(MetricsEvent::Rollback { entity });
                    if let Error::Denied(denied) = &err {
                        sink::record(MetricsEvent::PolicyDenied {
                            entity: &denied.entity,
                            operation: denied.operation,
                        });
                    }
                    tracing::debug!(entity, class = ?err.class(), error = %err, "operation rolled back");

                    Err(err)
                }
            }
        })
    }
}

// Locked pre-image of the row named by `selector`.
fn found<'a>(access: &Access<'a>, entity: &'a EntityModel, selector: &Row) -> Result<Loaded<'a>, Error> {
    let key = selector_key(entity, selector)?;

    access.find_unique(entity, selector, true)?.ok_or_else(|| {
        StoreError::NotFound {
            table: entity.name.clone(),
            key: key.to_string(),
        }
        .into()
    })
}

///
/// Affected
/// Row count reported on the operation span.
///

trait Affected {
    fn rows(&self) -> u64;
}

impl Affected for Vec<Row> {
    fn rows(&self) -> u64 {
        u64::try_from(self.len()).unwrap_or(u64::MAX)
    }
}

impl Affected for Option<Row> {
    fn rows(&self) -> u64 {
        u64::from(self.is_some())
    }
}

impl Affected for usize {
    fn rows(&self) -> u64 {
        u64::try_from(*self).unwrap_or(u64::MAX)
    }
}
