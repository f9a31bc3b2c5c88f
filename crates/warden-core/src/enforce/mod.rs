//! Enforcement proxy: every caller operation is filtered, checked and
//! redacted against the compiled guards, inside one store transaction.
//!
//! Reads push the read guard into the store filter when it lowers and fall
//! back to row-by-row evaluation when it does not. Writes check the
//! pre-image, apply the mutation, validate it and run the post-check before
//! the transaction commits.

mod access;
mod delete;
mod nested;
mod read;
mod request;
mod session;
mod write;


use crate::{
    config::EnforcerConfig,
    guard::GuardCache,
    model::Schema,
    store::Store,
    value::{Row, Value},
};
use std::sync::{Arc, PoisonError, RwLock};

// re-exports
pub use read::redact;
pub use request::{Include, NestedWrite, Query, WriteData};
pub use session::PolicySession;

///
/// PolicyEngine
///
/// Loaded schema plus the guard cache compiled from it. Swapping the
/// schema drops every guard compiled for an older version.
///

#[derive(Debug)]
pub struct PolicyEngine {
    schema: RwLock<Arc<Schema>>,
    guards: GuardCache,
}

impl PolicyEngine {
    #[must_use]
    pub fn new(schema: Schema) -> Self {
        let guards = GuardCache::pinned(schema.version());
        Self {
            schema: RwLock::new(Arc::new(schema)),
            guards,
        }
    }

    /// Current schema. Operations hold on to the snapshot they started with.
    #[must_use]
    pub fn schema(&self) -> Arc<Schema> {
        self.schema
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the schema. In-flight operations finish on the old one.
    pub fn reload(&self, schema: Schema) {
        let version = schema.version();
        *self.schema.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(schema);
        self.guards.retain_version(version);

        tracing::debug!(version = %version, "schema reloaded");
    }

    #[must_use]
    pub const fn guards(&self) -> &GuardCache {
        &self.guards
    }
}

///
/// PolicyDb
/// Policy engine in front of one store.
///

pub struct PolicyDb<S: Store> {
    engine: PolicyEngine,
    store: S,
    config: EnforcerConfig,
}

impl<S: Store> PolicyDb<S> {
    #[must_use]
    pub fn new(schema: Schema, store: S) -> Self {
        Self {
            engine: PolicyEngine::new(schema),
            store,
            config: EnforcerConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: EnforcerConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub const fn engine(&self) -> &PolicyEngine {
        &self.engine
    }

    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub const fn config(&self) -> &EnforcerConfig {
        &self.config
    }

    /// Session acting as `principal`; `None` is the anonymous principal,
    /// whose `auth()` is null.
    #[must_use]
    pub fn session(&self, principal: Option<Row>) -> PolicySession<'_, S> {
        PolicySession::new(self, principal.map_or(Value::Null, Value::from))
    }
}
