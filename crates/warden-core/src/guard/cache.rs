use crate::{
    guard::{CompiledGuard, compile_guard},
    model::{EntityModel, Schema, SchemaVersion},
    obs::sink::{self, MetricsEvent},
    policy::Operation,
};
use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

///
/// GuardKey
///

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct GuardKey {
    version: SchemaVersion,
    entity: String,
    operation: Operation,
}

///
/// GuardEntries
///

#[derive(Debug, Default)]
struct GuardEntries {
    /// Version the cache was last pinned to; compiles for any other
    /// version are served but not stored.
    pinned: Option<SchemaVersion>,
    map: HashMap<GuardKey, Arc<CompiledGuard>>,
}

impl GuardEntries {
    fn admits(&self, version: SchemaVersion) -> bool {
        self.pinned.is_none_or(|pinned| pinned == version)
    }
}

///
/// GuardCache
///
/// Memoized guards keyed by (schema version, entity, operation).
/// Two threads racing on the same key compile equal guards; the first
/// insert wins and both observe an equivalent value.
///

#[derive(Debug, Default)]
pub struct GuardCache {
    entries: RwLock<GuardEntries>,
}

impl GuardCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache that only stores guards compiled for `version`.
    #[must_use]
    pub fn pinned(version: SchemaVersion) -> Self {
        Self {
            entries: RwLock::new(GuardEntries {
                pinned: Some(version),
                map: HashMap::new(),
            }),
        }
    }

    pub fn get_or_compile(
        &self,
        schema: &Schema,
        entity: &EntityModel,
        operation: Operation,
    ) -> Arc<CompiledGuard> {
        let key = GuardKey {
            version: schema.version(),
            entity: entity.name.clone(),
            operation,
        };

        if let Some(hit) = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .map
            .get(&key)
        {
            sink::record(MetricsEvent::GuardCacheHit {
                entity: &entity.name,
            });
            return Arc::clone(hit);
        }

        let compiled = Arc::new(compile_guard(schema, entity, operation));
        sink::record(MetricsEvent::GuardCompiled {
            entity: &entity.name,
        });

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if !entries.admits(key.version) {
            // compiled against a schema replaced while we were compiling
            tracing::debug!(entity = %entity.name, version = %key.version, "stale guard not cached");
            return compiled;
        }

        Arc::clone(entries.map.entry(key).or_insert(compiled))
    }

    /// Pin the cache to `version` and drop every entry compiled for
    /// another one.
    pub fn retain_version(&self, version: SchemaVersion) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.map.len();
        entries.pinned = Some(version);
        entries.map.retain(|key, _| key.version == version);

        tracing::debug!(
            version = %version,
            evicted = before - entries.map.len(),
            "guard cache invalidated"
        );
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .map
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
