use crate::{
    error::StoreError,
    filter::{LoweredFilter, RowSource},
    store::{Store, Transaction},
    value::{Row, StorageKey},
};
use std::{
    cell::RefCell,
    collections::{BTreeMap, btree_map::Entry},
    sync::{PoisonError, RwLock},
};

type TableKey = (String, StorageKey);

///
/// Versioned
///

#[derive(Clone, Debug)]
struct Versioned {
    version: u64,
    row: Row,
}

///
/// MemoryState
///

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<String, BTreeMap<StorageKey, Versioned>>,
    sequences: BTreeMap<String, i64>,
    clock: u64,
}

impl MemoryState {
    fn version_of(&self, table: &str, key: &StorageKey) -> u64 {
        self.tables
            .get(table)
            .and_then(|rows| rows.get(key))
            .map_or(0, |v| v.version)
    }
}

///
/// MemoryStore
///
/// Reference execution layer. Each transaction buffers its writes in an
/// overlay and records the version of every row it locks or writes; commit
/// fails with `Conflict` if any of those rows changed underneath it.
///

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed rows of `table`, in key order.
    #[must_use]
    pub fn snapshot(&self, table: &str) -> Vec<Row> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .tables
            .get(table)
            .map(|rows| rows.values().map(|v| v.row.clone()).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn row_count(&self, table: &str) -> usize {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.tables.get(table).map_or(0, BTreeMap::len)
    }
}

impl Store for MemoryStore {
    fn begin(&self) -> Result<Box<dyn Transaction + '_>, StoreError> {
        Ok(Box::new(MemoryTx {
            store: self,
            writes: RefCell::new(BTreeMap::new()),
            pinned: RefCell::new(BTreeMap::new()),
        }))
    }
}

///
/// MemoryTx
///

struct MemoryTx<'a> {
    store: &'a MemoryStore,

    /// Pending writes; `None` marks a delete.
    writes: RefCell<BTreeMap<TableKey, Option<Row>>>,

    /// Row versions observed at lock or first write (0 = absent).
    pinned: RefCell<BTreeMap<TableKey, u64>>,
}

impl MemoryTx<'_> {
    fn committed(&self, table: &str, key: &StorageKey) -> Option<Row> {
        let state = self.store.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .tables
            .get(table)
            .and_then(|rows| rows.get(key))
            .map(|v| v.row.clone())
    }

    fn current(&self, table: &str, key: &StorageKey) -> Option<Row> {
        let id = (table.to_string(), key.clone());
        match self.writes.borrow().get(&id) {
            Some(pending) => pending.clone(),
            None => self.committed(table, key),
        }
    }

    fn pin(&self, table: &str, key: &StorageKey) {
        let id = (table.to_string(), key.clone());
        if let Entry::Vacant(slot) = self.pinned.borrow_mut().entry(id) {
            let state = self.store.state.read().unwrap_or_else(PoisonError::into_inner);
            slot.insert(state.version_of(table, key));
        }
    }

    fn write(&self, table: &str, key: &StorageKey, row: Option<Row>) {
        self.pin(table, key);
        self.writes
            .borrow_mut()
            .insert((table.to_string(), key.clone()), row);
    }

    fn not_found(table: &str, key: &StorageKey) -> StoreError {
        StoreError::NotFound {
            table: table.to_string(),
            key: key.to_string(),
        }
    }
}

impl RowSource for MemoryTx<'_> {
    fn table_rows(&self, table: &str) -> Result<Vec<Row>, StoreError> {
        let mut rows: BTreeMap<StorageKey, Row> = {
            let state = self.store.state.read().unwrap_or_else(PoisonError::into_inner);
            state
                .tables
                .get(table)
                .map(|rows| {
                    rows.iter()
                        .map(|(k, v)| (k.clone(), v.row.clone()))
                        .collect()
                })
                .unwrap_or_default()
        };

        for ((t, key), pending) in self.writes.borrow().iter() {
            if t != table {
                continue;
            }
            match pending {
                Some(row) => {
                    rows.insert(key.clone(), row.clone());
                }
                None => {
                    rows.remove(key);
                }
            }
        }

        Ok(rows.into_values().collect())
    }
}

impl Transaction for MemoryTx<'_> {
    fn find(&self, table: &str, filter: &LoweredFilter) -> Result<Vec<Row>, StoreError> {
        let mut out = Vec::new();
        for row in self.table_rows(table)? {
            if filter.matches(&row, self)? {
                out.push(row);
            }
        }

        Ok(out)
    }

    fn get(&self, table: &str, key: &StorageKey) -> Result<Option<Row>, StoreError> {
        Ok(self.current(table, key))
    }

    fn lock(&self, table: &str, key: &StorageKey) -> Result<Option<Row>, StoreError> {
        self.pin(table, key);
        Ok(self.current(table, key))
    }

    fn insert(&self, table: &str, key: StorageKey, row: Row) -> Result<(), StoreError> {
        if self.current(table, &key).is_some() {
            return Err(StoreError::DuplicateKey {
                table: table.to_string(),
                key: key.to_string(),
            });
        }
        self.write(table, &key, Some(row));

        Ok(())
    }

    fn update(&self, table: &str, key: &StorageKey, row: Row) -> Result<(), StoreError> {
        if self.current(table, key).is_none() {
            return Err(Self::not_found(table, key));
        }
        self.write(table, key, Some(row));

        Ok(())
    }

    fn delete(&self, table: &str, key: &StorageKey) -> Result<(), StoreError> {
        if self.current(table, key).is_none() {
            return Err(Self::not_found(table, key));
        }
        self.write(table, key, None);

        Ok(())
    }

    fn next_sequence(&self, sequence: &str) -> Result<i64, StoreError> {
        let mut state = self.store.state.write().unwrap_or_else(PoisonError::into_inner);
        let next = state.sequences.entry(sequence.to_string()).or_insert(0);
        *next = next
            .checked_add(1)
            .ok_or_else(|| StoreError::Backend(format!("sequence '{sequence}' exhausted")))?;

        Ok(*next)
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut state = self.store.state.write().unwrap_or_else(PoisonError::into_inner);

        for ((table, key), seen) in self.pinned.borrow().iter() {
            if state.version_of(table, key) != *seen {
                return Err(StoreError::Conflict {
                    table: table.clone(),
                    key: key.to_string(),
                });
            }
        }

        state.clock = state.clock.saturating_add(1);
        let version = state.clock;
        let writes = self.writes.take();
        let count = writes.len();
        for ((table, key), pending) in writes {
            let rows = state.tables.entry(table).or_default();
            match pending {
                Some(row) => {
                    rows.insert(key, Versioned { version, row });
                }
                None => {
                    rows.remove(&key);
                }
            }
        }

        tracing::trace!(version, writes = count, "memory transaction committed");

        Ok(())
    }

    fn rollback(self: Box<Self>) {
        tracing::trace!(writes = self.writes.borrow().len(), "memory transaction discarded");
    }
}
