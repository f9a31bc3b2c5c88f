//! Execution-layer contract. The engine never talks to storage except
//! through a `Transaction` opened for one top-level call.

pub mod memory;

#[cfg(test)]
mod tests;

use crate::{
    error::StoreError,
    filter::{LoweredFilter, RowSource},
    value::{Row, StorageKey},
};

///
/// Store
///

pub trait Store: Send + Sync {
    fn begin(&self) -> Result<Box<dyn Transaction + '_>, StoreError>;
}

///
/// Transaction
///
/// Read-your-writes view over the store. Rows are addressed by the
/// canonical encoding of their primary key; the engine computes keys, the
/// store never needs the schema. Conflicts surface no later than `commit`.
///

pub trait Transaction: RowSource {
    /// Rows of `table` matching `filter`, in key order.
    fn find(&self, table: &str, filter: &LoweredFilter) -> Result<Vec<Row>, StoreError>;

    fn get(&self, table: &str, key: &StorageKey) -> Result<Option<Row>, StoreError>;

    /// Read a row and pin its version for the commit-time conflict check.
    fn lock(&self, table: &str, key: &StorageKey) -> Result<Option<Row>, StoreError>;

    fn insert(&self, table: &str, key: StorageKey, row: Row) -> Result<(), StoreError>;

    /// Replace the stored row under `key`.
    fn update(&self, table: &str, key: &StorageKey, row: Row) -> Result<(), StoreError>;

    fn delete(&self, table: &str, key: &StorageKey) -> Result<(), StoreError>;

    /// Next value of the named sequence. Sequences are not transactional.
    fn next_sequence(&self, sequence: &str) -> Result<i64, StoreError>;

    fn commit(self: Box<Self>) -> Result<(), StoreError>;

    fn rollback(self: Box<Self>);
}

///
/// TxGuard
///
/// Owns the transaction of one top-level call. Dropping the guard without
/// committing rolls the transaction back, so every early return and `?`
/// leaves the store unchanged.
///

pub(crate) struct TxGuard<'s> {
    tx: Option<Box<dyn Transaction + 's>>,
}

impl<'s> TxGuard<'s> {
    pub(crate) fn begin(store: &'s dyn Store) -> Result<Self, StoreError> {
        Ok(Self {
            tx: Some(store.begin()?),
        })
    }

    pub(crate) fn tx(&self) -> Result<&(dyn Transaction + 's), StoreError> {
        self.tx
            .as_deref()
            .ok_or_else(|| StoreError::Backend("transaction already finished".to_string()))
    }

    pub(crate) fn commit(mut self) -> Result<(), StoreError> {
        match self.tx.take() {
            Some(tx) => tx.commit(),
            None => Err(StoreError::Backend("transaction already finished".to_string())),
        }
    }
}

impl Drop for TxGuard<'_> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            tracing::debug!("transaction rolled back");
            tx.rollback();
        }
    }
}
