use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::batch::WriteBatch;
use crate::entity::EntityKind;
use crate::error::{StoreError, StoreResult};
use crate::traits::EntityStore;

type Tables = HashMap<EntityKind, BTreeMap<String, Vec<u8>>>;

/// In-memory, map-based entity store.
///
/// Intended for tests and embedding, and used by [`crate::LogEntityStore`]
/// as its read side. Tables live behind one `RwLock`, so a batch is applied
/// under a single write guard and is atomic with respect to readers.
#[derive(Default)]
pub struct InMemoryEntityStore {
    tables: RwLock<Tables>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in one table.
    pub fn len(&self, kind: EntityKind) -> StoreResult<usize> {
        let tables = self.tables.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(tables.get(&kind).map(BTreeMap::len).unwrap_or(0))
    }

    /// Total number of records across all tables.
    pub fn total_len(&self) -> StoreResult<usize> {
        let tables = self.tables.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(tables.values().map(BTreeMap::len).sum())
    }

    /// Every record of every table as one batch, in table then key order.
    pub fn snapshot(&self) -> StoreResult<WriteBatch> {
        let tables = self.tables.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut batch = WriteBatch::new();
        for kind in EntityKind::ALL {
            if let Some(table) = tables.get(&kind) {
                for (key, value) in table {
                    batch.put(kind, key.clone(), value.clone());
                }
            }
        }
        Ok(batch)
    }
}

impl EntityStore for InMemoryEntityStore {
    fn get(&self, kind: EntityKind, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let tables = self.tables.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(tables.get(&kind).and_then(|t| t.get(key)).cloned())
    }

    fn apply(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut tables = self.tables.write().map_err(|_| StoreError::LockPoisoned)?;
        for op in batch.into_ops() {
            tables.entry(op.kind).or_default().insert(op.key, op.value);
        }
        Ok(())
    }

    fn keys(&self, kind: EntityKind) -> StoreResult<Vec<String>> {
        let tables = self.tables.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(tables
            .get(&kind)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default())
    }
}

impl std::fmt::Debug for InMemoryEntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.total_len().unwrap_or(0);
        f.debug_struct("InMemoryEntityStore")
            .field("record_count", &count)
            .finish()
    }
}
