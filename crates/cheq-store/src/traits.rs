use crate::batch::WriteBatch;
use crate::entity::{decode, EntityKind};
use crate::entity::Entity;
use crate::error::StoreResult;

/// Keyed entity store: one table per [`EntityKind`].
///
/// All implementations must satisfy these invariants:
/// - `apply` is atomic. A failed `apply` leaves no write visible.
/// - A successful `apply` is durable to the degree the backend promises
///   before it returns.
/// - Reads observe every batch applied before them.
/// - The store never interprets record contents.
pub trait EntityStore: Send + Sync {
    /// Read a record by table and key.
    ///
    /// Returns `Ok(None)` if the record does not exist.
    fn get(&self, kind: EntityKind, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Commit a batch of writes atomically.
    fn apply(&self, batch: WriteBatch) -> StoreResult<()>;

    /// All keys in a table, sorted. Intended for audit tooling only.
    fn keys(&self, kind: EntityKind) -> StoreResult<Vec<String>>;

    /// Write a single record.
    fn put(&self, kind: EntityKind, key: &str, value: Vec<u8>) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        batch.put(kind, key, value);
        self.apply(batch)
    }

    /// Check whether a record exists.
    fn exists(&self, kind: EntityKind, key: &str) -> StoreResult<bool> {
        Ok(self.get(kind, key)?.is_some())
    }
}

/// Typed helpers over any [`EntityStore`].
pub trait EntityStoreExt: EntityStore {
    fn load<E: Entity>(&self, key: &str) -> StoreResult<Option<E>> {
        match self.get(E::KIND, key)? {
            Some(bytes) => decode::<E>(key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    fn save<E: Entity>(&self, entity: &E) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        batch.put_entity(entity)?;
        self.apply(batch)
    }

    /// Load every record of a table. Audit tooling only.
    fn load_all<E: Entity>(&self) -> StoreResult<Vec<E>> {
        let mut out = Vec::new();
        for key in self.keys(E::KIND)? {
            if let Some(entity) = self.load::<E>(&key)? {
                out.push(entity);
            }
        }
        Ok(out)
    }
}

impl<S: EntityStore + ?Sized> EntityStoreExt for S {}
