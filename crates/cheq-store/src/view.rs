use crate::batch::WriteBatch;
use crate::entity::{decode, Entity, EntityKind};
use crate::error::StoreResult;
use crate::traits::EntityStore;

/// A read-through overlay of pending writes on top of a store.
///
/// Event handlers read and write exclusively through a `StagedView`. Reads
/// see the handler's own staged writes first, then the committed store.
/// Nothing reaches the store until the owner takes the batch with
/// [`StagedView::into_batch`] and applies it.
pub struct StagedView<'a> {
    store: &'a dyn EntityStore,
    pending: WriteBatch,
}

impl<'a> StagedView<'a> {
    pub fn new(store: &'a dyn EntityStore) -> Self {
        Self {
            store,
            pending: WriteBatch::new(),
        }
    }

    pub fn get(&self, kind: EntityKind, key: &str) -> StoreResult<Option<Vec<u8>>> {
        if let Some(staged) = self.pending.get(kind, key) {
            return Ok(Some(staged.to_vec()));
        }
        self.store.get(kind, key)
    }

    pub fn put(&mut self, kind: EntityKind, key: impl Into<String>, value: Vec<u8>) {
        self.pending.put(kind, key, value);
    }

    pub fn load<E: Entity>(&self, key: &str) -> StoreResult<Option<E>> {
        match self.get(E::KIND, key)? {
            Some(bytes) => decode::<E>(key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    pub fn exists<E: Entity>(&self, key: &str) -> StoreResult<bool> {
        Ok(self.get(E::KIND, key)?.is_some())
    }

    /// Stage an entity under its own key.
    pub fn stage<E: Entity>(&mut self, entity: &E) -> StoreResult<()> {
        self.pending.put_entity(entity)
    }

    pub fn pending(&self) -> &WriteBatch {
        &self.pending
    }

    pub fn into_batch(self) -> WriteBatch {
        self.pending
    }
}
