use serde::{Deserialize, Serialize};

use crate::entity::{encode, Entity, EntityKind};
use crate::error::StoreResult;

/// A single keyed write.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOp {
    pub kind: EntityKind,
    pub key: String,
    pub value: Vec<u8>,
}

/// An ordered set of writes committed as one unit.
///
/// Later writes to the same `(kind, key)` win. A batch is what one event
/// handler produces and what the log backend persists as one frame.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, kind: EntityKind, key: impl Into<String>, value: Vec<u8>) {
        self.ops.push(WriteOp {
            kind,
            key: key.into(),
            value,
        });
    }

    pub fn put_entity<E: Entity>(&mut self, entity: &E) -> StoreResult<()> {
        let value = encode(entity)?;
        self.put(E::KIND, entity.key(), value);
        Ok(())
    }

    /// Append every write of `other` after this batch's writes.
    pub fn extend(&mut self, other: WriteBatch) {
        self.ops.extend(other.ops);
    }

    /// Latest staged value for `(kind, key)`, if any.
    pub fn get(&self, kind: EntityKind, key: &str) -> Option<&[u8]> {
        self.ops
            .iter()
            .rev()
            .find(|op| op.kind == kind && op.key == key)
            .map(|op| op.value.as_slice())
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
