use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// One logical table per entity type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Account,
    Erc20,
    Transaction,
    Instrument,
    Escrow,
    Transfer,
    RequestAuditor,
    RequestUser,
    Handshake,
    DirectPayData,
    /// Indexer bookkeeping (stream cursor).
    Meta,
}

impl EntityKind {
    pub const ALL: [EntityKind; 11] = [
        Self::Account,
        Self::Erc20,
        Self::Transaction,
        Self::Instrument,
        Self::Escrow,
        Self::Transfer,
        Self::RequestAuditor,
        Self::RequestUser,
        Self::Handshake,
        Self::DirectPayData,
        Self::Meta,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::Erc20 => "erc20",
            Self::Transaction => "transaction",
            Self::Instrument => "instrument",
            Self::Escrow => "escrow",
            Self::Transfer => "transfer",
            Self::RequestAuditor => "request_auditor",
            Self::RequestUser => "request_user",
            Self::Handshake => "handshake",
            Self::DirectPayData => "direct_pay_data",
            Self::Meta => "meta",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record that lives in exactly one table under a deterministic key.
pub trait Entity: Serialize + DeserializeOwned {
    const KIND: EntityKind;

    /// Primary key within [`Entity::KIND`]'s table.
    fn key(&self) -> String;
}

/// Encode an entity for storage.
pub fn encode<E: Entity>(entity: &E) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(entity).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Decode a stored record as `E`.
pub fn decode<E: Entity>(key: &str, bytes: &[u8]) -> StoreResult<E> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::CorruptRecord {
        kind: E::KIND,
        key: key.to_string(),
        reason: e.to_string(),
    })
}
