//! Composite entity keys.
//!
//! Each key type fixes the field order and separator of its rendering.
//! Components are canonical (lower-case hex addresses and hashes, rendered
//! instrument ids), none of which can contain `:` or `/`, so two different
//! keys never render to the same string.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::hash::TxHash;

/// A (user, auditor) pair for the handshake tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey {
    pub user: Address,
    pub auditor: Address,
}

impl PairKey {
    pub fn new(user: Address, auditor: Address) -> Self {
        Self { user, auditor }
    }

    /// Key of the user's request for the auditor: `user:auditor`.
    pub fn request_auditor_key(&self) -> String {
        format!("{}:{}", self.user.to_key(), self.auditor.to_key())
    }

    /// Key of the auditor's request for the user: `auditor:user`.
    pub fn request_user_key(&self) -> String {
        format!("{}:{}", self.auditor.to_key(), self.user.to_key())
    }

    /// Key of the handshake record: `auditor:user`.
    pub fn handshake_key(&self) -> String {
        self.request_user_key()
    }
}

/// A transaction scoped to the instrument it touched.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionKey {
    pub hash: TxHash,
    pub instrument: String,
}

impl TransactionKey {
    pub fn new(hash: TxHash, instrument: impl Into<String>) -> Self {
        Self {
            hash,
            instrument: instrument.into(),
        }
    }
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.hash.to_hex(), self.instrument)
    }
}

/// Key of an escrow or transfer journal record.
///
/// The plain form is `hash/instrument`. A second, distinct movement for the
/// same instrument inside one transaction carries its log index as a
/// discriminator: `hash/instrument/logIndex`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JournalKey {
    pub hash: TxHash,
    pub instrument: String,
    pub discriminator: Option<u64>,
}

impl JournalKey {
    pub fn new(hash: TxHash, instrument: impl Into<String>) -> Self {
        Self {
            hash,
            instrument: instrument.into(),
            discriminator: None,
        }
    }

    pub fn with_discriminator(&self, log_index: u64) -> Self {
        Self {
            discriminator: Some(log_index),
            ..self.clone()
        }
    }
}

impl fmt::Display for JournalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.hash.to_hex(), self.instrument)?;
        if let Some(index) = self.discriminator {
            write!(f, "/{index}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::from_bytes([byte; 20])
    }

    #[test]
    fn pair_keys_follow_role_order() {
        let pair = PairKey::new(addr(0x11), addr(0x22));
        let user = addr(0x11).to_key();
        let auditor = addr(0x22).to_key();
        assert_eq!(pair.request_auditor_key(), format!("{user}:{auditor}"));
        assert_eq!(pair.request_user_key(), format!("{auditor}:{user}"));
        assert_eq!(pair.handshake_key(), pair.request_user_key());
    }

    #[test]
    fn swapped_roles_give_distinct_requests() {
        let a = PairKey::new(addr(1), addr(2));
        let b = PairKey::new(addr(2), addr(1));
        assert_ne!(a.request_auditor_key(), b.request_auditor_key());
        assert_eq!(a.request_auditor_key(), b.request_user_key());
    }

    #[test]
    fn journal_key_rendering() {
        let hash = TxHash::from_bytes([0xcd; 32]);
        let key = JournalKey::new(hash, "0x7");
        assert_eq!(key.to_string(), format!("{}/0x7", hash.to_hex()));
        assert_eq!(
            key.with_discriminator(4).to_string(),
            format!("{}/0x7/4", hash.to_hex())
        );
        assert_eq!(
            TransactionKey::new(hash, "0x7").to_string(),
            key.to_string()
        );
    }
}
