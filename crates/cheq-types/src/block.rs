use std::fmt;

use serde::{Deserialize, Serialize};

/// Block metadata carried by every event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockInfo {
    /// Block timestamp, seconds since UNIX epoch.
    pub timestamp: u64,
    pub number: u64,
}

impl BlockInfo {
    pub fn new(timestamp: u64, number: u64) -> Self {
        Self { timestamp, number }
    }
}

/// Position of an event in the upstream stream.
///
/// Ordering: `block_number` → `tx_index` → `log_index`, the order in which
/// the upstream delivers events. Log indices are only guaranteed to break
/// ties inside one transaction, so a position alone does not identify an
/// event; pair it with the transaction hash for that.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct EventPosition {
    pub block_number: u64,
    pub tx_index: u64,
    pub log_index: u64,
}

impl EventPosition {
    pub fn new(block_number: u64, tx_index: u64, log_index: u64) -> Self {
        Self {
            block_number,
            tx_index,
            log_index,
        }
    }

    pub fn is_after(&self, other: &Self) -> bool {
        self > other
    }
}

impl fmt::Display for EventPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.block_number, self.tx_index, self.log_index)
    }
}
