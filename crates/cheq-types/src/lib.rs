//! Foundation types for the Cheq indexer.
//!
//! Every other crate in the workspace depends on `cheq-types`. The types
//! here are deliberately small and value-like: they are parsed once at the
//! event boundary and then copied freely through the projection.
//!
//! # Key Types
//!
//! - [`Address`]: 20-byte participant or contract address, rendered lower-case
//! - [`TxHash`]: 32-byte transaction hash
//! - [`InstrumentId`]: on-chain token id, rendered per [`KeyFormat`]
//! - [`SignedAmount`]: signed journal delta over [`U256`]
//! - [`EventPosition`]: `(block_number, tx_index, log_index)` stream position
//! - [`PairKey`], [`TransactionKey`], [`JournalKey`]: composite entity keys

pub mod address;
pub mod amount;
pub mod block;
pub mod error;
pub mod hash;
pub mod keys;

pub use address::Address;
pub use amount::{parse_u256, InstrumentId, KeyFormat, SignedAmount, U256};
pub use block::{BlockInfo, EventPosition};
pub use error::TypeError;
pub use hash::TxHash;
pub use keys::{JournalKey, PairKey, TransactionKey};
