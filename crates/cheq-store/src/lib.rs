//! Keyed entity storage for the Cheq indexer.
//!
//! The projection keeps one logical table per [`EntityKind`], each mapping a
//! string key to an encoded record. This crate owns that layout and nothing
//! else: it never interprets record contents.
//!
//! # Storage Backends
//!
//! All backends implement the [`EntityStore`] trait:
//!
//! - [`InMemoryEntityStore`] -- `BTreeMap`-based store for tests and embedding
//! - [`LogEntityStore`] -- durable store that appends every committed
//!   [`WriteBatch`] to a CRC-framed log and replays it on open
//!
//! # Design Rules
//!
//! 1. Handlers read and write through a [`StagedView`]; nothing reaches a
//!    backend until the whole batch is applied.
//! 2. [`EntityStore::apply`] is atomic: either every write in the batch is
//!    visible afterwards or none is.
//! 3. Lookups are by primary key. Key enumeration exists only for audit
//!    tooling.
//! 4. All I/O errors are propagated, never silently ignored.

pub mod batch;
pub mod entity;
pub mod error;
pub mod log;
pub mod memory;
pub mod traits;
pub mod view;

pub use batch::{WriteBatch, WriteOp};
pub use entity::{decode, encode, Entity, EntityKind};
pub use error::{StoreError, StoreResult};
pub use log::{LogConfig, LogEntityStore, SyncMode};
pub use memory::InMemoryEntityStore;
pub use traits::{EntityStore, EntityStoreExt};
pub use view::StagedView;
