//! Event projection engine for the Cheq indexer.
//!
//! This crate is the heart of the indexer. It provides:
//! - The entity records (`Account`, `Instrument`, journal records, handshakes)
//! - One component per concern: identity resolver, currency registry,
//!   transaction ledger, instrument store, escrow/transfer journal, and
//!   handshake matcher
//! - The [`Projector`], which dispatches each event to its handler, commits
//!   the handler's writes atomically with the stream cursor, and retries
//!   storage failures with backoff
//! - Read-side queries and a consistency checker for audits
//!
//! Handlers never touch a backend directly. They read and write through a
//! [`cheq_store::StagedView`], so each one is a function of (event, store
//! snapshot) to a [`cheq_store::WriteBatch`].

pub mod accounts;
pub mod context;
pub mod currency;
pub mod error;
pub mod handshake;
pub mod instruments;
pub mod journal;
pub mod projector;
pub mod query;
pub mod records;
pub mod transactions;
pub mod validation;

pub use context::{Anomaly, AnomalyKind, EventContext};
pub use error::{ProjectionError, ProjectionResult};
pub use journal::JournalWrite;
pub use projector::{Outcome, Projector, ProjectorConfig, RetryPolicy, RunSummary};
pub use query::{account_instruments, instrument_journal, net_escrowed, InstrumentJournal};
pub use records::{
    Account, AppliedEvent, Cursor, DirectPayData, Erc20, EscrowRecord, Handshake, Instrument,
    InstrumentCategory, InstrumentStatus, RequestAuditor, RequestUser, Transaction,
    TransferRecord,
};
pub use validation::{ConsistencyChecker, ConsistencyReport, Violation, ViolationKind};
