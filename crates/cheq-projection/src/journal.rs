//! Escrow/transfer journal: append-only records of instrument movements.
//!
//! A movement is identified by the transaction that emitted it and the
//! instrument it moved (`hash/instrument`). When one transaction moves the
//! same instrument twice (a write with escrow followed by a top-up, say),
//! the second movement is keyed `hash/instrument/logIndex`. An append whose
//! log index matches an existing record is a replay and writes nothing.

use cheq_store::{Entity, StagedView};
use cheq_types::{Address, JournalKey, SignedAmount};

use crate::error::ProjectionResult;
use crate::records::{EscrowRecord, TransferRecord};

/// Result of an append.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JournalWrite<T> {
    Appended(T),
    AlreadyRecorded(T),
}

impl<T> JournalWrite<T> {
    pub fn is_appended(&self) -> bool {
        matches!(self, Self::Appended(_))
    }

    pub fn record(&self) -> &T {
        match self {
            Self::Appended(r) | Self::AlreadyRecorded(r) => r,
        }
    }

    pub fn into_record(self) -> T {
        match self {
            Self::Appended(r) | Self::AlreadyRecorded(r) => r,
        }
    }
}

trait JournalEntry: Entity {
    fn log_index(&self) -> u64;
}

impl JournalEntry for EscrowRecord {
    fn log_index(&self) -> u64 {
        self.log_index
    }
}

impl JournalEntry for TransferRecord {
    fn log_index(&self) -> u64 {
        self.log_index
    }
}

enum Slot<E> {
    Free(String),
    Taken(E),
}

fn find_slot<E: JournalEntry>(
    view: &StagedView<'_>,
    base: &JournalKey,
    log_index: u64,
) -> ProjectionResult<Slot<E>> {
    let plain = base.to_string();
    match view.load::<E>(&plain)? {
        None => Ok(Slot::Free(plain)),
        Some(existing) if existing.log_index() == log_index => Ok(Slot::Taken(existing)),
        Some(_) => {
            let discriminated = base.with_discriminator(log_index).to_string();
            match view.load::<E>(&discriminated)? {
                None => Ok(Slot::Free(discriminated)),
                Some(existing) => Ok(Slot::Taken(existing)),
            }
        }
    }
}

fn append<E: JournalEntry>(
    view: &mut StagedView<'_>,
    base: &JournalKey,
    log_index: u64,
    build: impl FnOnce(String) -> E,
) -> ProjectionResult<JournalWrite<E>> {
    match find_slot::<E>(view, base, log_index)? {
        Slot::Taken(existing) => Ok(JournalWrite::AlreadyRecorded(existing)),
        Slot::Free(key) => {
            let record = build(key);
            view.stage(&record)?;
            Ok(JournalWrite::Appended(record))
        }
    }
}

/// Whether a movement with this key and log index is already journaled.
pub fn escrow_recorded(
    view: &StagedView<'_>,
    base: &JournalKey,
    log_index: u64,
) -> ProjectionResult<bool> {
    Ok(matches!(
        find_slot::<EscrowRecord>(view, base, log_index)?,
        Slot::Taken(_)
    ))
}

pub fn transfer_recorded(
    view: &StagedView<'_>,
    base: &JournalKey,
    log_index: u64,
) -> ProjectionResult<bool> {
    Ok(matches!(
        find_slot::<TransferRecord>(view, base, log_index)?,
        Slot::Taken(_)
    ))
}

/// An escrow movement to append.
#[derive(Clone, Debug)]
pub struct EscrowEntry {
    pub instrument: String,
    pub transaction: String,
    pub emitter: Address,
    pub from: Address,
    pub amount: SignedAmount,
    pub instant: bool,
    pub timestamp: u64,
    pub log_index: u64,
}

pub fn append_escrow(
    view: &mut StagedView<'_>,
    base: &JournalKey,
    entry: EscrowEntry,
) -> ProjectionResult<JournalWrite<EscrowRecord>> {
    append(view, base, entry.log_index, |id| EscrowRecord {
        id,
        instrument: entry.instrument,
        transaction: entry.transaction,
        emitter: entry.emitter,
        from: entry.from,
        amount: entry.amount,
        instant: entry.instant,
        timestamp: entry.timestamp,
        log_index: entry.log_index,
    })
}

/// An ownership transfer to append.
#[derive(Clone, Debug)]
pub struct TransferEntry {
    pub instrument: String,
    pub transaction: String,
    pub emitter: Address,
    pub from: Address,
    pub to: Address,
    pub timestamp: u64,
    pub log_index: u64,
}

pub fn append_transfer(
    view: &mut StagedView<'_>,
    base: &JournalKey,
    entry: TransferEntry,
) -> ProjectionResult<JournalWrite<TransferRecord>> {
    append(view, base, entry.log_index, |id| TransferRecord {
        id,
        instrument: entry.instrument,
        transaction: entry.transaction,
        emitter: entry.emitter,
        from: entry.from,
        to: entry.to,
        timestamp: entry.timestamp,
        log_index: entry.log_index,
    })
}
