//! Read-side lookups over a projected store.

use cheq_store::{EntityStore, EntityStoreExt};
use cheq_types::{Address, SignedAmount};
use serde::Serialize;
use tracing::warn;

use crate::error::ProjectionResult;
use crate::records::{Account, EscrowRecord, Instrument, InstrumentCategory, TransferRecord};

/// Net escrow of an instrument: the sum of its signed escrow journal.
///
/// An unknown instrument has a net escrow of zero.
pub fn net_escrowed<S: EntityStore + ?Sized>(
    store: &S,
    instrument: &str,
) -> ProjectionResult<SignedAmount> {
    let Some(journal) = instrument_journal(store, instrument)? else {
        return Ok(SignedAmount::zero());
    };
    Ok(journal.escrows.iter().map(|r| r.amount).sum())
}

/// Every journal record of one instrument, in append order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct InstrumentJournal {
    pub escrows: Vec<EscrowRecord>,
    pub transfers: Vec<TransferRecord>,
}

pub fn instrument_journal<S: EntityStore + ?Sized>(
    store: &S,
    instrument: &str,
) -> ProjectionResult<Option<InstrumentJournal>> {
    let Some(record) = store.load::<Instrument>(instrument)? else {
        return Ok(None);
    };
    let mut journal = InstrumentJournal::default();
    for key in &record.escrows {
        match store.load::<EscrowRecord>(key)? {
            Some(entry) => journal.escrows.push(entry),
            None => warn!(instrument, escrow = %key, "dangling escrow reference"),
        }
    }
    for key in &record.transfers {
        match store.load::<TransferRecord>(key)? {
            Some(entry) => journal.transfers.push(entry),
            None => warn!(instrument, transfer = %key, "dangling transfer reference"),
        }
    }
    Ok(Some(journal))
}

/// The instruments an account holds in one role.
pub fn account_instruments<S: EntityStore + ?Sized>(
    store: &S,
    address: Address,
    category: InstrumentCategory,
) -> ProjectionResult<Vec<Instrument>> {
    let Some(account) = store.load::<Account>(&address.to_key())? else {
        return Ok(Vec::new());
    };
    let mut out = Vec::with_capacity(account.instruments(category).len());
    for key in account.instruments(category) {
        if let Some(instrument) = store.load::<Instrument>(key)? {
            out.push(instrument);
        }
    }
    Ok(out)
}
