//! Transaction ledger: one record per (transaction hash, instrument).

use cheq_store::StagedView;
use cheq_types::{TransactionKey, TxHash};

use crate::error::ProjectionResult;
use crate::records::Transaction;

/// Record that transaction `hash` touched `instrument`.
///
/// An existing record is returned unchanged.
pub fn record_transaction(
    view: &mut StagedView<'_>,
    hash: TxHash,
    instrument: &str,
    timestamp: u64,
    block_number: u64,
) -> ProjectionResult<Transaction> {
    let key = TransactionKey::new(hash, instrument).to_string();
    if let Some(existing) = view.load::<Transaction>(&key)? {
        return Ok(existing);
    }
    let transaction = Transaction {
        id: key,
        hash,
        instrument: instrument.to_string(),
        timestamp,
        block_number,
    };
    view.stage(&transaction)?;
    Ok(transaction)
}
