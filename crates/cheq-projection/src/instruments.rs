//! Instrument store: the cheq lifecycle state machine.
//!
//! Every handler here tolerates an instrument that has not been created yet
//! by starting from a placeholder, and every handler is idempotent under
//! replay of the same event.

use cheq_events::{
    DirectPaymentCreated, InstrumentCashed, InstrumentFunded, InstrumentTransferred,
    InstrumentVoided, InstrumentWritten,
};
use cheq_types::{InstrumentId, SignedAmount};
use tracing::{debug, info};

use crate::accounts::{load_account, update_account};
use crate::context::{AnomalyKind, EventContext};
use crate::currency::resolve_currency;
use crate::error::ProjectionResult;
use crate::journal::{self, EscrowEntry, JournalWrite, TransferEntry};
use crate::records::{DirectPayData, Instrument, InstrumentCategory, InstrumentStatus};
use crate::transactions::record_transaction;

fn load_or_placeholder(
    ctx: &mut EventContext<'_>,
    id: InstrumentId,
) -> ProjectionResult<Instrument> {
    let key = ctx.instrument_key(id);
    if let Some(instrument) = ctx.view.load::<Instrument>(&key)? {
        return Ok(instrument);
    }
    let detail = format!("{} references an instrument with no creation event yet", ctx.kind);
    ctx.anomaly(AnomalyKind::PlaceholderCreated, &key, detail);
    Ok(Instrument::placeholder(key, id))
}

fn record_tx(ctx: &mut EventContext<'_>, instrument: &str) -> ProjectionResult<String> {
    let tx = record_transaction(
        &mut ctx.view,
        ctx.tx_hash,
        instrument,
        ctx.block.timestamp,
        ctx.block.number,
    )?;
    Ok(tx.id)
}

/// Add a signed movement to the instrument's running escrow balance.
fn post_escrow(
    ctx: &mut EventContext<'_>,
    instrument: &mut Instrument,
    record_key: String,
    amount: SignedAmount,
) {
    instrument.escrowed = instrument.escrowed + amount;
    instrument.escrows.push(record_key);
    if instrument.escrowed.is_negative() {
        let detail = format!("escrow balance went negative ({})", instrument.escrowed);
        ctx.anomaly(AnomalyKind::NegativeEscrow, &instrument.id, detail);
    }
}

/// Project a `Written` event.
pub fn create_instrument(
    ctx: &mut EventContext<'_>,
    event: &InstrumentWritten,
) -> ProjectionResult<()> {
    let key = ctx.instrument_key(event.id);
    let existing = ctx.view.load::<Instrument>(&key)?;
    if let Some(instrument) = &existing {
        if !instrument.placeholder {
            let detail = format!(
                "instrument already created in {}",
                instrument
                    .creation_tx
                    .map(|h| h.to_string())
                    .unwrap_or_else(|| "an unknown transaction".into())
            );
            ctx.anomaly(AnomalyKind::DuplicateCreation, &key, detail);
            return Ok(());
        }
    }
    let merged = existing.is_some();
    let mut instrument =
        existing.unwrap_or_else(|| Instrument::placeholder(key.clone(), event.id));

    resolve_currency(&mut ctx.view, event.currency)?;
    let transaction = record_tx(ctx, &key)?;

    instrument.amount = event.amount;
    instrument.instant = event.instant;
    instrument.expiry = event.expiry;
    instrument.currency = Some(event.currency);
    instrument.drawer = Some(event.drawer);
    instrument.recipient = Some(event.recipient);
    instrument.auditor = Some(event.auditor);
    instrument.module = event.module;
    if event.memo.is_some() {
        instrument.memo = event.memo.clone();
    }
    instrument.created_at = Some(ctx.block.timestamp);
    instrument.creation_tx = Some(ctx.tx_hash);
    instrument.placeholder = false;

    // A transfer seen before creation already decided the owner.
    let assign_owner = instrument.owner.is_none();
    if assign_owner {
        instrument.owner = Some(event.recipient);
    }

    update_account(&mut ctx.view, event.drawer, |a| {
        a.track(InstrumentCategory::Sent, &key)
    })?;
    update_account(&mut ctx.view, event.recipient, |a| {
        a.track(InstrumentCategory::Received, &key);
        if assign_owner {
            a.track(InstrumentCategory::Owned, &key);
        }
    })?;
    update_account(&mut ctx.view, event.auditor, |a| {
        a.track(InstrumentCategory::Auditing, &key);
        // A void seen before creation could not credit the auditor then.
        if instrument.status == InstrumentStatus::Voided {
            a.track(InstrumentCategory::AuditorVoided, &key);
        }
    })?;

    if !event.escrowed.is_zero() {
        let base = ctx.journal_key(&key);
        let entry = EscrowEntry {
            instrument: key.clone(),
            transaction,
            emitter: event.drawer,
            from: event.drawer,
            amount: SignedAmount::credit(event.escrowed),
            instant: event.instant,
            timestamp: ctx.block.timestamp,
            log_index: ctx.log_index,
        };
        let write = journal::append_escrow(&mut ctx.view, &base, entry)?;
        if let JournalWrite::Appended(record) = write {
            post_escrow(ctx, &mut instrument, record.id, record.amount);
        }
    }

    ctx.view.stage(&instrument)?;
    info!(
        instrument = %key,
        amount = %event.amount,
        drawer = %event.drawer,
        recipient = %event.recipient,
        merged_placeholder = merged,
        "instrument created"
    );
    Ok(())
}

/// Project a `Transfer` event. A zero `from` is a mint.
pub fn record_transfer(
    ctx: &mut EventContext<'_>,
    event: &InstrumentTransferred,
) -> ProjectionResult<()> {
    let key = ctx.instrument_key(event.id);
    let base = ctx.journal_key(&key);
    if journal::transfer_recorded(&ctx.view, &base, ctx.log_index)? {
        debug!(instrument = %key, tx = %ctx.tx_hash, "transfer already recorded");
        return Ok(());
    }

    let mut instrument = load_or_placeholder(ctx, event.id)?;
    let transaction = record_tx(ctx, &key)?;

    if !event.from.is_zero() {
        let released = update_account(&mut ctx.view, event.from, |a| {
            a.release(InstrumentCategory::Owned, &key)
        })?;
        if !released {
            let detail = format!("transfer from {} which does not hold the instrument", event.from);
            ctx.anomaly(AnomalyKind::NotOwner, &key, detail);
        }
    } else {
        update_account(&mut ctx.view, event.from, |_| ())?;
    }
    if let Some(previous) = instrument
        .owner
        .filter(|p| *p != event.from && *p != event.to)
    {
        update_account(&mut ctx.view, previous, |a| {
            a.release(InstrumentCategory::Owned, &key)
        })?;
    }
    update_account(&mut ctx.view, event.to, |a| {
        a.track(InstrumentCategory::Owned, &key)
    })?;
    instrument.owner = Some(event.to);

    let entry = TransferEntry {
        instrument: key.clone(),
        transaction,
        emitter: event.from,
        from: event.from,
        to: event.to,
        timestamp: ctx.block.timestamp,
        log_index: ctx.log_index,
    };
    let record = journal::append_transfer(&mut ctx.view, &base, entry)?.into_record();
    instrument.transfers.push(record.id);

    ctx.view.stage(&instrument)?;
    debug!(instrument = %key, from = %event.from, to = %event.to, "instrument transferred");
    Ok(())
}

/// Project a `Funded` event.
pub fn record_funding(
    ctx: &mut EventContext<'_>,
    event: &InstrumentFunded,
) -> ProjectionResult<()> {
    let key = ctx.instrument_key(event.id);
    let base = ctx.journal_key(&key);
    if journal::escrow_recorded(&ctx.view, &base, ctx.log_index)? {
        debug!(instrument = %key, tx = %ctx.tx_hash, "funding already recorded");
        return Ok(());
    }

    let mut instrument = load_or_placeholder(ctx, event.id)?;
    update_account(&mut ctx.view, event.funder, |_| ())?;
    let transaction = record_tx(ctx, &key)?;

    let entry = EscrowEntry {
        instrument: key.clone(),
        transaction,
        emitter: event.funder,
        from: event.funder,
        amount: SignedAmount::credit(event.amount),
        instant: event.instant,
        timestamp: ctx.block.timestamp,
        log_index: ctx.log_index,
    };
    let record = journal::append_escrow(&mut ctx.view, &base, entry)?.into_record();
    post_escrow(ctx, &mut instrument, record.id, record.amount);

    ctx.view.stage(&instrument)?;
    debug!(instrument = %key, funder = %event.funder, amount = %event.amount, "instrument funded");
    Ok(())
}

/// Project a `Cashed` event.
pub fn record_cash_out(
    ctx: &mut EventContext<'_>,
    event: &InstrumentCashed,
) -> ProjectionResult<()> {
    let key = ctx.instrument_key(event.id);
    let base = ctx.journal_key(&key);
    if journal::escrow_recorded(&ctx.view, &base, ctx.log_index)? {
        debug!(instrument = %key, tx = %ctx.tx_hash, "cash-out already recorded");
        return Ok(());
    }

    let mut instrument = load_or_placeholder(ctx, event.id)?;
    let transaction = record_tx(ctx, &key)?;

    let entry = EscrowEntry {
        instrument: key.clone(),
        transaction,
        emitter: event.recipient,
        from: event.recipient,
        amount: SignedAmount::debit(event.amount),
        instant: false,
        timestamp: ctx.block.timestamp,
        log_index: ctx.log_index,
    };
    let record = journal::append_escrow(&mut ctx.view, &base, entry)?.into_record();
    post_escrow(ctx, &mut instrument, record.id, record.amount);

    update_account(&mut ctx.view, event.recipient, |a| {
        a.track(InstrumentCategory::Cashed, &key)
    })?;

    if instrument.status.can_transition_to(InstrumentStatus::Cashed) {
        instrument.status = InstrumentStatus::Cashed;
    } else if instrument.status != InstrumentStatus::Cashed {
        let detail = format!("cash-out on a {} instrument; status kept", instrument.status);
        ctx.anomaly(AnomalyKind::RefusedTransition, &key, detail);
    }

    ctx.view.stage(&instrument)?;
    info!(instrument = %key, recipient = %event.recipient, amount = %event.amount, "instrument cashed");
    Ok(())
}

/// Project a `Voided` event.
pub fn record_void(ctx: &mut EventContext<'_>, event: &InstrumentVoided) -> ProjectionResult<()> {
    let key = ctx.instrument_key(event.id);
    let mut instrument = load_or_placeholder(ctx, event.id)?;
    record_tx(ctx, &key)?;

    if instrument.status.can_transition_to(InstrumentStatus::Voided) {
        instrument.status = InstrumentStatus::Voided;
    } else if instrument.status != InstrumentStatus::Voided {
        let detail = format!("void on a {} instrument; status kept", instrument.status);
        ctx.anomaly(AnomalyKind::RefusedTransition, &key, detail);
        ctx.view.stage(&instrument)?;
        return Ok(());
    }

    update_account(&mut ctx.view, event.bearer, |a| {
        a.track(InstrumentCategory::Voided, &key)
    })?;
    if let Some(auditor) = instrument.auditor {
        if let Some(mut account) = load_account(&ctx.view, auditor)? {
            if account.track(InstrumentCategory::AuditorVoided, &key) {
                ctx.view.stage(&account)?;
            }
        }
    }

    ctx.view.stage(&instrument)?;
    info!(instrument = %key, bearer = %event.bearer, "instrument voided");
    Ok(())
}

/// Project a DirectPay `PaymentCreated` event.
pub fn attach_direct_pay(
    ctx: &mut EventContext<'_>,
    event: &DirectPaymentCreated,
) -> ProjectionResult<()> {
    let key = ctx.instrument_key(event.id);
    let mut instrument = load_or_placeholder(ctx, event.id)?;
    update_account(&mut ctx.view, event.creditor, |_| ())?;
    update_account(&mut ctx.view, event.debtor, |_| ())?;
    record_tx(ctx, &key)?;

    let receiver = if event.sender == event.creditor {
        event.debtor
    } else {
        event.creditor
    };
    let data = DirectPayData {
        id: DirectPayData::key_for(&key),
        instrument: key.clone(),
        creditor: event.creditor,
        debtor: event.debtor,
        amount: event.amount,
        due_date: event.due_date,
        sender: event.sender,
        receiver,
    };
    ctx.view.stage(&data)?;

    instrument.module_data = Some(data.id);
    if event.memo.is_some() {
        instrument.memo = event.memo.clone();
    }
    ctx.view.stage(&instrument)?;
    debug!(instrument = %key, creditor = %event.creditor, debtor = %event.debtor, "direct payment attached");
    Ok(())
}
