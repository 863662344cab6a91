//! Entity records projected from the event stream.
//!
//! Every record lives in one [`EntityKind`] table under a key derived from
//! event fields. Cross-record references are keys, never embedded records.

use std::cmp::Ordering;
use std::fmt;

use cheq_events::ChainEvent;
use cheq_store::{Entity, EntityKind};
use cheq_types::{Address, EventPosition, InstrumentId, KeyFormat, SignedAmount, TxHash, U256};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// The role an account plays for an instrument.
///
/// Each category is backed by a key list on [`Account`]; its counter is the
/// list length, so tracking the same instrument twice is a no-op.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentCategory {
    Owned,
    Sent,
    Received,
    Auditing,
    Cashed,
    Voided,
    AuditorVoided,
}

impl InstrumentCategory {
    pub const ALL: [InstrumentCategory; 7] = [
        Self::Owned,
        Self::Sent,
        Self::Received,
        Self::Auditing,
        Self::Cashed,
        Self::Voided,
        Self::AuditorVoided,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owned => "owned",
            Self::Sent => "sent",
            Self::Received => "received",
            Self::Auditing => "auditing",
            Self::Cashed => "cashed",
            Self::Voided => "voided",
            Self::AuditorVoided => "auditor_voided",
        }
    }
}

impl fmt::Display for InstrumentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InstrumentCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s.to_ascii_lowercase())
            .ok_or_else(|| format!("unknown instrument category: {s}"))
    }
}

/// A participant address with per-role counters and instrument key lists.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: Address,
    pub owned: u64,
    pub sent: u64,
    pub received: u64,
    pub auditing: u64,
    pub cashed: u64,
    pub voided: u64,
    pub voided_as_auditor: u64,
    pub auditors_requested: u64,
    pub users_requested: u64,
    pub owned_instruments: Vec<String>,
    pub sent_instruments: Vec<String>,
    pub received_instruments: Vec<String>,
    pub auditing_instruments: Vec<String>,
    pub cashed_instruments: Vec<String>,
    pub voided_instruments: Vec<String>,
    pub auditor_voided_instruments: Vec<String>,
}

impl Account {
    pub fn new(id: Address) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    fn slot(&mut self, category: InstrumentCategory) -> (&mut u64, &mut Vec<String>) {
        match category {
            InstrumentCategory::Owned => (&mut self.owned, &mut self.owned_instruments),
            InstrumentCategory::Sent => (&mut self.sent, &mut self.sent_instruments),
            InstrumentCategory::Received => (&mut self.received, &mut self.received_instruments),
            InstrumentCategory::Auditing => (&mut self.auditing, &mut self.auditing_instruments),
            InstrumentCategory::Cashed => (&mut self.cashed, &mut self.cashed_instruments),
            InstrumentCategory::Voided => (&mut self.voided, &mut self.voided_instruments),
            InstrumentCategory::AuditorVoided => (
                &mut self.voided_as_auditor,
                &mut self.auditor_voided_instruments,
            ),
        }
    }

    /// Add an instrument to a category. Returns `false` if it was already there.
    pub fn track(&mut self, category: InstrumentCategory, instrument: &str) -> bool {
        let (counter, list) = self.slot(category);
        if list.iter().any(|k| k == instrument) {
            return false;
        }
        list.push(instrument.to_string());
        *counter = list.len() as u64;
        true
    }

    /// Remove an instrument from a category. Returns `false` if it was absent.
    ///
    /// Only `Owned` shrinks in normal operation; every other category is
    /// append-only.
    pub fn release(&mut self, category: InstrumentCategory, instrument: &str) -> bool {
        let (counter, list) = self.slot(category);
        let Some(pos) = list.iter().position(|k| k == instrument) else {
            return false;
        };
        list.remove(pos);
        *counter = list.len() as u64;
        true
    }

    pub fn count(&self, category: InstrumentCategory) -> u64 {
        match category {
            InstrumentCategory::Owned => self.owned,
            InstrumentCategory::Sent => self.sent,
            InstrumentCategory::Received => self.received,
            InstrumentCategory::Auditing => self.auditing,
            InstrumentCategory::Cashed => self.cashed,
            InstrumentCategory::Voided => self.voided,
            InstrumentCategory::AuditorVoided => self.voided_as_auditor,
        }
    }

    pub fn instruments(&self, category: InstrumentCategory) -> &[String] {
        match category {
            InstrumentCategory::Owned => &self.owned_instruments,
            InstrumentCategory::Sent => &self.sent_instruments,
            InstrumentCategory::Received => &self.received_instruments,
            InstrumentCategory::Auditing => &self.auditing_instruments,
            InstrumentCategory::Cashed => &self.cashed_instruments,
            InstrumentCategory::Voided => &self.voided_instruments,
            InstrumentCategory::AuditorVoided => &self.auditor_voided_instruments,
        }
    }

    pub fn holds(&self, category: InstrumentCategory, instrument: &str) -> bool {
        self.instruments(category).iter().any(|k| k == instrument)
    }
}

impl Entity for Account {
    const KIND: EntityKind = EntityKind::Account;

    fn key(&self) -> String {
        self.id.to_key()
    }
}

// ---------------------------------------------------------------------------
// Erc20
// ---------------------------------------------------------------------------

/// A currency contract. Metadata is filled in by an enrichment job, if ever.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Erc20 {
    pub id: Address,
    pub symbol: Option<String>,
    pub decimals: Option<u8>,
}

impl Erc20 {
    pub fn new(id: Address) -> Self {
        Self {
            id,
            symbol: None,
            decimals: None,
        }
    }
}

impl Entity for Erc20 {
    const KIND: EntityKind = EntityKind::Erc20;

    fn key(&self) -> String {
        self.id.to_key()
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// One chain transaction as it touched one instrument.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub hash: TxHash,
    pub instrument: String,
    pub timestamp: u64,
    pub block_number: u64,
}

impl Entity for Transaction {
    const KIND: EntityKind = EntityKind::Transaction;

    fn key(&self) -> String {
        self.id.clone()
    }
}

// ---------------------------------------------------------------------------
// Instrument
// ---------------------------------------------------------------------------

/// Lifecycle state of an instrument.
///
/// `Pending` is the only non-terminal state. The numeric codes match the
/// on-chain enum.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstrumentStatus {
    #[default]
    Pending,
    Cashed,
    Voided,
    Matured,
}

impl InstrumentStatus {
    pub fn code(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Cashed => 1,
            Self::Voided => 2,
            Self::Matured => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: InstrumentStatus) -> bool {
        matches!(self, Self::Pending) && next.is_terminal()
    }
}

impl fmt::Display for InstrumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Cashed => "cashed",
            Self::Voided => "voided",
            Self::Matured => "matured",
        };
        f.write_str(s)
    }
}

/// A payment instrument (cheq).
///
/// A record created because an event referenced an instrument before its
/// creation event carries `placeholder = true` and default terms until the
/// authoritative creation arrives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub id: String,
    pub token_id: InstrumentId,
    pub status: InstrumentStatus,
    pub amount: U256,
    /// Running sum of the escrow journal.
    pub escrowed: SignedAmount,
    pub instant: bool,
    pub expiry: U256,
    pub currency: Option<Address>,
    pub drawer: Option<Address>,
    pub recipient: Option<Address>,
    pub owner: Option<Address>,
    pub auditor: Option<Address>,
    pub module: Option<Address>,
    /// Key of the module's data record, e.g. a [`DirectPayData`].
    pub module_data: Option<String>,
    pub memo: Option<String>,
    pub created_at: Option<u64>,
    pub creation_tx: Option<TxHash>,
    pub placeholder: bool,
    pub escrows: Vec<String>,
    pub transfers: Vec<String>,
}

impl Instrument {
    pub fn placeholder(id: impl Into<String>, token_id: InstrumentId) -> Self {
        Self {
            id: id.into(),
            token_id,
            status: InstrumentStatus::Pending,
            amount: U256::zero(),
            escrowed: SignedAmount::zero(),
            instant: false,
            expiry: U256::zero(),
            currency: None,
            drawer: None,
            recipient: None,
            owner: None,
            auditor: None,
            module: None,
            module_data: None,
            memo: None,
            created_at: None,
            creation_tx: None,
            placeholder: true,
            escrows: Vec::new(),
            transfers: Vec::new(),
        }
    }

    /// Pending past its expiry. Maturity is never stored.
    pub fn is_matured(&self, now: u64) -> bool {
        self.status == InstrumentStatus::Pending
            && !self.placeholder
            && !self.expiry.is_zero()
            && U256::from(now) >= self.expiry
    }

    /// Status as seen at `now`, with maturity derived.
    pub fn effective_status(&self, now: u64) -> InstrumentStatus {
        if self.is_matured(now) {
            InstrumentStatus::Matured
        } else {
            self.status
        }
    }
}

impl Entity for Instrument {
    const KIND: EntityKind = EntityKind::Instrument;

    fn key(&self) -> String {
        self.id.clone()
    }
}

// ---------------------------------------------------------------------------
// Journal
// ---------------------------------------------------------------------------

/// A signed escrow movement: funding is positive, cash-out negative.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowRecord {
    pub id: String,
    pub instrument: String,
    pub transaction: String,
    pub emitter: Address,
    pub from: Address,
    pub amount: SignedAmount,
    pub instant: bool,
    pub timestamp: u64,
    pub log_index: u64,
}

impl Entity for EscrowRecord {
    const KIND: EntityKind = EntityKind::Escrow;

    fn key(&self) -> String {
        self.id.clone()
    }
}

/// An ownership transfer. A zero `from` is a mint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: String,
    pub instrument: String,
    pub transaction: String,
    pub emitter: Address,
    pub from: Address,
    pub to: Address,
    pub timestamp: u64,
    pub log_index: u64,
}

impl TransferRecord {
    pub fn is_mint(&self) -> bool {
        self.from.is_zero()
    }
}

impl Entity for TransferRecord {
    const KIND: EntityKind = EntityKind::Transfer;

    fn key(&self) -> String {
        self.id.clone()
    }
}

// ---------------------------------------------------------------------------
// Handshakes
// ---------------------------------------------------------------------------

/// A user's latest intent towards an auditor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestAuditor {
    pub id: String,
    pub user: Address,
    pub auditor: Address,
    pub is_waiting: bool,
    pub created_at: u64,
}

impl Entity for RequestAuditor {
    const KIND: EntityKind = EntityKind::RequestAuditor;

    fn key(&self) -> String {
        self.id.clone()
    }
}

/// An auditor's latest intent towards a user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestUser {
    pub id: String,
    pub auditor: Address,
    pub user: Address,
    pub is_waiting: bool,
    pub created_at: u64,
}

impl Entity for RequestUser {
    const KIND: EntityKind = EntityKind::RequestUser;

    fn key(&self) -> String {
        self.id.clone()
    }
}

/// Both halves of a user/auditor agreement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    pub id: String,
    pub auditor: Address,
    pub user: Address,
    /// Key of the [`RequestAuditor`] half.
    pub auditor_shake: String,
    /// Key of the [`RequestUser`] half.
    pub user_shake: String,
    pub completed: bool,
    pub completed_at: u64,
}

impl Entity for Handshake {
    const KIND: EntityKind = EntityKind::Handshake;

    fn key(&self) -> String {
        self.id.clone()
    }
}

// ---------------------------------------------------------------------------
// Module data
// ---------------------------------------------------------------------------

/// Terms attached to an instrument by the DirectPay module.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectPayData {
    pub id: String,
    pub instrument: String,
    pub creditor: Address,
    pub debtor: Address,
    pub amount: U256,
    pub due_date: U256,
    pub sender: Address,
    /// The party that is not the sender.
    pub receiver: Address,
}

impl DirectPayData {
    pub fn key_for(instrument: &str) -> String {
        format!("{instrument}/direct")
    }
}

impl Entity for DirectPayData {
    const KIND: EntityKind = EntityKind::DirectPayData;

    fn key(&self) -> String {
        self.id.clone()
    }
}

// ---------------------------------------------------------------------------
// Meta
// ---------------------------------------------------------------------------

/// Identity of a committed event within its block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedEvent {
    pub tx_hash: TxHash,
    pub log_index: u64,
}

/// Resume point of the projector.
///
/// Besides the position of the last committed event, the cursor remembers
/// every event already committed in that block, since two transactions in
/// one block may both emit at log index 0. It also pins the instrument key
/// format the store was built with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub position: EventPosition,
    pub events_applied: u64,
    pub key_format: KeyFormat,
    pub block_events: Vec<AppliedEvent>,
}

impl Cursor {
    pub const KEY: &'static str = "cursor";

    /// Whether `event` was committed by an earlier run.
    pub fn covers(&self, event: &ChainEvent) -> bool {
        match event.block.number.cmp(&self.position.block_number) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => self
                .block_events
                .iter()
                .any(|e| e.tx_hash == event.tx_hash && e.log_index == event.log_index),
        }
    }

    /// The cursor after committing `event` on top of `previous`.
    pub fn advance(
        previous: Option<&Cursor>,
        event: &ChainEvent,
        key_format: KeyFormat,
    ) -> Self {
        let mut block_events = match previous {
            Some(c) if c.position.block_number == event.block.number => c.block_events.clone(),
            _ => Vec::new(),
        };
        block_events.push(AppliedEvent {
            tx_hash: event.tx_hash,
            log_index: event.log_index,
        });
        Self {
            position: event.position(),
            events_applied: previous.map_or(0, |c| c.events_applied) + 1,
            key_format,
            block_events,
        }
    }
}

impl Entity for Cursor {
    const KIND: EntityKind = EntityKind::Meta;

    fn key(&self) -> String {
        Self::KEY.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::from_bytes([byte; 20])
    }

    #[test]
    fn tracking_is_deduplicated() {
        let mut account = Account::new(addr(1));
        assert!(account.track(InstrumentCategory::Sent, "0x7"));
        assert!(!account.track(InstrumentCategory::Sent, "0x7"));
        assert!(account.track(InstrumentCategory::Sent, "0x8"));
        assert_eq!(account.sent, 2);
        assert_eq!(account.instruments(InstrumentCategory::Sent), ["0x7", "0x8"]);
    }

    #[test]
    fn release_shrinks_owned() {
        let mut account = Account::new(addr(1));
        account.track(InstrumentCategory::Owned, "0x7");
        assert!(account.release(InstrumentCategory::Owned, "0x7"));
        assert!(!account.release(InstrumentCategory::Owned, "0x7"));
        assert_eq!(account.owned, 0);
        assert!(!account.holds(InstrumentCategory::Owned, "0x7"));
    }

    #[test]
    fn auditor_voids_have_their_own_counter() {
        let mut account = Account::new(addr(1));
        account.track(InstrumentCategory::Voided, "0x7");
        account.track(InstrumentCategory::AuditorVoided, "0x9");
        assert_eq!(account.voided, 1);
        assert_eq!(account.voided_as_auditor, 1);
        assert_eq!(account.count(InstrumentCategory::AuditorVoided), 1);
    }

    #[test]
    fn category_parses_from_name() {
        assert_eq!(
            "auditor_voided".parse::<InstrumentCategory>().unwrap(),
            InstrumentCategory::AuditorVoided
        );
        assert!("lost".parse::<InstrumentCategory>().is_err());
    }

    #[test]
    fn status_transitions_are_forward_only() {
        use InstrumentStatus::*;
        assert!(Pending.can_transition_to(Cashed));
        assert!(Pending.can_transition_to(Voided));
        assert!(Pending.can_transition_to(Matured));
        assert!(!Pending.can_transition_to(Pending));
        for terminal in [Cashed, Voided, Matured] {
            for next in [Pending, Cashed, Voided, Matured] {
                assert!(!terminal.can_transition_to(next));
            }
        }
        assert_eq!(Voided.code(), 2);
    }

    #[test]
    fn maturity_is_derived_from_expiry() {
        let mut instrument = Instrument::placeholder("0x7", InstrumentId::from(7));
        instrument.placeholder = false;
        instrument.expiry = U256::from(1_000u64);

        assert!(!instrument.is_matured(999));
        assert!(instrument.is_matured(1_000));
        assert_eq!(instrument.effective_status(2_000), InstrumentStatus::Matured);

        instrument.status = InstrumentStatus::Cashed;
        assert!(!instrument.is_matured(2_000));
    }

    #[test]
    fn records_roundtrip_through_json() {
        let mut instrument = Instrument::placeholder("0x7", InstrumentId::from(7));
        instrument.escrowed = SignedAmount::debit(U256::from(5u64));
        instrument.owner = Some(addr(2));
        let bytes = cheq_store::encode(&instrument).unwrap();
        let back: Instrument = cheq_store::decode("0x7", &bytes).unwrap();
        assert_eq!(back, instrument);
    }

    fn void_at(block: u64, hash: u8, log_index: u64) -> ChainEvent {
        ChainEvent::new(
            cheq_types::BlockInfo::new(1_700_000_000, block),
            TxHash::from_bytes([hash; 32]),
            log_index,
            cheq_events::EventPayload::Voided(cheq_events::InstrumentVoided {
                id: InstrumentId::from(1u64),
                bearer: addr(1),
            }),
        )
    }

    #[test]
    fn cursor_tells_replays_from_new_events_in_the_same_block() {
        let first = void_at(5, 1, 0);
        let cursor = Cursor::advance(None, &first, KeyFormat::Hex);
        assert_eq!(cursor.events_applied, 1);

        assert!(cursor.covers(&first));
        assert!(cursor.covers(&void_at(4, 9, 7)));
        assert!(!cursor.covers(&void_at(5, 2, 0)));
        assert!(!cursor.covers(&void_at(6, 1, 0)));

        let second = Cursor::advance(Some(&cursor), &void_at(5, 2, 0), KeyFormat::Hex);
        assert_eq!(second.block_events.len(), 2);
        assert!(second.covers(&first));

        let next_block = Cursor::advance(Some(&second), &void_at(6, 3, 0), KeyFormat::Hex);
        assert_eq!(next_block.block_events.len(), 1);
        assert_eq!(next_block.events_applied, 3);
        assert!(next_block.covers(&void_at(5, 2, 0)));
    }
}
