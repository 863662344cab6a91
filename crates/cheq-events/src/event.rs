use std::fmt;

use serde::{Deserialize, Serialize};

use cheq_types::{Address, BlockInfo, EventPosition, InstrumentId, TxHash, U256};

/// Classification of chain events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// An instrument was written (minted with its terms).
    Written,
    /// Ownership of an instrument moved (mint when `from` is zero).
    Transfer,
    /// Escrow was added to an instrument.
    Funded,
    /// Escrow was paid out of an instrument.
    Cashed,
    /// An instrument was voided.
    Voided,
    /// A user stated their stance towards an auditor.
    ShakeAuditor,
    /// An auditor stated their stance towards a user.
    ShakeUser,
    /// The DirectPay module recorded the terms of a payment.
    PaymentCreated,
}

impl EventKind {
    /// Resolve an upstream event name, including legacy contract names.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Written" | "WriteCheque" | "Write" => Some(Self::Written),
            "Transfer" => Some(Self::Transfer),
            "Funded" | "Fund" => Some(Self::Funded),
            "Cashed" | "Cash" => Some(Self::Cashed),
            "Voided" | "Void" => Some(Self::Voided),
            "ShakeAuditor" => Some(Self::ShakeAuditor),
            "ShakeUser" => Some(Self::ShakeUser),
            "PaymentCreated" => Some(Self::PaymentCreated),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Written => "Written",
            Self::Transfer => "Transfer",
            Self::Funded => "Funded",
            Self::Cashed => "Cashed",
            Self::Voided => "Voided",
            Self::ShakeAuditor => "ShakeAuditor",
            Self::ShakeUser => "ShakeUser",
            Self::PaymentCreated => "PaymentCreated",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentWritten {
    pub id: InstrumentId,
    pub amount: U256,
    /// Escrow deposited in the same call; zero for plain writes.
    pub escrowed: U256,
    pub instant: bool,
    pub expiry: U256,
    pub currency: Address,
    pub drawer: Address,
    pub recipient: Address,
    pub auditor: Address,
    pub module: Option<Address>,
    /// Content handle returned by the metadata upload service.
    pub memo: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentTransferred {
    pub id: InstrumentId,
    pub from: Address,
    pub to: Address,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentFunded {
    pub id: InstrumentId,
    pub funder: Address,
    pub amount: U256,
    pub instant: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentCashed {
    pub id: InstrumentId,
    pub recipient: Address,
    pub amount: U256,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentVoided {
    pub id: InstrumentId,
    pub bearer: Address,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditorShaken {
    pub user: Address,
    pub auditor: Address,
    pub accepted: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserShaken {
    pub auditor: Address,
    pub user: Address,
    pub accepted: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectPaymentCreated {
    pub id: InstrumentId,
    pub creditor: Address,
    pub debtor: Address,
    pub amount: U256,
    pub due_date: U256,
    pub memo: Option<String>,
    /// Transaction sender; decides which side is the receiver.
    pub sender: Address,
}

/// Validated, kind-specific event data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventPayload {
    Written(InstrumentWritten),
    Transfer(InstrumentTransferred),
    Funded(InstrumentFunded),
    Cashed(InstrumentCashed),
    Voided(InstrumentVoided),
    ShakeAuditor(AuditorShaken),
    ShakeUser(UserShaken),
    PaymentCreated(DirectPaymentCreated),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Written(_) => EventKind::Written,
            Self::Transfer(_) => EventKind::Transfer,
            Self::Funded(_) => EventKind::Funded,
            Self::Cashed(_) => EventKind::Cashed,
            Self::Voided(_) => EventKind::Voided,
            Self::ShakeAuditor(_) => EventKind::ShakeAuditor,
            Self::ShakeUser(_) => EventKind::ShakeUser,
            Self::PaymentCreated(_) => EventKind::PaymentCreated,
        }
    }

    /// The instrument this event touches, if any.
    pub fn instrument(&self) -> Option<InstrumentId> {
        match self {
            Self::Written(e) => Some(e.id),
            Self::Transfer(e) => Some(e.id),
            Self::Funded(e) => Some(e.id),
            Self::Cashed(e) => Some(e.id),
            Self::Voided(e) => Some(e.id),
            Self::PaymentCreated(e) => Some(e.id),
            Self::ShakeAuditor(_) | Self::ShakeUser(_) => None,
        }
    }
}

/// A single decoded event with its delivery metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEvent {
    pub block: BlockInfo,
    pub tx_hash: TxHash,
    /// Index of the transaction within its block; zero when the upstream
    /// does not report it.
    #[serde(default)]
    pub tx_index: u64,
    /// Emission index; breaks ties inside a transaction.
    pub log_index: u64,
    pub payload: EventPayload,
}

impl ChainEvent {
    pub fn new(block: BlockInfo, tx_hash: TxHash, log_index: u64, payload: EventPayload) -> Self {
        Self {
            block,
            tx_hash,
            tx_index: 0,
            log_index,
            payload,
        }
    }

    pub fn with_tx_index(mut self, tx_index: u64) -> Self {
        self.tx_index = tx_index;
        self
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn position(&self) -> EventPosition {
        EventPosition::new(self.block.number, self.tx_index, self.log_index)
    }
}
