use std::fmt;

use cheq_events::{ChainEvent, EventKind};
use cheq_store::{EntityStore, StagedView, WriteBatch};
use cheq_types::{BlockInfo, InstrumentId, JournalKey, KeyFormat, TxHash};
use tracing::warn;

/// Data anomalies a handler tolerates but reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AnomalyKind {
    /// An event referenced an instrument before its creation event.
    PlaceholderCreated,
    /// A second creation event for an already created instrument.
    DuplicateCreation,
    /// A status change out of a terminal state was refused.
    RefusedTransition,
    /// A transfer named a `from` that does not hold the instrument.
    NotOwner,
    /// Cash-outs exceed funding seen so far.
    NegativeEscrow,
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PlaceholderCreated => "placeholder_created",
            Self::DuplicateCreation => "duplicate_creation",
            Self::RefusedTransition => "refused_transition",
            Self::NotOwner => "not_owner",
            Self::NegativeEscrow => "negative_escrow",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub instrument: String,
    pub detail: String,
}

/// Everything a handler needs to project one event.
///
/// Reads and writes go through `view`; the projector takes the staged batch
/// with [`EventContext::finish`] and commits it.
pub struct EventContext<'a> {
    pub view: StagedView<'a>,
    pub key_format: KeyFormat,
    pub kind: EventKind,
    pub block: BlockInfo,
    pub tx_hash: TxHash,
    pub log_index: u64,
    anomalies: Vec<Anomaly>,
}

impl<'a> EventContext<'a> {
    pub fn new(store: &'a dyn EntityStore, key_format: KeyFormat, event: &ChainEvent) -> Self {
        Self {
            view: StagedView::new(store),
            key_format,
            kind: event.kind(),
            block: event.block,
            tx_hash: event.tx_hash,
            log_index: event.log_index,
            anomalies: Vec::new(),
        }
    }

    pub fn instrument_key(&self, id: InstrumentId) -> String {
        id.to_key(self.key_format)
    }

    pub fn journal_key(&self, instrument: &str) -> JournalKey {
        JournalKey::new(self.tx_hash, instrument)
    }

    /// Record and log a data anomaly.
    pub fn anomaly(&mut self, kind: AnomalyKind, instrument: &str, detail: impl Into<String>) {
        let detail = detail.into();
        warn!(
            anomaly = %kind,
            instrument,
            event = %self.kind,
            tx = %self.tx_hash,
            log_index = self.log_index,
            "{detail}"
        );
        self.anomalies.push(Anomaly {
            kind,
            instrument: instrument.to_string(),
            detail,
        });
    }

    pub fn anomalies(&self) -> &[Anomaly] {
        &self.anomalies
    }

    pub fn finish(self) -> (WriteBatch, Vec<Anomaly>) {
        (self.view.into_batch(), self.anomalies)
    }
}
