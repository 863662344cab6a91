//! Offline consistency audit of a projected store.
//!
//! Event handlers never scan tables; this checker does, and is meant for
//! tooling (`cheq-indexer check`) and tests.

use std::collections::HashMap;
use std::fmt;

use cheq_store::{EntityStore, EntityStoreExt};
use cheq_types::{Address, SignedAmount};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::ProjectionResult;
use crate::records::{
    Account, EscrowRecord, Handshake, Instrument, InstrumentCategory, RequestAuditor, RequestUser,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// A list-backed counter differs from its list length, or the list has
    /// a duplicate.
    CounterMismatch,
    /// `owned` differs from the number of instruments the account owns.
    OwnershipMismatch,
    /// An instrument's escrow balance differs from its journal sum.
    EscrowMismatch,
    /// A handshake's `completed` is not the AND of its two requests.
    HandshakeMismatch,
    /// A key reference points at a missing record.
    DanglingReference,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::CounterMismatch => "counter mismatch",
            Self::OwnershipMismatch => "ownership mismatch",
            Self::EscrowMismatch => "escrow mismatch",
            Self::HandshakeMismatch => "handshake mismatch",
            Self::DanglingReference => "dangling reference",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub key: String,
    pub detail: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}: {}", self.kind, self.key, self.detail)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    pub accounts_checked: usize,
    pub instruments_checked: usize,
    pub handshakes_checked: usize,
    /// Instruments still waiting for their creation event.
    pub placeholders: Vec<String>,
    pub violations: Vec<Violation>,
}

impl ConsistencyReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    fn push(&mut self, kind: ViolationKind, key: &str, detail: String) {
        warn!(%kind, key, "{detail}");
        self.violations.push(Violation {
            kind,
            key: key.to_string(),
            detail,
        });
    }
}

pub struct ConsistencyChecker<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S: EntityStore + ?Sized> ConsistencyChecker<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub fn check(&self) -> ProjectionResult<ConsistencyReport> {
        let mut report = ConsistencyReport::default();
        let instruments: Vec<Instrument> = self.store.load_all()?;
        let accounts: Vec<Account> = self.store.load_all()?;

        self.check_instruments(&instruments, &mut report)?;
        self.check_accounts(&accounts, &instruments, &mut report);
        self.check_handshakes(&mut report)?;

        debug!(
            accounts = report.accounts_checked,
            instruments = report.instruments_checked,
            handshakes = report.handshakes_checked,
            violations = report.violations.len(),
            "consistency check finished"
        );
        Ok(report)
    }

    fn check_instruments(
        &self,
        instruments: &[Instrument],
        report: &mut ConsistencyReport,
    ) -> ProjectionResult<()> {
        for instrument in instruments {
            report.instruments_checked += 1;
            if instrument.placeholder {
                report.placeholders.push(instrument.id.clone());
            }
            if let Some(owner) = instrument.owner {
                if self.store.load::<Account>(&owner.to_key())?.is_none() {
                    report.push(
                        ViolationKind::DanglingReference,
                        &instrument.id,
                        format!("owner {owner} has no account"),
                    );
                }
            }

            let mut sum = SignedAmount::zero();
            for key in &instrument.escrows {
                match self.store.load::<EscrowRecord>(key)? {
                    Some(entry) => sum = sum + entry.amount,
                    None => report.push(
                        ViolationKind::DanglingReference,
                        &instrument.id,
                        format!("escrow record {key} is missing"),
                    ),
                }
            }
            if sum != instrument.escrowed {
                report.push(
                    ViolationKind::EscrowMismatch,
                    &instrument.id,
                    format!("balance {} but journal sums to {sum}", instrument.escrowed),
                );
            }
        }
        Ok(())
    }

    fn check_accounts(
        &self,
        accounts: &[Account],
        instruments: &[Instrument],
        report: &mut ConsistencyReport,
    ) {
        let mut owned_by: HashMap<Address, u64> = HashMap::new();
        for owner in instruments.iter().filter_map(|i| i.owner) {
            *owned_by.entry(owner).or_default() += 1;
        }

        for account in accounts {
            report.accounts_checked += 1;
            let key = account.id.to_key();
            for category in InstrumentCategory::ALL {
                let list = account.instruments(category);
                let mut unique: Vec<&String> = list.iter().collect();
                unique.sort();
                unique.dedup();
                if account.count(category) != list.len() as u64 || unique.len() != list.len() {
                    report.push(
                        ViolationKind::CounterMismatch,
                        &key,
                        format!(
                            "{category}: counter {} with {} listed ({} distinct)",
                            account.count(category),
                            list.len(),
                            unique.len()
                        ),
                    );
                }
            }
            let expected = owned_by.get(&account.id).copied().unwrap_or(0);
            if account.owned != expected {
                report.push(
                    ViolationKind::OwnershipMismatch,
                    &key,
                    format!("owned {} but owner of {expected} instrument(s)", account.owned),
                );
            }
        }
    }

    fn check_handshakes(&self, report: &mut ConsistencyReport) -> ProjectionResult<()> {
        for handshake in self.store.load_all::<Handshake>()? {
            report.handshakes_checked += 1;
            let auditor_half = self.store.load::<RequestAuditor>(&handshake.auditor_shake)?;
            let user_half = self.store.load::<RequestUser>(&handshake.user_shake)?;
            match (auditor_half, user_half) {
                (Some(a), Some(u)) => {
                    let expected = a.is_waiting && u.is_waiting;
                    if handshake.completed != expected {
                        report.push(
                            ViolationKind::HandshakeMismatch,
                            &handshake.id,
                            format!("completed={} but requests say {expected}", handshake.completed),
                        );
                    }
                }
                _ => report.push(
                    ViolationKind::DanglingReference,
                    &handshake.id,
                    "handshake without both requests".to_string(),
                ),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cheq_store::InMemoryEntityStore;
    use cheq_types::{InstrumentId, U256};

    fn addr(byte: u8) -> Address {
        Address::from_bytes([byte; 20])
    }

    #[test]
    fn empty_store_is_clean() {
        let store = InMemoryEntityStore::new();
        let report = ConsistencyChecker::new(&store).check().unwrap();
        assert!(report.is_clean());
        assert_eq!(report.accounts_checked, 0);
    }

    #[test]
    fn detects_counter_and_ownership_drift() {
        let store = InMemoryEntityStore::new();
        let mut account = Account::new(addr(1));
        account.track(InstrumentCategory::Owned, "0x7");
        account.sent = 3;
        store.save(&account).unwrap();

        let report = ConsistencyChecker::new(&store).check().unwrap();
        let kinds: Vec<ViolationKind> = report.violations.iter().map(|v| v.kind).collect();
        assert!(kinds.contains(&ViolationKind::CounterMismatch));
        assert!(kinds.contains(&ViolationKind::OwnershipMismatch));
    }

    #[test]
    fn detects_escrow_drift_and_lists_placeholders() {
        let store = InMemoryEntityStore::new();
        let mut instrument = Instrument::placeholder("0x7", InstrumentId::from(7));
        instrument.escrowed = SignedAmount::credit(U256::from(10u64));
        store.save(&instrument).unwrap();

        let report = ConsistencyChecker::new(&store).check().unwrap();
        assert_eq!(report.placeholders, vec!["0x7".to_string()]);
        assert_eq!(report.violations[0].kind, ViolationKind::EscrowMismatch);
    }

    #[test]
    fn detects_stale_handshake() {
        let store = InMemoryEntityStore::new();
        let pair = cheq_types::PairKey::new(addr(1), addr(2));
        store
            .save(&RequestAuditor {
                id: pair.request_auditor_key(),
                user: addr(1),
                auditor: addr(2),
                is_waiting: false,
                created_at: 1,
            })
            .unwrap();
        store
            .save(&RequestUser {
                id: pair.request_user_key(),
                auditor: addr(2),
                user: addr(1),
                is_waiting: true,
                created_at: 1,
            })
            .unwrap();
        store
            .save(&Handshake {
                id: pair.handshake_key(),
                auditor: addr(2),
                user: addr(1),
                auditor_shake: pair.request_auditor_key(),
                user_shake: pair.request_user_key(),
                completed: true,
                completed_at: 1,
            })
            .unwrap();

        let report = ConsistencyChecker::new(&store).check().unwrap();
        assert_eq!(report.handshakes_checked, 1);
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].kind, ViolationKind::HandshakeMismatch);
    }
}
