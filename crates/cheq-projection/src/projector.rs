//! Event dispatcher.
//!
//! The projector applies events strictly in order, one at a time. For each
//! event it:
//! 1. skips it if the persisted cursor shows it was already committed
//! 2. runs the event's handler against a staged view of the store
//! 3. commits the handler's batch together with the new cursor in a single
//!    atomic `apply`
//!
//! Storage failures are retried with exponential backoff. A run that
//! exhausts the retry budget stops with [`ProjectionError::StorageUnavailable`]
//! and leaves the cursor on the last committed event.

use std::thread;
use std::time::Duration;

use cheq_events::{ChainEvent, EventError, EventPayload, SourceItem};
use cheq_store::{EntityStore, EntityStoreExt, WriteBatch};
use cheq_types::{EventPosition, KeyFormat};
use tracing::{debug, error, info, warn};

use crate::context::{Anomaly, EventContext};
use crate::error::{ProjectionError, ProjectionResult};
use crate::handshake::{shake_auditor, shake_user};
use crate::instruments;
use crate::records::Cursor;

/// Exponential backoff for storage failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per event, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `failed + 1`, after `failed` failures.
    pub fn backoff(&self, failed: u32) -> Duration {
        let exponent = failed.saturating_sub(1).min(20);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProjectorConfig {
    pub key_format: KeyFormat,
    pub retry: RetryPolicy,
}

/// What happened to one event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Applied { writes: usize, anomalies: Vec<Anomaly> },
    /// Already committed by an earlier run.
    Skipped,
}

/// Totals for one [`Projector::run`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub applied: u64,
    pub skipped_replay: u64,
    pub rejected: u64,
    pub anomalies: u64,
    pub last_position: Option<EventPosition>,
}

impl RunSummary {
    fn record(&mut self, position: EventPosition, outcome: &Outcome) {
        match outcome {
            Outcome::Applied { anomalies, .. } => {
                self.applied += 1;
                self.anomalies += anomalies.len() as u64;
                self.last_position = Some(position);
            }
            Outcome::Skipped => self.skipped_replay += 1,
        }
    }

    pub fn merge(&mut self, other: &RunSummary) {
        self.applied += other.applied;
        self.skipped_replay += other.skipped_replay;
        self.rejected += other.rejected;
        self.anomalies += other.anomalies;
        if other.last_position.is_some() {
            self.last_position = other.last_position;
        }
    }
}

/// Single-writer projector over an [`EntityStore`].
pub struct Projector<S> {
    store: S,
    config: ProjectorConfig,
    cursor: Option<Cursor>,
}

impl<S: EntityStore> Projector<S> {
    /// Create a projector, resuming from the cursor persisted in `store`.
    pub fn new(store: S, config: ProjectorConfig) -> ProjectionResult<Self> {
        if config.retry.max_attempts == 0 {
            return Err(ProjectionError::InvalidConfig(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        let cursor = store.load::<Cursor>(Cursor::KEY)?;
        match &cursor {
            Some(c) if c.key_format != config.key_format => {
                return Err(ProjectionError::InvalidConfig(format!(
                    "store was built with {} instrument keys, not {}",
                    c.key_format, config.key_format
                )));
            }
            Some(c) => info!(
                position = %c.position,
                events_applied = c.events_applied,
                "resuming from cursor"
            ),
            None => info!("starting from an empty store"),
        }
        Ok(Self {
            store,
            config,
            cursor,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn config(&self) -> &ProjectorConfig {
        &self.config
    }

    /// Position of the last committed event.
    pub fn cursor(&self) -> Option<EventPosition> {
        self.cursor.as_ref().map(|c| c.position)
    }

    /// Apply one event.
    pub fn process(&mut self, event: &ChainEvent) -> ProjectionResult<Outcome> {
        let position = event.position();
        if let Some(cursor) = &self.cursor {
            if cursor.covers(event) {
                debug!(
                    %position,
                    cursor = %cursor.position,
                    kind = %event.kind(),
                    "event already applied"
                );
                return Ok(Outcome::Skipped);
            }
        }

        let mut failures = 0u32;
        loop {
            match self.commit(event) {
                Ok(outcome) => return Ok(outcome),
                Err(ProjectionError::Store(e)) if e.is_retryable() => {
                    failures += 1;
                    if failures >= self.config.retry.max_attempts {
                        error!(%position, attempts = failures, error = %e, "storage unavailable; halting");
                        return Err(ProjectionError::StorageUnavailable {
                            attempts: failures,
                            source: e,
                        });
                    }
                    let delay = self.config.retry.backoff(failures);
                    warn!(%position, attempt = failures, ?delay, error = %e, "storage failure; retrying");
                    thread::sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Consume a stream of source items until it ends or storage gives up.
    ///
    /// Rejected (malformed) items are logged and counted; they never stop
    /// the run.
    pub fn run<I>(&mut self, items: I) -> ProjectionResult<RunSummary>
    where
        I: IntoIterator<Item = Result<SourceItem, EventError>>,
    {
        let mut summary = RunSummary::default();
        for item in items {
            match item? {
                SourceItem::Event(event) => {
                    let outcome = self.process(&event)?;
                    summary.record(event.position(), &outcome);
                }
                SourceItem::Rejected(rejected) => {
                    warn!(
                        line = rejected.line,
                        error = %rejected.error,
                        raw = %rejected.raw,
                        "rejected malformed event"
                    );
                    summary.rejected += 1;
                }
            }
        }
        info!(
            applied = summary.applied,
            skipped = summary.skipped_replay,
            rejected = summary.rejected,
            anomalies = summary.anomalies,
            "run finished"
        );
        Ok(summary)
    }

    fn project(&self, event: &ChainEvent) -> ProjectionResult<(WriteBatch, Vec<Anomaly>)> {
        let mut ctx = EventContext::new(&self.store, self.config.key_format, event);
        let timestamp = event.block.timestamp;
        match &event.payload {
            EventPayload::Written(e) => instruments::create_instrument(&mut ctx, e)?,
            EventPayload::Transfer(e) => instruments::record_transfer(&mut ctx, e)?,
            EventPayload::Funded(e) => instruments::record_funding(&mut ctx, e)?,
            EventPayload::Cashed(e) => instruments::record_cash_out(&mut ctx, e)?,
            EventPayload::Voided(e) => instruments::record_void(&mut ctx, e)?,
            EventPayload::PaymentCreated(e) => instruments::attach_direct_pay(&mut ctx, e)?,
            EventPayload::ShakeAuditor(e) => {
                shake_auditor(&mut ctx.view, e.user, e.auditor, e.accepted, timestamp)?;
            }
            EventPayload::ShakeUser(e) => {
                shake_user(&mut ctx.view, e.auditor, e.user, e.accepted, timestamp)?;
            }
        }
        Ok(ctx.finish())
    }

    fn commit(&mut self, event: &ChainEvent) -> ProjectionResult<Outcome> {
        let (mut batch, anomalies) = self.project(event)?;
        let writes = batch.len();
        let cursor = Cursor::advance(self.cursor.as_ref(), event, self.config.key_format);
        batch.put_entity(&cursor)?;
        self.store.apply(batch)?;
        debug!(position = %cursor.position, kind = %event.kind(), writes, "event applied");
        self.cursor = Some(cursor);
        Ok(Outcome::Applied { writes, anomalies })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use cheq_events::{
        AuditorShaken, InstrumentCashed, InstrumentFunded, InstrumentTransferred,
        InstrumentWritten, JsonLinesSource, UserShaken,
    };
    use cheq_store::{EntityKind, InMemoryEntityStore, LogConfig, LogEntityStore, StoreError, StoreResult};
    use cheq_types::{Address, BlockInfo, InstrumentId, SignedAmount, TxHash, U256};
    use proptest::prelude::*;

    use crate::query::net_escrowed;
    use crate::records::{Account, Handshake, Instrument, InstrumentStatus, RequestAuditor};
    use crate::validation::ConsistencyChecker;

    const D: Address = Address::from_bytes([0xd0; 20]);
    const R: Address = Address::from_bytes([0xe1; 20]);
    const R2: Address = Address::from_bytes([0xe2; 20]);
    const AUD: Address = Address::from_bytes([0xa0; 20]);
    const U: Address = Address::from_bytes([0x11; 20]);
    const TOKEN: Address = Address::from_bytes([0x70; 20]);

    /// Store whose `apply` fails with a retryable error a set number of times.
    struct FlakyStore {
        inner: InMemoryEntityStore,
        failures_left: AtomicU32,
        attempts: AtomicU32,
    }

    impl FlakyStore {
        fn failing(times: u32) -> Self {
            Self {
                inner: InMemoryEntityStore::new(),
                failures_left: AtomicU32::new(times),
                attempts: AtomicU32::new(0),
            }
        }
    }

    impl EntityStore for FlakyStore {
        fn get(&self, kind: EntityKind, key: &str) -> StoreResult<Option<Vec<u8>>> {
            self.inner.get(kind, key)
        }

        fn apply(&self, batch: WriteBatch) -> StoreResult<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("disk went away".into()));
            }
            self.inner.apply(batch)
        }

        fn keys(&self, kind: EntityKind) -> StoreResult<Vec<String>> {
            self.inner.keys(kind)
        }
    }

    fn fast_config() -> ProjectorConfig {
        ProjectorConfig {
            key_format: KeyFormat::Hex,
            retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(2),
            },
        }
    }

    fn event(block: u64, log_index: u64, payload: EventPayload) -> ChainEvent {
        let mut hash = [0u8; 32];
        hash[..8].copy_from_slice(&block.to_be_bytes());
        ChainEvent::new(
            BlockInfo::new(1_700_000_000 + block, block),
            TxHash::from_bytes(hash),
            log_index,
            payload,
        )
    }

    fn event_in_tx(
        block: u64,
        tx: u8,
        tx_index: u64,
        log_index: u64,
        payload: EventPayload,
    ) -> ChainEvent {
        ChainEvent::new(
            BlockInfo::new(1_700_000_000 + block, block),
            TxHash::from_bytes([tx; 32]),
            log_index,
            payload,
        )
        .with_tx_index(tx_index)
    }

    fn written(id: u64) -> EventPayload {
        EventPayload::Written(InstrumentWritten {
            id: InstrumentId::from(id),
            amount: U256::from(100u64),
            escrowed: U256::zero(),
            instant: false,
            expiry: U256::from(1_800_000_000u64),
            currency: TOKEN,
            drawer: D,
            recipient: R,
            auditor: AUD,
            module: None,
            memo: None,
        })
    }

    fn funded(id: u64, amount: u64) -> EventPayload {
        EventPayload::Funded(InstrumentFunded {
            id: InstrumentId::from(id),
            funder: D,
            amount: U256::from(amount),
            instant: false,
        })
    }

    fn cashed(id: u64, amount: u64) -> EventPayload {
        EventPayload::Cashed(InstrumentCashed {
            id: InstrumentId::from(id),
            recipient: R,
            amount: U256::from(amount),
        })
    }

    fn transfer(id: u64, from: Address, to: Address) -> EventPayload {
        EventPayload::Transfer(InstrumentTransferred {
            id: InstrumentId::from(id),
            from,
            to,
        })
    }

    fn account<S: EntityStore>(store: &S, address: Address) -> Account {
        store.load(&address.to_key()).unwrap().unwrap()
    }

    #[test]
    fn create_scenario() {
        let mut projector = Projector::new(InMemoryEntityStore::new(), fast_config()).unwrap();
        projector.process(&event(1, 0, written(7))).unwrap();

        let store = projector.store();
        let cheq: Instrument = store.load("0x7").unwrap().unwrap();
        assert_eq!(cheq.status, InstrumentStatus::Pending);
        assert_eq!(account(store, D).sent, 1);
        assert_eq!(account(store, R).owned, 1);
        assert_eq!(account(store, AUD).auditing, 1);
        assert_eq!(projector.cursor(), Some(EventPosition::new(1, 0, 0)));
    }

    #[test]
    fn fund_cash_scenario() {
        let mut projector = Projector::new(InMemoryEntityStore::new(), fast_config()).unwrap();
        projector.process(&event(1, 0, written(7))).unwrap();
        projector.process(&event(2, 0, funded(7, 40))).unwrap();
        projector.process(&event(3, 0, cashed(7, 40))).unwrap();

        let store = projector.store();
        assert!(net_escrowed(store, "0x7").unwrap().is_zero());
        let cheq: Instrument = store.load("0x7").unwrap().unwrap();
        assert_eq!(cheq.status, InstrumentStatus::Cashed);
        assert_eq!(cheq.escrows.len(), 2);
    }

    #[test]
    fn transfer_scenario() {
        let mut projector = Projector::new(InMemoryEntityStore::new(), fast_config()).unwrap();
        projector.process(&event(1, 0, written(7))).unwrap();
        projector.process(&event(2, 0, transfer(7, R, R2))).unwrap();

        let store = projector.store();
        assert_eq!(account(store, R).owned, 0);
        assert_eq!(account(store, R2).owned, 1);
        assert_eq!(store.keys(EntityKind::Transfer).unwrap().len(), 1);
    }

    #[test]
    fn handshake_scenario() {
        let mut projector = Projector::new(InMemoryEntityStore::new(), fast_config()).unwrap();
        let by_user = |accepted| {
            EventPayload::ShakeAuditor(AuditorShaken {
                user: U,
                auditor: AUD,
                accepted,
            })
        };
        projector.process(&event(1, 0, by_user(true))).unwrap();
        let request: RequestAuditor = projector
            .store()
            .load(&format!("{}:{}", U.to_key(), AUD.to_key()))
            .unwrap()
            .unwrap();
        assert!(request.is_waiting);
        assert!(projector.store().keys(EntityKind::Handshake).unwrap().is_empty());

        let by_auditor = EventPayload::ShakeUser(UserShaken {
            auditor: AUD,
            user: U,
            accepted: true,
        });
        projector.process(&event(2, 0, by_auditor)).unwrap();
        let key = format!("{}:{}", AUD.to_key(), U.to_key());
        let handshake: Handshake = projector.store().load(&key).unwrap().unwrap();
        assert!(handshake.completed);

        projector.process(&event(3, 0, by_user(false))).unwrap();
        let handshake: Handshake = projector.store().load(&key).unwrap().unwrap();
        assert!(!handshake.completed);
    }

    #[test]
    fn replays_and_earlier_blocks_are_skipped() {
        let mut projector = Projector::new(InMemoryEntityStore::new(), fast_config()).unwrap();
        projector.process(&event(2, 1, funded(7, 40))).unwrap();

        let earlier_block = projector.process(&event(1, 5, funded(7, 40))).unwrap();
        let same = projector.process(&event(2, 1, funded(7, 40))).unwrap();
        assert_eq!(earlier_block, Outcome::Skipped);
        assert_eq!(same, Outcome::Skipped);

        assert_eq!(
            net_escrowed(projector.store(), "0x7").unwrap(),
            SignedAmount::credit(U256::from(40u64))
        );
    }

    #[test]
    fn two_transactions_in_one_block_both_apply() {
        let mut projector = Projector::new(InMemoryEntityStore::new(), fast_config()).unwrap();
        let first = event_in_tx(1, 1, 0, 0, written(7));
        let second = event_in_tx(1, 2, 1, 0, written(8));

        assert!(matches!(projector.process(&first).unwrap(), Outcome::Applied { .. }));
        assert!(matches!(projector.process(&second).unwrap(), Outcome::Applied { .. }));
        assert_eq!(projector.process(&second).unwrap(), Outcome::Skipped);

        let store = projector.store();
        assert!(store.load::<Instrument>("0x7").unwrap().is_some());
        assert!(store.load::<Instrument>("0x8").unwrap().is_some());
        assert_eq!(account(store, D).sent, 2);
        assert_eq!(projector.cursor(), Some(EventPosition::new(1, 1, 0)));
    }

    #[test]
    fn restart_mid_block_applies_only_the_unseen_transactions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cheq.log");
        let events = vec![
            event_in_tx(1, 1, 0, 0, written(7)),
            event_in_tx(1, 2, 1, 0, written(8)),
            event_in_tx(1, 3, 2, 0, written(9)),
        ];

        {
            let store = LogEntityStore::open(&path, LogConfig::default()).unwrap();
            let mut projector = Projector::new(store, fast_config()).unwrap();
            projector.process(&events[0]).unwrap();
        }

        let store = LogEntityStore::open(&path, LogConfig::default()).unwrap();
        let mut projector = Projector::new(store, fast_config()).unwrap();
        let summary = projector
            .run(events.into_iter().map(|e| Ok(SourceItem::Event(e))))
            .unwrap();
        assert_eq!(summary.skipped_replay, 1);
        assert_eq!(summary.applied, 2);
        assert_eq!(projector.store().keys(EntityKind::Instrument).unwrap().len(), 3);
    }

    #[test]
    fn store_keeps_the_key_format_it_was_built_with() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cheq.log");
        {
            let store = LogEntityStore::open(&path, LogConfig::default()).unwrap();
            let mut projector = Projector::new(store, fast_config()).unwrap();
            projector.process(&event(1, 0, written(7))).unwrap();
        }

        let decimal = ProjectorConfig {
            key_format: KeyFormat::Decimal,
            ..fast_config()
        };
        let store = LogEntityStore::open(&path, LogConfig::default()).unwrap();
        assert!(matches!(
            Projector::new(store, decimal),
            Err(ProjectionError::InvalidConfig(_))
        ));

        let store = LogEntityStore::open(&path, LogConfig::default()).unwrap();
        let projector = Projector::new(store, fast_config()).unwrap();
        let cursor: Cursor = projector.store().load(Cursor::KEY).unwrap().unwrap();
        assert_eq!(cursor.key_format, KeyFormat::Hex);
    }

    #[test]
    fn resume_after_restart_uses_persisted_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cheq.log");
        let events = vec![
            event(1, 0, written(7)),
            event(2, 0, funded(7, 40)),
            event(3, 0, cashed(7, 15)),
        ];

        {
            let store = LogEntityStore::open(&path, LogConfig::default()).unwrap();
            let mut projector = Projector::new(store, fast_config()).unwrap();
            projector.process(&events[0]).unwrap();
            projector.process(&events[1]).unwrap();
        }

        let store = LogEntityStore::open(&path, LogConfig::default()).unwrap();
        let mut projector = Projector::new(store, fast_config()).unwrap();
        assert_eq!(projector.cursor(), Some(EventPosition::new(2, 0, 0)));

        let summary = projector
            .run(events.into_iter().map(|e| Ok(SourceItem::Event(e))))
            .unwrap();
        assert_eq!(summary.skipped_replay, 2);
        assert_eq!(summary.applied, 1);
        assert_eq!(
            net_escrowed(projector.store(), "0x7").unwrap(),
            SignedAmount::credit(U256::from(25u64))
        );
    }

    #[test]
    fn malformed_lines_are_rejected_and_counted() {
        let input = format!(
            "{}\nnot json\n{}\n",
            r#"{"kind":"ShakeAuditor","block_timestamp":1,"block_number":1,"tx_hash":"0x0101010101010101010101010101010101010101010101010101010101010101","log_index":0,"params":{"user":"0x1111111111111111111111111111111111111111","auditor":"0xa0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0","accepted":true}}"#,
            r#"{"kind":"Teleport","block_timestamp":2,"block_number":2,"tx_hash":"0x02","log_index":0}"#,
        );
        let mut projector = Projector::new(InMemoryEntityStore::new(), fast_config()).unwrap();
        let summary = projector.run(JsonLinesSource::new(input.as_bytes())).unwrap();

        assert_eq!(summary.applied, 1);
        assert_eq!(summary.rejected, 2);
        assert_eq!(summary.last_position, Some(EventPosition::new(1, 0, 0)));
    }

    #[test]
    fn non_utf8_line_does_not_stop_the_run() {
        let shake = |block: u64, kind: &str| {
            format!(
                r#"{{"kind":"{kind}","block_timestamp":1,"block_number":{block},"tx_hash":"0x0101010101010101010101010101010101010101010101010101010101010101","log_index":0,"params":{{"user":"0x1111111111111111111111111111111111111111","auditor":"0xa0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0","accepted":true}}}}"#
            )
        };
        let mut input = Vec::new();
        input.extend_from_slice(shake(1, "ShakeAuditor").as_bytes());
        input.extend_from_slice(b"\n{\"kind\":\"\xff\xfe\"}\n");
        input.extend_from_slice(shake(2, "ShakeUser").as_bytes());
        input.push(b'\n');

        let mut projector = Projector::new(InMemoryEntityStore::new(), fast_config()).unwrap();
        let summary = projector.run(JsonLinesSource::new(input.as_slice())).unwrap();

        assert_eq!(summary.applied, 2);
        assert_eq!(summary.rejected, 1);
        assert_eq!(projector.cursor(), Some(EventPosition::new(2, 0, 0)));
        let key = format!("{}:{}", AUD.to_key(), U.to_key());
        let handshake: Handshake = projector.store().load(&key).unwrap().unwrap();
        assert!(handshake.completed);
    }

    #[test]
    fn transient_storage_failures_are_retried() {
        let mut projector = Projector::new(FlakyStore::failing(2), fast_config()).unwrap();
        let outcome = projector.process(&event(1, 0, written(7))).unwrap();

        assert!(matches!(outcome, Outcome::Applied { .. }));
        assert_eq!(projector.store().attempts.load(Ordering::SeqCst), 3);
        assert_eq!(projector.cursor(), Some(EventPosition::new(1, 0, 0)));
    }

    #[test]
    fn exhausted_retries_halt_without_advancing_cursor() {
        let mut projector = Projector::new(FlakyStore::failing(10), fast_config()).unwrap();
        let err = projector.process(&event(1, 0, written(7))).unwrap_err();

        assert!(matches!(
            err,
            ProjectionError::StorageUnavailable { attempts: 3, .. }
        ));
        assert_eq!(projector.cursor(), None);
        assert!(projector.store().inner.keys(EntityKind::Instrument).unwrap().is_empty());
        assert!(projector.store().load::<Cursor>(Cursor::KEY).unwrap().is_none());
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let mut config = fast_config();
        config.retry.max_attempts = 0;
        assert!(matches!(
            Projector::new(InMemoryEntityStore::new(), config),
            Err(ProjectionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(40), Duration::from_millis(350));
    }

    #[test]
    fn decimal_keys_when_configured() {
        let config = ProjectorConfig {
            key_format: KeyFormat::Decimal,
            ..fast_config()
        };
        let mut projector = Projector::new(InMemoryEntityStore::new(), config).unwrap();
        projector.process(&event(1, 0, written(255))).unwrap();
        assert!(projector.store().load::<Instrument>("255").unwrap().is_some());
        assert!(projector.store().load::<Instrument>("0xff").unwrap().is_none());
    }

    /// Applies `steps` twice through separate projectors: once plainly, once
    /// with every event handed over a second time after a cursor reset.
    fn replay_each_event(steps: &[EventPayload]) -> (InMemoryEntityStore, InMemoryEntityStore) {
        let mut once = Projector::new(InMemoryEntityStore::new(), fast_config()).unwrap();
        let mut twice = Projector::new(InMemoryEntityStore::new(), fast_config()).unwrap();
        for (i, payload) in steps.iter().enumerate() {
            let e = event(i as u64 + 1, 0, payload.clone());
            once.process(&e).unwrap();
            twice.process(&e).unwrap();
            // Bypass the cursor to exercise handler-level idempotence.
            twice.cursor = None;
            twice.process(&e).unwrap();
        }
        (once.into_store(), twice.into_store())
    }

    fn step_strategy() -> impl Strategy<Value = EventPayload> {
        let holder = prop_oneof![Just(R), Just(R2), Just(D)];
        prop_oneof![
            Just(written(7)),
            (1u64..100).prop_map(|a| funded(7, a)),
            (1u64..100).prop_map(|a| cashed(7, a)),
            (holder.clone(), holder).prop_map(|(from, to)| transfer(7, from, to)),
            Just(EventPayload::Voided(cheq_events::InstrumentVoided {
                id: InstrumentId::from(7),
                bearer: D,
            })),
        ]
    }

    fn strip_cursor(store: &InMemoryEntityStore) -> WriteBatch {
        let mut out = WriteBatch::new();
        for op in store.snapshot().unwrap().into_ops() {
            if op.kind != EntityKind::Meta {
                out.put(op.kind, op.key, op.value);
            }
        }
        out
    }

    proptest! {
        #[test]
        fn every_handler_is_idempotent(steps in prop::collection::vec(step_strategy(), 1..10)) {
            let (once, twice) = replay_each_event(&steps);
            prop_assert_eq!(strip_cursor(&once), strip_cursor(&twice));
        }

        #[test]
        fn journal_balance_is_funded_minus_cashed(
            funds in prop::collection::vec(1u64..1_000, 0..6),
            cashes in prop::collection::vec(1u64..1_000, 0..6),
        ) {
            let mut projector = Projector::new(InMemoryEntityStore::new(), fast_config()).unwrap();
            projector.process(&event(1, 0, written(7))).unwrap();
            let mut block = 2;
            for amount in &funds {
                projector.process(&event(block, 0, funded(7, *amount))).unwrap();
                block += 1;
            }
            for amount in &cashes {
                projector.process(&event(block, 0, cashed(7, *amount))).unwrap();
                block += 1;
            }

            let funded_total: u64 = funds.iter().sum();
            let cashed_total: u64 = cashes.iter().sum();
            let expected = SignedAmount::credit(U256::from(funded_total))
                + SignedAmount::debit(U256::from(cashed_total));
            let store = projector.store();
            prop_assert_eq!(net_escrowed(store, "0x7").unwrap(), expected);
            let cheq: Instrument = store.load("0x7").unwrap().unwrap();
            prop_assert_eq!(cheq.escrowed, expected);
        }

        #[test]
        fn ownership_is_conserved(
            hops in prop::collection::vec(prop_oneof![Just(R), Just(R2), Just(D), Just(AUD)], 0..8),
        ) {
            let mut projector = Projector::new(InMemoryEntityStore::new(), fast_config()).unwrap();
            projector.process(&event(1, 0, written(7))).unwrap();
            projector.process(&event(1, 1, transfer(7, Address::ZERO, R))).unwrap();
            let mut holder = R;
            for (i, next) in hops.iter().enumerate() {
                projector.process(&event(i as u64 + 2, 0, transfer(7, holder, *next))).unwrap();
                holder = *next;
            }

            let store = projector.store();
            let accounts: Vec<Account> = store.load_all().unwrap();
            let total_owned: u64 = accounts.iter().map(|a| a.owned).sum();
            prop_assert_eq!(total_owned, 1);
            prop_assert_eq!(account(store, holder).owned, 1);
            let report = ConsistencyChecker::new(store).check().unwrap();
            prop_assert!(report.is_clean(), "{:?}", report.violations);
        }

        #[test]
        fn terminal_status_never_changes(
            first_void in any::<bool>(),
            tail in prop::collection::vec(step_strategy(), 0..6),
        ) {
            let mut projector = Projector::new(InMemoryEntityStore::new(), fast_config()).unwrap();
            projector.process(&event(1, 0, written(7))).unwrap();
            let terminal = if first_void {
                projector.process(&event(2, 0, EventPayload::Voided(cheq_events::InstrumentVoided {
                    id: InstrumentId::from(7),
                    bearer: D,
                }))).unwrap();
                InstrumentStatus::Voided
            } else {
                projector.process(&event(2, 0, cashed(7, 10))).unwrap();
                InstrumentStatus::Cashed
            };
            for (i, payload) in tail.into_iter().enumerate() {
                projector.process(&event(i as u64 + 3, 0, payload)).unwrap();
            }
            let cheq: Instrument = projector.store().load("0x7").unwrap().unwrap();
            prop_assert_eq!(cheq.status, terminal);
        }
    }
}
