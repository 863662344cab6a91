use serde::Deserialize;
use serde_json::{Map, Value};

use cheq_types::{parse_u256, Address, BlockInfo, InstrumentId, TxHash, U256};

use crate::error::{EventError, Result};
use crate::event::{
    AuditorShaken, ChainEvent, DirectPaymentCreated, EventKind, EventPayload, InstrumentCashed,
    InstrumentFunded, InstrumentTransferred, InstrumentVoided, InstrumentWritten, UserShaken,
};

/// Event envelope as delivered upstream, before validation.
///
/// Numeric fields accept JSON numbers, decimal strings, or `0x` hex
/// strings, since decoders disagree on how to render `uint256`.
#[derive(Clone, Debug, Deserialize)]
pub struct RawEvent {
    pub kind: String,
    pub block_timestamp: Value,
    pub block_number: Value,
    pub tx_hash: String,
    #[serde(default, alias = "transaction_index")]
    pub tx_index: Option<Value>,
    pub log_index: Value,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl RawEvent {
    /// Validate the envelope and payload into a typed [`ChainEvent`].
    pub fn validate(&self) -> Result<ChainEvent> {
        let kind = EventKind::from_name(&self.kind)
            .ok_or_else(|| EventError::UnknownKind(self.kind.clone()))?;
        let envelope = Fields {
            kind: &self.kind,
            map: None,
        };
        let block = BlockInfo::new(
            envelope.u64_value("block_timestamp", &self.block_timestamp)?,
            envelope.u64_value("block_number", &self.block_number)?,
        );
        let tx_hash: TxHash = self.tx_hash.parse().map_err(|e| EventError::InvalidField {
            kind: self.kind.clone(),
            field: "tx_hash".into(),
            reason: format!("{e}"),
        })?;
        let log_index = envelope.u64_value("log_index", &self.log_index)?;
        let tx_index = match &self.tx_index {
            Some(Value::Null) | None => 0,
            Some(value) => envelope.u64_value("tx_index", value)?,
        };

        let p = Fields {
            kind: &self.kind,
            map: Some(&self.params),
        };
        let payload = match kind {
            EventKind::Written => EventPayload::Written(InstrumentWritten {
                id: p.instrument(&["token_id", "cheq_id", "id"])?,
                amount: p.opt_u256(&["amount"])?.unwrap_or_default(),
                escrowed: p.opt_u256(&["escrowed"])?.unwrap_or_default(),
                instant: p.opt_bool(&["instant"])?.unwrap_or(false),
                expiry: p.opt_u256(&["expiry", "due_date"])?.unwrap_or_default(),
                currency: p.address(&["token", "currency", "erc20"])?,
                drawer: p.address(&["drawer"])?,
                recipient: p.address(&["recipient", "owner"])?,
                auditor: p.address(&["auditor", "inspector"])?,
                module: p.opt_address(&["module"])?,
                memo: p.opt_string(&["memo", "memo_hash", "uri"]),
            }),
            EventKind::Transfer => EventPayload::Transfer(InstrumentTransferred {
                id: p.instrument(&["token_id", "cheq_id", "id"])?,
                from: p.address(&["from"])?,
                to: p.address(&["to"])?,
            }),
            EventKind::Funded => EventPayload::Funded(InstrumentFunded {
                id: p.instrument(&["token_id", "cheq_id", "id"])?,
                funder: p.address(&["funder", "from"])?,
                amount: p.u256(&["amount"])?,
                instant: p.opt_bool(&["instant"])?.unwrap_or(false),
            }),
            EventKind::Cashed => EventPayload::Cashed(InstrumentCashed {
                id: p.instrument(&["token_id", "cheq_id", "id"])?,
                recipient: p.address(&["bearer", "to", "recipient"])?,
                amount: p.u256(&["amount"])?,
            }),
            EventKind::Voided => EventPayload::Voided(InstrumentVoided {
                id: p.instrument(&["token_id", "cheq_id", "id"])?,
                bearer: p.address(&["bearer"])?,
            }),
            EventKind::ShakeAuditor => EventPayload::ShakeAuditor(AuditorShaken {
                user: p.address(&["user"])?,
                auditor: p.address(&["auditor"])?,
                accepted: p.bool(&["accepted"])?,
            }),
            EventKind::ShakeUser => EventPayload::ShakeUser(UserShaken {
                auditor: p.address(&["auditor"])?,
                user: p.address(&["user"])?,
                accepted: p.bool(&["accepted"])?,
            }),
            EventKind::PaymentCreated => EventPayload::PaymentCreated(DirectPaymentCreated {
                id: p.instrument(&["token_id", "cheq_id", "id"])?,
                creditor: p.address(&["creditor"])?,
                debtor: p.address(&["debtor"])?,
                amount: p.u256(&["amount"])?,
                due_date: p.opt_u256(&["due_date"])?.unwrap_or_default(),
                memo: p.opt_string(&["memo_hash", "memo", "uri"]),
                sender: p.address(&["sender"])?,
            }),
        };

        Ok(ChainEvent::new(block, tx_hash, log_index, payload).with_tx_index(tx_index))
    }
}

/// Parse and validate one JSON line.
pub fn parse_line(line: &str) -> Result<ChainEvent> {
    let raw: RawEvent = serde_json::from_str(line).map_err(|e| EventError::Json(e.to_string()))?;
    raw.validate()
}

/// Field accessor that reports errors against the event kind.
struct Fields<'a> {
    kind: &'a str,
    map: Option<&'a Map<String, Value>>,
}

impl<'a> Fields<'a> {
    /// First present, non-null value among the accepted names.
    fn lookup(&self, names: &[&str]) -> Option<(&'a str, &'a Value)> {
        let map = self.map?;
        names.iter().find_map(|name| {
            map.get_key_value(*name)
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.as_str(), v))
        })
    }

    fn missing(&self, names: &[&str]) -> EventError {
        EventError::MissingField {
            kind: self.kind.to_string(),
            field: names.first().copied().unwrap_or_default().to_string(),
        }
    }

    fn invalid(&self, field: &str, reason: impl Into<String>) -> EventError {
        EventError::InvalidField {
            kind: self.kind.to_string(),
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    fn u256_value(&self, field: &str, value: &Value) -> Result<U256> {
        match value {
            Value::Number(n) => n
                .as_u64()
                .map(U256::from)
                .ok_or_else(|| self.invalid(field, format!("{n} is not a non-negative integer"))),
            Value::String(s) => parse_u256(s).map_err(|e| self.invalid(field, e.to_string())),
            other => Err(self.invalid(field, format!("expected number, got {other}"))),
        }
    }

    fn u64_value(&self, field: &str, value: &Value) -> Result<u64> {
        let wide = self.u256_value(field, value)?;
        if wide > U256::from(u64::MAX) {
            return Err(self.invalid(field, "exceeds u64"));
        }
        Ok(wide.low_u64())
    }

    fn u256(&self, names: &[&str]) -> Result<U256> {
        let (field, value) = self.lookup(names).ok_or_else(|| self.missing(names))?;
        self.u256_value(field, value)
    }

    fn opt_u256(&self, names: &[&str]) -> Result<Option<U256>> {
        self.lookup(names)
            .map(|(field, value)| self.u256_value(field, value))
            .transpose()
    }

    fn instrument(&self, names: &[&str]) -> Result<InstrumentId> {
        self.u256(names).map(InstrumentId::new)
    }

    fn address_value(&self, field: &str, value: &Value) -> Result<Address> {
        let s = value
            .as_str()
            .ok_or_else(|| self.invalid(field, format!("expected hex string, got {value}")))?;
        s.parse().map_err(|e| self.invalid(field, format!("{e}")))
    }

    fn address(&self, names: &[&str]) -> Result<Address> {
        let (field, value) = self.lookup(names).ok_or_else(|| self.missing(names))?;
        self.address_value(field, value)
    }

    fn opt_address(&self, names: &[&str]) -> Result<Option<Address>> {
        self.lookup(names)
            .map(|(field, value)| self.address_value(field, value))
            .transpose()
    }

    fn bool_value(&self, field: &str, value: &Value) -> Result<bool> {
        match value {
            Value::Bool(b) => Ok(*b),
            Value::Number(n) if n.as_u64() == Some(0) => Ok(false),
            Value::Number(n) if n.as_u64() == Some(1) => Ok(true),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
            other => Err(self.invalid(field, format!("expected boolean, got {other}"))),
        }
    }

    fn bool(&self, names: &[&str]) -> Result<bool> {
        let (field, value) = self.lookup(names).ok_or_else(|| self.missing(names))?;
        self.bool_value(field, value)
    }

    fn opt_bool(&self, names: &[&str]) -> Result<Option<bool>> {
        self.lookup(names)
            .map(|(field, value)| self.bool_value(field, value))
            .transpose()
    }

    fn opt_string(&self, names: &[&str]) -> Option<String> {
        self.lookup(names).map(|(_, value)| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";
    const ALICE: &str = "0xaAaAaAaaAaAaAaaAaAAAAAAAAaaaAaAaAaaAaaAa";
    const BOB: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
    const CAROL: &str = "0xcccccccccccccccccccccccccccccccccccccccc";
    const TOKEN: &str = "0xdddddddddddddddddddddddddddddddddddddddd";

    fn line(kind: &str, params: Value) -> String {
        serde_json::json!({
            "kind": kind,
            "block_timestamp": 1_700_000_000u64,
            "block_number": "0x10",
            "tx_hash": HASH,
            "log_index": 2,
            "params": params,
        })
        .to_string()
    }

    #[test]
    fn write_cheque_is_validated() {
        let event = parse_line(&line(
            "WriteCheque",
            serde_json::json!({
                "token_id": "7",
                "amount": "100",
                "expiry": 1_800_000_000u64,
                "token": TOKEN,
                "drawer": ALICE,
                "recipient": BOB,
                "auditor": CAROL,
            }),
        ))
        .unwrap();

        assert_eq!(event.block.number, 16);
        assert_eq!(event.log_index, 2);
        assert_eq!(event.tx_index, 0);
        let EventPayload::Written(w) = event.payload else {
            panic!("expected Written");
        };
        assert_eq!(w.id, InstrumentId::from(7u64));
        assert_eq!(w.amount, U256::from(100u64));
        assert_eq!(w.escrowed, U256::zero());
        assert!(!w.instant);
        assert_eq!(w.drawer.to_key(), ALICE.to_lowercase());
        assert!(w.module.is_none());
    }

    #[test]
    fn transaction_index_is_read_when_present() {
        let mut value: Value = serde_json::from_str(&line(
            "Void",
            serde_json::json!({ "token_id": 1, "bearer": ALICE }),
        ))
        .unwrap();
        value["transaction_index"] = Value::from("0x3");
        let event = parse_line(&value.to_string()).unwrap();
        assert_eq!(event.tx_index, 3);
        assert_eq!(event.position().to_string(), "16:3:2");
    }

    #[test]
    fn registrar_written_uses_alternate_names() {
        let event = parse_line(&line(
            "Written",
            serde_json::json!({
                "cheq_id": 9,
                "amount": 5,
                "escrowed": "0x28",
                "instant": 1,
                "currency": TOKEN,
                "drawer": ALICE,
                "owner": BOB,
                "inspector": CAROL,
                "module": TOKEN,
                "memo": "bafy...",
            }),
        ))
        .unwrap();
        let EventPayload::Written(w) = event.payload else {
            panic!("expected Written");
        };
        assert_eq!(w.escrowed, U256::from(40u64));
        assert!(w.instant);
        assert_eq!(w.recipient.to_key(), BOB);
        assert_eq!(w.memo.as_deref(), Some("bafy..."));
        assert!(w.module.is_some());
    }

    #[test]
    fn shake_events_require_accepted() {
        let err = parse_line(&line(
            "ShakeAuditor",
            serde_json::json!({ "user": ALICE, "auditor": BOB }),
        ))
        .unwrap_err();
        assert!(matches!(
            err,
            EventError::MissingField { ref field, .. } if field == "accepted"
        ));

        let event = parse_line(&line(
            "ShakeUser",
            serde_json::json!({ "user": ALICE, "auditor": BOB, "accepted": "false" }),
        ))
        .unwrap();
        assert_eq!(
            event.payload,
            EventPayload::ShakeUser(UserShaken {
                auditor: BOB.parse().unwrap(),
                user: ALICE.parse().unwrap(),
                accepted: false,
            })
        );
    }

    #[test]
    fn invalid_address_is_reported_by_field() {
        let err = parse_line(&line(
            "Transfer",
            serde_json::json!({ "token_id": 1, "from": "0x12", "to": BOB }),
        ))
        .unwrap_err();
        assert!(matches!(
            err,
            EventError::InvalidField { ref field, .. } if field == "from"
        ));
    }

    #[test]
    fn negative_amount_is_rejected() {
        let err = parse_line(&line(
            "Funded",
            serde_json::json!({ "token_id": 1, "funder": ALICE, "amount": -5 }),
        ))
        .unwrap_err();
        assert!(matches!(err, EventError::InvalidField { .. }));
    }

    #[test]
    fn unknown_kind_and_bad_json() {
        assert!(matches!(
            parse_line(&line("Approval", serde_json::json!({}))),
            Err(EventError::UnknownKind(k)) if k == "Approval"
        ));
        assert!(matches!(parse_line("{not json"), Err(EventError::Json(_))));
    }

    #[test]
    fn bad_tx_hash_is_invalid_field() {
        let raw = serde_json::json!({
            "kind": "Void",
            "block_timestamp": 1,
            "block_number": 1,
            "tx_hash": "0x1234",
            "log_index": 0,
            "params": { "token_id": 1, "bearer": ALICE },
        })
        .to_string();
        assert!(matches!(
            parse_line(&raw),
            Err(EventError::InvalidField { ref field, .. }) if field == "tx_hash"
        ));
    }
}
