//! Typed chain events for the Cheq indexer.
//!
//! Events arrive as loosely-typed JSON (one object per line). They are
//! validated once, at the boundary, into the closed set of variants in
//! [`EventPayload`]; nothing downstream ever looks at raw fields again.

pub mod error;
pub mod event;
pub mod raw;
pub mod source;

pub use error::EventError;
pub use event::{
    AuditorShaken, ChainEvent, DirectPaymentCreated, EventKind, EventPayload, InstrumentCashed,
    InstrumentFunded, InstrumentTransferred, InstrumentVoided, InstrumentWritten, UserShaken,
};
pub use raw::{parse_line, RawEvent};
pub use source::{FileTail, JsonLinesSource, RejectedEvent, SourceItem};
