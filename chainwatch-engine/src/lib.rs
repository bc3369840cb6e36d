#![warn(unused_extern_crates, rust_2018_idioms)]

//! Chainwatch Engine - streaming option-chain reconciliation
//!
//! Keeps a live, deduplicated view of an option chain fed by a server-pushed
//! stream:
//! - [`stream`]: resilient connection with capped exponential backoff over
//!   WebSocket, Server-Sent Events or HTTP polling
//! - [`parser`]: decoding of single, batched and enveloped snapshot payloads
//! - [`reconcile`]: canonical records keyed by (strike, expiry, timestamp)
//! - [`history`]: bounded snapshot history
//! - [`summary`]: per-expiry open interest rollups and put/call ratios
//! - [`buckets`]: fixed session grid for OI charts
//!
//! [`Session`] wires them together on a tokio runtime.

pub mod buckets;
pub mod error;
pub mod history;
pub mod parser;
pub mod reconcile;
pub mod record;
pub mod session;
pub mod state;
pub mod stream;
pub mod summary;
pub mod types;

// Re-export commonly used types for convenience
pub use buckets::{SessionWindow, TimeSlot, bucket};
pub use error::{ConfigError, EngineError, ParseError, StreamError, ValidationError};
pub use history::HistoryBuffer;
pub use parser::{ParsedBatch, SnapshotParser};
pub use reconcile::{ReconcileReport, RecordBook};
pub use record::{Ratio, Record, RecordKey};
pub use session::Session;
pub use state::{
    ChainMeta, EngineConfig, EngineState, EngineView, IngestReport, Notice, RecordFilter,
};
pub use stream::{
    BackoffConfig, ConnectionPhase, ConnectionState, StreamClient, StreamConfig, StreamEvent,
    StreamHandle, TransportKind,
};
pub use summary::{ExpirySummary, SideTotals, nearest_expiries, summarize, summarize_expiries};
pub use types::{LegMetrics, ObservedAt, OptionLeg, Side, Snapshot};
