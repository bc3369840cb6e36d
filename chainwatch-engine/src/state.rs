//! Owned engine state: the only place the pipeline mutates.
//!
//! Every inbound message goes through [`EngineState::ingest`], which runs
//! parse, reconcile, history retention and summary recomputation to
//! completion before returning. Readers get cloned [`EngineView`]s.

use crate::buckets::{self, SessionWindow, TimeSlot};
use crate::error::{ConfigError, EngineError, StreamError};
use crate::history::{DEFAULT_HISTORY_CAPACITY, HistoryBuffer};
use crate::parser::{ParsedBatch, SnapshotParser};
use crate::reconcile::{ReconcileReport, RecordBook};
use crate::record::Record;
use crate::stream::{ConnectionPhase, ConnectionState};
use crate::summary::{self, DEFAULT_SUMMARY_EXPIRIES, ExpirySummary};
use crate::types::{ObservedAt, Snapshot};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use itertools::Itertools;
use rust_decimal::Decimal;
use smol_str::SmolStr;
use tracing::{debug, info, warn};

/// Characters of a rejected payload kept in the log.
const PAYLOAD_PREVIEW_LEN: usize = 120;

/// India Standard Time, the default exchange offset.
fn default_exchange_offset() -> FixedOffset {
    FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap_or_else(|| Utc.fix())
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Snapshots retained for charting
    pub history_capacity: usize,
    /// Nearest expiries summarised by default
    pub summary_expiries: usize,
    pub session: SessionWindow,
    /// UTC offset applied to timestamps without a zone
    pub exchange_offset: FixedOffset,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            summary_expiries: DEFAULT_SUMMARY_EXPIRIES,
            session: SessionWindow::default(),
            exchange_offset: default_exchange_offset(),
        }
    }
}

impl EngineConfig {
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn with_summary_expiries(mut self, count: usize) -> Self {
        self.summary_expiries = count;
        self
    }

    pub fn with_session(mut self, session: SessionWindow) -> Self {
        self.session = session;
        self
    }

    pub fn with_exchange_offset(mut self, offset: FixedOffset) -> Self {
        self.exchange_offset = offset;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(())
    }
}

/// Which records a reader wants.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub expiry: Option<SmolStr>,
    pub min_strike: Option<Decimal>,
    pub max_strike: Option<Decimal>,
    /// Keep only records at the latest observation time
    pub latest_only: bool,
}

impl RecordFilter {
    pub fn with_expiry(mut self, expiry: impl Into<SmolStr>) -> Self {
        self.expiry = Some(expiry.into());
        self
    }

    pub fn with_strike_range(mut self, min: Option<Decimal>, max: Option<Decimal>) -> Self {
        self.min_strike = min;
        self.max_strike = max;
        self
    }

    pub fn with_latest_only(mut self, latest_only: bool) -> Self {
        self.latest_only = latest_only;
        self
    }

    fn matches(&self, record: &Record, latest: Option<ObservedAt>) -> bool {
        self.expiry.as_ref().is_none_or(|expiry| record.expiry == *expiry)
            && self.min_strike.is_none_or(|min| record.strike >= min)
            && self.max_strike.is_none_or(|max| record.strike <= max)
            && (!self.latest_only || Some(record.timestamp) == latest)
    }
}

/// Chain-level metadata for status display.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainMeta {
    pub latest_timestamp: Option<ObservedAt>,
    pub underlying_value: Option<f64>,
    pub snapshots: usize,
    pub records: usize,
    pub messages: u64,
}

/// Last condition worth showing to the user.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub error: EngineError,
    pub raised_at: DateTime<Utc>,
}

impl Notice {
    fn new(error: EngineError) -> Self {
        Self {
            error,
            raised_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.error.is_terminal()
    }
}

/// What one ingested message did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    pub snapshots: usize,
    pub reconcile: ReconcileReport,
    /// Snapshots appended to history
    pub appended: usize,
    /// Snapshots folded into an already retained observation
    pub coalesced: usize,
    pub evicted: usize,
    /// Records dropped because their snapshot left the history
    pub pruned: usize,
}

/// Read-only copy of the state handed to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineView {
    pub records: Vec<Record>,
    pub expiries: Vec<SmolStr>,
    pub summaries: Vec<ExpirySummary>,
    pub meta: ChainMeta,
    pub connection: ConnectionState,
    pub notice: Option<Notice>,
}

#[derive(Debug, Clone)]
pub struct EngineState {
    config: EngineConfig,
    parser: SnapshotParser,
    book: RecordBook,
    history: HistoryBuffer,
    summaries: Vec<ExpirySummary>,
    meta: ChainMeta,
    connection: ConnectionState,
    notice: Option<Notice>,
}

impl EngineState {
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            parser: SnapshotParser::new(config.exchange_offset),
            history: HistoryBuffer::new(config.history_capacity),
            book: RecordBook::new(),
            summaries: Vec::new(),
            meta: ChainMeta::default(),
            connection: ConnectionState::default(),
            notice: None,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one raw message through the whole pipeline.
    ///
    /// Parse failures and batches without a usable record are returned as
    /// recoverable errors and kept as the current notice; neither touches
    /// the canonical mapping.
    pub fn ingest(&mut self, raw: &str) -> Result<IngestReport, EngineError> {
        self.meta.messages += 1;

        let batch = match self.parser.parse(raw) {
            Ok(Some(batch)) => batch,
            Ok(None) => {
                debug!("skipping empty payload");
                return Ok(IngestReport::default());
            }
            Err(error) => {
                warn!(%error, payload = %preview(raw), "skipping malformed message");
                let error = EngineError::from(error);
                self.raise(error.clone());
                return Err(error);
            }
        };

        self.apply(batch)
    }

    /// Apply an already parsed batch, snapshot by snapshot in order.
    pub fn apply(&mut self, batch: ParsedBatch) -> Result<IngestReport, EngineError> {
        let mut report = IngestReport {
            snapshots: batch.snapshots.len(),
            ..Default::default()
        };

        for snapshot in batch.snapshots {
            self.apply_snapshot(snapshot, &mut report);
        }

        self.refresh();

        if report.reconcile.is_empty() {
            let error = EngineError::EmptyResult {
                dropped: report.reconcile.dropped.len(),
            };
            warn!(%error, snapshots = report.snapshots, "batch produced no records");
            self.raise(error.clone());
            return Err(error);
        }

        if self.notice.as_ref().is_some_and(|notice| !notice.is_terminal()) {
            self.notice = None;
        }

        debug!(
            snapshots = report.snapshots,
            merged = report.reconcile.merged,
            created = report.reconcile.created,
            dropped = report.reconcile.dropped.len(),
            records = self.book.len(),
            "batch applied"
        );

        Ok(report)
    }

    fn apply_snapshot(&mut self, mut snapshot: Snapshot, report: &mut IngestReport) {
        let pass = self.book.reconcile(snapshot.entries());
        let contributed = !pass.is_empty();
        report.reconcile.absorb(pass);

        let Some(timestamp) = snapshot.timestamp else {
            return;
        };
        if !contributed {
            debug!(%timestamp, "snapshot without usable legs not retained");
            return;
        }
        // history holds only legs the mapping holds, so rebuild agrees with it
        snapshot.legs.retain(|leg| leg.identity().is_ok());

        if self
            .meta
            .latest_timestamp
            .is_none_or(|latest| timestamp >= latest)
        {
            self.meta.latest_timestamp = Some(timestamp);
            self.meta.underlying_value = Some(snapshot.underlying_value);
        }

        if let Some(held) = self.history.get_mut(timestamp) {
            held.merge(snapshot);
            report.coalesced += 1;
            return;
        }

        report.appended += 1;
        if let Some(evicted) = self.history.append(snapshot) {
            report.evicted += 1;
            let pruned = self.book.retain_timestamps(&self.history.timestamps());
            report.pruned += pruned;
            debug!(
                evicted = ?evicted.timestamp,
                pruned,
                retained = self.history.len(),
                "history full, evicted oldest snapshot"
            );
        }
    }

    /// Recompute the canonical mapping from the retained history.
    pub fn rebuild(&mut self) {
        self.book.clear();
        for snapshot in self.history.all() {
            self.book.reconcile(snapshot.entries());
        }
        self.refresh();
        info!(
            snapshots = self.history.len(),
            records = self.book.len(),
            "canonical mapping rebuilt"
        );
    }

    /// Derived state, recomputed from scratch after every change.
    fn refresh(&mut self) {
        let expiries = self.book.expiries();
        let nearest = summary::nearest_expiries(&expiries, self.config.summary_expiries);
        self.summaries = summary::summarize_expiries(self.book.iter(), &nearest);

        self.meta.snapshots = self.history.len();
        self.meta.records = self.book.len();
        if self.meta.latest_timestamp.is_none() {
            self.meta.latest_timestamp = self.book.latest_timestamp();
        }
    }

    fn raise(&mut self, error: EngineError) {
        if self.notice.as_ref().is_some_and(Notice::is_terminal) {
            return;
        }
        self.notice = Some(Notice::new(error));
    }

    /// Record a connection transition. A terminal failure becomes the notice.
    pub fn set_connection(&mut self, connection: ConnectionState) {
        if connection.phase == ConnectionPhase::Failed {
            let error = connection.last_error.clone().unwrap_or(StreamError::Closed);
            self.notice = Some(Notice::new(EngineError::Transport(error)));
        }
        self.connection = connection;
    }

    pub fn connection(&self) -> &ConnectionState {
        &self.connection
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    pub fn meta(&self) -> &ChainMeta {
        &self.meta
    }

    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    /// Every canonical record, ordered by strike, expiry, then time.
    pub fn all_records(&self) -> impl Iterator<Item = &Record> + Clone {
        self.book.iter()
    }

    pub fn records(&self, filter: &RecordFilter) -> Vec<Record> {
        let latest = self.book.latest_timestamp();
        self.book
            .iter()
            .filter(|record| filter.matches(record, latest))
            .cloned()
            .collect()
    }

    /// Known expiries in lexical order.
    pub fn expiries(&self) -> Vec<SmolStr> {
        self.book.expiries()
    }

    /// Known expiries, nearest calendar date first.
    pub fn expiries_by_date(&self) -> Vec<SmolStr> {
        let expiries = self.book.expiries();
        summary::nearest_expiries(&expiries, expiries.len())
    }

    /// Strikes listed for `expiry`, ascending.
    pub fn strikes(&self, expiry: &str) -> Vec<Decimal> {
        self.book
            .iter()
            .filter(|record| record.expiry == expiry)
            .map(|record| record.strike)
            .dedup()
            .collect()
    }

    /// Middle strike of `expiry`, the default chart selection.
    pub fn default_strike(&self, expiry: &str) -> Option<Decimal> {
        let strikes = self.strikes(expiry);
        strikes.get(strikes.len() / 2).copied()
    }

    /// Summaries of the nearest expiries, refreshed on every change.
    pub fn summaries(&self) -> &[ExpirySummary] {
        &self.summaries
    }

    /// Summaries for an explicit list of expiries.
    pub fn summarize<E: AsRef<str>>(&self, expiries: &[E]) -> Vec<ExpirySummary> {
        summary::summarize_expiries(self.book.iter(), expiries)
    }

    /// OI series for one contract over the session grid.
    pub fn bucket(&self, expiry: &str, strike: Decimal) -> Vec<TimeSlot> {
        buckets::bucket(&self.config.session, self.history.all(), expiry, strike)
    }

    pub fn view(&self, filter: &RecordFilter) -> EngineView {
        EngineView {
            records: self.records(filter),
            expiries: self.expiries(),
            summaries: self.summaries.clone(),
            meta: self.meta.clone(),
            connection: self.connection.clone(),
            notice: self.notice.clone(),
        }
    }
}

fn preview(raw: &str) -> &str {
    match raw.char_indices().nth(PAYLOAD_PREVIEW_LEN) {
        Some((end, _)) => &raw[..end],
        None => raw,
    }
}
