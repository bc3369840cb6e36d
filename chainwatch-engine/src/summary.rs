//! Per-expiry rollups over the canonical record set.

use crate::record::{Ratio, Record};
use crate::types::{LegMetrics, ObservedAt, Side};
use chrono::NaiveDate;
use itertools::Itertools;
use serde::Serialize;
use smol_str::SmolStr;

/// Default number of nearest expiries summarised.
pub const DEFAULT_SUMMARY_EXPIRIES: usize = 2;

/// Calendar layouts an expiry label may use.
const EXPIRY_FORMATS: [&str; 2] = ["%d-%b-%Y", "%Y-%m-%d"];

/// Summed metrics of one side across every strike of an expiry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SideTotals {
    pub open_interest: u64,
    pub change_in_oi: i64,
    pub volume: u64,
}

impl SideTotals {
    fn add(&mut self, metrics: &LegMetrics) {
        self.open_interest = self.open_interest.saturating_add(metrics.open_interest);
        self.change_in_oi = self.change_in_oi.saturating_add(metrics.change_in_oi);
        self.volume = self.volume.saturating_add(metrics.volume);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpirySummary {
    pub expiry: SmolStr,
    /// Observation time the totals were taken at, `None` for an unknown expiry
    pub timestamp: Option<ObservedAt>,
    pub strikes: usize,
    pub call: SideTotals,
    pub put: SideTotals,
}

impl ExpirySummary {
    /// Aggregate put/call open interest ratio.
    pub fn pcr(&self) -> Ratio {
        Ratio::of(self.put.open_interest as f64, self.call.open_interest as f64)
    }

    /// Aggregate put/call ratio of change in open interest.
    pub fn intraday_pcr(&self) -> Ratio {
        Ratio::of(self.put.change_in_oi as f64, self.call.change_in_oi as f64)
    }
}

/// Fold the records of `expiry` at that expiry's latest observation time.
pub fn summarize<'a, I>(records: I, expiry: &str) -> ExpirySummary
where
    I: IntoIterator<Item = &'a Record>,
    I::IntoIter: Clone,
{
    let records = records.into_iter().filter(|record| record.expiry == expiry);
    let timestamp = records.clone().map(|record| record.timestamp).max();

    let mut summary = ExpirySummary {
        expiry: SmolStr::new(expiry),
        timestamp,
        strikes: 0,
        call: SideTotals::default(),
        put: SideTotals::default(),
    };

    let Some(timestamp) = timestamp else {
        return summary;
    };

    for record in records.filter(|record| record.timestamp == timestamp) {
        summary.strikes += 1;
        if let Some(call) = record.side(Side::Call) {
            summary.call.add(call);
        }
        if let Some(put) = record.side(Side::Put) {
            summary.put.add(put);
        }
    }

    summary
}

/// Summarise an arbitrary list of expiries, in the order given.
pub fn summarize_expiries<'a, I, E>(records: I, expiries: &[E]) -> Vec<ExpirySummary>
where
    I: IntoIterator<Item = &'a Record>,
    I::IntoIter: Clone,
    E: AsRef<str>,
{
    let records = records.into_iter();
    expiries
        .iter()
        .map(|expiry| summarize(records.clone(), expiry.as_ref()))
        .collect()
}

/// Parse an expiry label into a calendar date.
pub fn expiry_date(expiry: &str) -> Option<NaiveDate> {
    EXPIRY_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(expiry.trim(), format).ok())
}

/// The `n` nearest expiries by calendar date. Labels that do not parse as a
/// date sort after every dated one, lexically among themselves.
pub fn nearest_expiries<E>(expiries: &[E], n: usize) -> Vec<SmolStr>
where
    E: AsRef<str>,
{
    expiries
        .iter()
        .map(|expiry| SmolStr::new(expiry.as_ref()))
        .unique()
        .sorted_by(|a, b| match (expiry_date(a), expiry_date(b)) {
            (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.cmp(b),
        })
        .take(n)
        .collect()
}
