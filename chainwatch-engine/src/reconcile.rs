//! Canonical record mapping keyed by (strike, expiry, observation time).

use crate::error::ValidationError;
use crate::record::{Record, RecordKey};
use crate::types::{LegEntry, ObservedAt};
use itertools::Itertools;
use smol_str::SmolStr;
use std::collections::{BTreeMap, HashSet, btree_map};
use tracing::warn;

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Records created by this pass
    pub created: usize,
    /// Legs merged into a record (new or existing)
    pub merged: usize,
    /// Entries dropped for missing identity fields
    pub dropped: Vec<ValidationError>,
}

impl ReconcileReport {
    /// True when the pass produced no usable record at all.
    pub fn is_empty(&self) -> bool {
        self.merged == 0
    }

    pub fn absorb(&mut self, other: ReconcileReport) {
        self.created += other.created;
        self.merged += other.merged;
        self.dropped.extend(other.dropped);
    }
}

/// The canonical mapping. Later timestamps create new records; the same
/// identity is only ever updated per side, last write wins.
#[derive(Debug, Clone, Default)]
pub struct RecordBook {
    records: BTreeMap<RecordKey, Record>,
}

impl RecordBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a batch of flattened legs.
    pub fn reconcile<I>(&mut self, entries: I) -> ReconcileReport
    where
        I: IntoIterator<Item = LegEntry>,
    {
        let mut report = ReconcileReport::default();

        for entry in entries {
            let key = match identity(&entry) {
                Ok(key) => key,
                Err(error) => {
                    warn!(
                        %error,
                        side = %entry.leg.side,
                        strike = ?entry.leg.strike,
                        expiry = ?entry.leg.expiry,
                        "dropping entry that cannot be reconciled"
                    );
                    report.dropped.push(error);
                    continue;
                }
            };

            let record = self.records.entry(key).or_insert_with_key(|key| {
                report.created += 1;
                Record::new(key, entry.underlying_value)
            });
            record.merge(entry.leg.side, entry.leg.metrics);
            report.merged += 1;
        }

        report
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, key: &RecordKey) -> Option<&Record> {
        self.records.get(key)
    }

    /// All records in canonical order.
    pub fn iter(&self) -> btree_map::Values<'_, RecordKey, Record> {
        self.records.values()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Drop every record whose observation time is not in `keep`.
    /// Returns the number of records removed.
    pub fn retain_timestamps(&mut self, keep: &HashSet<ObservedAt>) -> usize {
        let before = self.records.len();
        self.records.retain(|key, _| keep.contains(&key.timestamp));
        before - self.records.len()
    }

    /// Most recent observation time present in the mapping.
    pub fn latest_timestamp(&self) -> Option<ObservedAt> {
        self.records.keys().map(|key| key.timestamp).max()
    }

    /// Known expiries, ascending in lexical order.
    pub fn expiries(&self) -> Vec<SmolStr> {
        self.records
            .keys()
            .map(|key| key.expiry.clone())
            .unique()
            .sorted()
            .collect()
    }
}

fn identity(entry: &LegEntry) -> Result<RecordKey, ValidationError> {
    let (strike, expiry) = entry.leg.identity()?;
    let timestamp = entry.timestamp.ok_or(ValidationError::MissingTimestamp)?;

    Ok(RecordKey {
        strike,
        expiry,
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LegMetrics, OptionLeg, Side};
    use chrono::DateTime;
    use rust_decimal_macros::dec;

    fn at(time: &str) -> ObservedAt {
        DateTime::parse_from_rfc3339(&format!("2026-10-16T{time}+05:30")).unwrap()
    }

    fn entry(side: Side, open_interest: u64, time: &str) -> LegEntry {
        LegEntry {
            leg: OptionLeg {
                side,
                strike: Some(dec!(24500)),
                expiry: Some(SmolStr::new("28-Oct-2026")),
                metrics: LegMetrics {
                    open_interest,
                    change_in_oi: 25,
                    volume: 1000,
                    ..Default::default()
                },
            },
            timestamp: Some(at(time)),
            underlying_value: 24510.0,
        }
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let mut book = RecordBook::new();
        book.reconcile([entry(Side::Call, 100, "10:03:00")]);
        let first: Vec<_> = book.iter().cloned().collect();

        let report = book.reconcile([entry(Side::Call, 100, "10:03:00")]);
        let second: Vec<_> = book.iter().cloned().collect();

        assert_eq!(report.created, 0);
        assert_eq!(report.merged, 1);
        assert_eq!(book.len(), 1);
        assert_eq!(first, second);
    }

    #[test]
    fn test_call_and_put_merge_into_one_record() {
        let mut book = RecordBook::new();
        let report = book.reconcile([
            entry(Side::Call, 100, "10:03:00"),
            entry(Side::Put, 400, "10:03:00"),
        ]);

        assert_eq!(report.created, 1);
        assert_eq!(report.merged, 2);
        assert_eq!(book.len(), 1);

        let record = book.iter().next().unwrap();
        assert_eq!(record.call.map(|m| m.open_interest), Some(100));
        assert_eq!(record.put.map(|m| m.open_interest), Some(400));
        assert_eq!(record.underlying_value, 24510.0);
    }

    #[test]
    fn test_later_pass_overwrites_same_side() {
        let mut book = RecordBook::new();
        book.reconcile([entry(Side::Call, 100, "10:03:00"), entry(Side::Put, 400, "10:03:00")]);
        book.reconcile([entry(Side::Call, 180, "10:03:00")]);

        let record = book.iter().next().unwrap();
        assert_eq!(record.call.map(|m| m.open_interest), Some(180));
        assert_eq!(record.put.map(|m| m.open_interest), Some(400));
    }

    #[test]
    fn test_new_timestamp_creates_new_record() {
        let mut book = RecordBook::new();
        book.reconcile([entry(Side::Call, 100, "10:03:00")]);
        book.reconcile([entry(Side::Call, 150, "10:06:00")]);

        assert_eq!(book.len(), 2);
        let open_interest: Vec<_> = book
            .iter()
            .map(|record| record.call.map(|m| m.open_interest))
            .collect();
        assert_eq!(open_interest, vec![Some(100), Some(150)]);
        assert_eq!(book.latest_timestamp(), Some(at("10:06:00")));
    }

    #[test]
    fn test_entries_missing_identity_are_dropped() {
        let mut no_strike = entry(Side::Call, 1, "10:03:00");
        no_strike.leg.strike = None;
        let mut no_expiry = entry(Side::Call, 1, "10:03:00");
        no_expiry.leg.expiry = Some(SmolStr::new(" "));
        let mut no_timestamp = entry(Side::Put, 1, "10:03:00");
        no_timestamp.timestamp = None;

        let mut book = RecordBook::new();
        let report = book.reconcile([no_strike, entry(Side::Put, 7, "10:03:00"), no_expiry, no_timestamp]);

        assert_eq!(report.merged, 1);
        assert_eq!(
            report.dropped,
            vec![
                ValidationError::MissingStrike,
                ValidationError::MissingExpiry,
                ValidationError::MissingTimestamp
            ]
        );
        assert_eq!(book.len(), 1);
        assert!(!report.is_empty());
    }

    #[test]
    fn test_empty_pass_reports_empty() {
        let mut no_strike = entry(Side::Call, 1, "10:03:00");
        no_strike.leg.strike = None;

        let mut book = RecordBook::new();
        assert!(book.reconcile([no_strike]).is_empty());
        assert!(book.reconcile(Vec::new()).is_empty());
        assert!(book.is_empty());
    }

    #[test]
    fn test_retain_timestamps_and_expiries() {
        let mut book = RecordBook::new();
        let mut far = entry(Side::Call, 1, "10:06:00");
        far.leg.expiry = Some(SmolStr::new("04-Nov-2026"));
        book.reconcile([entry(Side::Call, 1, "10:03:00"), far]);

        assert_eq!(
            book.expiries(),
            vec![SmolStr::new("04-Nov-2026"), SmolStr::new("28-Oct-2026")]
        );

        let keep = HashSet::from([at("10:06:00")]);
        assert_eq!(book.retain_timestamps(&keep), 1);
        assert_eq!(book.expiries(), vec![SmolStr::new("04-Nov-2026")]);
    }
}
