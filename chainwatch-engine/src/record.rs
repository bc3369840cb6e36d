//! Canonical reconciled records and guarded derived ratios.

use crate::types::{LegMetrics, ObservedAt, Side};
use rust_decimal::Decimal;
use serde::Serialize;
use smol_str::SmolStr;
use std::cmp::Ordering;
use std::fmt;

/// Ratio of two aggregates that may be undefined.
///
/// `Unavailable` orders as `0.0` but displays as `-`, so a genuine zero ratio
/// and a missing one sort together without being confused on screen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Ratio {
    Value(f64),
    Unavailable,
}

impl Ratio {
    /// `numerator / denominator`, `Unavailable` when the denominator is zero
    /// or the quotient is not finite.
    pub fn of(numerator: f64, denominator: f64) -> Self {
        if denominator == 0.0 {
            return Ratio::Unavailable;
        }
        let ratio = numerator / denominator;
        if ratio.is_finite() {
            Ratio::Value(ratio)
        } else {
            Ratio::Unavailable
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Ratio::Value(value) => Some(*value),
            Ratio::Unavailable => None,
        }
    }

    /// Numeric sentinel used for ordering.
    pub fn sort_value(&self) -> f64 {
        self.value().unwrap_or(0.0)
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Ratio::Value(_))
    }

    /// Total order over sort values.
    pub fn cmp_sort(&self, other: &Self) -> Ordering {
        self.sort_value().total_cmp(&other.sort_value())
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ratio::Value(value) => write!(f, "{value:.2}"),
            Ratio::Unavailable => f.write_str("-"),
        }
    }
}

/// Record identity. Field order gives the canonical ordering:
/// strike, then expiry, then observation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RecordKey {
    pub strike: Decimal,
    pub expiry: SmolStr,
    pub timestamp: ObservedAt,
}

/// One strike/expiry at one observation instant, both legs merged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub strike: Decimal,
    pub expiry: SmolStr,
    pub timestamp: ObservedAt,
    pub underlying_value: f64,
    pub call: Option<LegMetrics>,
    pub put: Option<LegMetrics>,
}

impl Record {
    pub fn new(key: &RecordKey, underlying_value: f64) -> Self {
        Self {
            strike: key.strike,
            expiry: key.expiry.clone(),
            timestamp: key.timestamp,
            underlying_value,
            call: None,
            put: None,
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            strike: self.strike,
            expiry: self.expiry.clone(),
            timestamp: self.timestamp,
        }
    }

    pub fn side(&self, side: Side) -> Option<&LegMetrics> {
        match side {
            Side::Call => self.call.as_ref(),
            Side::Put => self.put.as_ref(),
        }
    }

    /// Metrics of one side, zeroed when that leg never arrived.
    pub fn side_or_zero(&self, side: Side) -> LegMetrics {
        self.side(side).copied().unwrap_or_default()
    }

    /// Overwrite one side (last write wins).
    pub fn merge(&mut self, side: Side, metrics: LegMetrics) {
        match side {
            Side::Call => self.call = Some(metrics),
            Side::Put => self.put = Some(metrics),
        }
    }

    /// Put/call open interest ratio.
    pub fn pcr(&self) -> Ratio {
        Ratio::of(
            self.side_or_zero(Side::Put).open_interest as f64,
            self.side_or_zero(Side::Call).open_interest as f64,
        )
    }

    /// Put/call ratio of percentage change in open interest.
    pub fn intraday_pcr(&self) -> Ratio {
        Ratio::of(
            self.side_or_zero(Side::Put).pct_change_in_oi,
            self.side_or_zero(Side::Call).pct_change_in_oi,
        )
    }
}
