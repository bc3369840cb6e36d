/// Core data types for option-chain snapshots
///
/// The `*Message`/`*Entry` types match the JSON pushed by the feed; the rest
/// is the decoded, flattened form the reconciler consumes.
use crate::error::ValidationError;
use chrono::{DateTime, FixedOffset};
use derive_more::Display;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Observation instant in exchange-local time.
pub type ObservedAt = DateTime<FixedOffset>;

/// One snapshot object as pushed by the feed.
///
/// Identity fields are optional here so that a single malformed entry can be
/// dropped without rejecting the whole message.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMessage {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default, deserialize_with = "de::f64_or_zero")]
    pub underlying_value: f64,
    pub data: Vec<OptionChainEntry>,
}

/// One strike/expiry pair carrying one or both legs.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionChainEntry {
    #[serde(default)]
    pub strike_price: Option<Decimal>,
    #[serde(default)]
    pub expiry_date: Option<SmolStr>,
    #[serde(rename = "CE", default)]
    pub call: Option<LegMetrics>,
    #[serde(rename = "PE", default)]
    pub put: Option<LegMetrics>,
}

/// Per-leg metrics. Absent or null numbers decode as zero so downstream
/// arithmetic stays total.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize, Serialize)]
pub struct LegMetrics {
    #[serde(rename = "openInterest", default, deserialize_with = "de::u64_or_zero")]
    pub open_interest: u64,
    #[serde(rename = "changeinOpenInterest", default, deserialize_with = "de::i64_or_zero")]
    pub change_in_oi: i64,
    #[serde(rename = "pchangeinOpenInterest", default, deserialize_with = "de::f64_or_zero")]
    pub pct_change_in_oi: f64,
    #[serde(rename = "totalTradedVolume", default, deserialize_with = "de::u64_or_zero")]
    pub volume: u64,
    #[serde(rename = "impliedVolatility", default, deserialize_with = "de::f64_or_zero")]
    pub implied_volatility: f64,
    #[serde(rename = "lastPrice", default, deserialize_with = "de::f64_or_zero")]
    pub last_price: f64,
}

/// Option side (call or put)
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum Side {
    #[display("CALL")]
    #[serde(rename = "CE")]
    Call,
    #[display("PUT")]
    #[serde(rename = "PE")]
    Put,
}

impl Side {
    /// Exchange shorthand used on the wire
    pub fn code(&self) -> &'static str {
        match self {
            Side::Call => "CE",
            Side::Put => "PE",
        }
    }
}

/// One side of one contract, as received.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionLeg {
    pub side: Side,
    pub strike: Option<Decimal>,
    pub expiry: Option<SmolStr>,
    pub metrics: LegMetrics,
}

impl OptionLeg {
    /// Strike and expiry, when both are present and the expiry is not blank.
    pub fn identity(&self) -> Result<(Decimal, SmolStr), ValidationError> {
        let strike = self.strike.ok_or(ValidationError::MissingStrike)?;
        let expiry = self
            .expiry
            .clone()
            .filter(|expiry| !expiry.trim().is_empty())
            .ok_or(ValidationError::MissingExpiry)?;
        Ok((strike, expiry))
    }

    fn same_contract(&self, other: &OptionLeg) -> bool {
        self.side == other.side && self.strike == other.strike && self.expiry == other.expiry
    }
}

/// One observation instant of the whole chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub timestamp: Option<ObservedAt>,
    pub underlying_value: f64,
    pub legs: Vec<OptionLeg>,
}

impl Snapshot {
    /// Flatten into reconciler entries, each tagged with this snapshot's
    /// own timestamp and underlying value.
    pub fn entries(&self) -> impl Iterator<Item = LegEntry> + '_ {
        self.legs.iter().map(move |leg| LegEntry {
            leg: leg.clone(),
            timestamp: self.timestamp,
            underlying_value: self.underlying_value,
        })
    }

    /// Fold a later message for the same instant into this one. Legs of the
    /// same contract and side are overwritten, new ones are appended.
    pub fn merge(&mut self, other: Snapshot) {
        self.underlying_value = other.underlying_value;
        for leg in other.legs {
            match self.legs.iter_mut().find(|held| held.same_contract(&leg)) {
                Some(held) => held.metrics = leg.metrics,
                None => self.legs.push(leg),
            }
        }
    }

    /// Find the metrics of one leg at `(expiry, strike)`.
    pub fn leg(&self, expiry: &str, strike: Decimal, side: Side) -> Option<&LegMetrics> {
        self.legs
            .iter()
            .find(|leg| {
                leg.side == side
                    && leg.strike == Some(strike)
                    && leg.expiry.as_deref() == Some(expiry)
            })
            .map(|leg| &leg.metrics)
    }
}

/// A leg plus the snapshot context it was observed in.
#[derive(Debug, Clone, PartialEq)]
pub struct LegEntry {
    pub leg: OptionLeg,
    pub timestamp: Option<ObservedAt>,
    pub underlying_value: f64,
}

/// Lenient numeric decoding: numbers of either kind or null.
mod de {
    use serde::{Deserialize, Deserializer};

    fn finite<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.filter(|value| value.is_finite()))
    }

    pub fn u64_or_zero<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        Ok(finite(deserializer)?
            .map(|value| value.max(0.0).round() as u64)
            .unwrap_or(0))
    }

    pub fn i64_or_zero<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        Ok(finite(deserializer)?
            .map(|value| value.round() as i64)
            .unwrap_or(0))
    }

    pub fn f64_or_zero<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(finite(deserializer)?.unwrap_or(0.0))
    }
}
