//! Decoding of inbound stream messages into [`Snapshot`]s.
//!
//! Accepted shapes: a single snapshot object, an array of snapshot objects
//! (historical replay), or the exchange envelope `{ "records": snapshot }`.
//! Anything else is a [`ParseError`].

use crate::error::{ParseError, ValidationError};
use crate::types::{ObservedAt, OptionChainEntry, OptionLeg, Side, Snapshot, SnapshotMessage};
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone};
use serde_json::Value;
use tracing::warn;

/// Exchange-local timestamp layouts, tried in order after RFC 3339.
const LOCAL_TIMESTAMP_FORMATS: [&str; 4] = [
    "%d-%b-%Y %H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%d-%m-%Y %H:%M:%S",
];

/// Result of decoding one message.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedBatch {
    pub snapshots: Vec<Snapshot>,
}

impl ParsedBatch {
    /// Latest observation time across the batch, for status display.
    pub fn latest(&self) -> Option<ObservedAt> {
        self.snapshots.iter().filter_map(|s| s.timestamp).max()
    }

    /// Total number of legs across every snapshot.
    pub fn leg_count(&self) -> usize {
        self.snapshots.iter().map(|s| s.legs.len()).sum()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SnapshotParser {
    offset: FixedOffset,
}

impl SnapshotParser {
    /// `offset` is the exchange's UTC offset, used for timestamps that carry
    /// no zone of their own.
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Decode one raw message.
    ///
    /// Returns `Ok(None)` for empty or whitespace-only payloads.
    pub fn parse(&self, raw: &str) -> Result<Option<ParsedBatch>, ParseError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(None);
        }

        let value: Value = serde_json::from_str(raw)?;
        let messages = match value {
            Value::Array(elements) => elements
                .into_iter()
                .enumerate()
                .map(|(index, element)| {
                    if !element.is_object() {
                        return Err(ParseError::UnexpectedShape(format!(
                            "batch element {index} is not an object"
                        )));
                    }
                    serde_json::from_value::<SnapshotMessage>(element).map_err(|error| {
                        ParseError::UnexpectedShape(format!("batch element {index}: {error}"))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            Value::Object(mut object) => match object.remove("records") {
                Some(records) => vec![serde_json::from_value::<SnapshotMessage>(records)?],
                None => vec![serde_json::from_value::<SnapshotMessage>(Value::Object(object))?],
            },
            other => {
                return Err(ParseError::UnexpectedShape(format!(
                    "expected snapshot object or array, found {}",
                    json_kind(&other)
                )));
            }
        };

        let snapshots = messages
            .into_iter()
            .map(|message| self.decode(message))
            .collect();

        Ok(Some(ParsedBatch { snapshots }))
    }

    fn decode(&self, message: SnapshotMessage) -> Snapshot {
        let timestamp = match message.timestamp.as_deref().map(|raw| self.parse_timestamp(raw)) {
            Some(Ok(timestamp)) => Some(timestamp),
            Some(Err(error)) => {
                warn!(%error, "snapshot timestamp rejected, its entries will be dropped");
                None
            }
            None => None,
        };

        let legs = message.data.into_iter().flat_map(flatten_entry).collect();

        Snapshot {
            timestamp,
            underlying_value: message.underlying_value,
            legs,
        }
    }

    /// Parse an observation timestamp, RFC 3339 first then exchange-local
    /// layouts at the configured offset.
    pub fn parse_timestamp(&self, raw: &str) -> Result<ObservedAt, ValidationError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ValidationError::MissingTimestamp);
        }

        if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
            return Ok(timestamp.with_timezone(&self.offset));
        }

        LOCAL_TIMESTAMP_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
            .and_then(|naive| self.offset.from_local_datetime(&naive).single())
            .ok_or_else(|| ValidationError::InvalidTimestamp(raw.to_string()))
    }
}

/// Split one strike/expiry entry into its call and put legs.
fn flatten_entry(entry: OptionChainEntry) -> impl Iterator<Item = OptionLeg> {
    let OptionChainEntry {
        strike_price,
        expiry_date,
        call,
        put,
    } = entry;

    let call = call.map(|metrics| OptionLeg {
        side: Side::Call,
        strike: strike_price,
        expiry: expiry_date.clone(),
        metrics,
    });
    let put = put.map(|metrics| OptionLeg {
        side: Side::Put,
        strike: strike_price,
        expiry: expiry_date,
        metrics,
    });

    call.into_iter().chain(put)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
