use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors generated in `chainwatch-engine`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Error)]
pub enum EngineError {
    #[error("TransportError: {0}")]
    Transport(#[from] StreamError),

    #[error("ParseError: {0}")]
    Parse(#[from] ParseError),

    #[error("ValidationError: {0}")]
    Validation(#[from] ValidationError),

    #[error("no valid records in batch ({dropped} entries dropped)")]
    EmptyResult { dropped: usize },

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl EngineError {
    /// Determine if an error ends the session and needs manual intervention.
    ///
    /// Only an exhausted reconnect budget is terminal. Everything else is
    /// recovered per entry, per message or by the reconnect loop.
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_terminal(&self) -> bool {
        match self {
            EngineError::Transport(StreamError::RetriesExhausted { .. }) => true,
            _ => false,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        !self.is_terminal()
    }
}

/// Failures of the push-stream connection.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
pub enum StreamError {
    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("unexpected HTTP status {status}")]
    Http { status: u16 },

    #[error("stream closed by remote")]
    Closed,

    #[error("invalid stream url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("reconnect budget exhausted after {attempts} attempts, last error: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl From<tokio_tungstenite::tungstenite::Error> for StreamError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(value.to_string())
    }
}

impl From<reqwest::Error> for StreamError {
    fn from(value: reqwest::Error) -> Self {
        match value.status() {
            Some(status) => Self::Http {
                status: status.as_u16(),
            },
            None if value.is_connect() => Self::Connect(value.to_string()),
            None => Self::Transport(value.to_string()),
        }
    }
}

/// An inbound message that could not be decoded into snapshots.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(String),

    #[error("unexpected payload shape: {0}")]
    UnexpectedShape(String),
}

impl From<serde_json::Error> for ParseError {
    fn from(value: serde_json::Error) -> Self {
        if value.is_data() {
            Self::UnexpectedShape(value.to_string())
        } else {
            Self::Json(value.to_string())
        }
    }
}

/// A well-formed entry that lacks part of its record identity.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
pub enum ValidationError {
    #[error("entry has no strike price")]
    MissingStrike,

    #[error("entry has no expiry date")]
    MissingExpiry,

    #[error("entry has no observation timestamp")]
    MissingTimestamp,

    #[error("unrecognised timestamp format: {0}")]
    InvalidTimestamp(String),
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
pub enum ConfigError {
    #[error("session window must open before it closes ({open} >= {close})")]
    EmptySession { open: String, close: String },

    #[error("session resolution must be at least one second")]
    InvalidResolution,

    #[error("history capacity must be greater than zero")]
    ZeroCapacity,
}
