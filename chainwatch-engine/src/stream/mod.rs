/// Push-stream connection lifecycle
///
/// A [`StreamClient`] owns one logical subscription: it connects through a
/// [`FeedConnector`], forwards every text payload in transport order and
/// reconnects with capped exponential backoff until the retry budget is
/// spent. Connection-state transitions travel on the same channel as the
/// payloads, so consumers observe both in one sequential order.
use crate::error::StreamError;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

mod backoff;
mod client;
mod polling;
mod sse;
mod transport;
mod websocket;

pub use backoff::Backoff;
pub use client::{StreamClient, StreamHandle};
pub use polling::PollingConnector;
pub use sse::{SseConnector, SseDecoder};
pub use transport::{FeedConnection, FeedConnector, connector_for};
pub use websocket::WebSocketConnector;

#[cfg(test)]
pub(crate) use client::tests::{Attempt, ScriptedConnector};

/// Which backend carries the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    WebSocket,
    /// Server-Sent Events over a long-lived HTTP response
    Sse,
    /// Plain HTTP GET every `interval`
    Polling { interval: Duration },
}

impl TransportKind {
    fn accepts_scheme(&self, scheme: &str) -> bool {
        match self {
            TransportKind::WebSocket => matches!(scheme, "ws" | "wss"),
            TransportKind::Sse | TransportKind::Polling { .. } => matches!(scheme, "http" | "https"),
        }
    }
}

/// Reconnect policy: `delay = min(base_delay * 2^retry, max_delay)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Retries allowed before the failure becomes terminal
    pub max_retries: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            max_retries: 5,
        }
    }
}

/// Stream client configuration
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Feed endpoint
    pub url: String,
    pub transport: TransportKind,
    /// Text frame sent once after each successful WebSocket open
    pub subscribe_message: Option<String>,
    pub backoff: BackoffConfig,
    /// WebSocket keep-alive ping interval
    pub ping_interval: Duration,
    /// Capacity of the event channel towards the engine
    pub channel_buffer_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9001".to_string(),
            transport: TransportKind::WebSocket,
            subscribe_message: None,
            backoff: BackoffConfig::default(),
            ping_interval: Duration::from_secs(30),
            channel_buffer_size: 1000,
        }
    }
}

impl StreamConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_subscribe_message(mut self, message: impl Into<String>) -> Self {
        self.subscribe_message = Some(message.into());
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_channel_buffer_size(mut self, size: usize) -> Self {
        self.channel_buffer_size = size.max(1);
        self
    }

    /// Parse the URL and check its scheme matches the transport.
    pub fn validate(&self) -> Result<Url, StreamError> {
        let url = Url::parse(&self.url).map_err(|error| StreamError::InvalidUrl {
            url: self.url.clone(),
            reason: error.to_string(),
        })?;

        if !self.transport.accepts_scheme(url.scheme()) {
            return Err(StreamError::InvalidUrl {
                url: self.url.clone(),
                reason: format!("scheme {} does not match transport {:?}", url.scheme(), self.transport),
            });
        }

        Ok(url)
    }
}

/// Where the connection currently is in its lifecycle.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum ConnectionPhase {
    #[default]
    #[display("connecting")]
    Connecting,
    #[display("connected")]
    Connected,
    #[display("receiving")]
    Receiving,
    /// Failed attempt, a reconnect is scheduled
    #[display("error")]
    Error,
    /// Retry budget exhausted
    #[display("failed")]
    Failed,
    /// Closed by the caller
    #[display("closed")]
    Closed,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ConnectionState {
    pub phase: ConnectionPhase,
    pub retry_count: u32,
    pub last_error: Option<StreamError>,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, ConnectionPhase::Failed | ConnectionPhase::Closed)
    }
}

/// What the stream task hands to the engine, in transport order.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    State(ConnectionState),
    Message(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = StreamConfig::new("https://feed.local/stream")
            .with_transport(TransportKind::Sse)
            .with_subscribe_message(r#"{"op":"subscribe"}"#)
            .with_ping_interval(Duration::from_secs(15))
            .with_channel_buffer_size(0);

        assert_eq!(config.url, "https://feed.local/stream");
        assert_eq!(config.transport, TransportKind::Sse);
        assert_eq!(config.subscribe_message.as_deref(), Some(r#"{"op":"subscribe"}"#));
        assert_eq!(config.ping_interval, Duration::from_secs(15));
        assert_eq!(config.channel_buffer_size, 1);
    }

    #[test]
    fn test_default_config() {
        let config = StreamConfig::default();
        assert_eq!(config.url, "ws://127.0.0.1:9001");
        assert_eq!(config.transport, TransportKind::WebSocket);
        assert_eq!(config.backoff.base_delay, Duration::from_millis(1000));
        assert_eq!(config.backoff.max_delay, Duration::from_millis(30_000));
        assert_eq!(config.backoff.max_retries, 5);
        assert_eq!(config.channel_buffer_size, 1000);
    }

    #[test]
    fn test_validate_url() {
        struct TestCase {
            url: &'static str,
            transport: TransportKind,
            valid: bool,
        }

        let polling = TransportKind::Polling {
            interval: Duration::from_secs(5),
        };

        let tests = vec![
            TestCase {
                // TC0: websocket
                url: "wss://feed.local/ws",
                transport: TransportKind::WebSocket,
                valid: true,
            },
            TestCase {
                // TC1: http for sse
                url: "http://127.0.0.1:8080/api/stream",
                transport: TransportKind::Sse,
                valid: true,
            },
            TestCase {
                // TC2: scheme mismatch
                url: "http://127.0.0.1:8080/ws",
                transport: TransportKind::WebSocket,
                valid: false,
            },
            TestCase {
                // TC3: polling over https
                url: "https://feed.local/option-chain",
                transport: polling,
                valid: true,
            },
            TestCase {
                // TC4: not a url
                url: "feed.local",
                transport: polling,
                valid: false,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = StreamConfig::new(test.url)
                .with_transport(test.transport)
                .validate();
            assert_eq!(actual.is_ok(), test.valid, "TC{} failed", index);
            if let Err(error) = actual {
                assert!(matches!(error, StreamError::InvalidUrl { .. }), "TC{} failed", index);
            }
        }
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(ConnectionPhase::Receiving.to_string(), "receiving");
        assert_eq!(ConnectionPhase::Failed.to_string(), "failed");
        assert!(ConnectionState { phase: ConnectionPhase::Closed, ..Default::default() }.is_terminal());
        assert!(!ConnectionState::default().is_terminal());
    }
}
