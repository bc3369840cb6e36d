/// Environment-driven configuration for the terminal UI
///
/// Unset or unparsable variables fall back to the defaults.
use chainwatch_engine::{EngineConfig, StreamConfig, TransportKind};
use std::path::PathBuf;
use std::time::Duration;

const ENV_URL: &str = "CHAINWATCH_URL";
const ENV_TRANSPORT: &str = "CHAINWATCH_TRANSPORT";
const ENV_POLL_SECS: &str = "CHAINWATCH_POLL_SECS";
const ENV_HISTORY: &str = "CHAINWATCH_HISTORY";
const ENV_SUBSCRIBE: &str = "CHAINWATCH_SUBSCRIBE";
const ENV_LOG: &str = "CHAINWATCH_LOG";

const DEFAULT_POLL_SECS: u64 = 5;
const DEFAULT_LOG_PATH: &str = "chainwatch.log";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub stream: StreamConfig,
    pub engine: EngineConfig,
    pub log_path: PathBuf,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let poll_secs = get(ENV_POLL_SECS)
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_POLL_SECS);

        let transport = match get(ENV_TRANSPORT).map(|value| value.to_ascii_lowercase()).as_deref() {
            Some("sse") => TransportKind::Sse,
            Some("poll" | "polling") => TransportKind::Polling {
                interval: Duration::from_secs(poll_secs),
            },
            _ => TransportKind::WebSocket,
        };

        let url = get(ENV_URL).unwrap_or_else(|| default_url(transport).to_string());

        let mut stream = StreamConfig::new(url).with_transport(transport);
        if let Some(subscribe) = get(ENV_SUBSCRIBE) {
            stream = stream.with_subscribe_message(subscribe);
        }

        let mut engine = EngineConfig::default();
        if let Some(capacity) = get(ENV_HISTORY)
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|capacity| *capacity > 0)
        {
            engine = engine.with_history_capacity(capacity);
        }

        let log_path = get(ENV_LOG)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_PATH));

        Self {
            stream,
            engine,
            log_path,
        }
    }
}

fn default_url(transport: TransportKind) -> &'static str {
    match transport {
        TransportKind::WebSocket => "ws://127.0.0.1:9001",
        TransportKind::Sse => "http://127.0.0.1:8080/api/stream",
        TransportKind::Polling { .. } => "http://127.0.0.1:8080/api/option-chain",
    }
}
