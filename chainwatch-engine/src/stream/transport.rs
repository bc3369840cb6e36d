use super::{
    PollingConnector, SseConnector, StreamConfig, TransportKind, WebSocketConnector,
};
use crate::error::StreamError;
use async_trait::async_trait;
use std::sync::Arc;

/// Opens connections to one feed endpoint.
#[async_trait]
pub trait FeedConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn FeedConnection>, StreamError>;
}

/// One open connection yielding text payloads in transport order.
#[async_trait]
pub trait FeedConnection: Send {
    /// Next text payload. `Ok(None)` means the remote ended the stream.
    async fn next_message(&mut self) -> Result<Option<String>, StreamError>;

    /// Release the connection. Called on caller-initiated shutdown only;
    /// dropping a connection must also release it.
    async fn close(&mut self);
}

/// Build the connector matching `config.transport`.
pub fn connector_for(config: &StreamConfig) -> Result<Arc<dyn FeedConnector>, StreamError> {
    let url = config.validate()?;

    let connector: Arc<dyn FeedConnector> = match config.transport {
        TransportKind::WebSocket => Arc::new(WebSocketConnector::new(
            url,
            config.subscribe_message.clone(),
            config.ping_interval,
        )),
        TransportKind::Sse => Arc::new(SseConnector::new(url)?),
        TransportKind::Polling { interval } => Arc::new(PollingConnector::new(url, interval)?),
    };

    Ok(connector)
}
