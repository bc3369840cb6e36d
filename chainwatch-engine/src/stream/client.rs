use super::{
    Backoff, ConnectionPhase, ConnectionState, FeedConnection, FeedConnector, StreamConfig,
    StreamEvent, connector_for,
};
use crate::error::StreamError;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Stream client for one feed subscription
pub struct StreamClient {
    config: StreamConfig,
    connector: Arc<dyn FeedConnector>,
}

impl StreamClient {
    pub fn new(config: StreamConfig, connector: Arc<dyn FeedConnector>) -> Self {
        Self { config, connector }
    }

    /// Client using the backend selected by `config.transport`.
    pub fn from_config(config: StreamConfig) -> Result<Self, StreamError> {
        let connector = connector_for(&config)?;
        Ok(Self::new(config, connector))
    }

    /// Spawn the connection task.
    ///
    /// Returns the ordered event receiver and the handle that closes the
    /// subscription.
    pub fn start(self) -> (mpsc::Receiver<StreamEvent>, StreamHandle) {
        let (event_tx, event_rx) = mpsc::channel(self.config.channel_buffer_size.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(run_stream(self.config, self.connector, event_tx, shutdown_rx));

        (event_rx, StreamHandle { shutdown_tx, task })
    }
}

/// Caller side of a running [`StreamClient`].
///
/// Dropping the handle also stops the client.
#[derive(Debug)]
pub struct StreamHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl StreamHandle {
    /// Close the open connection and cancel any scheduled reconnect, then
    /// wait for the connection task to finish.
    pub async fn close(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(error) = self.task.await {
            warn!(%error, "stream task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

enum Outcome {
    Closed,
    Failed(StreamError),
}

enum Pump {
    Failed(StreamError),
    Shutdown,
    ReceiverGone,
}

/// Connection loop with capped exponential backoff
async fn run_stream(
    config: StreamConfig,
    connector: Arc<dyn FeedConnector>,
    event_tx: mpsc::Sender<StreamEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(url = %config.url, transport = ?config.transport, "starting stream client");

    let mut backoff = Backoff::new(config.backoff);
    let mut state = ConnectionState::default();

    let outcome = loop {
        state.phase = ConnectionPhase::Connecting;
        if !emit(&event_tx, &state).await {
            return;
        }
        debug!(retry_count = state.retry_count, "connecting to feed");

        let connected = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown_rx) => break Outcome::Closed,
            result = connector.connect() => result,
        };

        let error = match connected {
            Ok(mut connection) => {
                backoff.reset();
                state = ConnectionState {
                    phase: ConnectionPhase::Connected,
                    retry_count: 0,
                    last_error: None,
                };
                if !emit(&event_tx, &state).await {
                    connection.close().await;
                    return;
                }

                match pump(connection.as_mut(), &event_tx, &mut state, &mut shutdown_rx).await {
                    Pump::Failed(error) => error,
                    Pump::Shutdown => {
                        connection.close().await;
                        break Outcome::Closed;
                    }
                    Pump::ReceiverGone => {
                        warn!("event receiver dropped, stopping stream client");
                        connection.close().await;
                        return;
                    }
                }
            }
            Err(error) => error,
        };

        warn!(%error, retry_count = backoff.retry_count(), "stream connection failed");

        let Some(delay) = backoff.next_delay() else {
            let terminal = StreamError::RetriesExhausted {
                attempts: backoff.retry_count() + 1,
                last_error: error.to_string(),
            };
            error!(%terminal, "stream retry budget exhausted");
            break Outcome::Failed(terminal);
        };

        state.phase = ConnectionPhase::Error;
        state.retry_count = backoff.retry_count();
        state.last_error = Some(error);
        if !emit(&event_tx, &state).await {
            return;
        }

        info!(
            retry_count = state.retry_count,
            delay_ms = delay.as_millis() as u64,
            "reconnect scheduled"
        );

        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown_rx) => break Outcome::Closed,
            _ = tokio::time::sleep(delay) => {}
        }
    };

    match outcome {
        Outcome::Closed => {
            info!("stream closed by caller");
            state.phase = ConnectionPhase::Closed;
        }
        Outcome::Failed(terminal) => {
            state.phase = ConnectionPhase::Failed;
            state.last_error = Some(terminal);
        }
    }
    emit(&event_tx, &state).await;
}

/// Forward payloads of one open connection until it fails or shutdown.
async fn pump(
    connection: &mut dyn FeedConnection,
    event_tx: &mpsc::Sender<StreamEvent>,
    state: &mut ConnectionState,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Pump {
    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown_requested(shutdown_rx) => return Pump::Shutdown,
            next = connection.next_message() => next,
        };

        match next {
            Ok(Some(text)) => {
                if state.phase != ConnectionPhase::Receiving {
                    state.phase = ConnectionPhase::Receiving;
                    if !emit(event_tx, state).await {
                        return Pump::ReceiverGone;
                    }
                }
                if event_tx.send(StreamEvent::Message(text)).await.is_err() {
                    return Pump::ReceiverGone;
                }
            }
            Ok(None) => return Pump::Failed(StreamError::Closed),
            Err(error) => return Pump::Failed(error),
        }
    }
}

async fn emit(event_tx: &mpsc::Sender<StreamEvent>, state: &ConnectionState) -> bool {
    event_tx.send(StreamEvent::State(state.clone())).await.is_ok()
}

/// Resolves once shutdown was requested or the handle was dropped.
async fn shutdown_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow_and_update() {
            return;
        }
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}
