use crate::buckets::TimeSlot;
use crate::error::EngineError;
use crate::state::{EngineConfig, EngineState, EngineView, RecordFilter};
use crate::stream::{FeedConnector, StreamClient, StreamConfig, StreamEvent, StreamHandle, connector_for};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A running feed subscription wired to its engine state.
///
/// One task owns the connection, one worker task applies its events to the
/// [`EngineState`] strictly in order. Readers take short read locks or
/// cloned [`EngineView`]s and can wait on [`Session::subscribe`] for change
/// notifications.
pub struct Session {
    state: Arc<RwLock<EngineState>>,
    revision_rx: watch::Receiver<u64>,
    stream: StreamHandle,
    worker: JoinHandle<()>,
}

impl Session {
    /// Start a session on the backend selected by `stream.transport`.
    pub fn start(stream: StreamConfig, engine: EngineConfig) -> Result<Self, EngineError> {
        let connector = connector_for(&stream)?;
        Self::with_connector(stream, engine, connector)
    }

    /// Start a session on an explicit connector.
    pub fn with_connector(
        stream: StreamConfig,
        engine: EngineConfig,
        connector: Arc<dyn FeedConnector>,
    ) -> Result<Self, EngineError> {
        let state = Arc::new(RwLock::new(EngineState::new(engine)?));
        let (revision_tx, revision_rx) = watch::channel(0u64);

        info!(url = %stream.url, "starting chain session");
        let (events, handle) = StreamClient::new(stream, connector).start();
        let worker = tokio::spawn(run_worker(events, state.clone(), revision_tx));

        Ok(Self {
            state,
            revision_rx,
            stream: handle,
            worker,
        })
    }

    pub fn view(&self, filter: &RecordFilter) -> EngineView {
        self.state.read().view(filter)
    }

    pub fn bucket(&self, expiry: &str, strike: Decimal) -> Vec<TimeSlot> {
        self.state.read().bucket(expiry, strike)
    }

    pub fn strikes(&self, expiry: &str) -> Vec<Decimal> {
        self.state.read().strikes(expiry)
    }

    pub fn default_strike(&self, expiry: &str) -> Option<Decimal> {
        self.state.read().default_strike(expiry)
    }

    /// Run `f` under a read lock.
    pub fn read<R>(&self, f: impl FnOnce(&EngineState) -> R) -> R {
        f(&self.state.read())
    }

    /// Rebuild the canonical mapping from retained history.
    pub fn rebuild(&self) {
        self.state.write().rebuild();
    }

    /// Revision counter bumped after every applied event.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision_rx.clone()
    }

    /// Close the stream, cancel any pending reconnect and drain the worker.
    pub async fn shutdown(self) {
        self.stream.close().await;
        if let Err(error) = self.worker.await {
            warn!(%error, "session worker ended abnormally");
        }
        info!("chain session shut down");
    }
}

/// Apply stream events one at a time.
async fn run_worker(
    mut events: mpsc::Receiver<StreamEvent>,
    state: Arc<RwLock<EngineState>>,
    revision_tx: watch::Sender<u64>,
) {
    while let Some(event) = events.recv().await {
        match event {
            StreamEvent::State(connection) => {
                debug!(phase = %connection.phase, retry_count = connection.retry_count, "connection state");
                state.write().set_connection(connection);
            }
            StreamEvent::Message(raw) => {
                // errors are logged and kept as the notice by the state itself
                if let Ok(report) = state.write().ingest(&raw) {
                    debug!(
                        snapshots = report.snapshots,
                        appended = report.appended,
                        evicted = report.evicted,
                        "message applied"
                    );
                }
            }
        }
        revision_tx.send_modify(|revision| *revision += 1);
    }
    debug!("session worker finished");
}
