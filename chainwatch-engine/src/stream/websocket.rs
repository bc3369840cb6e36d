use super::{FeedConnection, FeedConnector};
use crate::error::StreamError;
use async_trait::async_trait;
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info};
use url::Url;

type WsRead = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// WebSocket feed backend
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: Url,
    subscribe_message: Option<String>,
    ping_interval: Duration,
}

impl WebSocketConnector {
    pub fn new(url: Url, subscribe_message: Option<String>, ping_interval: Duration) -> Self {
        Self {
            url,
            subscribe_message,
            ping_interval,
        }
    }
}

#[async_trait]
impl FeedConnector for WebSocketConnector {
    async fn connect(&self) -> Result<Box<dyn FeedConnection>, StreamError> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|error| StreamError::Connect(error.to_string()))?;
        info!(url = %self.url, "websocket connected");

        let (mut write, read) = ws_stream.split();

        if let Some(subscribe) = &self.subscribe_message {
            write.send(Message::Text(subscribe.clone().into())).await?;
            debug!(len = subscribe.len(), "sent subscribe frame");
        }

        // Ping task owns the write half; it sends a close frame on shutdown
        let ping_interval = self.ping_interval;
        let (ping_shutdown_tx, mut ping_shutdown_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(
                tokio::time::Instant::now() + ping_interval,
                ping_interval,
            );
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if write.send(Message::Ping(vec![].into())).await.is_err() {
                            debug!("failed to send ping, connection likely dead");
                            break;
                        }
                    }
                    shutdown = ping_shutdown_rx.recv() => {
                        if shutdown.is_some() {
                            let _ = write.send(Message::Close(None)).await;
                        }
                        debug!("ping task shutting down");
                        break;
                    }
                }
            }
        });

        Ok(Box::new(WebSocketConnection {
            read,
            ping_shutdown_tx,
        }))
    }
}

struct WebSocketConnection {
    read: WsRead,
    ping_shutdown_tx: mpsc::Sender<()>,
}

#[async_trait]
impl FeedConnection for WebSocketConnection {
    async fn next_message(&mut self) -> Result<Option<String>, StreamError> {
        while let Some(message) = self.read.next().await {
            match message? {
                Message::Text(text) => return Ok(Some(text.as_str().to_owned())),
                Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Ok(Some(text)),
                    Err(_) => debug!(len = bytes.len(), "ignoring non UTF-8 binary frame"),
                },
                Message::Close(frame) => {
                    info!(?frame, "server closed websocket");
                    return Ok(None);
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
        Ok(None)
    }

    async fn close(&mut self) {
        let _ = self.ping_shutdown_tx.send(()).await;
    }
}
