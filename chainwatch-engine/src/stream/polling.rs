use super::{FeedConnection, FeedConnector};
use crate::error::StreamError;
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};
use url::Url;

/// HTTP polling backend: every tick is one GET whose body is one payload.
///
/// Connecting performs the first GET, so an unreachable endpoint fails the
/// connect and counts against the retry budget like any other transport.
#[derive(Debug, Clone)]
pub struct PollingConnector {
    client: reqwest::Client,
    url: Url,
    interval: Duration,
}

impl PollingConnector {
    pub fn new(url: Url, interval: Duration) -> Result<Self, StreamError> {
        let client = reqwest::Client::builder()
            .timeout(interval.max(Duration::from_secs(10)))
            .build()?;
        Ok(Self {
            client,
            url,
            interval: interval.max(Duration::from_millis(100)),
        })
    }
}

#[async_trait]
impl FeedConnector for PollingConnector {
    async fn connect(&self) -> Result<Box<dyn FeedConnection>, StreamError> {
        info!(url = %self.url, interval_ms = self.interval.as_millis() as u64, "polling feed");

        let first = fetch(&self.client, &self.url).await?;

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Ok(Box::new(PollingConnection {
            client: self.client.clone(),
            url: self.url.clone(),
            ticker,
            pending: Some(first),
        }))
    }
}

struct PollingConnection {
    client: reqwest::Client,
    url: Url,
    ticker: Interval,
    /// Body fetched while connecting, delivered first
    pending: Option<String>,
}

#[async_trait]
impl FeedConnection for PollingConnection {
    async fn next_message(&mut self) -> Result<Option<String>, StreamError> {
        if let Some(body) = self.pending.take() {
            return Ok(Some(body));
        }

        self.ticker.tick().await;
        fetch(&self.client, &self.url).await.map(Some)
    }

    async fn close(&mut self) {
        debug!("polling stopped");
    }
}

async fn fetch(client: &reqwest::Client, url: &Url) -> Result<String, StreamError> {
    let response = client
        .get(url.clone())
        .header(ACCEPT, "application/json")
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(StreamError::Http {
            status: status.as_u16(),
        });
    }

    let body = response.text().await?;
    debug!(bytes = body.len(), "poll response");
    Ok(body)
}
