use super::{FeedConnection, FeedConnector};
use crate::error::StreamError;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use std::collections::VecDeque;
use tracing::{debug, info};
use url::Url;

/// Server-Sent Events feed backend
#[derive(Debug, Clone)]
pub struct SseConnector {
    client: reqwest::Client,
    url: Url,
}

impl SseConnector {
    pub fn new(url: Url) -> Result<Self, StreamError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl FeedConnector for SseConnector {
    async fn connect(&self) -> Result<Box<dyn FeedConnection>, StreamError> {
        let response = self
            .client
            .get(self.url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::Http {
                status: status.as_u16(),
            });
        }
        info!(url = %self.url, "event stream opened");

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed();

        Ok(Box::new(SseConnection {
            body,
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
        }))
    }
}

struct SseConnection {
    body: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
}

#[async_trait]
impl FeedConnection for SseConnection {
    async fn next_message(&mut self) -> Result<Option<String>, StreamError> {
        loop {
            if let Some(data) = self.pending.pop_front() {
                return Ok(Some(data));
            }

            match self.body.next().await {
                Some(Ok(chunk)) => self.pending.extend(self.decoder.push(&chunk)),
                Some(Err(error)) => return Err(error.into()),
                None => return Ok(None),
            }
        }
    }

    async fn close(&mut self) {
        debug!("closing event stream");
        self.pending.clear();
        self.body = futures::stream::empty().boxed();
    }
}

/// Incremental decoder for `text/event-stream` bodies.
///
/// Only `data:` fields are kept; consecutive data lines are joined with a
/// newline and an event is dispatched on the blank line that ends it.
/// Comment lines and other fields (`event:`, `id:`, `retry:`) are ignored.
#[derive(Debug, Clone, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Feed one body chunk, returning every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            let line = String::from_utf8_lossy(&line);
            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                }
                continue;
            }

            if let Some(value) = line.strip_prefix("data:") {
                let value = value.strip_prefix(' ').unwrap_or(value);
                self.data.push(value.to_owned());
            } else if line == "data" {
                self.data.push(String::new());
            }
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_decoder() {
        struct TestCase {
            chunks: Vec<&'static str>,
            expected: Vec<&'static str>,
        }

        let tests = vec![
            TestCase {
                // TC0: single event
                chunks: vec!["data: {\"a\":1}\n\n"],
                expected: vec!["{\"a\":1}"],
            },
            TestCase {
                // TC1: event split across chunks
                chunks: vec!["da", "ta: [1,", "2]\n", "\n"],
                expected: vec!["[1,2]"],
            },
            TestCase {
                // TC2: multi-line data, CRLF, comment and other fields
                chunks: vec![": keep-alive\r\nevent: chain\r\ndata: a\r\ndata:b\r\nid: 7\r\n\r\n"],
                expected: vec!["a\nb"],
            },
            TestCase {
                // TC3: two events in one chunk, trailing partial event held back
                chunks: vec!["data: 1\n\ndata: 2\n\ndata: 3\n"],
                expected: vec!["1", "2"],
            },
            TestCase {
                // TC4: blank lines without data dispatch nothing
                chunks: vec!["\n\n: ping\n\n"],
                expected: vec![],
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let mut decoder = SseDecoder::default();
            let actual: Vec<String> = test
                .chunks
                .iter()
                .flat_map(|chunk| decoder.push(chunk.as_bytes()))
                .collect();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }
}
