//! In-memory reply serving locally supplied document bytes.
//!
//! [`SyntheticReply`] behaves like a finished network response: status 200,
//! content headers, sequential reads, and readiness events that are handed
//! out one scheduler turn at a time so callers never see it complete
//! synchronously.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use url::Url;

use crate::types::{Exchange, Response};

const READ_CHUNK: usize = 16 * 1024;

/// Readiness events a reply goes through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyEvent {
    MetaDataChanged,
    DownloadProgress { received: u64, total: u64 },
    ReadyRead,
    Finished,
}

/// Result of a sequential read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadChunk {
    Data(Bytes),
    EndOfData,
}

/// A one-shot, fully buffered reply over local content.
#[derive(Debug)]
pub struct SyntheticReply {
    content: Bytes,
    content_type: String,
    offset: usize,
    staged: VecDeque<ReplyEvent>,
}

impl SyntheticReply {
    pub fn new(content: Bytes, content_type: impl Into<String>) -> Self {
        let total = content.len() as u64;
        let staged = VecDeque::from([
            ReplyEvent::MetaDataChanged,
            ReplyEvent::DownloadProgress {
                received: total,
                total,
            },
            ReplyEvent::ReadyRead,
            ReplyEvent::Finished,
        ]);
        Self {
            content,
            content_type: content_type.into(),
            offset: 0,
            staged,
        }
    }

    pub fn status(&self) -> u16 {
        200
    }

    pub fn reason(&self) -> &'static str {
        "OK"
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn content_length(&self) -> usize {
        self.content.len()
    }

    pub fn headers(&self) -> Vec<(String, String)> {
        vec![
            ("Content-Type".to_string(), self.content_type.clone()),
            ("Content-Length".to_string(), self.content.len().to_string()),
        ]
    }

    /// Bytes not yet read.
    pub fn bytes_available(&self) -> usize {
        self.content.len() - self.offset
    }

    /// Replies can only be read front to back.
    pub fn is_sequential(&self) -> bool {
        true
    }

    /// Read up to `max` bytes, or report end-of-data once everything was read.
    pub fn read(&mut self, max: usize) -> ReadChunk {
        if self.offset >= self.content.len() {
            return ReadChunk::EndOfData;
        }
        let n = max.min(self.bytes_available());
        let chunk = self.content.slice(self.offset..self.offset + n);
        self.offset += n;
        ReadChunk::Data(chunk)
    }

    /// Nothing to cancel: the content is already buffered.
    pub fn abort(&mut self) {}

    /// Next staged readiness event, delivered after yielding to the scheduler.
    ///
    /// Returns `None` once `Finished` has been handed out.
    pub async fn next_event(&mut self) -> Option<ReplyEvent> {
        if self.staged.is_empty() {
            return None;
        }
        tokio::task::yield_now().await;
        self.staged.pop_front()
    }

    /// Drive the reply through its events and collect the exchange for `url`.
    pub async fn into_exchange(mut self, url: Url) -> Exchange {
        let mut body = BytesMut::with_capacity(self.bytes_available());
        while let Some(event) = self.next_event().await {
            match event {
                ReplyEvent::ReadyRead => {
                    while let ReadChunk::Data(chunk) = self.read(READ_CHUNK) {
                        body.extend_from_slice(&chunk);
                    }
                }
                ReplyEvent::Finished => break,
                ReplyEvent::MetaDataChanged | ReplyEvent::DownloadProgress { .. } => {}
            }
        }

        Exchange::response(
            url,
            Response {
                status: self.status(),
                reason: self.reason().to_string(),
                headers: self.headers(),
                body: body.freeze(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;

    use super::*;
    use crate::types::ExchangeOutcome;

    #[test]
    fn test_read_to_exhaustion() {
        let mut reply = SyntheticReply::new(Bytes::from_static(b"hello world"), "text/html");
        assert_eq!(reply.bytes_available(), 11);

        let mut collected = Vec::new();
        while let ReadChunk::Data(chunk) = reply.read(4) {
            assert!(chunk.len() <= 4);
            collected.extend_from_slice(&chunk);
        }
        assert_eq!(collected, b"hello world");
        assert_eq!(reply.bytes_available(), 0);
        assert_eq!(reply.read(4), ReadChunk::EndOfData);
    }

    #[test]
    fn test_headers_and_status() {
        let reply = SyntheticReply::new(Bytes::from_static(b"<html></html>"), "text/html");
        assert_eq!(reply.status(), 200);
        assert_eq!(reply.reason(), "OK");
        assert!(reply.is_sequential());
        let headers = reply.headers();
        assert!(headers.contains(&("Content-Type".to_string(), "text/html".to_string())));
        assert!(headers.contains(&("Content-Length".to_string(), "13".to_string())));
    }

    #[test]
    fn test_abort_keeps_content() {
        let mut reply = SyntheticReply::new(Bytes::from_static(b"abc"), "text/plain");
        reply.abort();
        assert_eq!(reply.read(10), ReadChunk::Data(Bytes::from_static(b"abc")));
    }

    #[tokio::test]
    async fn test_events_fire_once_in_order() {
        let mut reply = SyntheticReply::new(Bytes::from_static(b"abc"), "text/plain");
        // Nothing is delivered before the scheduler has run once.
        assert!(reply.next_event().now_or_never().is_none());
        assert_eq!(reply.bytes_available(), 3);

        let mut events = Vec::new();
        while let Some(e) = reply.next_event().await {
            events.push(e);
        }
        assert_eq!(
            events,
            vec![
                ReplyEvent::MetaDataChanged,
                ReplyEvent::DownloadProgress {
                    received: 3,
                    total: 3
                },
                ReplyEvent::ReadyRead,
                ReplyEvent::Finished,
            ]
        );
        assert!(reply.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_into_exchange_carries_body() {
        let content = Bytes::from(vec![b'x'; READ_CHUNK * 2 + 7]);
        let reply = SyntheticReply::new(content.clone(), "text/html");
        let url = Url::parse("stdin://localhost/").unwrap();
        let exchange = reply.into_exchange(url).await;
        let ExchangeOutcome::Response(response) = exchange.outcome else {
            panic!("expected a response");
        };
        assert_eq!(response.status, 200);
        assert_eq!(response.body, content);
        assert_eq!(response.header("content-type"), Some("text/html"));
    }
}
