//! Server-sent event decoding for streaming endpoints.
//!
//! The decoder is fed raw body chunks and yields the `data:` payloads of
//! complete events. [`SseStream`] drives it from a response body and parses
//! each payload as JSON, skipping payloads that do not parse.

use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use futures_util::Stream;
use serde::de::DeserializeOwned;

use deva_x402::DevaError;

use crate::send::ByteStream;

/// Payload that ends a stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Incremental SSE decoder.
///
/// Multi-byte characters split across chunks are reassembled, CRLF line
/// endings are normalized and events are separated by blank lines. Each
/// `data:` line of an event yields one payload. A trailing event without its
/// terminating blank line is never yielded.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    pending: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    /// Creates an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once `[DONE]` has been seen.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        self.done
    }

    /// Feeds a body chunk and returns the payloads of the events it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        if self.done {
            return Vec::new();
        }
        self.decode_utf8(chunk);
        if self.buffer.contains('\r') {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        let mut payloads = Vec::new();
        while let Some(end) = self.buffer.find("\n\n") {
            let event: String = self.buffer.drain(..end + 2).collect();
            for line in event.lines() {
                let Some(data) = line.strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();
                if data.is_empty() {
                    continue;
                }
                if data == DONE_SENTINEL {
                    self.done = true;
                    self.buffer.clear();
                    self.pending.clear();
                    return payloads;
                }
                payloads.push(data.to_owned());
            }
        }
        payloads
    }

    fn decode_utf8(&mut self, chunk: &[u8]) {
        let bytes = if self.pending.is_empty() {
            chunk.to_vec()
        } else {
            let mut bytes = std::mem::take(&mut self.pending);
            bytes.extend_from_slice(chunk);
            bytes
        };

        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    return;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    self.buffer.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            // Incomplete sequence at the end of the chunk.
                            self.pending = after.to_vec();
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Stream of JSON payloads decoded from an SSE response body.
///
/// Ends after `[DONE]` or when the body ends. Payloads that fail to parse as
/// `T` are skipped. A body read failure is yielded once as
/// [`DevaError::Transport`] and ends the stream.
pub struct SseStream<T> {
    body: ByteStream,
    decoder: SseDecoder,
    ready: VecDeque<String>,
    finished: bool,
    _item: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for SseStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseStream")
            .field("decoder", &self.decoder)
            .field("buffered", &self.ready.len())
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl<T> SseStream<T> {
    /// Wraps a response body.
    #[must_use]
    pub fn new(body: ByteStream) -> Self {
        Self {
            body,
            decoder: SseDecoder::new(),
            ready: VecDeque::new(),
            finished: false,
            _item: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> Stream for SseStream<T> {
    type Item = Result<T, DevaError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            while let Some(data) = this.ready.pop_front() {
                match serde_json::from_str::<T>(&data) {
                    Ok(item) => return Poll::Ready(Some(Ok(item))),
                    #[cfg(feature = "telemetry")]
                    Err(err) => tracing::debug!(error = %err, "Skipping malformed stream event"),
                    #[cfg(not(feature = "telemetry"))]
                    Err(_) => {}
                }
            }

            if this.finished || this.decoder.is_done() {
                this.finished = true;
                return Poll::Ready(None);
            }

            match ready!(this.body.as_mut().poll_next(cx)) {
                Some(Ok(chunk)) => this.ready.extend(this.decoder.push(&chunk)),
                Some(Err(err)) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(DevaError::transport(
                        format!("Failed to read event stream: {err}"),
                        Some(err),
                    ))));
                }
                None => this.finished = true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatStreamChunk;
    use bytes::Bytes;
    use futures_util::{StreamExt, stream};
    use deva_x402::BoxError;

    fn body(chunks: &[&'static str]) -> ByteStream {
        let chunks: Vec<Result<Bytes, BoxError>> = chunks
            .iter()
            .map(|chunk| Ok(Bytes::from_static(chunk.as_bytes())))
            .collect();
        Box::pin(stream::iter(chunks))
    }

    async fn collect(chunks: &[&'static str]) -> Vec<ChatStreamChunk> {
        SseStream::<ChatStreamChunk>::new(body(chunks))
            .map(|item| item.unwrap())
            .collect()
            .await
    }

    fn content(chunk: &ChatStreamChunk) -> Option<&str> {
        chunk.choices[0].delta.as_ref()?.content.as_deref()
    }

    #[test]
    fn test_decoder_splits_events() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"a\":1}").is_empty());
        assert_eq!(decoder.push(b"\n\ndata: 2\n\n"), vec!["{\"a\":1}", "2"]);
    }

    #[test]
    fn test_decoder_handles_crlf_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: x\r\n\r").is_empty());
        assert_eq!(decoder.push(b"\n"), vec!["x"]);
    }

    #[test]
    fn test_decoder_reassembles_multibyte_characters() {
        let text = "data: {\"c\":\"\u{e9}\u{1f600}\"}\n\n".as_bytes();
        let split = text.iter().position(|b| *b == 0xf0).unwrap() + 2;

        let mut decoder = SseDecoder::new();
        assert!(decoder.push(&text[..split]).is_empty());
        assert_eq!(
            decoder.push(&text[split..]),
            vec!["{\"c\":\"\u{e9}\u{1f600}\"}"]
        );
    }

    #[test]
    fn test_decoder_ignores_other_fields() {
        let mut decoder = SseDecoder::new();
        let payloads = decoder.push(b": keep-alive\nevent: delta\nid: 7\ndata:\ndata: ok\n\n");
        assert_eq!(payloads, vec!["ok"]);
    }

    #[test]
    fn test_decoder_stops_at_done() {
        let mut decoder = SseDecoder::new();
        let payloads = decoder.push(b"data: 1\n\ndata: [DONE]\n\ndata: 2\n\n");
        assert_eq!(payloads, vec!["1"]);
        assert!(decoder.is_done());
        assert!(decoder.push(b"data: 3\n\n").is_empty());
    }

    #[tokio::test]
    async fn test_stream_yields_chunks_until_done() {
        let chunks = collect(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"He\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"llo\"}}]}\n\n",
            "data: [DONE]\n\n",
        ])
        .await;

        assert_eq!(chunks.len(), 2);
        assert_eq!(content(&chunks[0]), Some("He"));
        assert_eq!(content(&chunks[1]), Some("llo"));
    }

    #[tokio::test]
    async fn test_stream_skips_malformed_events() {
        let chunks = collect(&[
            "data: {not json}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\n",
        ])
        .await;

        assert_eq!(chunks.len(), 1);
        assert_eq!(content(&chunks[0]), Some("ok"));
    }

    #[tokio::test]
    async fn test_stream_drops_unterminated_tail() {
        let chunks = collect(&[
            "data: {\"choices\":[]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"cut\"}}]}",
        ])
        .await;
        assert_eq!(chunks.len(), 1);
    }

    #[tokio::test]
    async fn test_stream_surfaces_read_errors() {
        let chunks: Vec<Result<Bytes, BoxError>> = vec![
            Ok(Bytes::from_static(b"data: {\"id\":\"a\"}\n\n")),
            Err("connection reset".into()),
            Ok(Bytes::from_static(b"data: {\"id\":\"b\"}\n\n")),
        ];
        let mut events = SseStream::<ChatStreamChunk>::new(Box::pin(stream::iter(chunks)));

        assert_eq!(
            events.next().await.unwrap().unwrap().id.as_deref(),
            Some("a")
        );
        let err = events.next().await.unwrap().unwrap_err();
        assert!(matches!(err, DevaError::Transport { .. }));
        assert!(events.next().await.is_none());
    }
}
