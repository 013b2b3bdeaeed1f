//! Turns the chunked `/api/chat` response body into typed protocol events.
//!
//! The body is newline-delimited. Lines starting with `data: ` carry one JSON
//! event each; every other line (blank separators, comments, keepalives) is
//! skipped. Chunks can end anywhere, so the incomplete tail of each chunk is
//! carried over to the next one.

use std::collections::VecDeque;

use futures_util::stream::{self, Stream, StreamExt};
use tracing::{debug, trace};
use vibe_shared::ProtocolEvent;

pub const DATA_PREFIX: &str = "data: ";

#[derive(Debug, Default)]
pub struct EventDecoder {
    buffer: Vec<u8>,
    // Prefix of `buffer` already known to contain no newline
    scanned: usize,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every event completed by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ProtocolEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut start = 0;
        // Splitting on the raw byte keeps multi-byte characters intact across chunks
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') {
            let newline_pos = self.scanned + offset;
            let line = String::from_utf8_lossy(&self.buffer[start..newline_pos]);

            if let Some(event) = decode_line(&line) {
                events.push(event);
            }
            start = newline_pos + 1;
            self.scanned = start;
        }

        self.buffer.drain(..start);
        self.scanned = self.buffer.len();
        events
    }

    /// Bytes received after the last newline.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// End of stream. An unterminated trailing line is discarded.
    pub fn finish(self) {
        if !self.buffer.is_empty() {
            debug!(bytes = self.buffer.len(), "discarding unterminated line at end of stream");
        }
    }
}

/// Decode a single line without its terminator.
///
/// Returns `None` for non-data lines, malformed payloads and unknown event
/// types; none of those interrupt the stream.
pub fn decode_line(line: &str) -> Option<ProtocolEvent> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let data = line.strip_prefix(DATA_PREFIX)?;
    if data.trim().is_empty() {
        return None;
    }

    match serde_json::from_str::<ProtocolEvent>(data) {
        Ok(ProtocolEvent::Unknown) => {
            trace!(payload = data, "ignoring unknown event type");
            None
        }
        Ok(event) => Some(event),
        Err(e) => {
            debug!(error = %e, "dropping malformed data frame");
            None
        }
    }
}

/// Adapt a byte-chunk stream (e.g. `reqwest::Response::bytes_stream`) into a
/// stream of protocol events. Transport errors are passed through; the stream
/// ends when the byte stream does.
pub fn decode_stream<S, B, E>(bytes: S) -> impl Stream<Item = Result<ProtocolEvent, E>>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
{
    let state = (bytes, EventDecoder::new(), VecDeque::new());

    stream::unfold(state, |(mut bytes, mut decoder, mut pending)| async move {
        loop {
            if let Some(event) = pending.pop_front() {
                return Some((Ok(event), (bytes, decoder, pending)));
            }

            match bytes.next().await {
                Some(Ok(chunk)) => pending.extend(decoder.push(chunk.as_ref())),
                Some(Err(e)) => return Some((Err(e), (bytes, decoder, pending))),
                None => {
                    decoder.finish();
                    return None;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    fn text(s: &str) -> ProtocolEvent {
        ProtocolEvent::TextDelta { text: s.to_string() }
    }

    #[test]
    fn frame_split_mid_line_yields_one_event() {
        let mut decoder = EventDecoder::new();

        assert!(decoder.push(b"data: {\"typ").is_empty());
        let events = decoder.push(b"e\":\"text_delta\",\"data\":\"hi\"}\n");

        assert_eq!(events, vec![text("hi")]);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn long_line_across_many_chunks_is_scanned_once() {
        let payload = "x".repeat(64 * 1024);
        let line = format!("data: {{\"type\":\"text_delta\",\"data\":\"{}\"}}\n", payload);
        let mut decoder = EventDecoder::new();

        let mut events = Vec::new();
        for chunk in line.as_bytes().chunks(1000) {
            events.extend(decoder.push(chunk));
            assert_eq!(decoder.scanned, decoder.pending());
        }

        assert_eq!(events, vec![text(&payload)]);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn malformed_line_does_not_stop_later_lines() {
        let mut decoder = EventDecoder::new();
        let body = concat!(
            "data: {\"type\":\"text_delta\",\"data\":\"a\"}\n\n",
            "data: {not json\n\n",
            "data: {\"type\":\"text_delta\",\"data\":\"b\"}\n\n",
        );

        let events = decoder.push(body.as_bytes());

        assert_eq!(events, vec![text("a"), text("b")]);
    }

    #[test]
    fn non_data_lines_and_unknown_types_are_skipped() {
        let mut decoder = EventDecoder::new();
        let body = concat!(
            ": keepalive\n",
            "event: message\n",
            "data: {\"type\":\"session_info\",\"cli_session_id\":\"x\"}\n",
            "data: \n",
            "data: {\"type\":\"thinking_done\"}\r\n",
        );

        let events = decoder.push(body.as_bytes());

        assert_eq!(events, vec![ProtocolEvent::ThinkingDone]);
    }

    #[test]
    fn multibyte_text_split_across_chunks() {
        let line = "data: {\"type\":\"text_delta\",\"data\":\"héllo ✓\"}\n".as_bytes();
        let split = line.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let mut decoder = EventDecoder::new();

        assert!(decoder.push(&line[..split]).is_empty());
        assert_eq!(decoder.push(&line[split..]), vec![text("héllo ✓")]);
    }

    #[tokio::test]
    async fn stream_adapter_discards_trailing_partial_line() {
        let chunks: Vec<Result<&'static [u8], Infallible>> = vec![
            Ok("data: {\"type\":\"start\",\"conversation_id\":\"c1\"}\n\ndata: {\"type\":\"te".as_bytes()),
            Ok("xt_delta\",\"data\":\"x\"}\n".as_bytes()),
            Ok("data: {\"type\":\"done\",\"exit_code\":0}".as_bytes()),
        ];

        let events: Vec<ProtocolEvent> = decode_stream(stream::iter(chunks))
            .map(|event| event.unwrap())
            .collect()
            .await;

        assert_eq!(
            events,
            vec![
                ProtocolEvent::Start {
                    conversation_id: "c1".into()
                },
                text("x"),
            ]
        );
    }

    #[tokio::test]
    async fn stream_adapter_passes_transport_errors_through() {
        let chunks: Vec<Result<&'static [u8], &'static str>> = vec![
            Ok("data: {\"type\":\"text_delta\",\"data\":\"x\"}\n".as_bytes()),
            Err("connection reset"),
        ];

        let results: Vec<_> = decode_stream(stream::iter(chunks)).collect().await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0], Ok(text("x")));
        assert_eq!(results[1], Err("connection reset"));
    }
}
