//! Incremental decoding of `data: <json>\n\n` records into `StreamEvent`s.
//!
//! `SseDecoder` is a plain state machine (byte buffer + scan cursor) so its
//! behavior under arbitrary chunk boundaries can be tested by feeding one
//! byte at a time. `decode_stream` drives it from an async byte stream.

use futures::{Stream, StreamExt as _, stream};
use tracing::{debug, warn};

use crate::errors::ClientError;
use crate::event::{DATA_FIELD, StreamEvent};
use crate::transport::ByteStream;

/// Default upper bound for one undelimited record.
pub const DEFAULT_MAX_RECORD_BYTES: usize = 8 * 1024 * 1024;

const LOGGED_RECORD_PREFIX: usize = 200;

/// Splits an incoming byte stream into records and parses them.
#[derive(Debug)]
pub struct SseDecoder {
    buf: Vec<u8>,
    // Bytes before this offset hold no delimiter.
    scanned: usize,
    max_record_bytes: usize,
    dropped: u64,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECORD_BYTES)
    }
}

impl SseDecoder {
    pub fn new(max_record_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            max_record_bytes,
            dropped: 0,
        }
    }

    /// Appends a chunk to the pending buffer without decoding it.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Decodes the next complete record, if any is buffered.
    ///
    /// Malformed single records are skipped. Framing that cannot be
    /// recovered returns `ClientError::Decode`; the decoder must not be used
    /// after that.
    pub fn next_event(&mut self) -> Result<Option<StreamEvent>, ClientError> {
        while let Some((idx, delim_len)) = find_frame_delimiter(&self.buf, self.scanned) {
            let record: Vec<u8> = self.buf.drain(..idx + delim_len).take(idx).collect();
            self.scanned = 0;
            if let Some(event) = self.decode_record(&record)? {
                return Ok(Some(event));
            }
        }
        // A delimiter may straddle the next chunk boundary.
        self.scanned = self.buf.len().saturating_sub(3);
        if self.buf.len() > self.max_record_bytes {
            return Err(ClientError::Decode(format!(
                "undelimited record exceeds {} bytes",
                self.max_record_bytes
            )));
        }
        Ok(None)
    }

    /// Appends a chunk and returns every event completed by it, in order.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Result<Vec<StreamEvent>, ClientError> {
        self.feed(chunk);
        let mut events = Vec::new();
        while let Some(event) = self.next_event()? {
            events.push(event);
        }
        Ok(events)
    }

    /// Signals end of input and discards any truncated final record.
    pub fn finish(&mut self) {
        if !self.buf.is_empty() {
            debug!(bytes = self.buf.len(), "discarding truncated final record");
            self.buf.clear();
        }
        self.scanned = 0;
    }

    /// Number of well-framed records dropped because their payload was unusable.
    pub fn dropped_records(&self) -> u64 {
        self.dropped
    }

    /// Bytes buffered while waiting for a delimiter.
    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }

    fn decode_record(&mut self, bytes: &[u8]) -> Result<Option<StreamEvent>, ClientError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        let text = std::str::from_utf8(bytes)
            .map_err(|e| ClientError::Decode(format!("record is not valid UTF-8: {e}")))?;

        let mut data_lines: Vec<&str> = Vec::new();
        let mut foreign_line: Option<&str> = None;
        for raw_line in text.split('\n') {
            let line = raw_line.trim_end_matches('\r');
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            if let Some(rest) = line.strip_prefix(DATA_FIELD) {
                data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
                continue;
            }
            if ["event:", "id:", "retry:"]
                .iter()
                .any(|field| line.starts_with(field))
            {
                continue;
            }
            foreign_line.get_or_insert(line);
        }

        if data_lines.is_empty() {
            return match foreign_line {
                Some(line) => Err(ClientError::Decode(format!(
                    "record without a data field: {}",
                    truncate_for_log(line)
                ))),
                None => Ok(None),
            };
        }
        if let Some(line) = foreign_line {
            debug!(line = %truncate_for_log(line), "ignoring unknown field in record");
        }

        let data = data_lines.join("\n");
        self.parse_payload(&data)
    }

    /// A `complete` that breaks its contract fails the stream; any other bad
    /// record is dropped.
    fn parse_payload(&mut self, data: &str) -> Result<Option<StreamEvent>, ClientError> {
        let event = match serde_json::from_str::<StreamEvent>(data) {
            Ok(event) => event,
            Err(e) => {
                self.dropped += 1;
                warn!(error = %e, record = %truncate_for_log(data), "dropping malformed stream record");
                return Ok(None);
            }
        };
        if let Err(violation) = event.validate() {
            if matches!(event, StreamEvent::Complete { .. }) {
                return Err(ClientError::Decode(format!(
                    "complete event carries an invalid summary: {violation}"
                )));
            }
            self.dropped += 1;
            warn!(kind = event.kind(), %violation, "dropping stream event that breaks its contract");
            return Ok(None);
        }
        Ok(Some(event))
    }
}

fn find_frame_delimiter(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 1 < buf.len() {
        if buf[i] == b'\n' && buf[i + 1] == b'\n' {
            return Some((i, 2));
        }
        if i + 3 < buf.len()
            && buf[i] == b'\r'
            && buf[i + 1] == b'\n'
            && buf[i + 2] == b'\r'
            && buf[i + 3] == b'\n'
        {
            return Some((i, 4));
        }
        i += 1;
    }
    None
}

fn truncate_for_log(text: &str) -> &str {
    match text.char_indices().nth(LOGGED_RECORD_PREFIX) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Turns a byte stream into a lazy, forward-only stream of events.
///
/// The stream ends when the bytes end (a truncated tail is discarded) or
/// after yielding the first transport or decode error.
pub fn decode_stream(
    bytes: ByteStream,
    decoder: SseDecoder,
) -> impl Stream<Item = Result<StreamEvent, ClientError>> + Send {
    struct State {
        bytes: ByteStream,
        decoder: SseDecoder,
        done: bool,
    }

    stream::try_unfold(
        State {
            bytes,
            decoder,
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(event) = state.decoder.next_event()? {
                    return Ok(Some((event, state)));
                }
                if state.done {
                    return Ok(None);
                }

                match state.bytes.next().await {
                    Some(Ok(chunk)) => state.decoder.feed(&chunk),
                    Some(Err(err)) => return Err(err),
                    None => {
                        state.decoder.finish();
                        state.done = true;
                    }
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt as _;

    const SCENARIO_A: &str = concat!(
        "data: {\"type\":\"start\",\"total_items\":2}\n\n",
        "data: {\"type\":\"progress\",\"current\":1,\"total\":2,\"item_id\":\"AAA\"}\n\n",
        "data: {\"type\":\"result\",\"item\":{\"item_id\":\"AAA\",\"status\":\"success\"},\"completed\":1,\"total\":2}\n\n",
        "data: {\"type\":\"progress\",\"current\":2,\"total\":2,\"item_id\":\"BBB\"}\n\n",
        "data: {\"type\":\"result\",\"item\":{\"item_id\":\"BBB\",\"status\":\"error\",\"error_message\":\"x\"},\"completed\":2,\"total\":2}\n\n",
        "data: {\"type\":\"complete\",\"summary\":{\"total_items\":2,\"succeeded\":1,\"failed\":1}}\n\n",
    );

    fn decode_in_chunks(input: &[u8], chunk_size: usize) -> Vec<StreamEvent> {
        let mut decoder = SseDecoder::default();
        let mut events = Vec::new();
        for chunk in input.chunks(chunk_size) {
            events.extend(decoder.push_chunk(chunk).expect("decode"));
        }
        decoder.finish();
        events
    }

    #[test]
    fn chunk_boundaries_do_not_change_the_event_sequence() {
        let whole = decode_in_chunks(SCENARIO_A.as_bytes(), SCENARIO_A.len());
        assert_eq!(whole.len(), 6);
        for size in [1, 2, 3, 7, 64] {
            assert_eq!(decode_in_chunks(SCENARIO_A.as_bytes(), size), whole, "chunk size {size}");
        }
    }

    #[test]
    fn incomplete_record_stays_buffered() {
        let mut decoder = SseDecoder::default();
        let events = decoder
            .push_chunk(b"data: {\"type\":\"start\",\"total_it")
            .expect("partial");
        assert!(events.is_empty());
        assert!(decoder.pending_bytes() > 0);
        let events = decoder.push_chunk(b"ems\":1}\n").expect("still partial");
        assert!(events.is_empty());
        let events = decoder.push_chunk(b"\n").expect("complete");
        assert_eq!(events, vec![StreamEvent::Start { total_items: 1 }]);
        assert_eq!(decoder.pending_bytes(), 0);
    }

    #[test]
    fn malformed_json_record_is_dropped_and_stream_continues() {
        let mut decoder = SseDecoder::default();
        let events = decoder
            .push_chunk(b"data: {not valid json\n\ndata: {\"type\":\"start\",\"total_items\":1}\n\n")
            .expect("decode");
        assert_eq!(events, vec![StreamEvent::Start { total_items: 1 }]);
        assert_eq!(decoder.dropped_records(), 1);
    }

    #[test]
    fn unknown_type_and_contract_violations_are_dropped() {
        let mut decoder = SseDecoder::default();
        let events = decoder
            .push_chunk(concat!(
                "data: {\"type\":\"heartbeat\"}\n\n",
                "data: {\"type\":\"start\",\"total_items\":0}\n\n",
                "data: {\"type\":\"error\",\"message\":\"boom\"}\n\n",
            ).as_bytes())
            .expect("decode");
        assert_eq!(events, vec![StreamEvent::Error { message: "boom".into() }]);
        assert_eq!(decoder.dropped_records(), 2);
    }

    #[test]
    fn complete_with_inconsistent_counters_is_a_decode_error() {
        let mut decoder = SseDecoder::default();
        let err = decoder
            .push_chunk(
                b"data: {\"type\":\"complete\",\"summary\":{\"total_items\":3,\"succeeded\":1,\"failed\":1}}\n\n",
            )
            .expect_err("bad summary");
        assert!(matches!(&err, ClientError::Decode(message) if message.contains("1 + 1 do not add up to 3")));
        assert_eq!(decoder.dropped_records(), 0);
    }

    #[test]
    fn crlf_delimiters_comments_and_event_fields_are_accepted() {
        let mut decoder = SseDecoder::default();
        let events = decoder
            .push_chunk(b": keep-alive\r\n\r\nevent: message\r\nid: 1\r\ndata: {\"type\":\"start\",\"total_items\":3}\r\n\r\n")
            .expect("decode");
        assert_eq!(events, vec![StreamEvent::Start { total_items: 3 }]);
    }

    #[test]
    fn multibyte_text_split_across_chunks_survives() {
        let record = "data: {\"type\":\"error\",\"message\":\"r\u{e9}seau \u{20b9}\"}\n\n";
        let events = decode_in_chunks(record.as_bytes(), 1);
        assert_eq!(
            events,
            vec![StreamEvent::Error {
                message: "r\u{e9}seau \u{20b9}".into()
            }]
        );
    }

    #[test]
    fn record_without_data_field_is_a_decode_error() {
        let mut decoder = SseDecoder::default();
        let err = decoder
            .push_chunk(b"<html>502 Bad Gateway</html>\n\n")
            .expect_err("not a stream record");
        assert!(matches!(err, ClientError::Decode(msg) if msg.contains("without a data field")));
    }

    #[test]
    fn events_before_a_framing_error_are_still_delivered() {
        let mut decoder = SseDecoder::default();
        decoder.feed(b"data: {\"type\":\"start\",\"total_items\":1}\n\ngarbage\n\n");
        assert_eq!(
            decoder.next_event().expect("first record"),
            Some(StreamEvent::Start { total_items: 1 })
        );
        assert!(matches!(decoder.next_event(), Err(ClientError::Decode(_))));
    }

    #[test]
    fn invalid_utf8_record_is_a_decode_error() {
        let mut decoder = SseDecoder::default();
        let err = decoder.push_chunk(b"data: \xff\xfe\n\n").expect_err("bad utf-8");
        assert!(matches!(err, ClientError::Decode(_)));
    }

    #[test]
    fn oversized_pending_record_is_a_decode_error() {
        let mut decoder = SseDecoder::new(16);
        assert!(decoder.push_chunk(b"data: {\"type\"").is_ok());
        let err = decoder
            .push_chunk(b":\"start\",\"total_items\":1}")
            .expect_err("too large");
        assert!(matches!(err, ClientError::Decode(msg) if msg.contains("16 bytes")));
    }

    #[test]
    fn truncated_tail_is_discarded_on_finish() {
        let mut decoder = SseDecoder::default();
        let events = decoder
            .push_chunk(b"data: {\"type\":\"start\",\"total_items\":1}\n\ndata: {\"type\":\"prog")
            .expect("decode");
        assert_eq!(events.len(), 1);
        decoder.finish();
        assert_eq!(decoder.pending_bytes(), 0);
    }

    #[tokio::test]
    async fn decode_stream_yields_events_then_transport_error() {
        let chunks: Vec<Result<bytes::Bytes, ClientError>> = vec![
            Ok(bytes::Bytes::from_static(b"data: {\"type\":\"start\",\"total_items\":1}\n")),
            Ok(bytes::Bytes::from_static(b"\n")),
            Err(ClientError::transport("connection reset")),
        ];
        let events: Vec<_> = decode_stream(Box::pin(stream::iter(chunks)), SseDecoder::default())
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Ok(StreamEvent::Start { total_items: 1 })));
        assert!(matches!(events[1], Err(ClientError::Transport { .. })));
    }
}
