//! Incremental decoding of feed bytes into [`StreamEvent`] values.
//!
//! Chunks from the transport do not respect message boundaries, so the
//! decoder buffers partial frames between calls to [`EventDecoder::push`].

use serde_json::Value;
use thiserror::Error;

use crate::stream::proto::StreamEvent;

const ERROR_BODY_SNIPPET_LEN: usize = 220;
/// Upper bound for a single buffered frame.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed payload: {source}. body={body}")]
    Json {
        #[source]
        source: serde_json::Error,
        body: String,
    },

    #[error("response missing {0}")]
    MissingField(&'static str),

    #[error("frame exceeded {limit} bytes without a boundary")]
    FrameTooLarge { limit: usize },

    #[error("stream ended inside a frame: {body}")]
    Truncated { body: String },
}

impl DecodeError {
    pub(crate) fn json(source: serde_json::Error, body: &[u8]) -> Self {
        Self::Json {
            source,
            body: snippet(body),
        }
    }
}

fn snippet(body: &[u8]) -> String {
    String::from_utf8_lossy(body)
        .chars()
        .take(ERROR_BODY_SNIPPET_LEN)
        .collect()
}

/// Message boundary convention of the feed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Framing {
    /// One JSON object per line (`linebreak=true`).
    LineDelimited,
    /// JSON objects back to back with no separator (`linebreak=false`).
    Concatenated,
}

impl Framing {
    pub fn from_line_break(line_break: bool) -> Self {
        if line_break {
            Self::LineDelimited
        } else {
            Self::Concatenated
        }
    }
}

pub type DecodeResult = Result<StreamEvent, DecodeError>;

#[derive(Debug)]
pub struct EventDecoder {
    framing: Framing,
    buffer: Vec<u8>,
    /// Set while dropping the remainder of an already reported frame.
    discard: Option<Discard>,
}

#[derive(Debug)]
enum Discard {
    /// Everything up to the next newline.
    Line,
    /// Everything up to the brace closing the current object.
    Object(ObjectSkip),
}

/// Brace-depth scanner that finds where a (possibly malformed) object ends.
/// Braces inside string literals are ignored.
#[derive(Debug, Default)]
struct ObjectSkip {
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl ObjectSkip {
    /// Feeds `bytes` and returns how many were consumed up to and including
    /// the closing brace, or `None` if the object is still open.
    fn advance(&mut self, bytes: &[u8]) -> Option<usize> {
        for (index, byte) in bytes.iter().enumerate() {
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if *byte == b'\\' {
                    self.escaped = true;
                } else if *byte == b'"' {
                    self.in_string = false;
                }
                continue;
            }
            match byte {
                b'"' => self.in_string = true,
                b'{' => self.depth += 1,
                b'}' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        return Some(index + 1);
                    }
                }
                _ => {}
            }
        }
        None
    }
}

impl EventDecoder {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            buffer: Vec::new(),
            discard: None,
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Appends a chunk and returns every complete frame it finished.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<DecodeResult> {
        self.buffer.extend_from_slice(chunk);

        let mut out = Vec::new();
        match self.framing {
            Framing::LineDelimited => self.drain_lines(&mut out),
            Framing::Concatenated => self.drain_concatenated(&mut out),
        }

        if self.buffer.len() > MAX_FRAME_BYTES {
            // The rest of this frame is still in flight; drop it on arrival.
            self.discard = match self.framing {
                Framing::LineDelimited => Some(Discard::Line),
                Framing::Concatenated => {
                    let mut skip = ObjectSkip::default();
                    match skip.advance(&self.buffer) {
                        Some(_) => None,
                        None => Some(Discard::Object(skip)),
                    }
                }
            };
            self.buffer.clear();
            out.push(Err(DecodeError::FrameTooLarge {
                limit: MAX_FRAME_BYTES,
            }));
        }

        out
    }

    /// Flushes whatever is left once the transport has ended.
    ///
    /// An unterminated final line is still decoded; a partial concatenated
    /// object is reported as truncated.
    pub fn finish(&mut self) -> Option<DecodeResult> {
        if self.discard.take().is_some() {
            self.buffer.clear();
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        let trimmed = rest.trim_ascii();
        if trimmed.is_empty() {
            return None;
        }

        match self.framing {
            Framing::LineDelimited => Some(decode_frame(trimmed)),
            Framing::Concatenated => Some(Err(DecodeError::Truncated {
                body: snippet(trimmed),
            })),
        }
    }

    fn drain_lines(&mut self, out: &mut Vec<DecodeResult>) {
        let mut consumed = 0;
        if matches!(self.discard, Some(Discard::Line)) {
            match self.buffer.iter().position(|byte| *byte == b'\n') {
                Some(newline) => {
                    consumed = newline + 1;
                    self.discard = None;
                }
                None => {
                    self.buffer.clear();
                    return;
                }
            }
        }
        while let Some(newline) = self.buffer[consumed..].iter().position(|byte| *byte == b'\n') {
            let line = self.buffer[consumed..consumed + newline].trim_ascii();
            if !line.is_empty() {
                out.push(decode_frame(line));
            }
            consumed += newline + 1;
        }
        self.buffer.drain(..consumed);
    }

    fn drain_concatenated(&mut self, out: &mut Vec<DecodeResult>) {
        let mut consumed = 0;
        loop {
            if let Some(Discard::Object(skip)) = self.discard.as_mut() {
                match skip.advance(&self.buffer[consumed..]) {
                    Some(end) => {
                        consumed += end;
                        self.discard = None;
                    }
                    None => {
                        consumed = self.buffer.len();
                        break;
                    }
                }
            }

            let rest = &self.buffer[consumed..];
            let Some(start) = rest.iter().position(|byte| !byte.is_ascii_whitespace()) else {
                consumed = self.buffer.len();
                break;
            };
            let frame = &rest[start..];

            let mut values = serde_json::Deserializer::from_slice(frame).into_iter::<Value>();
            match values.next() {
                Some(Ok(value)) => {
                    let end = values.byte_offset();
                    out.push(event_from_value(value, &frame[..end]));
                    consumed += start + end;
                }
                Some(Err(err)) if err.is_eof() => {
                    consumed += start;
                    break;
                }
                Some(Err(err)) if frame[0] == b'{' => {
                    // Skip the whole malformed object, nested braces included.
                    let mut skip = ObjectSkip::default();
                    match skip.advance(frame) {
                        Some(end) => {
                            out.push(Err(DecodeError::json(err, &frame[..end])));
                            consumed += start + end;
                        }
                        None => {
                            out.push(Err(DecodeError::json(err, frame)));
                            self.discard = Some(Discard::Object(skip));
                            consumed = self.buffer.len();
                            break;
                        }
                    }
                }
                Some(Err(err)) => {
                    // Stray bytes between objects: resume at the next `{`.
                    let skip = frame
                        .iter()
                        .position(|byte| *byte == b'{')
                        .unwrap_or(frame.len());
                    out.push(Err(DecodeError::json(err, &frame[..skip])));
                    consumed += start + skip;
                }
                None => {
                    consumed = self.buffer.len();
                    break;
                }
            }
        }
        self.buffer.drain(..consumed);
    }
}

fn decode_frame(frame: &[u8]) -> DecodeResult {
    serde_json::from_slice(frame).map_err(|err| DecodeError::json(err, frame))
}

fn event_from_value(value: Value, raw: &[u8]) -> DecodeResult {
    serde_json::from_value(value).map_err(|err| DecodeError::json(err, raw))
}

#[cfg(test)]
mod tests {
    use super::{DecodeError, EventDecoder, Framing, MAX_FRAME_BYTES};
    use crate::stream::proto::EventKind;

    fn symbols(results: &[super::DecodeResult]) -> Vec<String> {
        results
            .iter()
            .filter_map(|result| result.as_ref().ok())
            .map(|event| event.symbol.clone())
            .collect()
    }

    #[test]
    fn line_break_selects_framing() {
        assert_eq!(Framing::from_line_break(true), Framing::LineDelimited);
        assert_eq!(Framing::from_line_break(false), Framing::Concatenated);
    }

    #[test]
    fn decodes_one_event_per_line() {
        let mut decoder = EventDecoder::new(Framing::LineDelimited);
        let out = decoder.push(
            b"{\"type\":\"quote\",\"symbol\":\"AAPL\",\"bid\":1.0}\n\
              {\"type\":\"trade\",\"symbol\":\"MSFT\",\"price\":\"2.5\"}\n",
        );
        assert_eq!(symbols(&out), vec!["AAPL", "MSFT"]);
        assert_eq!(out[1].as_ref().map(|event| event.kind).ok(), Some(EventKind::Trade));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn buffers_partial_lines_across_chunks() {
        let mut decoder = EventDecoder::new(Framing::LineDelimited);
        assert!(decoder.push(b"{\"type\":\"quote\",\"sym").is_empty());
        let out = decoder.push(b"bol\":\"AAPL\"}\r\n\r\n{\"type\":\"quote\"");
        assert_eq!(symbols(&out), vec!["AAPL"]);
        let out = decoder.push(b",\"symbol\":\"MSFT\"}\n");
        assert_eq!(symbols(&out), vec!["MSFT"]);
    }

    #[test]
    fn malformed_line_does_not_poison_the_next() {
        let mut decoder = EventDecoder::new(Framing::LineDelimited);
        let out = decoder.push(b"not json\n{\"type\":\"quote\",\"symbol\":\"AAPL\"}\n");
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0], Err(DecodeError::Json { .. })));
        assert_eq!(symbols(&out), vec!["AAPL"]);
    }

    #[test]
    fn finish_decodes_unterminated_last_line() {
        let mut decoder = EventDecoder::new(Framing::LineDelimited);
        assert!(decoder
            .push(b"{\"type\":\"summary\",\"symbol\":\"GOOG\"}")
            .is_empty());
        let last = decoder.finish().expect("final frame").expect("decoded");
        assert_eq!(last.symbol, "GOOG");
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn decodes_concatenated_objects() {
        let mut decoder = EventDecoder::new(Framing::Concatenated);
        let out = decoder.push(
            b"{\"type\":\"quote\",\"symbol\":\"AAPL\"}{\"type\":\"quote\",\"symbol\":\"MSFT\"} {\"type\":",
        );
        assert_eq!(symbols(&out), vec!["AAPL", "MSFT"]);
        let out = decoder.push(b"\"trade\",\"symbol\":\"GOOG\"}");
        assert_eq!(symbols(&out), vec!["GOOG"]);
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn concatenated_shape_errors_keep_streaming() {
        let mut decoder = EventDecoder::new(Framing::Concatenated);
        let out = decoder.push(b"{\"type\":\"quote\"}{\"type\":\"quote\",\"symbol\":\"AAPL\"}");
        assert_eq!(out.len(), 2);
        assert!(out[0].is_err());
        assert_eq!(symbols(&out), vec!["AAPL"]);
    }

    #[test]
    fn concatenated_syntax_errors_resync_at_next_object() {
        let mut decoder = EventDecoder::new(Framing::Concatenated);
        let out = decoder.push(b"{\"type\" 1}{\"type\":\"quote\",\"symbol\":\"AAPL\"}");
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0], Err(DecodeError::Json { .. })));
        assert_eq!(symbols(&out), vec!["AAPL"]);
    }

    #[test]
    fn malformed_object_with_nested_braces_is_one_error() {
        let mut decoder = EventDecoder::new(Framing::Concatenated);
        let out = decoder.push(
            b"{\"type\":\"quote\" \"x\":{\"a\":1}}{\"type\":\"quote\",\"symbol\":\"AAPL\"}",
        );
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0], Err(DecodeError::Json { .. })));
        assert_eq!(symbols(&out), vec!["AAPL"]);
    }

    #[test]
    fn malformed_object_split_across_chunks_is_one_error() {
        let mut decoder = EventDecoder::new(Framing::Concatenated);
        let out = decoder.push(b"{\"type\":\"quote\" \"x\":{\"note\":\"}{\"");
        assert_eq!(out.len(), 1);
        assert!(out[0].is_err());

        let out = decoder.push(b"}}{\"type\":\"trade\",\"symbol\":\"MSFT\"}");
        assert_eq!(out.len(), 1);
        assert_eq!(symbols(&out), vec!["MSFT"]);
    }

    #[test]
    fn stray_bytes_between_objects_are_skipped() {
        let mut decoder = EventDecoder::new(Framing::Concatenated);
        let out = decoder.push(b"xyz{\"type\":\"quote\",\"symbol\":\"AAPL\"}");
        assert_eq!(out.len(), 2);
        assert!(out[0].is_err());
        assert_eq!(symbols(&out), vec!["AAPL"]);
    }

    #[test]
    fn concatenated_partial_tail_is_truncated() {
        let mut decoder = EventDecoder::new(Framing::Concatenated);
        assert!(decoder.push(b"{\"type\":\"quote\",").is_empty());
        assert!(matches!(
            decoder.finish(),
            Some(Err(DecodeError::Truncated { .. }))
        ));
    }

    #[test]
    fn oversized_frames_are_dropped() {
        let mut decoder = EventDecoder::new(Framing::LineDelimited);
        let out = decoder.push(&vec![b'x'; MAX_FRAME_BYTES + 1]);
        assert!(matches!(out.as_slice(), [Err(DecodeError::FrameTooLarge { .. })]));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn oversized_line_tail_is_discarded() {
        let mut decoder = EventDecoder::new(Framing::LineDelimited);
        let out = decoder.push(&vec![b'x'; MAX_FRAME_BYTES + 1]);
        assert_eq!(out.len(), 1);

        assert!(decoder.push(b"still the same line").is_empty());
        let out = decoder.push(b"xx\n{\"type\":\"quote\",\"symbol\":\"AAPL\"}\n");
        assert_eq!(out.len(), 1);
        assert_eq!(symbols(&out), vec!["AAPL"]);
    }

    #[test]
    fn oversized_object_tail_is_discarded() {
        let mut decoder = EventDecoder::new(Framing::Concatenated);
        let mut head = b"{\"type\":\"quote\",\"pad\":\"".to_vec();
        head.extend(vec![b'x'; MAX_FRAME_BYTES]);
        let out = decoder.push(&head);
        assert!(matches!(out.as_slice(), [Err(DecodeError::FrameTooLarge { .. })]));

        let out = decoder.push(b"{}\"}{\"type\":\"trade\",\"symbol\":\"GOOG\"}");
        assert_eq!(out.len(), 1);
        assert_eq!(symbols(&out), vec!["GOOG"]);
        assert!(decoder.finish().is_none());
    }
}
