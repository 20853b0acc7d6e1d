//! Newline-delimited record framing.
//!
//! Every record on the control socket is one JSON object followed by `\n`.
//! The transport gives no guarantee that a read returns whole records, so each
//! connection owns a [`LineBuffer`] that reassembles lines split across
//! packets and splits packets carrying several lines.
//!
//! A line longer than the configured maximum is discarded up to its
//! terminating newline and reported once as [`ProtocolError::LineTooLong`];
//! the buffer then resynchronises on the next line.

use serde::Serialize;

use crate::error::{ProtocolError, Result};

/// Default maximum size of a single record (1 MiB).
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// Per-connection partial-line buffer.
#[derive(Debug)]
pub struct LineBuffer {
    buf: Vec<u8>,
    max_line: usize,
    discarding: bool,
}

impl LineBuffer {
    /// Creates a buffer with the default maximum line size.
    pub fn new() -> Self {
        Self::with_max_line(DEFAULT_MAX_LINE_BYTES)
    }

    /// Creates a buffer with a specific maximum line size.
    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_line,
            discarding: false,
        }
    }

    /// Feeds a chunk of bytes and returns every record it completed.
    ///
    /// Blank lines are skipped and a trailing `\r` is stripped, so CRLF
    /// clients work unchanged. Invalid UTF-8 is replaced rather than rejected;
    /// the JSON decoder downstream reports anything that is not a record.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<String>> {
        let mut out = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            let (segment, tail) = rest.split_at(pos);
            rest = &tail[1..];

            if self.discarding {
                self.discarding = false;
                self.buf.clear();
                continue;
            }

            let size = self.buf.len() + segment.len();
            if size > self.max_line {
                out.push(Err(ProtocolError::LineTooLong {
                    size,
                    max: self.max_line,
                }));
                self.buf.clear();
                continue;
            }

            self.buf.extend_from_slice(segment);
            let line = std::mem::take(&mut self.buf);
            if let Some(text) = decode_line(&line) {
                out.push(Ok(text));
            }
        }

        if !rest.is_empty() && !self.discarding {
            let size = self.buf.len() + rest.len();
            if size > self.max_line {
                out.push(Err(ProtocolError::LineTooLong {
                    size,
                    max: self.max_line,
                }));
                self.buf.clear();
                self.discarding = true;
            } else {
                self.buf.extend_from_slice(rest);
            }
        }

        out
    }

    /// Returns true if no partial record is buffered.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty() && !self.discarding
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_line(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim_end_matches('\r');
    if text.trim().is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// Serializes a value as one newline-terminated JSON record.
pub fn encode_line<T: Serialize>(value: &T) -> Result<String> {
    let mut json = serde_json::to_string(value)?;
    json.push('\n');
    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_lines(results: Vec<Result<String>>) -> Vec<String> {
        results.into_iter().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_single_complete_line() {
        let mut buf = LineBuffer::new();
        let lines = ok_lines(buf.push(b"{\"action\":\"ping\"}\n"));
        assert_eq!(lines, vec!["{\"action\":\"ping\"}"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_line_split_across_packets() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"{\"action\":").is_empty());
        assert!(!buf.is_empty());
        assert!(buf.push(b"\"pi").is_empty());
        let lines = ok_lines(buf.push(b"ng\"}\n"));
        assert_eq!(lines, vec!["{\"action\":\"ping\"}"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_several_lines_in_one_packet() {
        let mut buf = LineBuffer::new();
        let lines = ok_lines(buf.push(b"a\nb\nc"));
        assert_eq!(lines, vec!["a", "b"]);
        let lines = ok_lines(buf.push(b"\n"));
        assert_eq!(lines, vec!["c"]);
    }

    #[test]
    fn test_crlf_and_blank_lines() {
        let mut buf = LineBuffer::new();
        let lines = ok_lines(buf.push(b"first\r\n\r\n   \nsecond\n"));
        assert_eq!(lines, vec!["first", "second"]);
    }

    #[test]
    fn test_oversized_line_is_reported_then_resyncs() {
        let mut buf = LineBuffer::with_max_line(8);

        let results = buf.push(b"0123456789");
        assert_eq!(results.len(), 1);
        assert!(matches!(
            results[0],
            Err(ProtocolError::LineTooLong { size: 10, max: 8 })
        ));

        // The rest of the oversized line is dropped silently.
        assert!(buf.push(b"abcdef").is_empty());
        let lines = ok_lines(buf.push(b"xyz\nok\n"));
        assert_eq!(lines, vec!["ok"]);
    }

    #[test]
    fn test_oversized_complete_line() {
        let mut buf = LineBuffer::with_max_line(4);
        let results = buf.push(b"toolong\nfine\n");
        assert_eq!(results.len(), 2);
        assert!(results[0].is_err());
        assert_eq!(results[1].as_ref().unwrap(), "fine");
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut buf = LineBuffer::new();
        let lines = ok_lines(buf.push(&[b'a', 0xff, b'b', b'\n']));
        assert_eq!(lines, vec!["a\u{fffd}b"]);
    }

    #[test]
    fn test_encode_line_appends_newline() {
        let line = encode_line(&serde_json::json!({"event": "pong"})).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
    }
}
