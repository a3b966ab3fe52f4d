//! Frame splitting for streamed chat responses.
//!
//! Two framings are supported:
//!
//! Server-Sent Events, used by OpenAI-compatible servers:
//! ```text
//! data: {"choices":[{"delta":{"content":"Hel"}}]}
//!
//! data: [DONE]
//! ```
//!
//! Newline-delimited JSON, used by Ollama:
//! ```text
//! {"message":{"content":"Hi"},"done":false}
//! {"message":{"content":"!"},"done":true}
//! ```

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::client::ClientError;

/// How a response body is divided into frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// `data: ` prefixed lines; everything else is ignored.
    Sse,
    /// One JSON document per non-empty line.
    Ndjson,
}

/// Line codec that yields one frame per SSE `data: ` line or NDJSON line.
///
/// Lines are cut on raw `\n` bytes before any text decoding, so a multi-byte
/// character split across network chunks is reassembled in the buffer.
/// Invalid UTF-8 becomes U+FFFD. Bytes after the last newline stay in the
/// buffer until a later chunk terminates them, or until
/// [`Decoder::decode_eof`] at end of input.
///
/// # Example
/// ```
/// use bytes::BytesMut;
/// use chatwire::frame::{FrameSplitter, Framing};
/// use tokio_util::codec::Decoder;
///
/// let mut splitter = FrameSplitter::new(Framing::Sse);
/// let mut buf = BytesMut::from("event: delta\ndata: {\"a\":1}\ndata: [DO");
///
/// assert_eq!(splitter.decode(&mut buf).unwrap().as_deref(), Some("{\"a\":1}"));
/// assert_eq!(splitter.decode(&mut buf).unwrap(), None);
/// assert_eq!(splitter.decode_eof(&mut buf).unwrap().as_deref(), Some("[DO"));
/// ```
#[derive(Debug)]
pub struct FrameSplitter {
    framing: Framing,
    // Bytes already scanned for a newline.
    next_index: usize,
}

impl FrameSplitter {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            next_index: 0,
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    fn frame_from_line(&self, line: &[u8]) -> Option<String> {
        let line = String::from_utf8_lossy(line);
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        match self.framing {
            Framing::Sse => parse_sse_line(line).map(str::to_string),
            Framing::Ndjson => Some(line.to_string()),
        }
    }
}

impl Decoder for FrameSplitter {
    type Item = String;
    type Error = ClientError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, ClientError> {
        loop {
            let start = self.next_index.min(buf.len());
            let Some(offset) = buf[start..].iter().position(|b| *b == b'\n') else {
                self.next_index = buf.len();
                return Ok(None);
            };

            let line = buf.split_to(start + offset + 1);
            self.next_index = 0;

            if let Some(frame) = self.frame_from_line(&line) {
                return Ok(Some(frame));
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, ClientError> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        if buf.is_empty() {
            return Ok(None);
        }

        let line = buf.split_to(buf.len());
        self.next_index = 0;
        Ok(self.frame_from_line(&line))
    }
}

/// Extract the payload of an SSE `data: ` line.
///
/// # Example
/// ```
/// use chatwire::frame::parse_sse_line;
///
/// assert_eq!(parse_sse_line("data: {\"a\": 1}"), Some("{\"a\": 1}"));
/// assert_eq!(parse_sse_line("event: ping"), None);
/// ```
pub fn parse_sse_line(line: &str) -> Option<&str> {
    line.strip_prefix("data: ").map(|s| s.trim())
}

/// Check for the SSE end-of-stream sentinel.
///
/// # Example
/// ```
/// use chatwire::frame::is_done_marker;
///
/// assert!(is_done_marker("[DONE]"));
/// assert!(!is_done_marker("{}"));
/// ```
pub fn is_done_marker(data: &str) -> bool {
    data == "[DONE]"
}
