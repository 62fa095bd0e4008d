//! Frame splitting for the chunked response body
//!
//! A frame is a group of lines terminated by a blank line:
//!
//! ```text
//! event: text
//! data: {"content":"Hel"}
//!
//! ```
//!
//! Reads from the transport can split a frame anywhere, including inside a
//! multi-byte UTF-8 sequence, so bytes are buffered until a full frame is seen.

use bytes::{Buf, BytesMut};

use crate::error::ProtocolError;

/// Type used when a frame carries data but no `event:` line
pub const DEFAULT_EVENT_TYPE: &str = "message";

/// One protocol unit: a type line plus its (joined) data lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub event_type: String,
    pub data: String,
}

/// Incremental frame splitter
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
    /// Bytes already scanned without finding a boundary
    scanned: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes from the transport
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Next complete frame, if one is buffered
    ///
    /// Frames that contain nothing but comments are skipped.
    pub fn next_frame(&mut self) -> Option<Result<Frame, ProtocolError>> {
        loop {
            // A delimiter may straddle the previous scan end
            let from = self.scanned.saturating_sub(2);
            let Some((end, delimiter)) = find_boundary(&self.buffer, from) else {
                self.scanned = self.buffer.len();
                return None;
            };

            let raw = self.buffer.split_to(end);
            self.buffer.advance(delimiter);
            self.scanned = 0;

            match parse_frame(&raw) {
                Ok(Some(frame)) => return Some(Ok(frame)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }

    /// Parse whatever is left once the stream has ended
    pub fn finish(&mut self) -> Option<Result<Frame, ProtocolError>> {
        if let Some(frame) = self.next_frame() {
            return Some(frame);
        }
        let raw = self.buffer.split();
        self.scanned = 0;
        parse_frame(&raw).transpose()
    }

    /// Bytes waiting for a frame boundary
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

/// Locate the first blank line at or after `from`.
/// Returns (frame length, delimiter length).
fn find_boundary(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i < buf.len() {
        if buf[i] == b'\n' {
            match buf.get(i + 1) {
                Some(b'\n') => return Some((i, 2)),
                Some(b'\r') if buf.get(i + 2) == Some(&b'\n') => return Some((i, 3)),
                _ => {}
            }
        }
        i += 1;
    }
    None
}

/// Parse the lines of one frame. `Ok(None)` means the frame was empty.
pub fn parse_frame(raw: &[u8]) -> Result<Option<Frame>, ProtocolError> {
    let text = std::str::from_utf8(raw)?;

    let mut event_type: Option<&str> = None;
    let mut data: Option<String> = None;

    for line in text.split('\n') {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => event_type = Some(value.trim()),
            "data" => match data.as_mut() {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(value);
                }
                None => data = Some(value.to_string()),
            },
            _ => {}
        }
    }

    match (event_type, data) {
        (None, None) => Ok(None),
        (Some(event_type), None) => Err(ProtocolError::MissingData(event_type.to_string())),
        (event_type, Some(data)) => Ok(Some(Frame {
            event_type: event_type.unwrap_or(DEFAULT_EVENT_TYPE).to_string(),
            data,
        })),
    }
}
