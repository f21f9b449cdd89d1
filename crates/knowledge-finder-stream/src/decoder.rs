use tracing::debug;

use crate::errors::StreamError;
use crate::event::Frame;

/// Reassembles newline-terminated lines from arbitrarily split byte chunks.
///
/// Bytes are buffered rather than text so a chunk boundary that falls inside
/// a multi-byte UTF-8 sequence does not corrupt the line.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
    // Prefix of `buf` already known to hold no newline.
    scanned: usize,
}

impl LineDecoder {
    /// Appends a chunk and returns every line it completed, in order.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(offset) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') {
            let idx = self.scanned + offset;
            let mut line: Vec<u8> = self.buf.drain(..=idx).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
            self.scanned = 0;
        }
        self.scanned = self.buf.len();
        lines
    }

    /// Number of bytes waiting for a line terminator.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    /// Ends the input. An unterminated trailing fragment is dropped and
    /// returned so the caller can report it.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        self.scanned = 0;
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Decodes one complete line.
///
/// Returns `Ok(None)` for lines that carry no frame (blank separators,
/// comments, non-data fields, the `[DONE]` sentinel).
pub fn decode_line(line: &str) -> Result<Option<Frame>, StreamError> {
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() || line.starts_with(':') {
        return Ok(None);
    }
    let Some(payload) = line.strip_prefix("data:") else {
        if ["event:", "id:", "retry:"]
            .iter()
            .any(|field| line.starts_with(field))
        {
            return Ok(None);
        }
        return Err(StreamError::parse(line, "expected a `data:` line"));
    };
    let payload = payload.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return Ok(None);
    }
    let value: serde_json::Value = serde_json::from_str(payload)
        .map_err(|e| StreamError::parse(line, format!("invalid JSON payload: {e}")))?;
    Frame::from_value(value)
        .map(Some)
        .map_err(|e| StreamError::parse(line, format!("invalid frame envelope: {e}")))
}

/// Result of feeding one chunk through a [`FrameDecoder`].
///
/// Frames and skipped lines stay interleaved in arrival order, so a
/// consumer can stop at a terminal frame without counting what follows.
#[derive(Debug, Default)]
pub struct DecodedChunk {
    pub items: Vec<Result<Frame, StreamError>>,
}

impl DecodedChunk {
    pub fn frames(&self) -> impl Iterator<Item = &Frame> {
        self.items.iter().filter_map(|item| item.as_ref().ok())
    }

    /// Lines that were skipped as malformed.
    pub fn errors(&self) -> impl Iterator<Item = &StreamError> {
        self.items.iter().filter_map(|item| item.as_ref().err())
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Line assembly plus frame decoding in one step.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    lines: LineDecoder,
}

impl FrameDecoder {
    pub fn push_chunk(&mut self, chunk: &[u8]) -> DecodedChunk {
        let mut out = DecodedChunk::default();
        for line in self.lines.push_chunk(chunk) {
            match decode_line(&line) {
                Ok(Some(frame)) => out.items.push(Ok(frame)),
                Ok(None) => {}
                Err(err) => {
                    debug!(error = %err, "skipping malformed stream line");
                    out.items.push(Err(err));
                }
            }
        }
        out
    }

    /// Ends the input; a dangling partial line is discarded, never parsed.
    pub fn finish(&mut self) -> Option<StreamError> {
        self.lines.finish().map(|rest| {
            debug!(bytes = rest.len(), "discarding unterminated trailing line");
            StreamError::parse(rest, "stream ended mid-line")
        })
    }
}
