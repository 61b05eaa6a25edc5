//! Incremental SSE frame parsing
//!
//! The backend streams line-oriented UTF-8 text:
//! - `event: <type>` - type label, carries no payload
//! - `data: <json>` - one frame's payload
//! - Empty line - event separator
//!
//! Chunk boundaries from the transport carry no meaning: a single read may
//! hold several frames or stop mid-prefix, mid-payload, or inside a
//! multi-byte character. `FrameParser` buffers bytes across reads and only
//! emits payloads for fully bounded lines.

use crate::error::DecodeError;
use crate::event::StreamEvent;

const EVENT_PREFIX: &str = "event:";
const DATA_PREFIX: &str = "data:";

/// Stateful splitter turning an arbitrarily chunked byte stream into
/// complete frame payloads.
#[derive(Debug, Default)]
pub struct FrameParser {
    buf: Vec<u8>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return the payloads of every line it completes.
    ///
    /// The bytes after the last line terminator are retained, whether or not
    /// they look like a complete line: the next chunk may continue them.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let Some(last_newline) = self.buf.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };
        let rest = self.buf.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buf, rest);

        complete[..last_newline]
            .split(|&b| b == b'\n')
            .filter_map(payload_of)
            .collect()
    }

    /// Signal end of stream. An incomplete trailing line is discarded: a
    /// half-written frame has no safely decodable payload.
    pub fn finish(&mut self) {
        if !self.buf.is_empty() {
            tracing::debug!(
                bytes = self.buf.len(),
                "discarding incomplete trailing frame"
            );
            self.buf.clear();
        }
    }
}

/// Extract the payload of one fully bounded line, if it carries one.
fn payload_of(line: &[u8]) -> Option<String> {
    let line = match line.split_last() {
        Some((&b'\r', head)) => head,
        _ => line,
    };
    let line = String::from_utf8_lossy(line);

    if line.starts_with(EVENT_PREFIX) {
        // Type label line: recognized, but the payload travels in `data:`.
        return None;
    }
    let payload = line.strip_prefix(DATA_PREFIX)?.trim();
    if payload.is_empty() {
        return None;
    }
    Some(payload.to_string())
}

/// Decode one frame payload into a typed event.
///
/// Fails on structurally invalid JSON or an unrecognized `type` tag; field
/// values of recognized events are preserved verbatim.
pub fn decode_frame(payload: &str) -> Result<StreamEvent, DecodeError> {
    Ok(serde_json::from_str(payload)?)
}
