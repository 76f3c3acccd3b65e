//! Codec for encoding and decoding Concierge frames.
//!
//! Frames are Server-Sent Events blocks terminated by a blank line. The
//! encoder produces a single `data:` line (JSON never contains raw newlines),
//! optionally preceded by an `event:` line.

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::json;
use thiserror::Error;

use crate::frames::{EventFrame, WireFormat};

/// Media type of a frame stream.
pub const CONTENT_TYPE: &str = "text/event-stream";

/// Maximum size of a single buffered frame (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Block terminator.
const FRAME_DELIMITER: &[u8] = b"\n\n";

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Payload could not be serialized.
    #[error("Serialization error: {0}")]
    Serialize(#[source] serde_json::Error),

    /// Event type would break the line-oriented framing.
    #[error("Invalid event type: {0:?}")]
    InvalidEventType(String),

    /// Block contained no `data:` field.
    #[error("Frame has no data field")]
    MissingData,

    /// The `data:` field is not a valid envelope.
    #[error("Invalid frame envelope: {0}")]
    InvalidEnvelope(#[source] serde_json::Error),

    /// Block is not valid UTF-8.
    #[error("Frame is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// Buffered data exceeds the maximum frame size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),
}

/// Encode a frame to bytes.
///
/// # Errors
///
/// Returns an error if the event type contains a line break or the payload
/// cannot be serialized.
pub fn encode(frame: &EventFrame, format: WireFormat) -> Result<Bytes, ProtocolError> {
    if frame.event_type.contains(['\n', '\r']) {
        return Err(ProtocolError::InvalidEventType(frame.event_type.clone()));
    }

    let data = serde_json::to_string(frame).map_err(ProtocolError::Serialize)?;
    Ok(assemble(&frame.event_type, &data, format))
}

/// Encode a heartbeat frame stamped with the current time.
#[must_use]
pub fn encode_heartbeat(format: WireFormat) -> Bytes {
    let frame = EventFrame::heartbeat();
    // `Value`'s Display impl cannot fail, unlike `to_string` on a generic.
    let data = json!({
        "event_type": frame.event_type,
        "payload": frame.payload,
    })
    .to_string();
    assemble(&frame.event_type, &data, format)
}

fn assemble(event_type: &str, data: &str, format: WireFormat) -> Bytes {
    let mut buf = BytesMut::with_capacity(event_type.len() + data.len() + 16);
    if format == WireFormat::Named {
        buf.put_slice(b"event: ");
        buf.put_slice(event_type.as_bytes());
        buf.put_u8(b'\n');
    }
    buf.put_slice(b"data: ");
    buf.put_slice(data.as_bytes());
    buf.put_slice(FRAME_DELIMITER);
    buf.freeze()
}

/// Decode one SSE block into a frame.
///
/// Comment lines (starting with `:`) and fields other than `data` are
/// ignored; multiple `data` lines are joined with `\n`.
///
/// # Errors
///
/// Returns an error if the block has no data or the data is not an envelope.
pub fn decode(block: &str) -> Result<EventFrame, ProtocolError> {
    let mut data: Option<String> = None;

    for line in block.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            match data.as_mut() {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(value);
                }
                None => data = Some(value.to_string()),
            }
        }
    }

    let data = data.ok_or(ProtocolError::MissingData)?;
    serde_json::from_str(&data).map_err(ProtocolError::InvalidEnvelope)
}

/// Incremental decoder for a frame stream arriving in arbitrary chunks.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Number of buffered bytes not yet decoded.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Decode the next complete frame, if one is buffered.
    ///
    /// Returns `Ok(None)` if more data is needed.
    ///
    /// # Errors
    ///
    /// Returns an error if a complete block fails to decode or the buffer
    /// grows past [`MAX_FRAME_SIZE`] without a terminator.
    pub fn next_frame(&mut self) -> Result<Option<EventFrame>, ProtocolError> {
        let Some(end) = self
            .buffer
            .windows(FRAME_DELIMITER.len())
            .position(|w| w == FRAME_DELIMITER)
        else {
            if self.buffer.len() > MAX_FRAME_SIZE {
                return Err(ProtocolError::FrameTooLarge(self.buffer.len()));
            }
            return Ok(None);
        };

        let block = self.buffer.split_to(end + FRAME_DELIMITER.len());
        let text = std::str::from_utf8(&block)?;
        decode(text).map(Some)
    }
}
