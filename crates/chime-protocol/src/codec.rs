//! JSON codec for Chime frames.

use std::sync::Arc;

use thiserror::Error;

use crate::frames::{InboundFrame, OutboundFrame, RawFrame};

/// Maximum frame size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
///
/// A decode error affects only the offending frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Not valid JSON, or not an object with a string `event`.
    #[error("Malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    /// A field the event requires is absent.
    #[error("Event `{event}` is missing required field `{field}`")]
    MissingField { event: String, field: &'static str },

    /// A field is present with the wrong shape.
    #[error("Field `{field}` of event `{event}` must be {expected}")]
    InvalidField {
        event: String,
        field: &'static str,
        expected: &'static str,
    },
}

/// Decode an inbound frame from raw bytes.
///
/// # Errors
///
/// Returns an error if the data is too large, not JSON, or lacks a field the
/// event requires.
pub fn decode(data: &[u8]) -> Result<InboundFrame, ProtocolError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }

    let raw: RawFrame = serde_json::from_slice(data)?;
    InboundFrame::try_from(raw)
}

/// Encode an outbound frame to shareable text.
///
/// The result is reference-counted so one encoding can be fanned out to many
/// connections.
///
/// # Errors
///
/// Returns an error if the frame is too large or serialization fails.
pub fn encode(frame: &OutboundFrame) -> Result<Arc<str>, ProtocolError> {
    let text = serde_json::to_string(frame)?;

    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    Ok(Arc::from(text))
}
