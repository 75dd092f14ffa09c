//! Codec for presence events.
//!
//! Events are JSON documents. Several encoded events delivered together
//! share one text frame and are separated by a newline.

use bytes::Bytes;
use thiserror::Error;

use crate::event::PresenceEvent;

/// Separator between events coalesced into one frame.
pub const BATCH_SEPARATOR: u8 = b'\n';

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[source] serde_json::Error),

    /// JSON decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[source] serde_json::Error),

    /// Batch is not valid UTF-8 and cannot travel in a text frame.
    #[error("Batch is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

/// Encode an event to bytes.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(event: &PresenceEvent) -> Result<Bytes, ProtocolError> {
    let payload = serde_json::to_vec(event).map_err(ProtocolError::Encode)?;
    Ok(Bytes::from(payload))
}

/// Decode a single event.
///
/// # Errors
///
/// Returns an error if the data is not a valid event.
pub fn decode(data: &[u8]) -> Result<PresenceEvent, ProtocolError> {
    serde_json::from_slice(data).map_err(ProtocolError::Decode)
}

/// Join encoded events into the text of a single frame.
///
/// # Errors
///
/// Returns an error if the joined payload is not valid UTF-8.
pub fn join_batch(messages: &[Bytes]) -> Result<String, ProtocolError> {
    let len = messages.iter().map(Bytes::len).sum::<usize>() + messages.len().saturating_sub(1);
    let mut buf = Vec::with_capacity(len);

    for (i, message) in messages.iter().enumerate() {
        if i > 0 {
            buf.push(BATCH_SEPARATOR);
        }
        buf.extend_from_slice(message);
    }

    Ok(String::from_utf8(buf)?)
}

/// Decode every event in a frame produced by [`join_batch`].
///
/// Blank lines are skipped.
///
/// # Errors
///
/// Returns an error on the first line that is not a valid event.
pub fn decode_batch(text: &str) -> Result<Vec<PresenceEvent>, ProtocolError> {
    text.split(BATCH_SEPARATOR as char)
        .filter(|line| !line.trim().is_empty())
        .map(|line| decode(line.as_bytes()))
        .collect()
}
