//! Event decoding: turns a raw stream event into a firmware update command.
//!
//! Decoding is strict: a `FirmwareUpdateReady` event missing any field is a
//! [`DecodeError`], never a command with defaulted values. Events of any other
//! type are [`EventKind::Ignored`].

use serde::Deserialize;
use serde_json::Value;

use crate::event::StreamEvent;

/// The only event type the broker acts on. Matched case-sensitively.
pub const FIRMWARE_UPDATE_READY: &str = "FirmwareUpdateReady";

/// Event property carrying the target device id.
pub const DEVICE_ID_PROPERTY: &str = "device_id";

/// Request to stream `filename` to `device_id` in `chunk_size` byte chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReadyCommand {
    pub device_id: String,
    pub filename: String,
    pub chunk_size: u64,
}

/// Result of decoding one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    UpdateReady(UpdateReadyCommand),
    /// Any other `event_type`, or none at all.
    Ignored { event_type: Option<String> },
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("event body is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("event body is not a JSON object")]
    NotAnObject,
    #[error("invalid {FIRMWARE_UPDATE_READY} body: {0}")]
    InvalidBody(#[source] serde_json::Error),
    #[error("missing event property: {0}")]
    MissingProperty(&'static str),
    #[error("event property {0} is not valid UTF-8")]
    InvalidProperty(&'static str),
    #[error("filename is empty")]
    EmptyFilename,
    #[error("chunk_size must be a positive integer")]
    ZeroChunkSize,
}

#[derive(Deserialize)]
struct UpdateReadyBody {
    filename: String,
    chunk_size: u64,
}

/// Decode a stream event.
///
/// The body must be a UTF-8 JSON object. `device_id` comes from the event
/// properties, `filename` and `chunk_size` from the body.
pub fn decode_event(event: &StreamEvent) -> Result<EventKind, DecodeError> {
    let value: Value = serde_json::from_slice(&event.body).map_err(DecodeError::InvalidJson)?;
    let object = value.as_object().ok_or(DecodeError::NotAnObject)?;

    let event_type = object.get("event_type").and_then(Value::as_str);
    if event_type != Some(FIRMWARE_UPDATE_READY) {
        return Ok(EventKind::Ignored {
            event_type: event_type.map(str::to_string),
        });
    }

    let body = UpdateReadyBody::deserialize(&value).map_err(DecodeError::InvalidBody)?;
    if body.filename.is_empty() {
        return Err(DecodeError::EmptyFilename);
    }
    if body.chunk_size == 0 {
        return Err(DecodeError::ZeroChunkSize);
    }

    let device_id = event
        .property(DEVICE_ID_PROPERTY)
        .ok_or(DecodeError::MissingProperty(DEVICE_ID_PROPERTY))?
        .as_utf8()
        .map_err(|_| DecodeError::InvalidProperty(DEVICE_ID_PROPERTY))?
        .to_string();

    Ok(EventKind::UpdateReady(UpdateReadyCommand {
        device_id,
        filename: body.filename,
        chunk_size: body.chunk_size,
    }))
}
