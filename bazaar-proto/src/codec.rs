//! JSON text-frame codec for the Bazaar relay wire protocol.
//!
//! Wire format: one event per WebSocket text frame,
//! `{"event": "<name>", "data": <payload>}`.
//!
//! Inbound frames come from browsers and are decoded field by field so that
//! every way a frame can be unusable maps to a distinct [`DecodeError`].

use serde::Deserialize;
use serde_json::Value;

use crate::event::{ChatMessage, EventKind, InboundEvent, MarkRead, OutboundEvent};
use crate::ids::UserId;

/// Why an inbound frame could not be turned into an [`InboundEvent`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The frame is not a JSON object with a string `event` field.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    /// The `event` name is not one the relay handles.
    #[error("unknown event: {0}")]
    UnknownEvent(String),
    /// `joinRoom` without a usable user id.
    #[error("joinRoom without a userId")]
    MissingUserId,
    /// `sendMessage` without a usable `receiverId`.
    #[error("sendMessage without a receiverId")]
    MissingReceiverId,
    /// The payload is absent or has the wrong shape for its event.
    #[error("malformed {event} payload: {reason}")]
    MalformedPayload {
        /// Event whose payload was rejected.
        event: EventKind,
        /// What was wrong with it.
        reason: String,
    },
}

/// Error type for encode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Envelope shared by every frame before the payload is interpreted.
#[derive(Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Decodes one inbound text frame.
///
/// # Errors
///
/// Returns a [`DecodeError`] describing why the frame was unusable.
pub fn decode_inbound(text: &str) -> Result<InboundEvent, DecodeError> {
    let frame: RawFrame =
        serde_json::from_str(text).map_err(|e| DecodeError::InvalidFrame(e.to_string()))?;

    let kind = EventKind::from_name(&frame.event)
        .ok_or_else(|| DecodeError::UnknownEvent(frame.event.clone()))?;

    match kind {
        EventKind::JoinRoom => UserId::from_value(&frame.data)
            .map(InboundEvent::JoinRoom)
            .ok_or(DecodeError::MissingUserId),
        EventKind::SendMessage => match frame.data {
            Value::Object(payload) => ChatMessage::try_from(payload).map(InboundEvent::SendMessage),
            Value::Null => Err(DecodeError::MissingReceiverId),
            other => Err(DecodeError::MalformedPayload {
                event: kind,
                reason: format!("expected an object, got {}", json_type(&other)),
            }),
        },
        EventKind::MarkRead => {
            if frame.data.is_null() {
                return Err(DecodeError::MalformedPayload {
                    event: kind,
                    reason: "missing payload".to_string(),
                });
            }
            serde_json::from_value::<MarkRead>(frame.data)
                .map(InboundEvent::MarkRead)
                .map_err(|e| DecodeError::MalformedPayload {
                    event: kind,
                    reason: e.to_string(),
                })
        }
    }
}

/// Encodes an outbound event into a text frame.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the event cannot be serialized.
pub fn encode_outbound(event: &OutboundEvent) -> Result<String, CodecError> {
    Ok(serde_json::to_string(event)?)
}

const fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
