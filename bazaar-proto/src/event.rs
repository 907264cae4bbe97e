//! Inbound and outbound relay events.
//!
//! Every WebSocket text frame carries one event as
//! `{"event": "<name>", "data": <payload>}`. Clients send [`InboundEvent`]s;
//! the relay emits [`OutboundEvent`]s into rooms.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::codec::DecodeError;
use crate::ids::UserId;

/// Names of the events a client may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// `joinRoom`
    JoinRoom,
    /// `sendMessage`
    SendMessage,
    /// `markRead`
    MarkRead,
}

impl EventKind {
    /// Returns the wire name of the event.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::JoinRoom => "joinRoom",
            Self::SendMessage => "sendMessage",
            Self::MarkRead => "markRead",
        }
    }

    /// Looks up an event kind by its wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "joinRoom" => Some(Self::JoinRoom),
            "sendMessage" => Some(Self::SendMessage),
            "markRead" => Some(Self::MarkRead),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A direct message in transit.
///
/// The relay is a courier: apart from `receiverId` the payload is opaque and
/// is forwarded exactly as received (content, attachment markers, sender
/// fields, timestamps and whatever else the client put there).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct ChatMessage {
    receiver_id: UserId,
    payload: Map<String, Value>,
}

impl ChatMessage {
    /// Builds a message addressed to `receiver` with the given text content.
    #[must_use]
    pub fn text(receiver: &UserId, content: &str) -> Self {
        let mut payload = Map::new();
        payload.insert("receiverId".into(), Value::String(receiver.to_string()));
        payload.insert("content".into(), Value::String(content.to_string()));
        Self {
            receiver_id: receiver.clone(),
            payload,
        }
    }

    /// The user whose room this message is delivered to.
    #[must_use]
    pub const fn receiver_id(&self) -> &UserId {
        &self.receiver_id
    }

    /// The `content` field, if the client sent a textual one.
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        self.payload.get("content").and_then(Value::as_str)
    }

    /// The full payload as received.
    #[must_use]
    pub const fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }
}

impl TryFrom<Map<String, Value>> for ChatMessage {
    type Error = DecodeError;

    fn try_from(payload: Map<String, Value>) -> Result<Self, Self::Error> {
        let receiver_id = payload
            .get("receiverId")
            .and_then(UserId::from_value)
            .ok_or(DecodeError::MissingReceiverId)?;
        Ok(Self {
            receiver_id,
            payload,
        })
    }
}

impl From<ChatMessage> for Map<String, Value> {
    fn from(msg: ChatMessage) -> Self {
        msg.payload
    }
}

/// A client's notice that it has read messages from `partner_id`.
///
/// Only `partnerId` is interpreted, as the room to notify. `readerId` and
/// `messageIds` are relayed as the exact JSON values the client sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkRead {
    /// The original sender, whose room is notified.
    pub partner_id: UserId,
    /// The user who read the messages.
    pub reader_id: Value,
    /// The messages that were read.
    pub message_ids: Value,
}

impl MarkRead {
    /// Splits the request into the target room and the receipt to deliver.
    #[must_use]
    pub fn into_receipt(self) -> (UserId, ReadReceipt) {
        (
            self.partner_id,
            ReadReceipt {
                reader_id: self.reader_id,
                message_ids: self.message_ids,
            },
        )
    }
}

/// Read receipt delivered to the original sender's room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    /// The user who read the messages, as sent.
    pub reader_id: Value,
    /// The messages that were read, as sent.
    pub message_ids: Value,
}

/// Events sent by clients to the relay.
///
/// Disconnect is not an event: it is observed from the transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum InboundEvent {
    /// Register the sending connection as this user and join its room.
    JoinRoom(UserId),
    /// Forward a message to the receiver's room.
    SendMessage(ChatMessage),
    /// Forward a read receipt to the partner's room.
    MarkRead(MarkRead),
}

impl InboundEvent {
    /// Returns the kind of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::JoinRoom(_) => EventKind::JoinRoom,
            Self::SendMessage(_) => EventKind::SendMessage,
            Self::MarkRead(_) => EventKind::MarkRead,
        }
    }
}

/// Events the relay delivers to rooms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum OutboundEvent {
    /// A message addressed to the room's user.
    NewMessage(ChatMessage),
    /// Messages the room's user sent have been read.
    MessagesRead(ReadReceipt),
}

impl OutboundEvent {
    /// Returns the wire name of the event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::NewMessage(_) => "newMessage",
            Self::MessagesRead(_) => "messagesRead",
        }
    }
}
