//! Event routing: turns one inbound frame into registry changes and room
//! broadcasts.
//!
//! Every operation is best-effort. Nothing here returns an error to the
//! client; each frame yields a [`Dispatch`] that the connection handler
//! logs, and unusable frames become [`Dispatch::Dropped`] with a reason.

use axum::extract::ws::Message;
use bazaar_proto::codec::{self, DecodeError};
use bazaar_proto::event::{ChatMessage, EventKind, InboundEvent, MarkRead, OutboundEvent};
use bazaar_proto::ids::{ConnectionId, UserId};

use crate::registry::{JoinOutcome, Outbox, Registry};

/// The relay's view of one live connection.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    outbox: Outbox,
}

impl Connection {
    /// Wraps a freshly accepted connection. It starts unjoined.
    #[must_use]
    pub const fn new(id: ConnectionId, outbox: Outbox) -> Self {
        Self { id, outbox }
    }

    /// The connection's handle.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }
}

/// Why an inbound event produced no effect.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DropReason {
    /// The frame could not be decoded into an event.
    #[error(transparent)]
    Malformed(#[from] DecodeError),
    /// The connection sent an event before joining.
    #[error("{0} before joinRoom")]
    NotJoined(EventKind),
    /// The outbound event could not be serialized.
    #[error("failed to encode {event}: {reason}")]
    Encode {
        /// Outbound event name.
        event: &'static str,
        /// Serializer message.
        reason: String,
    },
}

/// Outcome of handling one inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// The connection is now registered as `user`.
    Joined {
        /// The user joined as.
        user: UserId,
        /// Registry result.
        outcome: JoinOutcome,
    },
    /// An outbound event was queued to a room.
    Delivered {
        /// Outbound event name.
        event: &'static str,
        /// Target room.
        room: UserId,
        /// Number of connections it was queued on; zero when the user is
        /// offline.
        recipients: usize,
    },
    /// The event was ignored.
    Dropped(DropReason),
}

/// Decodes a text frame and dispatches it.
pub fn dispatch_frame(registry: &Registry, conn: &Connection, text: &str) -> Dispatch {
    match codec::decode_inbound(text) {
        Ok(event) => dispatch(registry, conn, event),
        Err(e) => Dispatch::Dropped(e.into()),
    }
}

/// Applies one decoded inbound event.
pub fn dispatch(registry: &Registry, conn: &Connection, event: InboundEvent) -> Dispatch {
    match event {
        InboundEvent::JoinRoom(user) => join(registry, conn, user),
        InboundEvent::SendMessage(msg) => route_message(registry, conn, msg),
        InboundEvent::MarkRead(mark) => broadcast_read_receipt(registry, conn, mark),
    }
}

/// Registers the connection as `user` and subscribes it to `user`'s room.
pub fn join(registry: &Registry, conn: &Connection, user: UserId) -> Dispatch {
    let outcome = registry.join(conn.id, user.clone(), conn.outbox.clone());
    Dispatch::Joined { user, outcome }
}

/// Forwards `msg` unchanged as `newMessage` to its receiver's room.
pub fn route_message(registry: &Registry, conn: &Connection, msg: ChatMessage) -> Dispatch {
    let Some(sender) = registry.user_of(&conn.id) else {
        return Dispatch::Dropped(DropReason::NotJoined(EventKind::SendMessage));
    };
    let room = msg.receiver_id().clone();
    tracing::trace!(conn = %conn.id, from = %sender, to = %room, "routing message");
    deliver(registry, room, &OutboundEvent::NewMessage(msg))
}

/// Forwards `{readerId, messageIds}` as `messagesRead` to the partner's room.
///
/// `readerId` is passed through as sent; it is not checked against the
/// emitting connection's registration.
pub fn broadcast_read_receipt(registry: &Registry, conn: &Connection, mark: MarkRead) -> Dispatch {
    if registry.user_of(&conn.id).is_none() {
        return Dispatch::Dropped(DropReason::NotJoined(EventKind::MarkRead));
    }
    let (room, receipt) = mark.into_receipt();
    deliver(registry, room, &OutboundEvent::MessagesRead(receipt))
}

/// Removes the connection's registration, if it had one.
pub fn disconnect(registry: &Registry, conn: ConnectionId) -> Option<UserId> {
    registry.leave(&conn)
}

fn deliver(registry: &Registry, room: UserId, event: &OutboundEvent) -> Dispatch {
    let text = match codec::encode_outbound(event) {
        Ok(t) => t,
        Err(e) => {
            return Dispatch::Dropped(DropReason::Encode {
                event: event.name(),
                reason: e.to_string(),
            });
        }
    };
    let recipients = registry.broadcast(&room, &Message::Text(text.into()));
    Dispatch::Delivered {
        event: event.name(),
        room,
        recipients,
    }
}
