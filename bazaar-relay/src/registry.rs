//! Connection registry and per-user rooms.
//!
//! The registry maps each joined connection to exactly one [`UserId`]. Every
//! user id is also a room whose members are the connections registered under
//! it. Both maps live behind a single lock and are only changed together by
//! [`Registry::join`] and [`Registry::leave`], so membership can never drift
//! from the registry.
//!
//! Entries are ephemeral and lost on relay restart.

use std::collections::HashMap;

use axum::extract::ws::Message;
use bazaar_proto::ids::{ConnectionId, UserId};
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Sending half of a connection's outbound channel. The connection's writer
/// task drains the other half into the socket.
pub type Outbox = mpsc::UnboundedSender<Message>;

/// Result of a [`Registry::join`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The connection was unjoined and is now registered.
    Joined,
    /// The connection was already registered under the same user.
    AlreadyJoined,
    /// The connection was registered under another user; that entry and its
    /// room membership were replaced.
    Rejoined {
        /// The user the connection was previously registered as.
        previous: UserId,
    },
}

/// Point-in-time counters for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct RegistryStats {
    /// Number of joined connections.
    pub connections: usize,
    /// Number of users with at least one joined connection.
    pub users: usize,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<ConnectionId, UserId>,
    rooms: HashMap<UserId, HashMap<ConnectionId, Outbox>>,
}

impl Inner {
    /// Removes `conn` from `user`'s room, dropping the room once empty.
    fn remove_member(&mut self, user: &UserId, conn: &ConnectionId) {
        if let Some(members) = self.rooms.get_mut(user) {
            members.remove(conn);
            if members.is_empty() {
                self.rooms.remove(user);
            }
        }
    }
}

/// Thread-safe registry of joined connections and their rooms.
#[derive(Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `conn` as `user` and subscribes it to `user`'s room.
    ///
    /// A connection joined as someone else is moved: its old entry and
    /// membership are replaced in the same critical section.
    pub fn join(&self, conn: ConnectionId, user: UserId, outbox: Outbox) -> JoinOutcome {
        let mut inner = self.inner.lock();

        let outcome = match inner.entries.get(&conn) {
            Some(current) if *current == user => JoinOutcome::AlreadyJoined,
            Some(current) => {
                let previous = current.clone();
                inner.remove_member(&previous, &conn);
                JoinOutcome::Rejoined { previous }
            }
            None => JoinOutcome::Joined,
        };

        inner
            .rooms
            .entry(user.clone())
            .or_default()
            .insert(conn, outbox);
        inner.entries.insert(conn, user);
        outcome
    }

    /// Removes `conn`'s entry and room membership.
    ///
    /// Returns the user it was registered as, or `None` if it never joined.
    pub fn leave(&self, conn: &ConnectionId) -> Option<UserId> {
        let mut inner = self.inner.lock();
        let user = inner.entries.remove(conn)?;
        inner.remove_member(&user, conn);
        Some(user)
    }

    /// Returns the user `conn` is registered as.
    #[must_use]
    pub fn user_of(&self, conn: &ConnectionId) -> Option<UserId> {
        self.inner.lock().entries.get(conn).cloned()
    }

    /// Returns the connections currently in `user`'s room.
    #[must_use]
    pub fn members(&self, user: &UserId) -> Vec<ConnectionId> {
        self.inner
            .lock()
            .rooms
            .get(user)
            .map(|members| members.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Returns the number of connections in `user`'s room.
    #[must_use]
    pub fn room_size(&self, user: &UserId) -> usize {
        self.inner.lock().rooms.get(user).map_or(0, HashMap::len)
    }

    /// Queues `frame` on every connection in `room`.
    ///
    /// Returns how many connections accepted it. An empty room is a no-op
    /// that returns 0. Connections whose writer has already gone away are
    /// skipped; their entry is removed by the disconnect path.
    pub fn broadcast(&self, room: &UserId, frame: &Message) -> usize {
        let inner = self.inner.lock();
        let Some(members) = inner.rooms.get(room) else {
            return 0;
        };
        members
            .values()
            .filter(|outbox| outbox.send(frame.clone()).is_ok())
            .count()
    }

    /// Returns connection and user counts.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let inner = self.inner.lock();
        RegistryStats {
            connections: inner.entries.len(),
            users: inner.rooms.len(),
        }
    }
}
