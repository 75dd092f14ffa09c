//! Document rooms.
//!
//! A room is the set of connections currently viewing one document. The
//! [`RoomRegistry`] creates rooms lazily on first join and deletes them as
//! soon as they become empty; an empty room never stays in the registry.
//!
//! The registry is plain data. The hub loop owns the only instance and is
//! the only code that mutates it.

use crate::connection::{ConnectionHandle, ConnectionId, DocumentId, EnqueueError};
use bytes::Bytes;
use scribe_protocol::UserInfo;
use std::collections::HashMap;
use tracing::{debug, trace};

#[derive(Debug)]
struct Member {
    handle: ConnectionHandle,
    /// Join order within the room.
    seq: u64,
}

/// Connections viewing a single document.
#[derive(Debug)]
pub struct Room {
    document_id: DocumentId,
    members: HashMap<ConnectionId, Member>,
    next_seq: u64,
}

impl Room {
    /// Create an empty room.
    #[must_use]
    pub fn new(document_id: DocumentId) -> Self {
        Self {
            document_id,
            members: HashMap::new(),
            next_seq: 0,
        }
    }

    #[must_use]
    pub fn document_id(&self) -> &DocumentId {
        &self.document_id
    }

    /// Get the number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Check if the room has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Check if a connection is a member.
    #[must_use]
    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.members.contains_key(connection_id)
    }

    /// Add a connection.
    ///
    /// A connection id that is already a member is left untouched and the
    /// new handle is handed back.
    pub fn insert(&mut self, handle: ConnectionHandle) -> Result<(), ConnectionHandle> {
        if self.members.contains_key(handle.id()) {
            return Err(handle);
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        debug!(document = %self.document_id, connection = %handle.id(), "Connection entered room");
        self.members.insert(handle.id().clone(), Member { handle, seq });
        Ok(())
    }

    /// Remove a connection, returning its handle if it was a member.
    pub fn remove(&mut self, connection_id: &ConnectionId) -> Option<ConnectionHandle> {
        let member = self.members.remove(connection_id)?;
        debug!(document = %self.document_id, connection = %connection_id, "Connection left room");
        Some(member.handle)
    }

    /// User info of every member, in join order.
    #[must_use]
    pub fn users(&self) -> Vec<UserInfo> {
        let mut members: Vec<&Member> = self.members.values().collect();
        members.sort_by_key(|m| m.seq);
        members.into_iter().map(|m| m.handle.user().clone()).collect()
    }

    /// Queue `message` for every member without waiting.
    ///
    /// Members whose queue is full or closed are removed from the room and
    /// their handles returned, in join order. Dropping a returned handle
    /// closes that connection's queue.
    pub fn fan_out(&mut self, message: &Bytes) -> Vec<(ConnectionHandle, EnqueueError)> {
        let mut failed: Vec<(ConnectionId, u64, EnqueueError)> = Vec::new();

        for (id, member) in &self.members {
            if let Err(e) = member.handle.try_enqueue(message.clone()) {
                failed.push((id.clone(), member.seq, e));
            }
        }
        trace!(
            document = %self.document_id,
            recipients = self.members.len() - failed.len(),
            "Fanned out message"
        );

        failed.sort_by_key(|(_, seq, _)| *seq);
        failed
            .into_iter()
            .filter_map(|(id, _, e)| self.members.remove(&id).map(|m| (m.handle, e)))
            .collect()
    }

    /// Queue `message` for a single member without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`EnqueueError::Closed`] if the connection is not a member.
    pub fn send_to(&self, connection_id: &ConnectionId, message: Bytes) -> Result<(), EnqueueError> {
        self.members
            .get(connection_id)
            .ok_or(EnqueueError::Closed)?
            .handle
            .try_enqueue(message)
    }
}

/// All rooms, indexed by document id.
///
/// A connection id is a member of at most one room.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<DocumentId, Room>,
    /// Room of every admitted connection.
    members: HashMap<ConnectionId, DocumentId>,
}

impl RoomRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to the room of its document, creating the room if needed.
    ///
    /// # Errors
    ///
    /// Hands the handle back if the connection id is already in any room.
    pub fn admit(&mut self, handle: ConnectionHandle) -> Result<(), ConnectionHandle> {
        if let Some(current) = self.members.get(handle.id()) {
            debug!(
                connection = %handle.id(),
                document = %current,
                "Connection is already a member of a room"
            );
            return Err(handle);
        }

        let connection_id = handle.id().clone();
        let document_id = handle.document_id().clone();
        self.rooms
            .entry(document_id.clone())
            .or_insert_with_key(|doc| {
                debug!(document = %doc, "Creating room");
                Room::new(doc.clone())
            })
            .insert(handle)?;
        self.members.insert(connection_id, document_id);
        Ok(())
    }

    /// Remove a connection, deleting its room if it became empty.
    pub fn remove(
        &mut self,
        document_id: &DocumentId,
        connection_id: &ConnectionId,
    ) -> Option<ConnectionHandle> {
        let room = self.rooms.get_mut(document_id)?;
        let handle = room.remove(connection_id)?;
        self.members.remove(connection_id);
        self.prune(document_id);
        Some(handle)
    }

    /// Fan a message out to a room. See [`Room::fan_out`].
    ///
    /// A document without a room is a no-op.
    pub fn fan_out(
        &mut self,
        document_id: &DocumentId,
        message: &Bytes,
    ) -> Vec<(ConnectionHandle, EnqueueError)> {
        let Some(room) = self.rooms.get_mut(document_id) else {
            trace!(document = %document_id, "Fan-out to absent room");
            return Vec::new();
        };
        let dropped = room.fan_out(message);
        for (handle, _) in &dropped {
            self.members.remove(handle.id());
        }
        self.prune(document_id);
        dropped
    }

    #[must_use]
    pub fn room(&self, document_id: &DocumentId) -> Option<&Room> {
        self.rooms.get(document_id)
    }

    #[must_use]
    pub fn contains(&self, document_id: &DocumentId, connection_id: &ConnectionId) -> bool {
        self.rooms
            .get(document_id)
            .is_some_and(|room| room.contains(connection_id))
    }

    /// User info of every member of a room; empty if the room is absent.
    #[must_use]
    pub fn active_users(&self, document_id: &DocumentId) -> Vec<UserInfo> {
        self.rooms
            .get(document_id)
            .map(Room::users)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn has_room(&self, document_id: &DocumentId) -> bool {
        self.rooms.contains_key(document_id)
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.members.len()
    }

    fn prune(&mut self, document_id: &DocumentId) {
        if self.rooms.get(document_id).is_some_and(Room::is_empty) {
            self.rooms.remove(document_id);
            debug!(document = %document_id, "Deleted empty room");
        }
    }
}
