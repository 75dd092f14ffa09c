//! The presence hub.
//!
//! [`Hub`] is a cheap, clonable handle. Every operation is sent as a command
//! to a single hub loop task, which owns the [`RoomRegistry`] and processes
//! commands strictly one at a time. Because there is exactly one writer, the
//! registry needs no locks and all members of a room observe JOIN and LEAVE
//! events in the same order.
//!
//! Delivery to a connection is a non-blocking enqueue. A connection whose
//! queue is full is dropped from its room instead of stalling the hub.

use crate::command::Command;
use crate::connection::{
    ConnectionHandle, ConnectionId, ConnectionIdentity, DocumentId, EnqueueError,
};
use crate::room::{Room, RoomRegistry};
use bytes::Bytes;
use scribe_protocol::{codec, PresenceEvent, UserInfo};
use std::collections::VecDeque;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Default capacity of the command channel.
pub const DEFAULT_COMMAND_CAPACITY: usize = 1024;

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Commands that may wait for the hub loop before producers are held back.
    pub command_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            command_capacity: DEFAULT_COMMAND_CAPACITY,
        }
    }
}

/// Hub statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Number of rooms, i.e. documents with at least one viewer.
    pub room_count: usize,
    /// Number of admitted connections across all rooms.
    pub connection_count: usize,
    /// Presence events fanned out since start.
    pub events_total: u64,
    /// Connections dropped because their queue was full or closed.
    pub evicted_total: u64,
}

/// Handle to the hub loop.
#[derive(Debug, Clone)]
pub struct Hub {
    commands: mpsc::Sender<Command>,
}

impl Hub {
    /// Start the hub loop on the current tokio runtime.
    #[must_use]
    pub fn start(config: HubConfig) -> Self {
        Self::spawn(config).0
    }

    /// Start the hub loop, also returning its task handle.
    ///
    /// The loop stops once every `Hub` handle has been dropped.
    pub fn spawn(config: HubConfig) -> (Self, JoinHandle<()>) {
        info!("Starting hub with config: {:?}", config);
        let (commands, receiver) = mpsc::channel(config.command_capacity.max(1));
        let task = tokio::spawn(HubLoop::new(receiver).run());
        (Self { commands }, task)
    }

    /// Add a connection to the room of its document and announce it with a JOIN.
    ///
    /// The connection first receives a JOIN for every user already in the
    /// room, then the JOIN for itself.
    pub async fn admit(&self, connection: ConnectionHandle) {
        self.submit(Command::Admit(connection)).await;
    }

    /// Remove a connection and announce it with a LEAVE.
    ///
    /// Does nothing if the connection is not a member of a room.
    pub async fn remove(&self, identity: &ConnectionIdentity) {
        self.submit(Command::Remove(identity.clone())).await;
    }

    /// Deliver an event to every member of a document's room.
    pub async fn broadcast(&self, document_id: DocumentId, event: PresenceEvent) {
        self.submit(Command::Broadcast { document_id, event }).await;
    }

    /// Snapshot of the users viewing a document, in join order.
    pub async fn active_users(&self, document_id: &DocumentId) -> Vec<UserInfo> {
        let (reply, response) = oneshot::channel();
        self.submit(Command::ActiveUsers {
            document_id: document_id.clone(),
            reply,
        })
        .await;
        response.await.unwrap_or_default()
    }

    /// Get hub statistics.
    ///
    /// The reply is produced after every command submitted before it.
    pub async fn stats(&self) -> HubStats {
        let (reply, response) = oneshot::channel();
        self.submit(Command::Stats { reply }).await;
        response.await.unwrap_or_default()
    }

    async fn submit(&self, command: Command) {
        let name = command.name();
        if self.commands.send(command).await.is_err() {
            error!(command = name, "Hub loop is not running, command dropped");
        }
    }
}

/// State owned by the hub loop task.
struct HubLoop {
    rooms: RoomRegistry,
    commands: mpsc::Receiver<Command>,
    events_total: u64,
    evicted_total: u64,
}

impl HubLoop {
    fn new(commands: mpsc::Receiver<Command>) -> Self {
        Self {
            rooms: RoomRegistry::new(),
            commands,
            events_total: 0,
            evicted_total: 0,
        }
    }

    async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            trace!(command = command.name(), "Hub command");
            self.handle(command);
        }
        info!("Hub loop stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Admit(connection) => self.admit(connection),
            Command::Remove(identity) => self.remove(&identity),
            Command::Broadcast { document_id, event } => {
                self.deliver(&document_id, event, None);
            }
            Command::ActiveUsers { document_id, reply } => {
                let _ = reply.send(self.rooms.active_users(&document_id));
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    fn admit(&mut self, connection: ConnectionHandle) {
        let document_id = connection.document_id().clone();
        let connection_id = connection.id().clone();
        let user = connection.user().clone();
        let present = self.rooms.active_users(&document_id);

        if let Err(duplicate) = self.rooms.admit(connection) {
            warn!(
                connection = %duplicate.id(),
                document = %document_id,
                "Connection already admitted, ignoring"
            );
            return;
        }

        info!(
            connection = %connection_id,
            user = %user.username,
            document = %document_id,
            members = self.rooms.room(&document_id).map_or(0, Room::len),
            "Client joined document"
        );

        if !present.is_empty() {
            self.sync(&document_id, &connection_id, present);
        }
        self.deliver(
            &document_id,
            PresenceEvent::join(document_id.as_str(), user),
            None,
        );
    }

    /// Tell a newcomer who was already in the room, as one batched message.
    fn sync(&self, document_id: &DocumentId, connection_id: &ConnectionId, present: Vec<UserInfo>) {
        let encoded: Result<Vec<Bytes>, _> = present
            .into_iter()
            .map(|user| codec::encode(&PresenceEvent::join(document_id.as_str(), user)))
            .collect();

        let message = match encoded.and_then(|messages| codec::join_batch(&messages)) {
            Ok(text) => Bytes::from(text),
            Err(e) => {
                error!(document = %document_id, error = %e, "Failed to encode presence sync");
                return;
            }
        };

        if let Some(room) = self.rooms.room(document_id) {
            if let Err(e) = room.send_to(connection_id, message) {
                // The JOIN broadcast that follows evicts the connection.
                debug!(connection = %connection_id, error = %e, "Presence sync not queued");
            }
        }
    }

    fn remove(&mut self, identity: &ConnectionIdentity) {
        let ConnectionIdentity {
            connection_id,
            document_id,
            user,
        } = identity;

        if !self.rooms.contains(document_id, connection_id) {
            debug!(
                connection = %connection_id,
                document = %document_id,
                "Remove for connection that is not a member, ignoring"
            );
            return;
        }

        // Announce before mutating so the departing member's peers are all still addressable.
        self.deliver(
            document_id,
            PresenceEvent::leave(document_id.as_str(), user.clone()),
            Some(connection_id),
        );
        drop(self.rooms.remove(document_id, connection_id));

        info!(
            connection = %connection_id,
            user = %user.username,
            document = %document_id,
            remaining = self.rooms.room(document_id).map_or(0, Room::len),
            "Client left document"
        );
    }

    /// Fan an event out to a room.
    ///
    /// Every connection dropped on the way is announced to the rest of the
    /// room with a LEAVE, except `departing`, whose LEAVE is already in flight.
    fn deliver(
        &mut self,
        document_id: &DocumentId,
        event: PresenceEvent,
        departing: Option<&ConnectionId>,
    ) {
        let mut pending = VecDeque::from([event]);

        while let Some(event) = pending.pop_front() {
            if !self.rooms.has_room(document_id) {
                trace!(document = %document_id, "Broadcast to absent room");
                break;
            }

            let message = match codec::encode(&event) {
                Ok(message) => message,
                Err(e) => {
                    error!(document = %document_id, error = %e, "Failed to encode presence event");
                    continue;
                }
            };
            self.events_total += 1;

            for (handle, reason) in self.rooms.fan_out(document_id, &message) {
                if departing == Some(handle.id()) {
                    debug!(
                        connection = %handle.id(),
                        document = %document_id,
                        error = %reason,
                        "Departing connection did not take its LEAVE"
                    );
                    continue;
                }

                self.evicted_total += 1;
                match reason {
                    EnqueueError::Full => warn!(
                        connection = %handle.id(),
                        user = %handle.user().username,
                        document = %document_id,
                        "Outbound queue full, dropping slow consumer"
                    ),
                    EnqueueError::Closed => debug!(
                        connection = %handle.id(),
                        document = %document_id,
                        "Outbound queue closed, dropping connection"
                    ),
                }

                pending.push_back(PresenceEvent::leave(
                    document_id.as_str(),
                    handle.user().clone(),
                ));
            }
        }
    }

    fn stats(&self) -> HubStats {
        HubStats {
            room_count: self.rooms.room_count(),
            connection_count: self.rooms.connection_count(),
            events_total: self.events_total,
            evicted_total: self.evicted_total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::OutboundQueue;
    use scribe_protocol::PresenceKind;
    use std::collections::HashSet;
    use tokio::sync::mpsc::error::TryRecvError;

    fn doc(id: &str) -> DocumentId {
        DocumentId::parse(id).unwrap()
    }

    fn connection(document: &str, user: &str, capacity: usize) -> (ConnectionHandle, OutboundQueue) {
        let identity = ConnectionIdentity::new(
            doc(document),
            UserInfo::new(format!("id-{user}"), user, format!("{user}@example.com")),
        );
        ConnectionHandle::new(identity, capacity)
    }

    /// Every event queued so far, as (kind, username).
    fn drain(queue: &mut OutboundQueue) -> Vec<(PresenceKind, String)> {
        let mut events = Vec::new();
        while let Ok(message) = queue.try_recv() {
            let text = std::str::from_utf8(&message).unwrap();
            for event in codec::decode_batch(text).unwrap() {
                events.push((event.kind(), event.user().username.clone()));
            }
        }
        events
    }

    fn is_closed(queue: &mut OutboundQueue) -> bool {
        matches!(queue.try_recv(), Err(TryRecvError::Disconnected))
    }

    fn join(user: &str) -> (PresenceKind, String) {
        (PresenceKind::Join, user.to_string())
    }

    fn leave(user: &str) -> (PresenceKind, String) {
        (PresenceKind::Leave, user.to_string())
    }

    fn usernames(users: Vec<UserInfo>) -> Vec<String> {
        users.into_iter().map(|u| u.username).collect()
    }

    #[tokio::test]
    async fn test_two_viewers_join_then_one_leaves() {
        let hub = Hub::start(HubConfig::default());
        let (a, mut qa) = connection("doc1", "alice", 16);
        let (b, mut qb) = connection("doc1", "bob", 16);
        let bob = b.identity().clone();

        hub.admit(a).await;
        hub.admit(b).await;
        hub.stats().await;

        assert_eq!(drain(&mut qa), vec![join("alice"), join("bob")]);
        assert_eq!(drain(&mut qb), vec![join("alice"), join("bob")]);

        hub.remove(&bob).await;
        let users = hub.active_users(&doc("doc1")).await;

        assert_eq!(drain(&mut qa), vec![leave("bob")]);
        assert_eq!(usernames(users), vec!["alice"]);

        // Bob's queue carries his own LEAVE, then closes
        assert_eq!(drain(&mut qb), vec![leave("bob")]);
        assert!(is_closed(&mut qb));
        assert!(!is_closed(&mut qa));
    }

    #[tokio::test]
    async fn test_last_viewer_leaving_deletes_room() {
        let hub = Hub::start(HubConfig::default());
        let (c, mut qc) = connection("doc2", "carol", 16);
        let carol = c.identity().clone();

        hub.admit(c).await;
        assert_eq!(hub.stats().await.room_count, 1);

        hub.remove(&carol).await;

        assert!(hub.active_users(&doc("doc2")).await.is_empty());
        let stats = hub.stats().await;
        assert_eq!(stats.room_count, 0);
        assert_eq!(stats.connection_count, 0);

        assert_eq!(drain(&mut qc), vec![join("carol"), leave("carol")]);
        assert!(is_closed(&mut qc));
    }

    #[tokio::test]
    async fn test_remove_non_member_is_noop() {
        let hub = Hub::start(HubConfig::default());
        let (a, mut qa) = connection("doc1", "alice", 16);
        let (stranger, _qs) = connection("doc1", "mallory", 16);
        let (elsewhere, _qe) = connection("doc3", "eve", 16);
        let alice = a.identity().clone();

        hub.admit(a).await;
        hub.remove(stranger.identity()).await;
        hub.remove(elsewhere.identity()).await;
        let before = hub.stats().await;
        drain(&mut qa);

        hub.remove(&alice).await;
        hub.remove(&alice).await;
        let after = hub.stats().await;

        assert_eq!(before.connection_count, 1);
        assert_eq!(before.room_count, 1);
        assert_eq!(after.connection_count, 0);
        assert_eq!(after.events_total, before.events_total + 1);
        assert_eq!(drain(&mut qa), vec![leave("alice")]);
    }

    #[tokio::test]
    async fn test_saturated_queue_is_evicted_without_blocking() {
        let hub = Hub::start(HubConfig::default());
        let (slow, mut q_slow) = connection("doc1", "slow", 1);
        let (a, mut qa) = connection("doc1", "alice", 16);

        // The slow consumer's own JOIN fills its queue
        hub.admit(slow).await;
        hub.admit(a).await;

        let stats = hub.stats().await;
        assert_eq!(stats.evicted_total, 1);
        assert_eq!(stats.connection_count, 1);
        assert_eq!(
            usernames(hub.active_users(&doc("doc1")).await),
            vec!["alice"]
        );

        assert_eq!(
            drain(&mut qa),
            vec![join("slow"), join("alice"), leave("slow")]
        );
        assert_eq!(drain(&mut q_slow), vec![join("slow")]);
        assert!(is_closed(&mut q_slow));
    }

    #[tokio::test]
    async fn test_evicted_connection_remove_is_noop() {
        let hub = Hub::start(HubConfig::default());
        let (gone, q_gone) = connection("doc1", "gone", 4);
        let (a, mut qa) = connection("doc1", "alice", 16);
        let gone_identity = gone.identity().clone();

        hub.admit(gone).await;
        drop(q_gone);
        hub.admit(a).await;
        hub.remove(&gone_identity).await;
        hub.stats().await;

        // One LEAVE from the eviction, none from the late remove
        assert_eq!(
            drain(&mut qa),
            vec![join("gone"), join("alice"), leave("gone")]
        );
    }

    #[tokio::test]
    async fn test_broadcast_reaches_room_only() {
        let hub = Hub::start(HubConfig::default());
        let (a, mut qa) = connection("doc1", "alice", 16);
        let (b, mut qb) = connection("doc2", "bob", 16);

        hub.admit(a).await;
        hub.admit(b).await;
        hub.stats().await;
        drain(&mut qa);
        drain(&mut qb);

        let visitor = UserInfo::new("id-visitor", "visitor", "visitor@example.com");
        hub.broadcast(doc("doc1"), PresenceEvent::join("doc1", visitor.clone()))
            .await;
        hub.broadcast(doc("nowhere"), PresenceEvent::join("nowhere", visitor))
            .await;
        let stats = hub.stats().await;

        assert_eq!(drain(&mut qa), vec![join("visitor")]);
        assert!(drain(&mut qb).is_empty());
        assert_eq!(stats.room_count, 2);
    }

    #[tokio::test]
    async fn test_connection_id_admitted_to_one_room_only() {
        let hub = Hub::start(HubConfig::default());
        let (a, mut qa) = connection("doc1", "alice", 16);
        let mut elsewhere = a.identity().clone();
        elsewhere.document_id = doc("doc2");
        let (again, mut q_again) = ConnectionHandle::new(elsewhere, 16);

        hub.admit(a).await;
        hub.admit(again).await;
        let stats = hub.stats().await;

        assert_eq!(stats.connection_count, 1);
        assert_eq!(stats.room_count, 1);
        assert!(hub.active_users(&doc("doc2")).await.is_empty());
        assert_eq!(drain(&mut qa), vec![join("alice")]);
        assert!(is_closed(&mut q_again));
    }

    #[tokio::test]
    async fn test_leaving_with_full_queue_is_not_an_eviction() {
        let hub = Hub::start(HubConfig::default());
        let (a, mut qa) = connection("doc1", "alice", 16);
        let (full, mut q_full) = connection("doc1", "bob", 2);
        let bob = full.identity().clone();

        hub.admit(a).await;
        // Presence sync and its own JOIN fill bob's queue
        hub.admit(full).await;
        hub.remove(&bob).await;
        let stats = hub.stats().await;

        assert_eq!(stats.evicted_total, 0);
        assert_eq!(stats.connection_count, 1);
        assert_eq!(drain(&mut qa), vec![join("alice"), join("bob"), leave("bob")]);
        assert_eq!(drain(&mut q_full), vec![join("alice"), join("bob")]);
        assert!(is_closed(&mut q_full));
    }

    #[tokio::test]
    async fn test_duplicate_admit_ignored() {
        let hub = Hub::start(HubConfig::default());
        let (a, mut qa) = connection("doc1", "alice", 16);
        let (again, mut q_again) = ConnectionHandle::new(a.identity().clone(), 16);

        hub.admit(a).await;
        hub.admit(again).await;
        let stats = hub.stats().await;

        assert_eq!(stats.connection_count, 1);
        assert_eq!(drain(&mut qa), vec![join("alice")]);
        assert!(is_closed(&mut q_again));
    }

    #[tokio::test]
    async fn test_membership_tracks_admits_minus_removes() {
        let hub = Hub::start(HubConfig::default());
        let mut identities = Vec::new();
        let mut queues = Vec::new();
        let mut expected: HashSet<String> = HashSet::new();

        for i in 0..6 {
            let (handle, queue) = connection("doc1", &format!("user{i}"), 64);
            identities.push(handle.identity().clone());
            queues.push(queue);
            hub.admit(handle).await;
            expected.insert(format!("user{i}"));

            let actual: HashSet<String> =
                usernames(hub.active_users(&doc("doc1")).await).into_iter().collect();
            assert_eq!(actual, expected);
        }

        for i in [3, 0, 3, 5, 1, 4, 2] {
            hub.remove(&identities[i]).await;
            expected.remove(&format!("user{i}"));

            let actual = usernames(hub.active_users(&doc("doc1")).await);
            assert_eq!(actual.len(), expected.len(), "no duplicates");
            assert_eq!(actual.into_iter().collect::<HashSet<_>>(), expected);
        }

        assert_eq!(hub.stats().await.room_count, 0);
    }

    #[tokio::test]
    async fn test_concurrent_joins_and_leaves_are_ordered() {
        let hub = Hub::start(HubConfig::default());
        let (watcher, mut q_watcher) = connection("doc1", "watcher", 512);
        hub.admit(watcher).await;

        let mut tasks = Vec::new();
        for i in 0..50 {
            let hub = hub.clone();
            tasks.push(tokio::spawn(async move {
                let (handle, _queue) = connection("doc1", &format!("peer{i}"), 512);
                let identity = handle.identity().clone();
                hub.admit(handle).await;
                tokio::task::yield_now().await;
                hub.remove(&identity).await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let stats = hub.stats().await;
        assert_eq!(stats.connection_count, 1);

        let events = drain(&mut q_watcher);
        assert_eq!(events.len(), 1 + 50 + 50);
        for i in 0..50 {
            let name = format!("peer{i}");
            let joined = events.iter().position(|e| *e == join(&name)).unwrap();
            let left = events.iter().position(|e| *e == leave(&name)).unwrap();
            assert!(joined < left);
        }
    }

    #[tokio::test]
    async fn test_stopped_hub_returns_empty_snapshots() {
        let (hub, task) = Hub::spawn(HubConfig::default());
        task.abort();
        let _ = task.await;

        let (a, _qa) = connection("doc1", "alice", 4);
        hub.admit(a).await;

        assert!(hub.active_users(&doc("doc1")).await.is_empty());
        assert_eq!(hub.stats().await, HubStats::default());
    }
}
