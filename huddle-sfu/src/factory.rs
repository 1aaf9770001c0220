//! Room registry
//!
//! Rooms are created on the first join and removed the moment the last
//! participant leaves. Creation and deletion are announced to any number of
//! [`RoomEvents`] subscriptions.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use huddle_proto::RoomSummary;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::SfuConfig;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::participant::Participant;
use crate::room::Room;
use crate::types::RoomId;

const EVENT_BUFFER: usize = 64;

/// Room lifecycle notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    Created(RoomId),
    Deleted(RoomId),
    /// The subscription fell behind and missed this many events
    Lagged(u64),
}

/// One subscription to room lifecycle events. Dropping it unsubscribes.
pub struct RoomEvents {
    rx: broadcast::Receiver<RoomEvent>,
}

impl RoomEvents {
    /// Next event, or `None` once the factory is gone
    pub async fn recv(&mut self) -> Option<RoomEvent> {
        match self.rx.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(missed)) => Some(RoomEvent::Lagged(missed)),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

pub struct RoomFactory {
    config: Arc<SfuConfig>,
    rooms: DashMap<RoomId, Arc<Room>>,
    // Tracked separately: `DashMap::len` would deadlock inside an entry guard.
    room_count: AtomicUsize,
    events: broadcast::Sender<RoomEvent>,
}

impl RoomFactory {
    pub fn new(config: SfuConfig) -> Self {
        info!(
            max_rooms = config.max_rooms,
            max_participants_per_room = config.max_participants_per_room,
            "Room factory initialized"
        );
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            config: Arc::new(config),
            rooms: DashMap::new(),
            room_count: AtomicUsize::new(0),
            events,
        }
    }

    #[must_use]
    pub fn config(&self) -> Arc<SfuConfig> {
        Arc::clone(&self.config)
    }

    /// Existing room, or a new started one
    pub fn get_or_create(&self, room_id: &RoomId) -> Result<Arc<Room>> {
        let room = match self.rooms.entry(room_id.clone()) {
            Entry::Occupied(entry) => return Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                self.reserve_room()?;
                let room = Room::new(room_id.clone(), Arc::clone(&self.config));
                room.start();
                entry.insert(Arc::clone(&room));
                room
            }
        };
        self.announce_created(&room);
        Ok(room)
    }

    /// Add a participant to a room, creating the room if needed.
    ///
    /// Runs under the room's map entry so it cannot interleave with
    /// [`RoomFactory::delete_if_empty`] for the same room.
    pub fn join(
        &self,
        room_id: &RoomId,
        connection: Connection,
        participant: Arc<Participant>,
    ) -> Result<Arc<Room>> {
        let room = match self.rooms.entry(room_id.clone()) {
            Entry::Occupied(entry) => {
                let room = Arc::clone(entry.get());
                room.add_participant(connection, participant)?;
                return Ok(room);
            }
            Entry::Vacant(entry) => {
                self.reserve_room()?;
                let room = Room::new(room_id.clone(), Arc::clone(&self.config));
                if let Err(e) = room.add_participant(connection, participant) {
                    self.room_count.fetch_sub(1, Ordering::AcqRel);
                    return Err(e);
                }
                room.start();
                entry.insert(Arc::clone(&room));
                room
            }
        };
        self.announce_created(&room);
        Ok(room)
    }

    /// Remove `room` if it has no participants. Returns whether it was removed.
    pub fn delete_if_empty(&self, room: &Room) -> bool {
        let removed = self
            .rooms
            .remove_if(room.id(), |_, current| current.is_empty())
            .map(|(_, removed)| removed);
        let Some(removed) = removed else {
            return false;
        };

        removed.stop();
        self.room_count.fetch_sub(1, Ordering::AcqRel);
        info!(
            room_id = %removed.id(),
            total_rooms = self.room_count(),
            "Room deleted"
        );
        let _ = self.events.send(RoomEvent::Deleted(removed.id().clone()));
        true
    }

    #[must_use]
    pub fn get(&self, room_id: &RoomId) -> Option<Arc<Room>> {
        self.rooms.get(room_id).map(|r| Arc::clone(r.value()))
    }

    /// Snapshot of all rooms, ordered by id
    #[must_use]
    pub fn list_rooms(&self) -> Vec<RoomSummary> {
        let mut rooms: Vec<RoomSummary> = self.rooms.iter().map(|r| r.value().summary()).collect();
        rooms.sort_by(|a, b| a.id.cmp(&b.id));
        rooms
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.room_count.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> RoomEvents {
        RoomEvents {
            rx: self.events.subscribe(),
        }
    }

    /// Stop every room and close every participant's session
    pub async fn shutdown(&self) {
        let rooms: Vec<Arc<Room>> = self.rooms.iter().map(|r| Arc::clone(r.value())).collect();
        info!(rooms = rooms.len(), "Shutting down rooms");

        for room in rooms {
            room.stop();
            for participant in room.list_participants() {
                participant.stop().await;
            }
            if self.rooms.remove(room.id()).is_some() {
                self.room_count.fetch_sub(1, Ordering::AcqRel);
                let _ = self.events.send(RoomEvent::Deleted(room.id().clone()));
            }
        }
    }

    fn reserve_room(&self) -> Result<()> {
        let max = self.config.max_rooms;
        self.room_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (max == 0 || count < max).then_some(count + 1)
            })
            .map(|_| ())
            .map_err(|count| {
                warn!(current_rooms = count, max_rooms = max, "Room limit reached");
                Error::RoomLimitReached
            })
    }

    fn announce_created(&self, room: &Room) {
        info!(room_id = %room.id(), total_rooms = self.room_count(), "Room created");
        if self.events.send(RoomEvent::Created(room.id().clone())).is_err() {
            debug!(room_id = %room.id(), "No room event subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{FakeSession, RecordingOutbound};
    use huddle_proto::UserInfo;

    fn factory(max_rooms: usize, max_participants: usize) -> RoomFactory {
        RoomFactory::new(SfuConfig {
            max_rooms,
            max_participants_per_room: max_participants,
            ..Default::default()
        })
    }

    fn joiner(factory: &RoomFactory, id: &str) -> (Connection, Arc<Participant>) {
        let connection = Connection::new(RecordingOutbound::new());
        let participant = Participant::new(
            UserInfo::new(id, id, id),
            FakeSession::new(),
            factory.config(),
        );
        (connection, participant)
    }

    #[tokio::test]
    async fn test_get_or_create_returns_same_room() {
        let factory = factory(0, 0);
        let a = factory.get_or_create(&RoomId::from("r1")).unwrap();
        let b = factory.get_or_create(&RoomId::from("r1")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(factory.room_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_joins_create_one_room() {
        let factory = Arc::new(factory(0, 0));
        let mut tasks = Vec::new();
        for i in 0..16 {
            let factory = Arc::clone(&factory);
            tasks.push(tokio::spawn(async move {
                let (conn, p) = joiner(&factory, &format!("u{i}"));
                factory.join(&RoomId::from("r1"), conn, p).unwrap()
            }));
        }
        let mut rooms = Vec::new();
        for task in tasks {
            rooms.push(task.await.unwrap());
        }

        assert_eq!(factory.room_count(), 1);
        assert!(rooms.iter().all(|r| Arc::ptr_eq(r, &rooms[0])));
        assert_eq!(rooms[0].participant_count(), 16);
    }

    #[tokio::test]
    async fn test_delete_if_empty() {
        let factory = factory(0, 0);
        let (conn, p) = joiner(&factory, "alice");
        let conn_id = conn.id().clone();
        let room = factory.join(&RoomId::from("r1"), conn, p).unwrap();

        assert!(!factory.delete_if_empty(&room));
        assert!(factory.get(room.id()).is_some());

        room.remove_participant(&conn_id);
        assert!(factory.delete_if_empty(&room));
        assert!(room.is_stopped());
        assert!(factory.get(room.id()).is_none());
        assert_eq!(factory.room_count(), 0);
        assert!(!factory.delete_if_empty(&room));
    }

    #[tokio::test]
    async fn test_room_limit() {
        let factory = factory(1, 0);
        factory.get_or_create(&RoomId::from("r1")).unwrap();
        assert!(matches!(
            factory.get_or_create(&RoomId::from("r2")),
            Err(Error::RoomLimitReached)
        ));

        let (conn, p) = joiner(&factory, "alice");
        assert!(matches!(
            factory.join(&RoomId::from("r2"), conn, p),
            Err(Error::RoomLimitReached)
        ));
        assert_eq!(factory.room_count(), 1);
    }

    #[tokio::test]
    async fn test_full_room_rejects_join() {
        let factory = factory(0, 1);
        let (conn, p) = joiner(&factory, "alice");
        factory.join(&RoomId::from("r1"), conn, p).unwrap();

        let (conn, p) = joiner(&factory, "bob");
        assert!(matches!(
            factory.join(&RoomId::from("r1"), conn, p),
            Err(Error::RoomFull { max: 1 })
        ));
    }

    #[tokio::test]
    async fn test_events_for_create_and_delete() {
        let factory = factory(0, 0);
        let mut events = factory.subscribe();

        let room = factory.get_or_create(&RoomId::from("r1")).unwrap();
        assert!(factory.delete_if_empty(&room));

        assert_eq!(events.recv().await, Some(RoomEvent::Created(RoomId::from("r1"))));
        assert_eq!(events.recv().await, Some(RoomEvent::Deleted(RoomId::from("r1"))));
    }

    #[tokio::test]
    async fn test_lagging_subscription_is_told() {
        let factory = factory(0, 0);
        let mut events = factory.subscribe();
        for i in 0..(EVENT_BUFFER + 10) {
            factory.get_or_create(&RoomId::new(format!("r{i}"))).unwrap();
        }
        assert!(matches!(events.recv().await, Some(RoomEvent::Lagged(_))));
    }

    #[tokio::test]
    async fn test_list_rooms_and_shutdown() {
        let factory = factory(0, 0);
        let (conn, alice) = joiner(&factory, "alice");
        factory.join(&RoomId::from("b-room"), conn, Arc::clone(&alice)).unwrap();
        factory.get_or_create(&RoomId::from("a-room")).unwrap();

        let rooms = factory.list_rooms();
        assert_eq!(rooms.len(), 2);
        assert_eq!(rooms[0].id, "a-room");
        assert_eq!(rooms[1].participants, 1);

        factory.shutdown().await;
        assert_eq!(factory.room_count(), 0);
        assert!(alice.is_stopped());
    }
}
