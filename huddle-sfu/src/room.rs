//! A single relay room
//!
//! The room keeps its members keyed by connection, serializes every
//! outbound write through one send lock and broadcasts a keepalive ping on
//! a fixed interval until stopped.

use chrono::{DateTime, Utc};
use huddle_proto::{RoomSummary, ServerMessage, UserInfo};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SfuConfig;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::participant::Participant;
use crate::types::{ConnectionId, RoomId};

struct Member {
    participant: Arc<Participant>,
    connection: Connection,
    seq: u64,
}

pub struct Room {
    id: RoomId,
    config: Arc<SfuConfig>,
    members: RwLock<HashMap<ConnectionId, Member>>,
    join_seq: AtomicU64,
    send_lock: Mutex<()>,
    stop: CancellationToken,
    created_at: DateTime<Utc>,
}

impl Room {
    pub fn new(id: RoomId, config: Arc<SfuConfig>) -> Arc<Self> {
        Arc::new(Self {
            id,
            config,
            members: RwLock::new(HashMap::new()),
            join_seq: AtomicU64::new(0),
            send_lock: Mutex::new(()),
            stop: CancellationToken::new(),
            created_at: Utc::now(),
        })
    }

    /// Spawn the keepalive task. It exits when [`Room::stop`] is called.
    pub fn start(self: &Arc<Self>) {
        let room = Arc::clone(self);
        let period = self.config.keepalive_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    () = room.stop.cancelled() => break,
                    _ = ticker.tick() => room.broadcast(&ServerMessage::Ping).await,
                }
            }
            debug!(room_id = %room.id, "Keepalive stopped");
        });
    }

    #[must_use]
    pub const fn id(&self) -> &RoomId {
        &self.id
    }

    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn add_participant(
        &self,
        connection: Connection,
        participant: Arc<Participant>,
    ) -> Result<()> {
        let mut members = self.members.write();
        if members.contains_key(connection.id()) {
            return Err(Error::AlreadyJoined);
        }
        // Relays are keyed by participant id, so it must be unique per room.
        if members
            .values()
            .any(|m| m.participant.id() == participant.id())
        {
            return Err(Error::DuplicateParticipant(participant.id().to_string()));
        }
        if self.config.room_is_full(members.len()) {
            return Err(Error::RoomFull {
                max: self.config.max_participants_per_room,
            });
        }

        info!(
            room_id = %self.id,
            connection = %connection.id(),
            participant = %participant.id(),
            participant_count = members.len() + 1,
            "Participant joined"
        );
        members.insert(
            connection.id().clone(),
            Member {
                participant,
                connection,
                seq: self.join_seq.fetch_add(1, Ordering::Relaxed),
            },
        );
        Ok(())
    }

    /// Remove the member for `connection_id`. The caller is responsible for
    /// [`Room::unsubscribe_all`] and notifying the remaining members.
    pub fn remove_participant(&self, connection_id: &ConnectionId) -> Option<Arc<Participant>> {
        let member = self.members.write().remove(connection_id)?;
        info!(
            room_id = %self.id,
            connection = %connection_id,
            participant = %member.participant.id(),
            "Participant left"
        );
        Some(member.participant)
    }

    /// Remove every relay between `participant` and the current members, in
    /// both directions.
    pub async fn unsubscribe_all(&self, participant: &Participant) {
        for other in self.list_participants() {
            if other.id() == participant.id() {
                continue;
            }
            participant.remove_subscriber(other.id()).await;
            other.remove_subscriber(participant.id()).await;
        }
    }

    #[must_use]
    pub fn get_participant(&self, connection_id: &ConnectionId) -> Option<Arc<Participant>> {
        self.members
            .read()
            .get(connection_id)
            .map(|m| Arc::clone(&m.participant))
    }

    /// Members in join order
    #[must_use]
    pub fn list_participants(&self) -> Vec<Arc<Participant>> {
        let members = self.members.read();
        let mut ordered: Vec<_> = members.values().collect();
        ordered.sort_by_key(|m| m.seq);
        ordered
            .into_iter()
            .map(|m| Arc::clone(&m.participant))
            .collect()
    }

    /// Roster in join order
    #[must_use]
    pub fn user_list(&self) -> Vec<UserInfo> {
        self.list_participants()
            .iter()
            .map(|p| p.user().clone())
            .collect()
    }

    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.members.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    #[must_use]
    pub fn summary(&self) -> RoomSummary {
        let users = self.user_list();
        RoomSummary {
            id: self.id.to_string(),
            participants: users.len(),
            users,
            created_at: self.created_at,
        }
    }

    /// Make sure every publishing member relays to every other member.
    ///
    /// A failure for one pair is logged and does not affect the others.
    pub async fn reconcile_subscriptions(&self) {
        let participants = self.list_participants();
        for publisher in participants.iter().filter(|p| p.is_publishing()) {
            for subscriber in &participants {
                if let Err(e) = publisher.add_subscriber(subscriber).await {
                    warn!(
                        room_id = %self.id,
                        publisher = %publisher.id(),
                        subscriber = %subscriber.id(),
                        error = %e,
                        "Failed to establish relay"
                    );
                }
            }
        }
    }

    /// Send to one member through the room's send lock
    pub async fn send(&self, connection_id: &ConnectionId, message: &ServerMessage) -> Result<()> {
        let connection = self
            .members
            .read()
            .get(connection_id)
            .map(|m| m.connection.clone())
            .ok_or(Error::NotJoined)?;

        let frame = message.encode()?;
        let _guard = self.send_lock.lock().await;
        connection.send_frame(frame).await
    }

    /// Send to every member. Write failures are only logged; the failing
    /// connection's read loop notices the loss.
    pub async fn broadcast(&self, message: &ServerMessage) {
        let frame = match message.encode() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(room_id = %self.id, error = %e, "Failed to encode broadcast");
                return;
            }
        };
        let connections: Vec<Connection> = self
            .members
            .read()
            .values()
            .map(|m| m.connection.clone())
            .collect();

        let _guard = self.send_lock.lock().await;
        for connection in connections {
            if let Err(e) = connection.send_frame(frame.clone()).await {
                debug!(
                    room_id = %self.id,
                    connection = %connection.id(),
                    uri = message.uri(),
                    error = %e,
                    "Broadcast write failed"
                );
            }
        }
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{FakeSession, FakeTrack, RecordingOutbound};
    use crate::track::MediaKind;
    use std::time::Duration;

    fn config(max: usize) -> Arc<SfuConfig> {
        Arc::new(SfuConfig {
            max_participants_per_room: max,
            ..Default::default()
        })
    }

    fn member(
        room: &Room,
        id: &str,
    ) -> (Connection, Arc<Participant>, Arc<RecordingOutbound>, Arc<FakeSession>) {
        let outbound = RecordingOutbound::new();
        let connection = Connection::new(outbound.clone());
        let session = FakeSession::new();
        let participant = Participant::new(
            UserInfo::new(id, id, format!("stream-{id}")),
            session.clone(),
            Arc::clone(&room.config),
        );
        (connection, participant, outbound, session)
    }

    async fn publish(participant: &Participant) {
        participant.attach_track(FakeTrack::new(MediaKind::Audio, 1)).await;
        participant.attach_track(FakeTrack::new(MediaKind::Video, 2)).await;
    }

    #[tokio::test]
    async fn test_add_and_remove() {
        let room = Room::new(RoomId::from("r1"), config(0));
        let (conn, alice, _, _) = member(&room, "alice");
        let conn_id = conn.id().clone();

        room.add_participant(conn.clone(), Arc::clone(&alice)).unwrap();
        assert!(matches!(
            room.add_participant(conn, alice),
            Err(Error::AlreadyJoined)
        ));
        assert_eq!(room.participant_count(), 1);
        assert!(room.get_participant(&conn_id).is_some());

        assert!(room.remove_participant(&conn_id).is_some());
        assert!(room.remove_participant(&conn_id).is_none());
        assert!(room.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_participant_id_rejected() {
        let room = Room::new(RoomId::from("r1"), config(0));
        let (first_conn, first, _, _) = member(&room, "alice");
        let (second_conn, second, _, _) = member(&room, "alice");
        let second_conn_id = second_conn.id().clone();

        room.add_participant(first_conn, first).unwrap();
        match room.add_participant(second_conn, second) {
            Err(Error::DuplicateParticipant(id)) => assert_eq!(id, "alice"),
            other => panic!("expected DuplicateParticipant, got {other:?}"),
        }
        assert_eq!(room.participant_count(), 1);
        assert!(room.get_participant(&second_conn_id).is_none());
    }

    #[tokio::test]
    async fn test_room_full() {
        let room = Room::new(RoomId::from("r1"), config(2));
        for id in ["a", "b"] {
            let (conn, p, _, _) = member(&room, id);
            room.add_participant(conn, p).unwrap();
        }
        let (conn, p, _, _) = member(&room, "c");
        assert!(matches!(
            room.add_participant(conn, p),
            Err(Error::RoomFull { max: 2 })
        ));
    }

    #[tokio::test]
    async fn test_roster_in_join_order() {
        let room = Room::new(RoomId::from("r1"), config(0));
        for id in ["carol", "alice", "bob"] {
            let (conn, p, _, _) = member(&room, id);
            room.add_participant(conn, p).unwrap();
        }
        let ids: Vec<_> = room.user_list().into_iter().map(|u| u.id).collect();
        assert_eq!(ids, ["carol", "alice", "bob"]);
        assert_eq!(room.summary().participants, 3);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_member() {
        let room = Room::new(RoomId::from("r1"), config(0));
        let mut outbounds = Vec::new();
        for id in ["a", "b", "c"] {
            let (conn, p, out, _) = member(&room, id);
            room.add_participant(conn, p).unwrap();
            outbounds.push(out);
        }

        room.broadcast(&ServerMessage::info("hello")).await;

        for out in outbounds {
            assert_eq!(out.messages(), vec![ServerMessage::info("hello")]);
        }
    }

    #[tokio::test]
    async fn test_broadcast_survives_failing_connection() {
        let room = Room::new(RoomId::from("r1"), config(0));
        let (conn_a, a, out_a, _) = member(&room, "a");
        let (conn_b, b, out_b, _) = member(&room, "b");
        room.add_participant(conn_a, a).unwrap();
        room.add_participant(conn_b, b).unwrap();
        out_a.set_failing(true);

        room.broadcast(&ServerMessage::Ping).await;

        assert!(out_a.frames().is_empty());
        assert_eq!(out_b.frames(), vec![r#"{"uri":"out/ping"}"#.to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_broadcasts_do_not_interleave() {
        let room = Room::new(RoomId::from("r1"), config(0));
        let (conn, p, out, _) = member(&room, "a");
        room.add_participant(conn, p).unwrap();

        let mut tasks = Vec::new();
        for i in 0..20 {
            let room = Arc::clone(&room);
            tasks.push(tokio::spawn(async move {
                room.broadcast(&ServerMessage::info(format!("msg-{i}"))).await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let frames = out.frames();
        assert_eq!(frames.len(), 20);
        assert!(frames.iter().all(|f| ServerMessage::decode(f).is_ok()));
    }

    #[tokio::test]
    async fn test_send_to_unknown_connection() {
        let room = Room::new(RoomId::from("r1"), config(0));
        let err = room
            .send(&ConnectionId::from("nobody"), &ServerMessage::Ping)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotJoined));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_pings_until_stopped() {
        let room = Room::new(RoomId::from("r1"), config(0));
        let (conn, p, out, _) = member(&room, "a");
        room.add_participant(conn, p).unwrap();
        room.start();

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(out.messages(), vec![ServerMessage::Ping, ServerMessage::Ping]);

        room.stop();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(out.frames().len(), 2);
    }

    #[tokio::test]
    async fn test_reconcile_builds_full_mesh() {
        let room = Room::new(RoomId::from("r1"), config(0));
        let mut sessions = Vec::new();
        let mut participants = Vec::new();
        for id in ["a", "b", "c"] {
            let (conn, p, _, session) = member(&room, id);
            publish(&p).await;
            room.add_participant(conn, Arc::clone(&p)).unwrap();
            sessions.push(session);
            participants.push(p);
        }

        room.reconcile_subscriptions().await;
        room.reconcile_subscriptions().await;

        for (p, session) in participants.iter().zip(&sessions) {
            assert_eq!(p.subscriber_ids().await.len(), 2);
            assert_eq!(session.relay_tracks().len(), 4);
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_all_removes_both_directions() {
        let room = Room::new(RoomId::from("r1"), config(0));
        let (conn_a, a, _, session_a) = member(&room, "a");
        let (conn_b, b, _, session_b) = member(&room, "b");
        publish(&a).await;
        publish(&b).await;
        let conn_a_id = conn_a.id().clone();
        room.add_participant(conn_a, Arc::clone(&a)).unwrap();
        room.add_participant(conn_b, Arc::clone(&b)).unwrap();
        room.reconcile_subscriptions().await;

        let leaving = room.remove_participant(&conn_a_id).unwrap();
        room.unsubscribe_all(&leaving).await;

        assert!(a.subscriber_ids().await.is_empty());
        assert!(b.subscriber_ids().await.is_empty());
        assert!(session_a.relay_tracks().is_empty());
        assert!(session_b.relay_tracks().is_empty());
    }
}
