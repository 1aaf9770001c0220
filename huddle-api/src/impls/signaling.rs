//! Room signaling over a message stream
//!
//! One [`SignalingHandler`] runs per connection. It owns the read loop,
//! decodes every frame and dispatches on the envelope `uri`:
//!
//! - `in/join`: allocate a peer session, join the room, announce the roster
//! - `in/offer`: answer the client's offer (first offer wires session callbacks)
//! - `in/answer`: complete a server-initiated renegotiation
//! - `in/icecandidate`: add a remote candidate
//! - `in/pong`: keepalive reply, ignored
//!
//! Transport adapters only provide a [`SignalStream`] for reading and a
//! [`Connection`] for writing.

use async_trait::async_trait;
use futures::FutureExt;
use huddle_core::config::RenegotiationMode;
use huddle_proto::{ClientMessage, IceCandidate, ServerMessage, SessionDescription, UserInfo};
use huddle_sfu::{
    Connection, ConnectionId, Error, InboundTrack, Offerer, Participant, Result, Room,
    RoomFactory, RoomId, SessionFactory, SignalingState,
};
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace, warn};

/// Inbound half of a signaling connection
#[async_trait]
pub trait SignalStream: Send {
    /// Next text frame. `None` when the peer closed the connection, an error
    /// when the transport failed.
    async fn recv(&mut self) -> Option<std::result::Result<String, String>>;
}

struct Joined {
    room: Arc<Room>,
    participant: Arc<Participant>,
}

pub struct SignalingHandler {
    room_id: RoomId,
    connection: Connection,
    factory: Arc<RoomFactory>,
    sessions: Arc<dyn SessionFactory>,
    renegotiation: RenegotiationMode,
    joined: Option<Joined>,
}

impl SignalingHandler {
    pub fn new(
        room_id: RoomId,
        connection: Connection,
        factory: Arc<RoomFactory>,
        sessions: Arc<dyn SessionFactory>,
        renegotiation: RenegotiationMode,
    ) -> Self {
        Self {
            room_id,
            connection,
            factory,
            sessions,
            renegotiation,
            joined: None,
        }
    }

    #[must_use]
    pub const fn connection_id(&self) -> &ConnectionId {
        self.connection.id()
    }

    /// Process frames until the stream ends, then leave the room
    pub async fn run<S: SignalStream>(&mut self, stream: &mut S) {
        debug!(
            room_id = %self.room_id,
            connection = %self.connection.id(),
            "Signaling loop started"
        );

        loop {
            match stream.recv().await {
                Some(Ok(frame)) => self.handle_frame(&frame).await,
                Some(Err(e)) => {
                    warn!(connection = %self.connection.id(), error = %e, "Signaling read failed");
                    break;
                }
                None => {
                    debug!(connection = %self.connection.id(), "Client disconnected");
                    break;
                }
            }
        }

        self.leave().await;
    }

    /// Decode and dispatch one frame. Errors are reported to the client as
    /// `out/error`; the loop keeps going.
    pub async fn handle_frame(&mut self, frame: &str) {
        let message = match ClientMessage::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                debug!(connection = %self.connection.id(), error = %e, "Undecodable frame");
                self.reply(&ServerMessage::error(e.client_message())).await;
                return;
            }
        };

        let uri = message.uri();
        trace!(connection = %self.connection.id(), uri, "Dispatching");
        if let Err(e) = self.dispatch(message).await {
            warn!(connection = %self.connection.id(), uri, error = %e, "Signaling request failed");
            self.reply(&ServerMessage::error(e.to_string())).await;
        }
    }

    async fn dispatch(&mut self, message: ClientMessage) -> Result<()> {
        match message {
            ClientMessage::Join { user } => self.handle_join(user).await,
            ClientMessage::Offer { offer, .. } => self.handle_offer(offer).await,
            ClientMessage::Answer { answer, .. } => self.handle_answer(answer).await,
            ClientMessage::IceCandidate { candidate, .. } => {
                self.handle_ice_candidate(candidate).await
            }
            ClientMessage::Pong => Ok(()),
        }
    }

    async fn handle_join(&mut self, user: UserInfo) -> Result<()> {
        if self.joined.is_some() {
            return Err(Error::AlreadyJoined);
        }

        let session = self.sessions.create_session().await?;
        let participant = Participant::new(user.clone(), session, self.factory.config());
        let room = match self.factory.join(
            &self.room_id,
            self.connection.clone(),
            Arc::clone(&participant),
        ) {
            Ok(room) => room,
            Err(e) => {
                participant.stop().await;
                return Err(e);
            }
        };

        self.joined = Some(Joined {
            room: Arc::clone(&room),
            participant,
        });

        room.broadcast(&ServerMessage::UserJoin {
            user,
            room_users: room.user_list(),
        })
        .await;
        room.reconcile_subscriptions().await;
        Ok(())
    }

    async fn handle_offer(&mut self, offer: SessionDescription) -> Result<()> {
        let joined = self.joined.as_ref().ok_or(Error::NotJoined)?;
        let participant = &joined.participant;
        let session = participant.session();

        if participant.signaling_state() == SignalingState::New {
            self.wire_session(joined);
        }

        participant.set_signaling_state(SignalingState::Negotiating(Offerer::Remote));
        session.set_remote_description(offer).await?;
        let answer = session.create_answer().await?;
        session.set_local_description(answer.clone()).await?;

        joined
            .room
            .send(
                self.connection.id(),
                &ServerMessage::Answer {
                    to_user: participant.user().clone(),
                    answer,
                },
            )
            .await?;
        participant.set_signaling_state(SignalingState::Connected);
        Ok(())
    }

    async fn handle_answer(&mut self, answer: SessionDescription) -> Result<()> {
        let joined = self.joined.as_ref().ok_or(Error::NotJoined)?;
        let participant = &joined.participant;

        if participant.signaling_state() != SignalingState::Negotiating(Offerer::Local) {
            return Err(Error::Session("no offer outstanding".to_string()));
        }

        participant.session().set_remote_description(answer).await?;
        participant.set_signaling_state(SignalingState::Connected);
        Ok(())
    }

    async fn handle_ice_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        let joined = self.joined.as_ref().ok_or(Error::NotJoined)?;
        if candidate.is_end_of_candidates() {
            trace!(connection = %self.connection.id(), "End of remote candidates");
            return Ok(());
        }
        joined.participant.session().add_ice_candidate(candidate).await
    }

    /// Route session events back to this connection. Callbacks hold weak
    /// references so a closed session does not keep the room alive.
    fn wire_session(&self, joined: &Joined) {
        let session = joined.participant.session();
        let room = Arc::downgrade(&joined.room);
        let participant = Arc::downgrade(&joined.participant);
        let connection_id = self.connection.id().clone();

        {
            let (room, participant, connection_id) =
                (room.clone(), participant.clone(), connection_id.clone());
            session.on_ice_candidate(Box::new(move |candidate| {
                let (room, participant, connection_id) =
                    (room.clone(), participant.clone(), connection_id.clone());
                async move {
                    let Some((room, participant)) = upgrade(&room, &participant) else {
                        return;
                    };
                    let message = ServerMessage::IceCandidate {
                        to_user: participant.user().clone(),
                        candidate,
                    };
                    if let Err(e) = room.send(&connection_id, &message).await {
                        debug!(connection = %connection_id, error = %e, "Failed to send ICE candidate");
                    }
                }
                .boxed()
            }));
        }

        {
            let (room, participant) = (room.clone(), participant.clone());
            session.on_track(Box::new(move |track: Arc<dyn InboundTrack>| {
                let (room, participant) = (room.clone(), participant.clone());
                async move {
                    let Some((room, participant)) = upgrade(&room, &participant) else {
                        return;
                    };
                    if participant.attach_track(track).await {
                        info!(
                            room_id = %room.id(),
                            participant = %participant.id(),
                            "Participant is publishing"
                        );
                        room.reconcile_subscriptions().await;
                    }
                }
                .boxed()
            }));
        }

        let mode = self.renegotiation;
        session.on_negotiation_needed(Box::new(move || {
            let (room, participant, connection_id) =
                (room.clone(), participant.clone(), connection_id.clone());
            async move {
                let Some((room, participant)) = upgrade(&room, &participant) else {
                    return;
                };
                if let Err(e) = renegotiate(&room, &participant, &connection_id, mode).await {
                    warn!(
                        connection = %connection_id,
                        participant = %participant.id(),
                        error = %e,
                        "Renegotiation failed"
                    );
                }
            }
            .boxed()
        }));
    }

    async fn reply(&self, message: &ServerMessage) {
        let result = match &self.joined {
            Some(joined) => joined.room.send(self.connection.id(), message).await,
            None => self.connection.send(message).await,
        };
        if let Err(e) = result {
            debug!(connection = %self.connection.id(), error = %e, "Failed to send reply");
        }
    }

    /// Remove the participant, delete the room if it is now empty and tell
    /// the remaining members.
    async fn leave(&mut self) {
        let Some(Joined { room, participant }) = self.joined.take() else {
            return;
        };

        room.remove_participant(self.connection.id());
        // Stopped first so a concurrent reconciliation cannot relay to it
        // after its relays are gone.
        participant.stop().await;
        room.unsubscribe_all(&participant).await;

        if self.factory.delete_if_empty(&room) {
            return;
        }

        room.broadcast(&ServerMessage::UserLeft {
            user: participant.user().clone(),
            room_users: room.user_list(),
        })
        .await;
        room.reconcile_subscriptions().await;
    }
}

fn upgrade(
    room: &Weak<Room>,
    participant: &Weak<Participant>,
) -> Option<(Arc<Room>, Arc<Participant>)> {
    let participant = participant.upgrade().filter(|p| !p.is_stopped())?;
    Some((room.upgrade()?, participant))
}

/// Tell the client its session changed, either by asking it for a new offer
/// or by sending one
async fn renegotiate(
    room: &Room,
    participant: &Participant,
    connection_id: &ConnectionId,
    mode: RenegotiationMode,
) -> Result<()> {
    let to_user = participant.user().clone();
    match mode {
        RenegotiationMode::ClientOffer => {
            room.send(connection_id, &ServerMessage::NegotiationNeeded { to_user })
                .await
        }
        RenegotiationMode::ServerOffer => {
            let session = participant.session();
            let offer = session.create_offer().await?;
            session.set_local_description(offer.clone()).await?;
            participant.set_signaling_state(SignalingState::Negotiating(Offerer::Local));
            room.send(connection_id, &ServerMessage::Offer { to_user, offer })
                .await
        }
    }
}
