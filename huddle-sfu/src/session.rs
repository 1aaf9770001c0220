//! Peer session capability
//!
//! The relay never talks to a WebRTC stack directly. Everything it needs from
//! a participant's transport session goes through [`PeerSession`], so the
//! room and signaling logic can be driven by in-memory fakes.

use async_trait::async_trait;
use futures::future::BoxFuture;
use huddle_proto::{IceCandidate, SessionDescription};
use serde::Serialize;
use std::sync::Arc;

use crate::error::Result;
use crate::track::{InboundTrack, RelayTrack};

pub type OnIceCandidateHandler = Box<dyn Fn(IceCandidate) -> BoxFuture<'static, ()> + Send + Sync>;
pub type OnTrackHandler =
    Box<dyn Fn(Arc<dyn InboundTrack>) -> BoxFuture<'static, ()> + Send + Sync>;
pub type OnNegotiationNeededHandler = Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Transport state of a peer session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Handle of a relay track attached to a session, used to detach it again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelaySender(pub(crate) u64);

impl RelaySender {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

#[async_trait]
pub trait PeerSession: Send + Sync {
    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    fn connection_state(&self) -> ConnectionState;

    /// Called for every locally gathered candidate. The end-of-gathering
    /// marker is not forwarded.
    fn on_ice_candidate(&self, handler: OnIceCandidateHandler);

    /// Called once per inbound media track
    fn on_track(&self, handler: OnTrackHandler);

    fn on_negotiation_needed(&self, handler: OnNegotiationNeededHandler);

    /// Start sending a relay track to the remote peer
    async fn add_track(&self, track: Arc<RelayTrack>) -> Result<RelaySender>;

    async fn remove_track(&self, sender: RelaySender) -> Result<()>;

    /// Ask the sender of `media_ssrc` for a keyframe and cap its bitrate
    async fn send_feedback(&self, media_ssrc: u32, bitrate: u64) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Allocates one [`PeerSession`] per joining participant
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create_session(&self) -> Result<Arc<dyn PeerSession>>;
}
