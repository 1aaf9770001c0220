//! In-memory doubles for driving rooms and signaling without a network

use async_trait::async_trait;
use huddle_proto::{IceCandidate, ServerMessage, SessionDescription};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use webrtc::rtp::header::Header;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

use crate::connection::Outbound;
use crate::error::{Error, Result};
use crate::session::{
    ConnectionState, OnIceCandidateHandler, OnNegotiationNeededHandler, OnTrackHandler,
    PeerSession, RelaySender, SessionFactory,
};
use crate::track::{InboundTrack, MediaKind, RelayTrack};

/// Minimal RTP packet with the given SSRC and sequence number
#[must_use]
pub fn rtp_packet(ssrc: u32, sequence_number: u16) -> Packet {
    Packet {
        header: Header {
            version: 2,
            payload_type: 96,
            sequence_number,
            timestamp: u32::from(sequence_number) * 3000,
            ssrc,
            ..Default::default()
        },
        payload: vec![0u8; 32].into(),
    }
}

/// Scriptable peer session that records every call
pub struct FakeSession {
    state: Mutex<ConnectionState>,
    remote: Mutex<Option<SessionDescription>>,
    local: Mutex<Option<SessionDescription>>,
    candidates: Mutex<Vec<IceCandidate>>,
    tracks: Mutex<BTreeMap<u64, Arc<RelayTrack>>>,
    next_sender: AtomicU64,
    add_track_budget: Mutex<Option<usize>>,
    feedback: Mutex<Vec<(u32, u64)>>,
    offers: AtomicUsize,
    closed: AtomicBool,
    handler_registrations: AtomicUsize,
    on_ice_candidate: Mutex<Option<OnIceCandidateHandler>>,
    on_track: Mutex<Option<OnTrackHandler>>,
    on_negotiation_needed: Mutex<Option<OnNegotiationNeededHandler>>,
}

impl FakeSession {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ConnectionState::New),
            remote: Mutex::new(None),
            local: Mutex::new(None),
            candidates: Mutex::new(Vec::new()),
            tracks: Mutex::new(BTreeMap::new()),
            next_sender: AtomicU64::new(1),
            add_track_budget: Mutex::new(None),
            feedback: Mutex::new(Vec::new()),
            offers: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            handler_registrations: AtomicUsize::new(0),
            on_ice_candidate: Mutex::new(None),
            on_track: Mutex::new(None),
            on_negotiation_needed: Mutex::new(None),
        })
    }

    pub fn set_connection_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    /// Let `n` more `add_track` calls succeed, then fail
    pub fn fail_add_track_after(&self, n: usize) {
        *self.add_track_budget.lock() = Some(n);
    }

    pub async fn emit_track(&self, track: Arc<dyn InboundTrack>) {
        let fut = self.on_track.lock().as_ref().map(|h| h(track));
        if let Some(fut) = fut {
            fut.await;
        }
    }

    pub async fn emit_ice_candidate(&self, candidate: IceCandidate) {
        let fut = self.on_ice_candidate.lock().as_ref().map(|h| h(candidate));
        if let Some(fut) = fut {
            fut.await;
        }
    }

    pub async fn emit_negotiation_needed(&self) {
        let fut = self.on_negotiation_needed.lock().as_ref().map(|h| h());
        if let Some(fut) = fut {
            fut.await;
        }
    }

    #[must_use]
    pub fn has_track_handler(&self) -> bool {
        self.on_track.lock().is_some()
    }

    #[must_use]
    pub fn relay_tracks(&self) -> Vec<Arc<RelayTrack>> {
        self.tracks.lock().values().cloned().collect()
    }

    #[must_use]
    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.remote.lock().clone()
    }

    #[must_use]
    pub fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().clone()
    }

    #[must_use]
    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.candidates.lock().clone()
    }

    #[must_use]
    pub fn feedback_count(&self) -> usize {
        self.feedback.lock().len()
    }

    #[must_use]
    pub fn last_feedback(&self) -> Option<(u32, u64)> {
        self.feedback.lock().last().copied()
    }

    /// Distinct SSRCs that received feedback, sorted
    #[must_use]
    pub fn feedback_ssrcs(&self) -> Vec<u32> {
        let mut ssrcs: Vec<_> = self.feedback.lock().iter().map(|(ssrc, _)| *ssrc).collect();
        ssrcs.sort_unstable();
        ssrcs.dedup();
        ssrcs
    }

    /// Number of `on_*` handler registrations so far
    #[must_use]
    pub fn handler_registrations(&self) -> usize {
        self.handler_registrations.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn offers_created(&self) -> usize {
        self.offers.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerSession for FakeSession {
    async fn create_answer(&self) -> Result<SessionDescription> {
        if self.remote.lock().is_none() {
            return Err(Error::Session("no remote description".to_string()));
        }
        Ok(SessionDescription::answer("v=0 fake-answer"))
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let n = self.offers.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SessionDescription::offer(format!("v=0 fake-offer-{n}")))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        if description.sdp.is_empty() {
            return Err(Error::Session("empty sdp".to_string()));
        }
        *self.remote.lock() = Some(description);
        Ok(())
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        *self.local.lock() = Some(description);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.candidates.lock().push(candidate);
        Ok(())
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn on_ice_candidate(&self, handler: OnIceCandidateHandler) {
        self.handler_registrations.fetch_add(1, Ordering::SeqCst);
        *self.on_ice_candidate.lock() = Some(handler);
    }

    fn on_track(&self, handler: OnTrackHandler) {
        self.handler_registrations.fetch_add(1, Ordering::SeqCst);
        *self.on_track.lock() = Some(handler);
    }

    fn on_negotiation_needed(&self, handler: OnNegotiationNeededHandler) {
        self.handler_registrations.fetch_add(1, Ordering::SeqCst);
        *self.on_negotiation_needed.lock() = Some(handler);
    }

    async fn add_track(&self, track: Arc<RelayTrack>) -> Result<RelaySender> {
        {
            let mut budget = self.add_track_budget.lock();
            match budget.as_mut() {
                Some(0) => return Err(Error::Session("add_track rejected".to_string())),
                Some(n) => *n -= 1,
                None => {}
            }
        }
        let id = self.next_sender.fetch_add(1, Ordering::SeqCst);
        self.tracks.lock().insert(id, track);
        self.emit_negotiation_needed().await;
        Ok(RelaySender::new(id))
    }

    async fn remove_track(&self, sender: RelaySender) -> Result<()> {
        self.tracks
            .lock()
            .remove(&sender.0)
            .ok_or_else(|| Error::Relay("unknown relay sender".to_string()))?;
        self.emit_negotiation_needed().await;
        Ok(())
    }

    async fn send_feedback(&self, media_ssrc: u32, bitrate: u64) -> Result<()> {
        self.feedback.lock().push((media_ssrc, bitrate));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        *self.state.lock() = ConnectionState::Closed;
        Ok(())
    }
}

/// Hands out [`FakeSession`]s and keeps them for inspection
#[derive(Default)]
pub struct FakeSessionFactory {
    sessions: Mutex<Vec<Arc<FakeSession>>>,
}

impl FakeSessionFactory {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sessions in creation order
    #[must_use]
    pub fn sessions(&self) -> Vec<Arc<FakeSession>> {
        self.sessions.lock().clone()
    }
}

#[async_trait]
impl SessionFactory for FakeSessionFactory {
    async fn create_session(&self) -> Result<Arc<dyn PeerSession>> {
        let session = FakeSession::new();
        self.sessions.lock().push(Arc::clone(&session));
        Ok(session)
    }
}

/// Inbound track fed by [`FakeTrack::push`]
pub struct FakeTrack {
    kind: MediaKind,
    ssrc: u32,
    tx: Mutex<Option<mpsc::UnboundedSender<Packet>>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Packet>>,
}

impl FakeTrack {
    #[must_use]
    pub fn new(kind: MediaKind, ssrc: u32) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            kind,
            ssrc,
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
        })
    }

    pub fn push(&self, packet: Packet) {
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(packet);
        }
    }

    /// End the track once queued packets are read
    pub fn finish(&self) {
        self.tx.lock().take();
    }
}

#[async_trait]
impl InboundTrack for FakeTrack {
    fn id(&self) -> String {
        format!("{}-{}", self.kind, self.ssrc)
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn ssrc(&self) -> u32 {
        self.ssrc
    }

    fn codec(&self) -> RTCRtpCodecCapability {
        match self.kind {
            MediaKind::Audio => RTCRtpCodecCapability {
                mime_type: "audio/opus".to_string(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            MediaKind::Video => RTCRtpCodecCapability {
                mime_type: "video/VP8".to_string(),
                clock_rate: 90000,
                ..Default::default()
            },
        }
    }

    async fn read_rtp(&self) -> Result<Packet> {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| Error::Transport("track ended".to_string()))
    }
}

/// Outbound sink that keeps every frame written to it
#[derive(Default)]
pub struct RecordingOutbound {
    frames: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl RecordingOutbound {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make subsequent writes fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    #[must_use]
    pub fn frames(&self) -> Vec<String> {
        self.frames.lock().clone()
    }

    /// Frames decoded as server messages; undecodable frames are skipped
    #[must_use]
    pub fn messages(&self) -> Vec<ServerMessage> {
        self.frames
            .lock()
            .iter()
            .filter_map(|f| ServerMessage::decode(f).ok())
            .collect()
    }

    pub fn clear(&self) {
        self.frames.lock().clear();
    }
}

#[async_trait]
impl Outbound for RecordingOutbound {
    async fn send_text(&self, frame: String) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Transport("connection closed".to_string()));
        }
        self.frames.lock().push(frame);
        Ok(())
    }
}
