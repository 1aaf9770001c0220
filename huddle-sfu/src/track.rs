//! Media fan-out
//!
//! Every inbound track gets exactly one reader task which republishes its
//! RTP packets on a bounded broadcast channel ([`InboundFeed`]). Each
//! (publisher, subscriber, kind) relay runs a pump that receives from that
//! channel and writes into a [`RelayTrack`] attached to the subscriber's
//! session. A slow pump skips packets instead of stalling the reader.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};
use webrtc::util::marshal::MarshalSize;

use crate::error::{Error, Result};
use crate::session::{ConnectionState, PeerSession, RelaySender};

/// Media track kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }

    /// `None` for codec types that carry no media
    #[must_use]
    pub const fn from_codec_type(codec_type: RTPCodecType) -> Option<Self> {
        match codec_type {
            RTPCodecType::Audio => Some(Self::Audio),
            RTPCodecType::Video => Some(Self::Video),
            _ => None,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source of RTP packets received from a participant
#[async_trait]
pub trait InboundTrack: Send + Sync {
    fn id(&self) -> String;

    fn kind(&self) -> MediaKind;

    fn ssrc(&self) -> u32;

    fn codec(&self) -> RTCRtpCodecCapability;

    /// Next packet; an error means the track has ended
    async fn read_rtp(&self) -> Result<Packet>;
}

/// Single reader of one inbound track, fanning packets out to relay pumps
pub struct InboundFeed {
    kind: MediaKind,
    ssrc: u32,
    codec: RTCRtpCodecCapability,
    // Cleared when the reader exits so receivers observe `Closed`.
    sender: Mutex<Option<broadcast::Sender<Packet>>>,
    /// Packets read while no relay was subscribed
    packets_dropped: AtomicU64,
}

impl InboundFeed {
    /// Start the reader task. It runs until the track ends or `stop` fires.
    pub fn spawn(track: Arc<dyn InboundTrack>, capacity: usize, stop: CancellationToken) -> Arc<Self> {
        let (tx, _) = broadcast::channel(capacity.max(1));
        let feed = Arc::new(Self {
            kind: track.kind(),
            ssrc: track.ssrc(),
            codec: track.codec(),
            sender: Mutex::new(Some(tx.clone())),
            packets_dropped: AtomicU64::new(0),
        });

        let reader_feed = Arc::clone(&feed);
        tokio::spawn(async move {
            let track_id = track.id();
            loop {
                tokio::select! {
                    () = stop.cancelled() => break,
                    result = track.read_rtp() => match result {
                        Ok(packet) => {
                            // No receivers yet is not an error.
                            if tx.send(packet).is_err() {
                                let dropped =
                                    reader_feed.packets_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                                trace!(
                                    track_id = %track_id,
                                    dropped,
                                    "No relay subscribed, packet dropped"
                                );
                            }
                        }
                        Err(e) => {
                            debug!(track_id = %track_id, error = %e, "Inbound track ended");
                            break;
                        }
                    }
                }
            }
            reader_feed.sender.lock().take();
            trace!(track_id = %track_id, "Inbound reader stopped");
        });

        feed
    }

    #[must_use]
    pub const fn kind(&self) -> MediaKind {
        self.kind
    }

    #[must_use]
    pub const fn ssrc(&self) -> u32 {
        self.ssrc
    }

    #[must_use]
    pub fn codec(&self) -> RTCRtpCodecCapability {
        self.codec.clone()
    }

    #[must_use]
    pub fn packets_dropped(&self) -> u64 {
        self.packets_dropped.load(Ordering::Relaxed)
    }

    /// New packet receiver, or `None` once the reader has stopped
    pub fn subscribe(&self) -> Option<broadcast::Receiver<Packet>> {
        self.sender.lock().as_ref().map(broadcast::Sender::subscribe)
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.sender.lock().is_some()
    }
}

/// Outbound track carrying one publisher's media to one subscriber
pub struct RelayTrack {
    kind: MediaKind,
    local: Arc<TrackLocalStaticRTP>,
}

impl RelayTrack {
    pub fn new(
        kind: MediaKind,
        codec: RTCRtpCodecCapability,
        track_id: impl Into<String>,
        stream_id: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            local: Arc::new(TrackLocalStaticRTP::new(codec, track_id.into(), stream_id.into())),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> MediaKind {
        self.kind
    }

    #[must_use]
    pub fn id(&self) -> &str {
        self.local.id()
    }

    #[must_use]
    pub fn stream_id(&self) -> &str {
        self.local.stream_id()
    }

    #[must_use]
    pub fn codec(&self) -> RTCRtpCodecCapability {
        self.local.codec()
    }

    pub async fn write_rtp(&self, packet: &Packet) -> Result<usize> {
        self.local
            .write_rtp(packet)
            .await
            .map_err(|e| Error::Relay(e.to_string()))
    }

    /// The underlying local track, for adding to an `RTCPeerConnection`
    #[must_use]
    pub fn as_track_local(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        Arc::clone(&self.local) as Arc<dyn TrackLocal + Send + Sync>
    }
}

/// Forwarding counters of one publisher
#[derive(Debug, Default)]
pub struct RelayStats {
    packets_forwarded: AtomicU64,
    bytes_forwarded: AtomicU64,
    packets_skipped: AtomicU64,
    pump_errors: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayStatsSnapshot {
    pub packets_forwarded: u64,
    pub bytes_forwarded: u64,
    pub packets_skipped: u64,
    pub pump_errors: u64,
}

impl RelayStats {
    pub fn record_forwarded(&self, bytes: usize) {
        self.packets_forwarded.fetch_add(1, Ordering::Relaxed);
        self.bytes_forwarded.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_skipped(&self, count: u64) {
        self.packets_skipped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.pump_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            packets_forwarded: self.packets_forwarded.load(Ordering::Relaxed),
            bytes_forwarded: self.bytes_forwarded.load(Ordering::Relaxed),
            packets_skipped: self.packets_skipped.load(Ordering::Relaxed),
            pump_errors: self.pump_errors.load(Ordering::Relaxed),
        }
    }
}

/// Copy packets from an inbound feed into a relay track until cancelled,
/// the feed closes or a write fails.
pub(crate) fn spawn_relay_pump(
    mut rx: broadcast::Receiver<Packet>,
    relay: Arc<RelayTrack>,
    stats: Arc<RelayStats>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                result = rx.recv() => match result {
                    Ok(packet) => {
                        if let Err(e) = relay.write_rtp(&packet).await {
                            stats.record_error();
                            warn!(track_id = %relay.id(), error = %e, "Relay write failed");
                            break;
                        }
                        stats.record_forwarded(packet.marshal_size());
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        stats.record_skipped(skipped);
                        debug!(track_id = %relay.id(), skipped, "Relay lagged, skipping packets");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
        trace!(track_id = %relay.id(), "Relay pump stopped");
    })
}

/// Periodically request a keyframe and advertise the bitrate cap for one
/// inbound track while the session is connected.
pub(crate) fn spawn_health_task(
    session: Arc<dyn PeerSession>,
    media_ssrc: u32,
    period: Duration,
    bitrate: u64,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                () = stop.cancelled() => break,
                _ = ticker.tick() => {
                    if session.connection_state() != ConnectionState::Connected {
                        continue;
                    }
                    if let Err(e) = session.send_feedback(media_ssrc, bitrate).await {
                        debug!(ssrc = media_ssrc, error = %e, "Failed to send keyframe request");
                    }
                }
            }
        }
    })
}

/// One direction of a relay: the track and its sender on the subscriber's session
pub(crate) struct RelayLeg {
    pub track: Arc<RelayTrack>,
    pub sender: RelaySender,
}

/// Audio and video relay from one publisher to one subscriber
pub(crate) struct RelayPair {
    pub session: Arc<dyn PeerSession>,
    pub audio: RelayLeg,
    pub video: RelayLeg,
    pub cancel: CancellationToken,
}

impl RelayPair {
    /// Stop both pumps and detach the relay tracks from the subscriber's session
    pub async fn teardown(self) {
        self.cancel.cancel();
        for leg in [self.audio, self.video] {
            if let Err(e) = self.session.remove_track(leg.sender).await {
                debug!(track_id = %leg.track.id(), error = %e, "Failed to remove relay track");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{rtp_packet, FakeSession, FakeTrack};

    #[tokio::test]
    async fn test_feed_fans_out_to_every_receiver() {
        let track = FakeTrack::new(MediaKind::Video, 1111);
        let feed = InboundFeed::spawn(track.clone(), 16, CancellationToken::new());
        let mut rx1 = feed.subscribe().unwrap();
        let mut rx2 = feed.subscribe().unwrap();

        track.push(rtp_packet(1111, 7));

        assert_eq!(rx1.recv().await.unwrap().header.sequence_number, 7);
        assert_eq!(rx2.recv().await.unwrap().header.sequence_number, 7);
    }

    #[tokio::test]
    async fn test_feed_counts_packets_without_receivers() {
        let track = FakeTrack::new(MediaKind::Video, 4444);
        let feed = InboundFeed::spawn(track.clone(), 16, CancellationToken::new());

        for seq in 1..=3 {
            track.push(rtp_packet(4444, seq));
        }
        for _ in 0..50 {
            if feed.packets_dropped() == 3 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(feed.packets_dropped(), 3);

        let mut rx = feed.subscribe().unwrap();
        track.push(rtp_packet(4444, 4));
        assert_eq!(rx.recv().await.unwrap().header.sequence_number, 4);
        assert_eq!(feed.packets_dropped(), 3);
    }

    #[tokio::test]
    async fn test_feed_closes_when_track_ends() {
        let track = FakeTrack::new(MediaKind::Audio, 2222);
        let feed = InboundFeed::spawn(track.clone(), 16, CancellationToken::new());
        let mut rx = feed.subscribe().unwrap();

        track.finish();

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
        assert!(!feed.is_live());
        assert!(feed.subscribe().is_none());
    }

    #[tokio::test]
    async fn test_pump_counts_forwarded_packets() {
        let track = FakeTrack::new(MediaKind::Video, 3333);
        let feed = InboundFeed::spawn(track.clone(), 16, CancellationToken::new());
        let relay = Arc::new(RelayTrack::new(
            MediaKind::Video,
            feed.codec(),
            "video-alice",
            "stream-alice",
        ));
        let stats = Arc::new(RelayStats::default());
        let cancel = CancellationToken::new();
        let pump = spawn_relay_pump(
            feed.subscribe().unwrap(),
            relay,
            Arc::clone(&stats),
            cancel.clone(),
        );

        track.push(rtp_packet(3333, 1));
        track.push(rtp_packet(3333, 2));
        track.finish();
        pump.await.unwrap();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.packets_forwarded, 2);
        assert!(snapshot.bytes_forwarded > 0);
        assert_eq!(snapshot.pump_errors, 0);
    }

    #[tokio::test]
    async fn test_pump_stops_on_cancel() {
        let (tx, rx) = broadcast::channel(4);
        let relay = Arc::new(RelayTrack::new(
            MediaKind::Audio,
            RTCRtpCodecCapability::default(),
            "audio-bob",
            "stream-bob",
        ));
        let cancel = CancellationToken::new();
        let pump = spawn_relay_pump(rx, relay, Arc::new(RelayStats::default()), cancel.clone());

        cancel.cancel();
        pump.await.unwrap();
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_task_only_fires_while_connected() {
        let session = FakeSession::new();
        let stop = CancellationToken::new();
        let task = spawn_health_task(
            session.clone(),
            42,
            Duration::from_secs(3),
            10_000_000,
            stop.clone(),
        );

        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(session.feedback_count(), 0);

        session.set_connection_state(ConnectionState::Connected);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(session.feedback_count(), 2);
        assert_eq!(session.last_feedback(), Some((42, 10_000_000)));

        stop.cancel();
        task.await.unwrap();
    }

    #[test]
    fn test_media_kind_from_codec_type() {
        assert_eq!(
            MediaKind::from_codec_type(RTPCodecType::Audio),
            Some(MediaKind::Audio)
        );
        assert_eq!(MediaKind::from_codec_type(RTPCodecType::Unspecified), None);
        assert_eq!(MediaKind::Video.to_string(), "video");
    }
}
