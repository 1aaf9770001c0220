//! Room participant
//!
//! A participant owns one peer session, up to one live inbound feed per
//! media kind, and the relays carrying its media to other participants
//! (its subscribers).

use huddle_proto::UserInfo;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SfuConfig;
use crate::error::Result;
use crate::session::PeerSession;
use crate::track::{
    spawn_health_task, spawn_relay_pump, InboundFeed, InboundTrack, MediaKind, RelayLeg, RelayPair,
    RelayStats, RelayStatsSnapshot, RelayTrack,
};
use crate::types::ParticipantId;

/// Which side sent the offer currently being negotiated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Offerer {
    Remote,
    Local,
}

/// Per-participant signaling progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalingState {
    /// Joined, no offer seen yet
    New,
    Negotiating(Offerer),
    Connected,
    Closed,
}

/// A live feed and the token stopping its reader and health task
struct FeedSlot {
    feed: Arc<InboundFeed>,
    stop: CancellationToken,
}

#[derive(Default)]
struct InboundMedia {
    audio: Option<FeedSlot>,
    video: Option<FeedSlot>,
}

impl InboundMedia {
    fn ready(&self) -> Option<(Arc<InboundFeed>, Arc<InboundFeed>)> {
        match (&self.audio, &self.video) {
            (Some(audio), Some(video)) => {
                Some((Arc::clone(&audio.feed), Arc::clone(&video.feed)))
            }
            _ => None,
        }
    }
}

pub struct Participant {
    id: ParticipantId,
    user: UserInfo,
    session: Arc<dyn PeerSession>,
    config: Arc<SfuConfig>,
    state: Mutex<SignalingState>,
    inbound: Mutex<InboundMedia>,
    /// Relays carrying this participant's media, keyed by subscriber
    subscribers: RwLock<HashMap<ParticipantId, RelayPair>>,
    stats: Arc<RelayStats>,
    stopped: CancellationToken,
}

impl Participant {
    pub fn new(user: UserInfo, session: Arc<dyn PeerSession>, config: Arc<SfuConfig>) -> Arc<Self> {
        Arc::new(Self {
            id: ParticipantId::new(user.id.clone()),
            user,
            session,
            config,
            state: Mutex::new(SignalingState::New),
            inbound: Mutex::new(InboundMedia::default()),
            subscribers: RwLock::new(HashMap::new()),
            stats: Arc::new(RelayStats::default()),
            stopped: CancellationToken::new(),
        })
    }

    #[must_use]
    pub const fn id(&self) -> &ParticipantId {
        &self.id
    }

    #[must_use]
    pub const fn user(&self) -> &UserInfo {
        &self.user
    }

    #[must_use]
    pub const fn session(&self) -> &Arc<dyn PeerSession> {
        &self.session
    }

    #[must_use]
    pub fn signaling_state(&self) -> SignalingState {
        *self.state.lock()
    }

    pub fn set_signaling_state(&self, state: SignalingState) {
        let mut current = self.state.lock();
        // Closed is terminal.
        if *current == SignalingState::Closed {
            return;
        }
        debug!(participant = %self.id, from = ?*current, to = ?state, "Signaling state change");
        *current = state;
    }

    /// Register a newly received inbound track.
    ///
    /// Starts the track's reader and health task. A track of a kind already
    /// present replaces the old one: its tasks stop and every relay of this
    /// participant is torn down. Returns `true` when relays need to be
    /// (re)built, i.e. this track completed the audio + video pair or
    /// replaced a track of a complete pair.
    pub async fn attach_track(&self, track: Arc<dyn InboundTrack>) -> bool {
        if self.is_stopped() {
            return false;
        }

        let kind = track.kind();
        let ssrc = track.ssrc();
        let stop = self.stopped.child_token();
        let feed =
            InboundFeed::spawn(Arc::clone(&track), self.config.packet_buffer, stop.clone());
        spawn_health_task(
            Arc::clone(&self.session),
            ssrc,
            self.config.health_interval,
            self.config.feedback_bitrate,
            stop.clone(),
        );

        info!(
            participant = %self.id,
            kind = %kind,
            ssrc,
            codec = %feed.codec().mime_type,
            "Inbound track attached"
        );

        // Held across the swap so no relay is built from the old feed.
        let mut subscribers = self.subscribers.write().await;
        let (replaced, was_ready, is_ready) = {
            let mut inbound = self.inbound.lock();
            let was_ready = inbound.ready().is_some();
            let slot = match kind {
                MediaKind::Audio => &mut inbound.audio,
                MediaKind::Video => &mut inbound.video,
            };
            let old = slot.replace(FeedSlot { feed, stop });
            if let Some(old) = &old {
                old.stop.cancel();
            }
            (old.is_some(), was_ready, inbound.ready().is_some())
        };

        if replaced {
            debug!(participant = %self.id, kind = %kind, "Replaced inbound track");
            for (subscriber_id, pair) in subscribers.drain() {
                pair.teardown().await;
                debug!(publisher = %self.id, subscriber = %subscriber_id, "Stale relay removed");
            }
        }
        is_ready && (replaced || !was_ready)
    }

    /// Whether both audio and video are being received
    #[must_use]
    pub fn is_publishing(&self) -> bool {
        self.inbound.lock().ready().is_some()
    }

    /// Relay this participant's audio and video to `subscriber`.
    ///
    /// Returns `Ok(false)` without side effects when the pair is skipped:
    /// same participant, either side stopped, media not ready yet, or a
    /// relay already exists. Both relay tracks are attached or neither is.
    pub async fn add_subscriber(&self, subscriber: &Self) -> Result<bool> {
        if self.id == subscriber.id || self.is_stopped() || subscriber.is_stopped() {
            return Ok(false);
        }

        let mut subscribers = self.subscribers.write().await;
        // Either side may have stopped while waiting for the lock.
        if self.is_stopped()
            || subscriber.is_stopped()
            || subscribers.contains_key(&subscriber.id)
        {
            return Ok(false);
        }
        let Some((audio_feed, video_feed)) = self.inbound.lock().ready() else {
            return Ok(false);
        };

        let (Some(audio_rx), Some(video_rx)) = (audio_feed.subscribe(), video_feed.subscribe())
        else {
            debug!(participant = %self.id, "Inbound media ended, skipping relay");
            return Ok(false);
        };

        let audio_track = Arc::new(self.relay_track(&audio_feed));
        let video_track = Arc::new(self.relay_track(&video_feed));

        let session = Arc::clone(&subscriber.session);
        let audio_sender = session.add_track(Arc::clone(&audio_track)).await?;
        let video_sender = match session.add_track(Arc::clone(&video_track)).await {
            Ok(sender) => sender,
            Err(e) => {
                if let Err(remove_err) = session.remove_track(audio_sender).await {
                    warn!(error = %remove_err, "Failed to roll back audio relay");
                }
                return Err(e);
            }
        };

        let cancel = self.stopped.child_token();
        spawn_relay_pump(
            audio_rx,
            Arc::clone(&audio_track),
            Arc::clone(&self.stats),
            cancel.clone(),
        );
        spawn_relay_pump(
            video_rx,
            Arc::clone(&video_track),
            Arc::clone(&self.stats),
            cancel.clone(),
        );

        subscribers.insert(
            subscriber.id.clone(),
            RelayPair {
                session,
                audio: RelayLeg {
                    track: audio_track,
                    sender: audio_sender,
                },
                video: RelayLeg {
                    track: video_track,
                    sender: video_sender,
                },
                cancel,
            },
        );

        info!(publisher = %self.id, subscriber = %subscriber.id, "Relay established");
        Ok(true)
    }

    /// Tear down the relay toward `subscriber_id`. Returns whether one existed.
    pub async fn remove_subscriber(&self, subscriber_id: &ParticipantId) -> bool {
        let mut subscribers = self.subscribers.write().await;
        let Some(pair) = subscribers.remove(subscriber_id) else {
            return false;
        };
        pair.teardown().await;
        info!(publisher = %self.id, subscriber = %subscriber_id, "Relay removed");
        true
    }

    pub async fn has_subscriber(&self, subscriber_id: &ParticipantId) -> bool {
        self.subscribers.read().await.contains_key(subscriber_id)
    }

    pub async fn subscriber_ids(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<_> = self.subscribers.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Relay tracks currently carrying this participant's media
    pub async fn relay_track_count(&self) -> usize {
        self.subscribers.read().await.len() * 2
    }

    /// Stop all tasks, tear down any relays still published and close the session
    pub async fn stop(&self) {
        if self.stopped.is_cancelled() {
            return;
        }
        self.set_signaling_state(SignalingState::Closed);
        self.stopped.cancel();

        let remaining: Vec<_> = self.subscribers.write().await.drain().collect();
        for (_, pair) in remaining {
            pair.teardown().await;
        }

        if let Err(e) = self.session.close().await {
            debug!(participant = %self.id, error = %e, "Error closing peer session");
        }

        debug!(participant = %self.id, stats = ?self.stats(), "Participant stopped");
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.is_cancelled()
    }

    #[must_use]
    pub fn stats(&self) -> RelayStatsSnapshot {
        self.stats.snapshot()
    }

    fn relay_track(&self, feed: &InboundFeed) -> RelayTrack {
        let kind = feed.kind();
        RelayTrack::new(
            kind,
            feed.codec(),
            format!("{kind}-{}", self.id),
            self.user.stream_id.clone(),
        )
    }
}
