//! [`PeerSession`] backed by `webrtc-rs`

use async_trait::async_trait;
use futures::FutureExt;
use huddle_proto::{IceCandidate, SdpType, SessionDescription};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::packet::Packet as RtcpPacket;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtcp::payload_feedbacks::receiver_estimated_maximum_bitrate::ReceiverEstimatedMaximumBitrate;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_remote::TrackRemote;

use crate::config::IceSettings;
use crate::error::{Error, Result};
use crate::session::{
    ConnectionState, OnIceCandidateHandler, OnNegotiationNeededHandler, OnTrackHandler,
    PeerSession, RelaySender, SessionFactory,
};
use crate::track::{InboundTrack, MediaKind, RelayTrack};

/// Builds peer connections sharing one media engine and interceptor setup
pub struct WebRtcSessionFactory {
    api: API,
    configuration: RTCConfiguration,
}

impl WebRtcSessionFactory {
    pub fn new(ice: &IceSettings) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = ice
            .servers
            .iter()
            .map(|s| RTCIceServer {
                urls: s.urls.clone(),
                username: s.username.clone(),
                credential: s.credential.clone(),
                ..Default::default()
            })
            .collect();

        let configuration = RTCConfiguration {
            ice_servers,
            ice_transport_policy: if ice.relay_only {
                RTCIceTransportPolicy::Relay
            } else {
                RTCIceTransportPolicy::All
            },
            ..Default::default()
        };

        info!(
            ice_servers = ice.servers.len(),
            relay_only = ice.relay_only,
            "WebRTC session factory initialized"
        );

        Ok(Self { api, configuration })
    }
}

#[async_trait]
impl SessionFactory for WebRtcSessionFactory {
    async fn create_session(&self) -> Result<Arc<dyn PeerSession>> {
        let pc = self.api.new_peer_connection(self.configuration.clone()).await?;
        Ok(Arc::new(WebRtcSession::new(Arc::new(pc))))
    }
}

pub struct WebRtcSession {
    pc: Arc<RTCPeerConnection>,
    senders: Mutex<HashMap<RelaySender, Arc<RTCRtpSender>>>,
    next_sender: AtomicU64,
}

impl WebRtcSession {
    #[must_use]
    pub fn new(pc: Arc<RTCPeerConnection>) -> Self {
        Self {
            pc,
            senders: Mutex::new(HashMap::new()),
            next_sender: AtomicU64::new(1),
        }
    }
}

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription> {
    let SessionDescription { sdp_type, sdp } = description;
    let rtc = match sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(sdp)?,
        SdpType::Answer => RTCSessionDescription::answer(sdp)?,
        SdpType::Pranswer => RTCSessionDescription::pranswer(sdp)?,
        SdpType::Rollback => {
            let mut rollback = RTCSessionDescription::default();
            rollback.sdp_type = RTCSdpType::Rollback;
            rollback
        }
    };
    Ok(rtc)
}

fn from_rtc_description(description: RTCSessionDescription) -> Result<SessionDescription> {
    let sdp_type = match description.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        RTCSdpType::Unspecified => {
            return Err(Error::Session("unspecified sdp type".to_string()));
        }
    };
    Ok(SessionDescription {
        sdp_type,
        sdp: description.sdp,
    })
}

fn candidate_to_proto(candidate: &RTCIceCandidate) -> Option<IceCandidate> {
    let init = candidate
        .to_json()
        .map_err(|e| debug!(error = %e, "Failed to serialize ICE candidate"))
        .ok()?;
    Some(IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    })
}

const fn connection_state(state: RTCPeerConnectionState) -> ConnectionState {
    match state {
        RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => ConnectionState::New,
        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
        RTCPeerConnectionState::Connected => ConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => ConnectionState::Failed,
        RTCPeerConnectionState::Closed => ConnectionState::Closed,
    }
}

#[async_trait]
impl PeerSession for WebRtcSession {
    async fn create_answer(&self) -> Result<SessionDescription> {
        from_rtc_description(self.pc.create_answer(None).await?)
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        from_rtc_description(self.pc.create_offer(None).await?)
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.pc
            .set_remote_description(to_rtc_description(description)?)
            .await?;
        Ok(())
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.pc
            .set_local_description(to_rtc_description(description)?)
            .await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await?;
        Ok(())
    }

    fn connection_state(&self) -> ConnectionState {
        connection_state(self.pc.connection_state())
    }

    fn on_ice_candidate(&self, handler: OnIceCandidateHandler) {
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let fut = candidate
                    .as_ref()
                    .and_then(candidate_to_proto)
                    .map(&handler);
                async move {
                    if let Some(fut) = fut {
                        fut.await;
                    }
                }
                .boxed()
            }));
    }

    fn on_track(&self, handler: OnTrackHandler) {
        self.pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let fut = RemoteTrack::new(track).map(|t| handler(Arc::new(t)));
            async move {
                if let Some(fut) = fut {
                    fut.await;
                }
            }
            .boxed()
        }));
    }

    fn on_negotiation_needed(&self, handler: OnNegotiationNeededHandler) {
        self.pc.on_negotiation_needed(Box::new(move || handler()));
    }

    async fn add_track(&self, track: Arc<RelayTrack>) -> Result<RelaySender> {
        let sender = self.pc.add_track(track.as_track_local()).await?;
        let id = RelaySender::new(self.next_sender.fetch_add(1, Ordering::Relaxed));
        self.senders.lock().insert(id, sender);
        Ok(id)
    }

    async fn remove_track(&self, sender: RelaySender) -> Result<()> {
        let rtp_sender = self
            .senders
            .lock()
            .remove(&sender)
            .ok_or_else(|| Error::Relay("unknown relay sender".to_string()))?;
        self.pc.remove_track(&rtp_sender).await?;
        Ok(())
    }

    async fn send_feedback(&self, media_ssrc: u32, bitrate: u64) -> Result<()> {
        #[allow(clippy::cast_precision_loss)]
        let bitrate = bitrate as f32;
        let packets: [Box<dyn RtcpPacket + Send + Sync>; 2] = [
            Box::new(PictureLossIndication {
                sender_ssrc: 0,
                media_ssrc,
            }),
            Box::new(ReceiverEstimatedMaximumBitrate {
                sender_ssrc: 0,
                bitrate,
                ssrcs: vec![media_ssrc],
            }),
        ];
        self.pc.write_rtcp(&packets).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.senders.lock().clear();
        self.pc.close().await?;
        Ok(())
    }
}

/// [`InboundTrack`] over a remote `webrtc-rs` track
struct RemoteTrack {
    track: Arc<TrackRemote>,
    kind: MediaKind,
}

impl RemoteTrack {
    fn new(track: Arc<TrackRemote>) -> Option<Self> {
        let Some(kind) = MediaKind::from_codec_type(track.kind()) else {
            debug!(track_id = %track.id(), "Ignoring track without media kind");
            return None;
        };
        Some(Self { track, kind })
    }
}

#[async_trait]
impl InboundTrack for RemoteTrack {
    fn id(&self) -> String {
        self.track.id()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn ssrc(&self) -> u32 {
        self.track.ssrc()
    }

    fn codec(&self) -> RTCRtpCodecCapability {
        self.track.codec().capability
    }

    async fn read_rtp(&self) -> Result<Packet> {
        let (packet, _attributes) = self
            .track
            .read_rtp()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IceServer;

    #[test]
    fn test_description_conversion() {
        let rtc = to_rtc_description(SessionDescription::offer("v=0\r\n")).unwrap();
        assert_eq!(rtc.sdp_type, RTCSdpType::Offer);
        let back = from_rtc_description(rtc).unwrap();
        assert_eq!(back, SessionDescription::offer("v=0\r\n"));
    }

    #[test]
    fn test_unspecified_description_rejected() {
        assert!(from_rtc_description(RTCSessionDescription::default()).is_err());
    }

    #[test]
    fn test_state_mapping() {
        assert_eq!(
            connection_state(RTCPeerConnectionState::Unspecified),
            ConnectionState::New
        );
        assert_eq!(
            connection_state(RTCPeerConnectionState::Connected),
            ConnectionState::Connected
        );
    }

    #[tokio::test]
    async fn test_factory_creates_new_session() {
        let factory = WebRtcSessionFactory::new(&IceSettings {
            servers: vec![IceServer {
                urls: vec!["stun:stun.l.google.com:19302".to_string()],
                ..Default::default()
            }],
            relay_only: false,
        })
        .unwrap();

        let session = factory.create_session().await.unwrap();
        assert_eq!(session.connection_state(), ConnectionState::New);
        session.close().await.unwrap();
    }
}
