//! Payload types shared by client and server envelopes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Public identity of a room participant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    #[serde(default)]
    pub username: String,
    /// Media stream id the client uses to group the tracks of one source
    #[serde(rename = "streamID", default)]
    pub stream_id: String,
}

impl UserInfo {
    pub fn new(
        id: impl Into<String>,
        username: impl Into<String>,
        stream_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            stream_id: stream_id.into(),
        }
    }
}

/// SDP type as serialized by browsers (`RTCSdpType`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

/// Session description in its `RTCSessionDescriptionInit` JSON form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    #[serde(default)]
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate in its `RTCIceCandidateInit` JSON form
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    #[serde(default)]
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Browsers signal the end of gathering with an empty candidate line.
    #[must_use]
    pub fn is_end_of_candidates(&self) -> bool {
        self.candidate.trim().is_empty()
    }
}

/// Room snapshot pushed to operator connections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub id: String,
    pub participants: usize,
    pub users: Vec<UserInfo>,
    pub created_at: DateTime<Utc>,
}
