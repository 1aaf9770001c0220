//! Client → server envelopes (`in/*`)

use serde::{Deserialize, Serialize};

use crate::types::{IceCandidate, SessionDescription, UserInfo};

/// Message sent by a room client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "uri")]
pub enum ClientMessage {
    #[serde(rename = "in/join")]
    Join { user: UserInfo },

    #[serde(rename = "in/offer")]
    Offer {
        #[serde(rename = "fromUser", default, skip_serializing_if = "Option::is_none")]
        from_user: Option<UserInfo>,
        offer: SessionDescription,
    },

    #[serde(rename = "in/answer")]
    Answer {
        #[serde(rename = "fromUser", default, skip_serializing_if = "Option::is_none")]
        from_user: Option<UserInfo>,
        answer: SessionDescription,
    },

    #[serde(rename = "in/icecandidate")]
    IceCandidate {
        #[serde(rename = "fromUser", default, skip_serializing_if = "Option::is_none")]
        from_user: Option<UserInfo>,
        candidate: IceCandidate,
    },

    #[serde(rename = "in/pong")]
    Pong,
}

impl ClientMessage {
    pub const JOIN: &'static str = "in/join";
    pub const OFFER: &'static str = "in/offer";
    pub const ANSWER: &'static str = "in/answer";
    pub const ICE_CANDIDATE: &'static str = "in/icecandidate";
    pub const PONG: &'static str = "in/pong";

    /// All discriminators a client may send
    pub const URIS: [&'static str; 5] = [
        Self::JOIN,
        Self::OFFER,
        Self::ANSWER,
        Self::ICE_CANDIDATE,
        Self::PONG,
    ];

    #[must_use]
    pub const fn uri(&self) -> &'static str {
        match self {
            Self::Join { .. } => Self::JOIN,
            Self::Offer { .. } => Self::OFFER,
            Self::Answer { .. } => Self::ANSWER,
            Self::IceCandidate { .. } => Self::ICE_CANDIDATE,
            Self::Pong => Self::PONG,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_from_browser() {
        let raw = r#"{"uri":"in/join","user":{"id":"a","username":"Alice","streamID":"sa"}}"#;
        let msg = ClientMessage::decode(raw).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Join {
                user: UserInfo::new("a", "Alice", "sa")
            }
        );
        assert_eq!(msg.uri(), "in/join");
    }

    #[test]
    fn test_offer_without_from_user() {
        let raw = r#"{"uri":"in/offer","offer":{"type":"offer","sdp":"v=0"}}"#;
        match ClientMessage::decode(raw).unwrap() {
            ClientMessage::Offer { from_user, offer } => {
                assert!(from_user.is_none());
                assert_eq!(offer, SessionDescription::offer("v=0"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_pong_has_no_payload() {
        assert_eq!(
            ClientMessage::decode(r#"{"uri":"in/pong"}"#).unwrap(),
            ClientMessage::Pong
        );
    }
}
