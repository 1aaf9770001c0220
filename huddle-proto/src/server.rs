//! Server → client envelopes (`out/*`)

use serde::{Deserialize, Serialize};

use crate::types::{IceCandidate, SessionDescription, UserInfo};

/// Message sent by the server to a room client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "uri")]
pub enum ServerMessage {
    #[serde(rename = "out/user-join")]
    UserJoin {
        user: UserInfo,
        #[serde(rename = "roomUsers")]
        room_users: Vec<UserInfo>,
    },

    #[serde(rename = "out/user-left")]
    UserLeft {
        user: UserInfo,
        #[serde(rename = "roomUsers")]
        room_users: Vec<UserInfo>,
    },

    #[serde(rename = "out/answer")]
    Answer {
        #[serde(rename = "toUser")]
        to_user: UserInfo,
        answer: SessionDescription,
    },

    #[serde(rename = "out/offer")]
    Offer {
        #[serde(rename = "toUser")]
        to_user: UserInfo,
        offer: SessionDescription,
    },

    #[serde(rename = "out/icecandidate")]
    IceCandidate {
        #[serde(rename = "toUser")]
        to_user: UserInfo,
        candidate: IceCandidate,
    },

    #[serde(rename = "out/negotiationneeded")]
    NegotiationNeeded {
        #[serde(rename = "toUser")]
        to_user: UserInfo,
    },

    #[serde(rename = "out/ping")]
    Ping,

    #[serde(rename = "out/error")]
    Error { message: String },

    #[serde(rename = "out/info")]
    Info { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::Info {
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn uri(&self) -> &'static str {
        match self {
            Self::UserJoin { .. } => "out/user-join",
            Self::UserLeft { .. } => "out/user-left",
            Self::Answer { .. } => "out/answer",
            Self::Offer { .. } => "out/offer",
            Self::IceCandidate { .. } => "out/icecandidate",
            Self::NegotiationNeeded { .. } => "out/negotiationneeded",
            Self::Ping => "out/ping",
            Self::Error { .. } => "out/error",
            Self::Info { .. } => "out/info",
        }
    }
}
