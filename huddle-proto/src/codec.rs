//! JSON codec for signaling envelopes

use serde::Deserialize;
use thiserror::Error;

use crate::{ClientMessage, ServerMessage};

/// Why an inbound frame could not be turned into a [`ClientMessage`]
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Frame is not a JSON object with a string `uri`
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(#[source] serde_json::Error),

    /// Known `uri` but the payload does not match it
    #[error("malformed `{uri}` message: {source}")]
    Malformed {
        uri: String,
        #[source]
        source: serde_json::Error,
    },

    /// `uri` is not one of the `in/*` discriminators
    #[error("unrecognized message uri `{0}`")]
    UnknownUri(String),
}

impl DecodeError {
    /// Message reported back to the client in an `out/error` envelope
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            Self::UnknownUri(_) => "Message uri not recognized".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    uri: String,
}

impl ClientMessage {
    /// Decode one text frame.
    ///
    /// The discriminator is read first so that an unknown `uri` is reported
    /// separately from a known message with a bad payload.
    pub fn decode(frame: &str) -> Result<Self, DecodeError> {
        let raw: RawEnvelope =
            serde_json::from_str(frame).map_err(DecodeError::InvalidEnvelope)?;

        if !Self::URIS.contains(&raw.uri.as_str()) {
            return Err(DecodeError::UnknownUri(raw.uri));
        }

        serde_json::from_str(frame).map_err(|source| DecodeError::Malformed {
            uri: raw.uri,
            source,
        })
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl ServerMessage {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }
}
