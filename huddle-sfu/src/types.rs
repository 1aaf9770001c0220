//! Identifier newtypes used throughout the relay

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id! {
    /// Client-chosen identifier of a room participant
    ParticipantId
}

string_id! {
    /// Name of a room, taken from the `room` query parameter
    RoomId
}

string_id! {
    /// Server-assigned handle of one live signaling connection
    ConnectionId
}

impl ConnectionId {
    /// Allocate a fresh random handle
    #[must_use]
    pub fn generate() -> Self {
        Self(nanoid::nanoid!(12))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_connection_ids_differ() {
        let a = ConnectionId::generate();
        let b = ConnectionId::generate();
        assert_eq!(a.as_str().len(), 12);
        assert_ne!(a, b);
    }

    #[test]
    fn test_display_is_raw_id() {
        assert_eq!(RoomId::from("r1").to_string(), "r1");
        assert_eq!(ParticipantId::new("alice").as_str(), "alice");
    }
}
