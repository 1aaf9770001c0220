use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Room is full (max {max} participants)")]
    RoomFull { max: usize },

    #[error("Maximum number of rooms reached")]
    RoomLimitReached,

    #[error("Connection already joined the room")]
    AlreadyJoined,

    #[error("Participant {0} is already in the room")]
    DuplicateParticipant(String),

    #[error("join the room first")]
    NotJoined,

    #[error("Peer session error: {0}")]
    Session(String),

    #[error("Relay error: {0}")]
    Relay(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl From<webrtc::Error> for Error {
    fn from(err: webrtc::Error) -> Self {
        Self::Session(err.to_string())
    }
}
