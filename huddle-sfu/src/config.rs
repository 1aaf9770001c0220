//! Relay configuration

use std::time::Duration;

/// Room limits and relay timings
#[derive(Debug, Clone)]
pub struct SfuConfig {
    /// Maximum number of concurrent rooms (0 = unlimited)
    pub max_rooms: usize,
    /// Maximum participants per room (0 = unlimited)
    pub max_participants_per_room: usize,
    /// Interval between `out/ping` broadcasts
    pub keepalive_interval: Duration,
    /// Interval between keyframe requests per inbound track
    pub health_interval: Duration,
    /// Receiver-estimated maximum bitrate sent to publishers (bits/s)
    pub feedback_bitrate: u64,
    /// Capacity of the per-track packet broadcast channel
    pub packet_buffer: usize,
}

impl Default for SfuConfig {
    fn default() -> Self {
        Self {
            max_rooms: 0,
            max_participants_per_room: 16,
            keepalive_interval: Duration::from_secs(15),
            health_interval: Duration::from_secs(3),
            feedback_bitrate: 10_000_000,
            packet_buffer: 256,
        }
    }
}

impl SfuConfig {
    pub(crate) const fn room_is_full(&self, count: usize) -> bool {
        self.max_participants_per_room > 0 && count >= self.max_participants_per_room
    }
}

/// One STUN or TURN server handed to server-side peer sessions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

/// ICE settings for [`crate::WebRtcSessionFactory`]
#[derive(Debug, Clone, Default)]
pub struct IceSettings {
    pub servers: Vec<IceServer>,
    /// Restrict candidates to TURN relays
    pub relay_only: bool,
}
