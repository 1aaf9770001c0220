//! Huddle SFU (Selective Forwarding Unit)
//!
//! Rooms of participants, each publishing one audio and one video track
//! that is relayed to every other participant in the room.
//!
//! ## Architecture
//!
//! - **`RoomFactory`**: creates rooms on first join, deletes them when empty,
//!   announces both to operator subscriptions
//! - **`Room`**: members keyed by connection, serialized outbound writes,
//!   keepalive pings, subscription reconciliation
//! - **`Participant`**: one peer session, its inbound feeds and the relays
//!   carrying its media to other members
//! - **`PeerSession`**: the transport capability, implemented over
//!   `webrtc-rs` by `WebRtcSession` and in memory by `test_helpers`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use huddle_sfu::{Connection, Participant, RoomFactory, RoomId, SfuConfig};
//!
//! let factory = RoomFactory::new(SfuConfig::default());
//! let participant = Participant::new(user, session, factory.config());
//! let room = factory.join(&RoomId::from("lobby"), connection, participant)?;
//! room.broadcast(&message).await;
//! ```

mod config;
mod connection;
mod error;
mod factory;
mod participant;
mod room;
mod session;
mod track;
mod types;
mod webrtc_session;

pub mod test_helpers;

pub use config::{IceServer, IceSettings, SfuConfig};
pub use connection::{Connection, Outbound};
pub use error::{Error, Result};
pub use factory::{RoomEvent, RoomEvents, RoomFactory};
pub use participant::{Offerer, Participant, SignalingState};
pub use room::Room;
pub use session::{
    ConnectionState, OnIceCandidateHandler, OnNegotiationNeededHandler, OnTrackHandler,
    PeerSession, RelaySender, SessionFactory,
};
pub use track::{InboundFeed, InboundTrack, MediaKind, RelayStats, RelayStatsSnapshot, RelayTrack};
pub use types::{ConnectionId, ParticipantId, RoomId};
pub use webrtc_session::{WebRtcSession, WebRtcSessionFactory};
