//! Huddle Protocol Definitions
//!
//! Signaling envelopes exchanged over the room WebSocket and the payloads
//! pushed to operator connections. Every envelope is a JSON object whose
//! `uri` field discriminates the message type:
//!
//! - `in/*` messages are sent by clients ([`ClientMessage`])
//! - `out/*` messages are sent by the server ([`ServerMessage`])

mod client;
mod codec;
mod server;
mod types;

pub use client::ClientMessage;
pub use codec::DecodeError;
pub use server::ServerMessage;
pub use types::{IceCandidate, RoomSummary, SdpType, SessionDescription, UserInfo};
