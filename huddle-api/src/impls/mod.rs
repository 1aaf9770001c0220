//! Transport-agnostic connection logic
//!
//! Both WebSocket endpoints delegate to these loops, so tests can drive them
//! with scripted streams instead of sockets.

pub mod operator;
pub mod signaling;

pub use operator::run_operator;
pub use signaling::{SignalStream, SignalingHandler};
