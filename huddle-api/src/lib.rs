// Huddle API Library
//
// HTTP surface of the relay: room signaling and operator WebSockets,
// health probe and ICE server discovery

pub mod http;
pub mod impls;
pub mod settings;

// Re-export commonly used types
pub use http::{create_router, AppState};
