//! Huddle core: application configuration and process-wide plumbing
//! shared by the API layer and the server binary.

pub mod bootstrap;
pub mod config;
pub mod logging;

pub use config::Config;
