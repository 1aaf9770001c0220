//! ICE server configuration for browser clients
//!
//! `GET /api/ice-servers` returns the same STUN/TURN servers the relay's own
//! peer sessions use.

use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};

use crate::http::AppState;
use crate::settings::ice_settings;

/// ICE Server configuration (STUN/TURN)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    /// URLs for the ICE server (e.g., ["stun:stun.example.com:3478"])
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetIceServersResponse {
    pub servers: Vec<IceServerConfig>,
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

pub async fn get_ice_servers(State(state): State<AppState>) -> Json<GetIceServersResponse> {
    let servers = ice_settings(&state.config)
        .servers
        .into_iter()
        .map(|server| IceServerConfig {
            urls: server.urls,
            username: non_empty(server.username),
            credential: non_empty(server.credential),
        })
        .collect();

    Json(GetIceServersResponse { servers })
}
