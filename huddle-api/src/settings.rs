//! Mapping from application configuration to relay settings

use huddle_core::Config;
use huddle_sfu::{IceServer, IceSettings, SfuConfig};
use std::time::Duration;

#[must_use]
pub fn sfu_config(config: &Config) -> SfuConfig {
    let sfu = &config.sfu;
    SfuConfig {
        max_rooms: sfu.max_rooms,
        max_participants_per_room: sfu.max_participants_per_room,
        keepalive_interval: Duration::from_secs(sfu.keepalive_interval_secs),
        health_interval: Duration::from_secs(sfu.health_interval_secs),
        feedback_bitrate: sfu.feedback_bitrate,
        packet_buffer: sfu.packet_buffer,
    }
}

/// One server per STUN URL, then the TURN server with its credentials
#[must_use]
pub fn ice_settings(config: &Config) -> IceSettings {
    let webrtc = &config.webrtc;
    let mut servers: Vec<IceServer> = webrtc
        .stun_servers
        .iter()
        .filter(|url| !url.is_empty())
        .map(|url| IceServer {
            urls: vec![url.clone()],
            ..Default::default()
        })
        .collect();

    if let Some(turn_url) = webrtc.turn_url.as_ref().filter(|url| !url.is_empty()) {
        servers.push(IceServer {
            urls: vec![turn_url.clone()],
            username: webrtc.turn_username.clone(),
            credential: webrtc.turn_credential.clone(),
        });
    }

    IceSettings {
        servers,
        relay_only: webrtc.relay_only,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sfu_config_from_defaults() {
        let sfu = sfu_config(&Config::default());
        assert_eq!(sfu.max_participants_per_room, 16);
        assert_eq!(sfu.keepalive_interval, Duration::from_secs(15));
        assert_eq!(sfu.health_interval, Duration::from_secs(3));
        assert_eq!(sfu.packet_buffer, 256);
    }

    #[test]
    fn test_ice_settings_default_stun() {
        let ice = ice_settings(&Config::default());
        assert_eq!(ice.servers.len(), 1);
        assert_eq!(ice.servers[0].urls, vec!["stun:stun.l.google.com:19302"]);
        assert!(!ice.relay_only);
    }

    #[test]
    fn test_ice_settings_with_turn() {
        let mut config = Config::default();
        config.webrtc.stun_servers.clear();
        config.webrtc.turn_url = Some("turn:turn.example.com:3478".to_string());
        config.webrtc.turn_username = "user".to_string();
        config.webrtc.turn_credential = "secret".to_string();
        config.webrtc.relay_only = true;

        let ice = ice_settings(&config);
        assert_eq!(
            ice.servers,
            vec![IceServer {
                urls: vec!["turn:turn.example.com:3478".to_string()],
                username: "user".to_string(),
                credential: "secret".to_string(),
            }]
        );
        assert!(ice.relay_only);
    }
}
