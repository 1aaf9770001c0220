use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub sfu: SfuConfig,
    pub webrtc: WebRTCConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest accepted WebSocket frame in bytes
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8081,
            max_message_size: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// Who sends the offer when a subscriber's session needs renegotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenegotiationMode {
    /// Send `out/negotiationneeded` and wait for the client's `in/offer`
    #[default]
    ClientOffer,
    /// Create an offer server-side, send `out/offer` and expect `in/answer`
    ServerOffer,
}

/// Room and relay limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SfuConfig {
    /// Maximum concurrent rooms (0 = unlimited)
    pub max_rooms: usize,
    /// Maximum participants per room (0 = unlimited).
    /// Reconciliation is quadratic in room size, keep this small.
    pub max_participants_per_room: usize,
    /// Interval between `out/ping` broadcasts
    pub keepalive_interval_secs: u64,
    /// Interval between keyframe requests for each inbound track
    pub health_interval_secs: u64,
    /// Bitrate hint sent to publishers, in bits per second
    pub feedback_bitrate: u64,
    /// Packets buffered per inbound track before slow relays start skipping
    pub packet_buffer: usize,
    pub renegotiation: RenegotiationMode,
}

impl Default for SfuConfig {
    fn default() -> Self {
        Self {
            max_rooms: 0,
            max_participants_per_room: 16,
            keepalive_interval_secs: 15,
            health_interval_secs: 3,
            feedback_bitrate: 10_000_000,
            packet_buffer: 256,
            renegotiation: RenegotiationMode::ClientOffer,
        }
    }
}

/// ICE configuration for server-side peer sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebRTCConfig {
    /// STUN server URLs
    pub stun_servers: Vec<String>,
    /// TURN server URL (e.g., "turn:turn.example.com:3478")
    pub turn_url: Option<String>,
    pub turn_username: String,
    pub turn_credential: String,
    /// Only gather relay candidates
    pub relay_only: bool,
}

impl Default for WebRTCConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_url: None,
            turn_username: String::new(),
            turn_credential: String::new(),
            relay_only: false,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // HUDDLE_SERVER__PORT=9000, HUDDLE_WEBRTC__STUN_SERVERS=stun:a,stun:b
        builder = builder.add_source(
            Environment::with_prefix("HUDDLE")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("webrtc.stun_servers")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Get HTTP listen address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Check for misconfigurations, collecting every problem found
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("server.port must be greater than 0".to_string());
        }
        if self.server.max_message_size < 1024 {
            errors.push("server.max_message_size must be at least 1024 bytes".to_string());
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got \"{}\"",
                self.logging.format
            ));
        }
        if self.sfu.keepalive_interval_secs == 0 {
            errors.push("sfu.keepalive_interval_secs must be greater than 0".to_string());
        }
        if self.sfu.health_interval_secs == 0 {
            errors.push("sfu.health_interval_secs must be greater than 0".to_string());
        }
        if self.sfu.packet_buffer == 0 {
            errors.push("sfu.packet_buffer must be greater than 0".to_string());
        }
        if let Some(url) = &self.webrtc.turn_url {
            if !url.starts_with("turn:") && !url.starts_with("turns:") {
                errors.push(format!("webrtc.turn_url must start with turn: or turns:, got {url}"));
            }
        }
        if self.webrtc.relay_only && self.webrtc.turn_url.is_none() {
            errors.push("webrtc.relay_only requires webrtc.turn_url".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.port, 8081);
        assert_eq!(config.sfu.keepalive_interval_secs, 15);
        assert_eq!(config.sfu.health_interval_secs, 3);
        assert_eq!(config.sfu.max_participants_per_room, 16);
        assert_eq!(config.sfu.renegotiation, RenegotiationMode::ClientOffer);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_http_address() {
        let config = Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 9000,
                max_message_size: 64 * 1024,
            },
            ..Default::default()
        };

        assert_eq!(config.http_address(), "127.0.0.1:9000");
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut config = Config::default();
        config.server.port = 0;
        config.logging.format = "xml".to_string();
        config.webrtc.relay_only = true;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_load_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "server:\n  port: 9100\nsfu:\n  max_participants_per_room: 2\n  renegotiation: server_offer\nwebrtc:\n  turn_url: turn:relay.example.com:3478"
        )
        .unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.sfu.max_participants_per_room, 2);
        assert_eq!(config.sfu.renegotiation, RenegotiationMode::ServerOffer);
        assert_eq!(
            config.webrtc.turn_url.as_deref(),
            Some("turn:relay.example.com:3478")
        );
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("HUDDLE_LOGGING__FILE_PATH", "/tmp/huddle-env-test.log");
        std::env::set_var(
            "HUDDLE_WEBRTC__STUN_SERVERS",
            "stun:a.example.com:3478,stun:b.example.com:3478",
        );

        let config = Config::from_env().unwrap();

        std::env::remove_var("HUDDLE_LOGGING__FILE_PATH");
        std::env::remove_var("HUDDLE_WEBRTC__STUN_SERVERS");

        assert_eq!(
            config.logging.file_path.as_deref(),
            Some("/tmp/huddle-env-test.log")
        );
        assert_eq!(
            config.webrtc.stun_servers,
            vec!["stun:a.example.com:3478", "stun:b.example.com:3478"]
        );
    }
}
