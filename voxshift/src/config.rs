//! Configuration types and defaults

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use voxshift_core::{
    IceServer, MediaKind, RoomConfig, RtcpFeedback, RtpCodecCapability, VoxError, VoxResult,
    WorkerSettings,
};

/// SFU server configuration
///
/// Every field has a default, so an empty JSON object is a valid file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// Signaling listen address
    pub listen: SocketAddr,
    /// ICE servers sent to clients with every new transport
    pub ice_servers: Vec<IceServer>,
    /// Media worker settings
    pub worker: WorkerSettings,
    /// Router codec profile
    pub media_codecs: Vec<RtpCodecCapability>,
    /// Room policy and transport options
    pub room: RoomConfig,
    /// Delay between media engine death and exit, in milliseconds
    pub engine_grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 3000)),
            ice_servers: Vec::new(),
            worker: WorkerSettings::default(),
            media_codecs: vec![opus_codec()],
            room: RoomConfig::default(),
            engine_grace_ms: 2000,
        }
    }
}

/// The single audio codec the router offers
pub fn opus_codec() -> RtpCodecCapability {
    RtpCodecCapability {
        kind: MediaKind::Audio,
        mime_type: "audio/opus".to_string(),
        preferred_payload_type: None,
        clock_rate: 48000,
        channels: Some(2),
        parameters: BTreeMap::new(),
        rtcp_feedback: vec![RtcpFeedback::new("nack"), RtcpFeedback::new("transport-cc")],
    }
}

impl ServerConfig {
    /// Load a JSON configuration file
    pub fn from_file(path: &Path) -> VoxResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| VoxError::Initialization {
            reason: format!("Failed to read {}: {}", path.display(), e),
        })?;
        Self::from_json(&text)
    }

    /// Parse a JSON configuration
    pub fn from_json(text: &str) -> VoxResult<Self> {
        serde_json::from_str(text).map_err(|e| VoxError::Initialization {
            reason: format!("Invalid configuration: {}", e),
        })
    }

    /// Delay between media engine death and exit
    pub fn engine_grace(&self) -> Duration {
        Duration::from_millis(self.engine_grace_ms)
    }

    /// Advertise `ip` in the candidates of every listen address
    pub fn set_announced_ip(&mut self, ip: &str) {
        for listen_ip in &mut self.room.transport_options.listen_ips {
            listen_ip.announced_ip = Some(ip.to_string());
        }
    }

    /// Reject configurations the server cannot start with
    pub fn validate(&self) -> VoxResult<()> {
        self.worker.validate()?;

        let audio_codecs = self
            .media_codecs
            .iter()
            .filter(|c| c.kind == MediaKind::Audio)
            .count();
        if audio_codecs != 1 || self.media_codecs.len() != 1 {
            return Err(VoxError::Initialization {
                reason: format!(
                    "exactly one audio codec is supported, {} codec(s) configured",
                    self.media_codecs.len()
                ),
            });
        }

        if self.room.transport_options.listen_ips.is_empty() {
            return Err(VoxError::Initialization {
                reason: "no listen IPs configured for transports".to_string(),
            });
        }
        if let Some(index) = self.ice_servers.iter().position(|s| s.urls.is_empty()) {
            return Err(VoxError::Initialization {
                reason: format!("ICE server {} has no urls", index),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.listen.port(), 3000);
        assert_eq!(config.engine_grace(), Duration::from_secs(2));
        assert_eq!(config.media_codecs[0].mime_type, "audio/opus");
        assert_eq!(config.media_codecs[0].rtcp_feedback.len(), 2);
        assert!(config.room.auto_resume_consumers);
        assert_eq!(
            config.room.transport_options.initial_available_outgoing_bitrate,
            1_000_000
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = ServerConfig::from_json(
            r#"{
                "listen": "127.0.0.1:4000",
                "iceServers": [{"urls": ["turn:turn.example.org:3478"], "username": "u", "credential": "p"}],
                "worker": {"rtcMinPort": 20000, "rtcMaxPort": 20010},
                "room": {"autoResumeConsumers": false}
            }"#,
        )
        .unwrap();

        assert_eq!(config.listen.port(), 4000);
        assert_eq!(config.ice_servers[0].username.as_deref(), Some("u"));
        assert_eq!(config.worker.rtc_min_port, 20000);
        assert_eq!(config.worker.log_level, "warn");
        assert!(!config.room.auto_resume_consumers);
        assert_eq!(config.media_codecs.len(), 1);
    }

    #[test]
    fn test_ice_server_without_urls_rejected() {
        let config = ServerConfig {
            ice_servers: vec![IceServer {
                urls: Vec::new(),
                username: None,
                credential: None,
            }],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(VoxError::Initialization { .. })
        ));
    }

    #[test]
    fn test_announced_ip() {
        let mut config = ServerConfig::default();
        config.set_announced_ip("203.0.113.7");
        assert_eq!(
            config.room.transport_options.listen_ips[0]
                .announced_ip
                .as_deref(),
            Some("203.0.113.7")
        );
    }

    #[test]
    fn test_validation() {
        let mut config = ServerConfig::default();
        config.media_codecs.push(opus_codec());
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.worker.rtc_min_port = 30000;
        config.worker.rtc_max_port = 20000;
        assert!(config.validate().is_err());

        assert!(ServerConfig::from_json("{not json").is_err());
    }
}
