use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::webrtc::MeshConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub signaling: SignalingConfig,
    #[serde(default)]
    pub mesh: MeshSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    /// WebSocket URL of the shared relay
    #[serde(default = "default_relay_url")]
    pub relay_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshSection {
    /// STUN server given to every peer connection
    #[serde(default = "default_stun_server")]
    pub stun_server: String,
    /// Peers silent for this long are evicted
    #[serde(default = "default_peer_timeout_ms")]
    pub peer_timeout_ms: u64,
    #[serde(default = "default_channel_label")]
    pub channel_label: String,
    /// Data channel retransmission window
    #[serde(default = "default_max_packet_life_time_ms")]
    pub max_packet_life_time_ms: u16,
}

fn default_relay_url() -> String {
    "wss://127.0.0.1:8443".to_string()
}

fn default_stun_server() -> String {
    MeshConfig::default().stun_server
}

fn default_peer_timeout_ms() -> u64 {
    MeshConfig::default().peer_timeout_ms
}

fn default_channel_label() -> String {
    MeshConfig::default().channel_label
}

fn default_max_packet_life_time_ms() -> u16 {
    MeshConfig::default().max_packet_life_time_ms
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            relay_url: default_relay_url(),
        }
    }
}

impl Default for MeshSection {
    fn default() -> Self {
        Self {
            stun_server: default_stun_server(),
            peer_timeout_ms: default_peer_timeout_ms(),
            channel_label: default_channel_label(),
            max_packet_life_time_ms: default_max_packet_life_time_ms(),
        }
    }
}

impl Config {
    /// Load config from file, or create default if doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = get_config_path();

        if config_path.exists() {
            let content = fs::read_to_string(&config_path)
                .context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        let config_path = get_config_path();

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&config_path, content)?;

        Ok(())
    }

    /// Runtime settings for a mesh node
    pub fn mesh_config(&self) -> MeshConfig {
        MeshConfig {
            stun_server: self.mesh.stun_server.clone(),
            peer_timeout_ms: self.mesh.peer_timeout_ms,
            channel_label: self.mesh.channel_label.clone(),
            max_packet_life_time_ms: self.mesh.max_packet_life_time_ms,
        }
    }
}

/// Get the peermesh directory (~/.peermesh)
pub fn get_peermesh_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".peermesh")
}

/// Get the config file path (~/.peermesh/config.toml)
pub fn get_config_path() -> PathBuf {
    get_peermesh_dir().join("config.toml")
}
