//! # Configuration Management Module
//!
//! Loads and validates the meshboard TOML configuration. The configuration
//! is organized into logical sections:
//!
//! - [`BbsConfig`] - service identity (name, location, description)
//! - [`InterfaceConfig`] - radio gateway link (serial or TCP) and pacing
//! - [`SyncConfig`] - peer BBS node ids to exchange mail/bulletins with
//! - [`SecurityConfig`] - node ids allowed to post to the Urgent board
//! - [`MenuConfig`] - letters offered on each menu screen
//! - [`StorageConfig`] - data directory and frame size limits
//! - [`Js8CallConfig`] - optional JS8Call HF bridge
//! - [`LoggingConfig`] - level and optional log file
//!
//! CLI flags merge over file values via [`Config::merge_cli`], following the
//! precedence order: CLI args > config file > defaults.
//!
//! ```toml
//! [bbs]
//! name = "Mesh Valley BBS"
//!
//! [interface]
//! type = "serial"
//! port = "/dev/ttyUSB0"
//!
//! [sync]
//! bbs_nodes = ["!a1b2c3d4"]
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub bbs: BbsConfig,
    pub interface: InterfaceConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub menu: MenuConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub js8call: Option<Js8CallConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BbsConfig {
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub description: String,
}

/// Transport used to reach the radio gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceType {
    Serial,
    Tcp,
}

impl std::str::FromStr for InterfaceType {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "serial" => Ok(InterfaceType::Serial),
            "tcp" => Ok(InterfaceType::Tcp),
            other => Err(anyhow!("unknown interface type '{}' (serial|tcp)", other)),
        }
    }
}

impl std::fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterfaceType::Serial => write!(f, "serial"),
            InterfaceType::Tcp => write!(f, "tcp"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceConfig {
    #[serde(rename = "type")]
    pub interface_type: InterfaceType,
    /// Serial device path, e.g. `/dev/ttyUSB0`. Ignored for TCP.
    #[serde(default)]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Gateway hostname for TCP links.
    #[serde(default)]
    pub hostname: String,
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
    /// Topic label attached to outbound frames for MQTT-bridged gateways.
    #[serde(default = "default_mqtt_topic")]
    pub mqtt_topic: String,
    /// Minimum gap between consecutive sends (ms). Radio airtime is scarce;
    /// the writer enforces a hard floor of 500ms.
    #[serde(default = "default_min_send_gap_ms")]
    pub min_send_gap_ms: u64,
    /// Require the gateway to be reachable at startup. When false the BBS
    /// starts anyway and keeps retrying in the background.
    #[serde(default)]
    pub require_device_at_startup: bool,
}

fn default_baud_rate() -> u32 {
    115200
}
fn default_tcp_port() -> u16 {
    4403
}
fn default_mqtt_topic() -> String {
    "meshtastic.receive".to_string()
}
fn default_min_send_gap_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SyncConfig {
    /// Node ids of peer BBS servers to sync mail/bulletins/channels with.
    #[serde(default)]
    pub bbs_nodes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecurityConfig {
    /// Node ids permitted to post to the Urgent board. Empty = everyone.
    #[serde(default)]
    pub allowed_nodes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuConfig {
    pub main_menu_items: Vec<String>,
    pub bbs_menu_items: Vec<String>,
    pub utilities_menu_items: Vec<String>,
}

impl Default for MenuConfig {
    fn default() -> Self {
        Self {
            main_menu_items: letters(&["Q", "B", "U", "X"]),
            bbs_menu_items: letters(&["M", "B", "C", "J", "X"]),
            utilities_menu_items: letters(&["S", "F", "W", "X"]),
        }
    }
}

fn letters(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
    /// Maximum payload bytes per transmitted frame. Messages longer than
    /// this are chunked on UTF-8 boundaries.
    pub max_message_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            max_message_size: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Js8CallConfig {
    pub host: String,
    pub port: u16,
    /// Store plain station-to-station traffic, not just group traffic.
    #[serde(default = "default_store_messages")]
    pub store_messages: bool,
    /// Group callsigns (e.g. "@MESH") whose traffic lands in the group bucket.
    #[serde(default)]
    pub js8groups: Vec<String>,
    /// Group callsigns whose traffic is urgent and triggers a mesh broadcast.
    #[serde(default)]
    pub js8urgent: Vec<String>,
}

fn default_store_messages() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// CLI overrides collected by `main` and merged over the file config.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub interface_type: Option<String>,
    pub port: Option<String>,
    pub host: Option<String>,
    pub mqtt_topic: Option<String>,
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Apply CLI flag overrides (CLI args win over file values).
    pub fn merge_cli(&mut self, cli: &CliOverrides) -> Result<()> {
        if let Some(ref t) = cli.interface_type {
            self.interface.interface_type = t.parse()?;
        }
        if let Some(ref p) = cli.port {
            self.interface.port = p.clone();
        }
        if let Some(ref h) = cli.host {
            self.interface.hostname = h.clone();
        }
        if let Some(ref t) = cli.mqtt_topic {
            self.interface.mqtt_topic = t.clone();
        }
        self.validate()
    }

    fn validate(&self) -> Result<()> {
        match self.interface.interface_type {
            InterfaceType::Serial => {
                if self.interface.port.is_empty() {
                    return Err(anyhow!("serial interface requires [interface].port"));
                }
            }
            InterfaceType::Tcp => {
                if self.interface.hostname.is_empty() {
                    return Err(anyhow!("tcp interface requires [interface].hostname"));
                }
            }
        }
        if self.bbs.name.trim().is_empty() {
            return Err(anyhow!("[bbs].name must not be empty"));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bbs: BbsConfig {
                name: "Meshboard BBS".to_string(),
                location: "Mesh Network".to_string(),
                description: "A store-and-forward BBS for mesh radio networks"
                    .to_string(),
            },
            interface: InterfaceConfig {
                interface_type: InterfaceType::Serial,
                port: "/dev/ttyUSB0".to_string(),
                baud_rate: 115200,
                hostname: String::new(),
                tcp_port: 4403,
                mqtt_topic: default_mqtt_topic(),
                min_send_gap_ms: default_min_send_gap_ms(),
                require_device_at_startup: false,
            },
            sync: SyncConfig::default(),
            security: SecurityConfig::default(),
            menu: MenuConfig::default(),
            storage: StorageConfig::default(),
            js8call: None,
            logging: LoggingConfig::default(),
        }
    }
}
