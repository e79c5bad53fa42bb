//! # Bridge Configuration
//!
//! Configuration is read from a single TOML file. Every field has a default,
//! so a minimal file only names the instance and the MQTT broker.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! instance_name = "5f1c9a0e2b7d4c11"
//!
//! [printer]
//! api_url = "http://127.0.0.1"
//!
//! [mqtt]
//! address = "broker.example.net"
//! port = 1883
//! username = "5f1c9a0e2b7d4c11"
//! password = "token"
//!
//! [sync]
//! heartbeat_threshold = 100
//! ```
//!
//! The `C3P_MQTT_PASSWORD` environment variable takes precedence over
//! `mqtt.password` when it is set and non-empty.

// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration struct for the bridge.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BridgeConfig {
    /// Token scoping the request/response topics to this device.
    #[serde(default)]
    pub instance_name: String,
    #[serde(default)]
    pub printer: PrinterApiConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
}

/// Local print-control API (HTTP and websocket).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrinterApiConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub websocket_url: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for PrinterApiConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            websocket_url: None,
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl PrinterApiConfig {
    /// Websocket endpoint of the control plane. Derived from `api_url` unless set explicitly.
    pub fn websocket_url(&self) -> String {
        if let Some(url) = &self.websocket_url {
            return url.clone();
        }
        let host = self
            .api_url
            .trim_start_matches("http://")
            .trim_start_matches("https://")
            .trim_end_matches('/');
        format!("ws://{}/websocket", host)
    }
}

/// Remote broker connection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_address")]
    pub address: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            address: default_mqtt_address(),
            port: default_mqtt_port(),
            client_id: None,
            username: None,
            password: None,
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

/// Timing of the status synchronizer.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    #[serde(default = "default_status_timeout_ms")]
    pub status_timeout_ms: u64,
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_heartbeat_threshold")]
    pub heartbeat_threshold: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            status_timeout_ms: default_status_timeout_ms(),
            check_interval_ms: default_check_interval_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            heartbeat_threshold: default_heartbeat_threshold(),
        }
    }
}

impl SyncConfig {
    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Download and progress reporting parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransferConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    #[serde(default = "default_progress_step")]
    pub progress_step: u8,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            progress_interval_ms: default_progress_interval_ms(),
            progress_step: default_progress_step(),
        }
    }
}

impl TransferConfig {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instance_name.trim().is_empty() {
            return Err(ConfigError::Invalid("instance_name cannot be empty".to_string()));
        }
        if self.transfer.chunk_size == 0 {
            return Err(ConfigError::Invalid("transfer.chunk_size must be > 0".to_string()));
        }
        if self.sync.check_interval_ms == 0 {
            return Err(ConfigError::Invalid("sync.check_interval_ms must be > 0".to_string()));
        }
        if self.sync.heartbeat_threshold == 0 {
            return Err(ConfigError::Invalid("sync.heartbeat_threshold must be > 0".to_string()));
        }
        Ok(())
    }
}

fn default_api_url() -> String { "http://127.0.0.1".to_string() }
fn default_request_timeout_secs() -> u64 { 30 }
fn default_connect_timeout_secs() -> u64 { 10 }
fn default_mqtt_address() -> String { "127.0.0.1".to_string() }
fn default_mqtt_port() -> u16 { 1883 }
fn default_keep_alive_secs() -> u64 { 60 }
fn default_status_timeout_ms() -> u64 { 5000 }
fn default_check_interval_ms() -> u64 { 2000 }
fn default_reconnect_delay_ms() -> u64 { 5000 }
fn default_heartbeat_threshold() -> u32 { 100 }
fn default_chunk_size() -> usize { 8192 }
fn default_progress_interval_ms() -> u64 { 3000 }
fn default_progress_step() -> u8 { 5 }

pub fn load_config(path: impl AsRef<Path>) -> Result<BridgeConfig, ConfigError> {
    let path = path.as_ref();
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path.display(), e);
            return Err(ConfigError::Io(e));
        }
    };
    let mut config: BridgeConfig = match toml::from_str(&contents) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to parse config TOML: {}", e);
            return Err(ConfigError::Toml(e));
        }
    };

    if let Ok(password) = std::env::var("C3P_MQTT_PASSWORD")
        && !password.is_empty()
    {
        config.mqtt.password = Some(password);
    }

    config.validate()?;
    Ok(config)
}
