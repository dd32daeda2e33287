//! Bridge configuration.
//!
//! Read from `$IPIXEL_CONFIG` or `./ipixel.toml` when present, then
//! overridden field by field from the environment.  A file is optional; a
//! deployment driven purely by environment variables works the same.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ipixel_bridge::{DEFAULT_PUBLISH_INTERVAL, MqttSettings, TopicSet};
use ipixel_types::BridgeError;
use serde::{Deserialize, Serialize};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "IPIXEL_CONFIG";
/// Config file looked up in the working directory otherwise.
pub const DEFAULT_CONFIG_FILE: &str = "ipixel.toml";

#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_mqtt_host")]
    pub mqtt_host: String,

    #[serde(default = "default_mqtt_port")]
    pub mqtt_port: u16,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mqtt_user: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mqtt_pass: String,

    /// Connect to the broker over TLS.
    #[serde(default)]
    pub ssl_enabled: bool,

    /// Bluetooth MAC of the display, e.g. `65:54:87:4A:3E:63`.
    #[serde(default)]
    pub device_mac: String,

    /// Shell fragment that starts the controller process.
    #[serde(default = "default_launcher")]
    pub launcher: String,

    /// Local port the controller's WebSocket server listens on.
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,

    #[serde(default = "default_publish_interval_secs")]
    pub publish_interval_secs: u64,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("mqtt_host", &self.mqtt_host)
            .field("mqtt_port", &self.mqtt_port)
            .field("mqtt_user", &self.mqtt_user)
            .field(
                "mqtt_pass",
                if self.mqtt_pass.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("ssl_enabled", &self.ssl_enabled)
            .field("device_mac", &self.device_mac)
            .field("launcher", &self.launcher)
            .field("ws_port", &self.ws_port)
            .field("publish_interval_secs", &self.publish_interval_secs)
            .finish()
    }
}

fn default_mqtt_host() -> String {
    "homeassistant".to_string()
}
fn default_mqtt_port() -> u16 {
    8883
}
fn default_launcher() -> String {
    "python ./ipixelcli.py".to_string()
}
fn default_ws_port() -> u16 {
    8765
}
fn default_publish_interval_secs() -> u64 {
    DEFAULT_PUBLISH_INTERVAL.as_secs()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mqtt_host: default_mqtt_host(),
            mqtt_port: default_mqtt_port(),
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            ssl_enabled: false,
            device_mac: String::new(),
            launcher: default_launcher(),
            ws_port: default_ws_port(),
            publish_interval_secs: default_publish_interval_secs(),
        }
    }
}

impl Config {
    /// Reject configurations the bridge cannot run with.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.device_mac.trim().is_empty() {
            return Err(BridgeError::Config("DEVICE_MAC is required".to_string()));
        }
        if self.launcher.trim().is_empty() {
            return Err(BridgeError::Config("launcher command is empty".to_string()));
        }
        if self.publish_interval_secs == 0 {
            return Err(BridgeError::Config("publish interval must be at least 1s".to_string()));
        }
        Ok(())
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs(self.publish_interval_secs)
    }

    pub fn mqtt_settings(&self, topics: &TopicSet) -> MqttSettings {
        let mut settings = MqttSettings::for_device(topics, self.mqtt_host.clone(), self.mqtt_port);
        settings.tls = self.ssl_enabled;
        if !self.mqtt_user.is_empty() {
            settings.username = Some(self.mqtt_user.clone());
            settings.password = Some(self.mqtt_pass.clone());
        }
        settings
    }
}

/// Path of the config file to read.
pub fn config_path() -> PathBuf {
    std::env::var(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Load the file (if any), apply environment overrides and validate.
pub fn load() -> Result<Config, BridgeError> {
    let mut cfg = load_from(&config_path())?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

/// Parse a config file.  Returns `None` if it does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, BridgeError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| BridgeError::Config(format!("failed to read {}: {e}", path.display())))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| BridgeError::Config(format!("failed to parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Apply environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `MQTT_HOST` | `mqtt_host` |
/// | `MQTT_PORT` | `mqtt_port` |
/// | `MQTT_USER` | `mqtt_user` |
/// | `MQTT_PASS` | `mqtt_pass` |
/// | `SSL_ENABLED` | `ssl_enabled` (`true`, any case) |
/// | `DEVICE_MAC` | `device_mac` |
/// | `IPIXELCLI` | `launcher` |
/// | `WS_PORT` | `ws_port` |
/// | `PUBLISH_INTERVAL_SECS` | `publish_interval_secs` |
///
/// Numbers that do not parse leave the field unchanged.
pub fn apply_env_overrides(cfg: &mut Config) {
    let var = |name: &str| std::env::var(name).ok();

    if let Some(v) = var("MQTT_HOST") {
        cfg.mqtt_host = v;
    }
    if let Some(v) = var("MQTT_PORT")
        && let Ok(port) = v.parse::<u16>() {
            cfg.mqtt_port = port;
        }
    if let Some(v) = var("MQTT_USER") {
        cfg.mqtt_user = v;
    }
    if let Some(v) = var("MQTT_PASS") {
        cfg.mqtt_pass = v;
    }
    if let Some(v) = var("SSL_ENABLED") {
        cfg.ssl_enabled = v.trim().eq_ignore_ascii_case("true");
    }
    if let Some(v) = var("DEVICE_MAC") {
        cfg.device_mac = v;
    }
    if let Some(v) = var("IPIXELCLI") {
        cfg.launcher = v;
    }
    if let Some(v) = var("WS_PORT")
        && let Ok(port) = v.parse::<u16>() {
            cfg.ws_port = port;
        }
    if let Some(v) = var("PUBLISH_INTERVAL_SECS")
        && let Ok(secs) = v.parse::<u64>() {
            cfg.publish_interval_secs = secs;
        }
}
