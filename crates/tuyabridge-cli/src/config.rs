//! Bridge settings (`tuyabridge.toml`) and the devices file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tuyabridge_core::mqtt::{DEFAULT_KEEP_ALIVE_SECS, DEFAULT_MQTT_PORT};
use tuyabridge_core::topics::DEFAULT_BASE_TOPIC;
use tuyabridge_core::{MqttSettings, PollTiming, TopicScheme};
use tuyabridge_types::{BridgeError, DeviceConfig};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

pub const DEFAULT_CONFIG_FILE: &str = "tuyabridge.toml";

/// Persisted bridge settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// JSON array of device records.
    #[serde(default = "default_devices_file")]
    pub devices_file: PathBuf,

    #[serde(default)]
    pub mqtt: MqttConfig,

    #[serde(default)]
    pub polling: PollingConfig,
}

#[derive(Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Prefix of every bridge topic; may contain `/`.
    #[serde(default = "default_base_topic")]
    pub base_topic: String,

    /// Empty generates `tuyabridge-<uuid>`.
    #[serde(default)]
    pub client_id: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: Password,

    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    #[serde(default)]
    pub qos: u8,
}

/// Broker password, wiped on drop.
#[derive(Clone, Default, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Password(String);

impl Password {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for MqttConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("base_topic", &self.base_topic)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field(
                "password",
                if self.password.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("keep_alive_secs", &self.keep_alive_secs)
            .field("qos", &self.qos)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_force_refresh_secs")]
    pub force_refresh_secs: u64,
}

fn default_devices_file() -> PathBuf {
    PathBuf::from("devices.json")
}
fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    DEFAULT_MQTT_PORT
}
fn default_base_topic() -> String {
    DEFAULT_BASE_TOPIC.to_string()
}
fn default_keep_alive_secs() -> u64 {
    DEFAULT_KEEP_ALIVE_SECS
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_force_refresh_secs() -> u64 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            devices_file: default_devices_file(),
            mqtt: MqttConfig::default(),
            polling: PollingConfig::default(),
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_topic: default_base_topic(),
            client_id: String::new(),
            username: String::new(),
            password: Password::default(),
            keep_alive_secs: default_keep_alive_secs(),
            qos: 0,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            force_refresh_secs: default_force_refresh_secs(),
        }
    }
}

impl Config {
    /// Reject settings the bridge cannot run with.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.mqtt.qos > 2 {
            return Err(BridgeError::Config(format!(
                "mqtt.qos must be 0, 1 or 2 (got {})",
                self.mqtt.qos
            )));
        }
        if self.polling.poll_interval_ms == 0 {
            return Err(BridgeError::Config("polling.poll_interval_ms must be > 0".to_string()));
        }
        let base = self.mqtt.base_topic.trim_end_matches('/');
        if base.is_empty() {
            return Err(BridgeError::Config("mqtt.base_topic must not be empty".to_string()));
        }
        if base.contains(['+', '#']) {
            return Err(BridgeError::Config(format!(
                "mqtt.base_topic '{base}' must not contain MQTT wildcards"
            )));
        }
        Ok(())
    }

    pub fn topic_scheme(&self) -> TopicScheme {
        TopicScheme::new(self.mqtt.base_topic.clone())
    }

    pub fn poll_timing(&self) -> PollTiming {
        PollTiming {
            poll_interval: Duration::from_millis(self.polling.poll_interval_ms),
            force_refresh: Duration::from_secs(self.polling.force_refresh_secs),
        }
    }

    pub fn mqtt_settings(&self) -> MqttSettings {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        MqttSettings {
            host: self.mqtt.host.clone(),
            port: self.mqtt.port,
            client_id: non_empty(&self.mqtt.client_id),
            username: non_empty(&self.mqtt.username),
            password: (!self.mqtt.password.is_empty())
                .then(|| Zeroizing::new(self.mqtt.password.0.clone())),
            keep_alive: Duration::from_secs(self.mqtt.keep_alive_secs),
            qos: self.mqtt.qos,
        }
    }
}

/// Load settings from `path`.  Returns `None` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<Config>, BridgeError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| BridgeError::Config(format!("failed to read {}: {e}", path.display())))?;
    let cfg: Config = toml::from_str(&raw)
        .map_err(|e| BridgeError::Config(format!("failed to parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Load settings (defaults when the file is missing), apply environment
/// overrides and validate.
pub fn resolve(path: &Path) -> Result<Config, BridgeError> {
    let mut cfg = load_from(path)?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

/// Apply `TUYABRIDGE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `TUYABRIDGE_DEVICES_FILE` | `devices_file` |
/// | `TUYABRIDGE_MQTT_HOST` | `mqtt.host` |
/// | `TUYABRIDGE_MQTT_PORT` | `mqtt.port` |
/// | `TUYABRIDGE_MQTT_USERNAME` | `mqtt.username` |
/// | `TUYABRIDGE_MQTT_PASSWORD` | `mqtt.password` |
/// | `TUYABRIDGE_BASE_TOPIC` | `mqtt.base_topic` |
/// | `TUYABRIDGE_POLL_INTERVAL_MS` | `polling.poll_interval_ms` |
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides_from(cfg, |name| std::env::var(name).ok());
}

pub(crate) fn apply_overrides_from(cfg: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("TUYABRIDGE_DEVICES_FILE") {
        cfg.devices_file = PathBuf::from(v);
    }
    if let Some(v) = var("TUYABRIDGE_MQTT_HOST") {
        cfg.mqtt.host = v;
    }
    if let Some(v) = var("TUYABRIDGE_MQTT_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.mqtt.port = port;
    }
    if let Some(v) = var("TUYABRIDGE_MQTT_USERNAME") {
        cfg.mqtt.username = v;
    }
    if let Some(v) = var("TUYABRIDGE_MQTT_PASSWORD") {
        cfg.mqtt.password = Password(v);
    }
    if let Some(v) = var("TUYABRIDGE_BASE_TOPIC") {
        cfg.mqtt.base_topic = v;
    }
    if let Some(v) = var("TUYABRIDGE_POLL_INTERVAL_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.polling.poll_interval_ms = ms;
    }
}

/// Read the devices file: a JSON array of device records.
pub fn load_devices(path: &Path) -> Result<Vec<DeviceConfig>, BridgeError> {
    let raw = fs::read_to_string(path).map_err(|e| {
        BridgeError::Config(format!("failed to read devices file {}: {e}", path.display()))
    })?;
    serde_json::from_str(&raw).map_err(|e| {
        BridgeError::Config(format!("failed to parse devices file {}: {e}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn write(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).expect("write");
        path
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let result = load_from(&dir.path().join(DEFAULT_CONFIG_FILE)).expect("no error");
        assert!(result.is_none());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = write(
            &dir,
            DEFAULT_CONFIG_FILE,
            "[mqtt]\nhost = \"broker.lan\"\nbase_topic = \"home/tuya\"\n",
        );
        let cfg = load_from(&path).expect("load ok").expect("some");
        assert_eq!(cfg.mqtt.host, "broker.lan");
        assert_eq!(cfg.mqtt.port, 1883);
        assert_eq!(cfg.mqtt.base_topic, "home/tuya");
        assert_eq!(cfg.polling.poll_interval_ms, 1000);
        assert_eq!(cfg.polling.force_refresh_secs, 60);
        assert_eq!(cfg.devices_file, PathBuf::from("devices.json"));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = write(&dir, DEFAULT_CONFIG_FILE, "[mqtt\nhost = ");
        assert!(matches!(load_from(&path), Err(BridgeError::Config(_))));
    }

    #[test]
    fn debug_redacts_password() {
        let mut cfg = Config::default();
        assert!(format!("{cfg:?}").contains("<not set>"));
        cfg.mqtt.password = Password("s3cret-pass".to_string());
        let debug_str = format!("{cfg:?}");
        assert!(!debug_str.contains("s3cret-pass"));
        assert!(debug_str.contains("<redacted>"));
    }

    #[test]
    fn validation_rejects_bad_settings() {
        let mut cfg = Config::default();
        assert!(cfg.validate().is_ok());

        cfg.mqtt.qos = 3;
        assert!(cfg.validate().is_err());
        cfg.mqtt.qos = 1;

        cfg.polling.poll_interval_ms = 0;
        assert!(cfg.validate().is_err());
        cfg.polling.poll_interval_ms = 500;

        cfg.mqtt.base_topic = "/".to_string();
        assert!(cfg.validate().is_err());
        cfg.mqtt.base_topic = "tuya/#".to_string();
        assert!(cfg.validate().is_err());
        cfg.mqtt.base_topic = "home/tuya".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn overrides_replace_fields() {
        let vars: HashMap<&str, &str> = [
            ("TUYABRIDGE_DEVICES_FILE", "/etc/tuyabridge/devices.json"),
            ("TUYABRIDGE_MQTT_HOST", "mqtt.example"),
            ("TUYABRIDGE_MQTT_PORT", "8883"),
            ("TUYABRIDGE_MQTT_USERNAME", "bridge"),
            ("TUYABRIDGE_MQTT_PASSWORD", "pw"),
            ("TUYABRIDGE_BASE_TOPIC", "lan/tuya"),
            ("TUYABRIDGE_POLL_INTERVAL_MS", "250"),
        ]
        .into_iter()
        .collect();

        let mut cfg = Config::default();
        apply_overrides_from(&mut cfg, |name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(cfg.devices_file, PathBuf::from("/etc/tuyabridge/devices.json"));
        assert_eq!(cfg.mqtt.host, "mqtt.example");
        assert_eq!(cfg.mqtt.port, 8883);
        assert_eq!(cfg.mqtt.base_topic, "lan/tuya");
        assert_eq!(cfg.polling.poll_interval_ms, 250);

        let settings = cfg.mqtt_settings();
        assert_eq!(settings.username.as_deref(), Some("bridge"));
        assert_eq!(settings.password.as_deref().map(String::as_str), Some("pw"));
    }

    #[test]
    fn overrides_ignore_invalid_numbers() {
        let mut cfg = Config::default();
        apply_overrides_from(&mut cfg, |name| match name {
            "TUYABRIDGE_MQTT_PORT" => Some("not-a-port".to_string()),
            "TUYABRIDGE_POLL_INTERVAL_MS" => Some("-5".to_string()),
            _ => None,
        });
        assert_eq!(cfg.mqtt.port, 1883);
        assert_eq!(cfg.polling.poll_interval_ms, 1000);
    }

    #[test]
    fn empty_strings_become_unset_settings() {
        let settings = Config::default().mqtt_settings();
        assert_eq!(settings.client_id, None);
        assert_eq!(settings.username, None);
        assert!(settings.password.is_none());
        assert_eq!(settings.keep_alive, Duration::from_secs(60));
    }

    #[test]
    fn devices_file_parses_records() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = write(
            &dir,
            "devices.json",
            r#"[
                {"id": "bf01", "ip": "192.168.1.20", "key": "0123456789abcdef", "name": "Kitchen Lamp"},
                {"id": "bf02", "address": "192.168.1.21", "local_key": "fedcba9876543210",
                 "name": "Porch", "version": "3.2", "bulk_write": false}
            ]"#,
        );
        let devices = load_devices(&path).expect("devices");
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].version, "3.3");
        assert!(devices[0].bulk_write);
        assert_eq!(devices[1].ip, "192.168.1.21");
        assert_eq!(devices[1].version, "3.2");
        assert!(!devices[1].bulk_write);
    }

    #[test]
    fn devices_file_missing_field_is_fatal() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = write(&dir, "devices.json", r#"[{"id": "bf01", "name": "Lamp"}]"#);
        assert!(matches!(load_devices(&path), Err(BridgeError::Config(_))));
        assert!(load_devices(&dir.path().join("absent.json")).is_err());
    }
}
