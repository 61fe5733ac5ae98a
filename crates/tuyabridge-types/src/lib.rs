use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Data-point index on a device ("DPS" key). Always a small positive integer.
pub type DpIndex = u32;

/// In-memory DPS map. `BTreeMap` gives ascending index order, which is both
/// the sequential write order and the canonical serialization order.
pub type DpsMap = BTreeMap<DpIndex, DpsValue>;

/// A single data-point value as carried by the device protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DpsValue {
    Bool(bool),
    Integer(i64),
    /// Integers above `i64::MAX`.
    Unsigned(u64),
    Float(f64),
    Text(String),
}

impl fmt::Display for DpsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DpsValue::Bool(v) => write!(f, "{v}"),
            DpsValue::Integer(v) => write!(f, "{v}"),
            DpsValue::Unsigned(v) => write!(f, "{v}"),
            DpsValue::Float(v) => write!(f, "{v}"),
            DpsValue::Text(v) => write!(f, "{v:?}"),
        }
    }
}

/// Full device state as returned by a status read.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceState {
    pub dps: DpsMap,
}

/// Supported local protocol revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    V3_2,
    V3_3,
}

impl ProtocolVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolVersion::V3_2 => "3.2",
            ProtocolVersion::V3_3 => "3.3",
        }
    }

    /// Parse the configured version tag, e.g. `"3.3"`.
    pub fn parse(tag: &str) -> Result<Self, BridgeError> {
        match tag.trim() {
            "3.2" => Ok(ProtocolVersion::V3_2),
            "3.3" => Ok(ProtocolVersion::V3_3),
            other => Err(BridgeError::Config(format!(
                "unsupported protocol version '{other}'"
            ))),
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device local key. Wiped from memory on drop and never printed.
#[derive(Clone, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct LocalKey(String);

impl LocalKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for LocalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// One record of the devices file.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Native device identifier (`devId`).
    pub id: String,
    /// Network address of the device on the LAN.
    #[serde(alias = "address")]
    pub ip: String,
    #[serde(alias = "local_key")]
    pub key: LocalKey,
    /// Display name; the topic identifier is derived from it.
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// `false` restricts the session to single data-point writes.
    #[serde(default = "default_bulk_write")]
    pub bulk_write: bool,
}

fn default_version() -> String {
    "3.3".to_string()
}
fn default_port() -> u16 {
    6668
}
fn default_bulk_write() -> bool {
    true
}

impl DeviceConfig {
    pub fn new(
        id: impl Into<String>,
        ip: impl Into<String>,
        key: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            ip: ip.into(),
            key: LocalKey::new(key),
            name: name.into(),
            version: default_version(),
            port: default_port(),
            bulk_write: default_bulk_write(),
        }
    }
}

/// Error type shared by every bridge component.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Duplicate identifier '{identifier}' for device {device_id}")]
    DuplicateIdentifier {
        identifier: String,
        device_id: String,
    },

    #[error("Device {device_id} name '{name}' yields an empty identifier")]
    InvalidIdentifier { name: String, device_id: String },

    #[error("Duplicate device id {0}")]
    DuplicateDevice(String),

    #[error("Payload Parse Error: {0}")]
    Parse(String),

    #[error("Unknown route: {0}")]
    UnknownRoute(String),

    #[error("Device I/O Error on {device}: {details}")]
    DeviceIo { device: String, details: String },

    #[error("Protocol Error on {device}: {details}")]
    Protocol { device: String, details: String },

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Bus Error: {0}")]
    Bus(String),
}
