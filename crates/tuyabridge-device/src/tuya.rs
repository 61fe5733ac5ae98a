//! [`TuyaDevice`] – network session for a Tuya LAN device.
//!
//! Each call opens a fresh TCP connection to the device, sends one request
//! frame and reads the reply.  Calls on the same session are serialized by
//! an async mutex because devices accept a single client connection at a
//! time.  Every attempt is bounded by [`SocketTuning::timeout`] and failed
//! attempts are retried [`SocketTuning::retry_limit`] times after a fixed
//! delay; there is no unbounded retry.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use tuyabridge_types::{
    BridgeError, DeviceConfig, DeviceState, DpIndex, DpsMap, DpsValue, ProtocolVersion,
};

use crate::protocol::cipher::EcbCipher;
use crate::protocol::frame::{self, Command};
use crate::protocol::message;
use crate::protocol::ProtocolError;
use crate::session::{DeviceSession, WriteCapability};

/// Socket timeout / retry parameters.
#[derive(Debug, Clone, Copy)]
pub struct SocketTuning {
    pub timeout: Duration,
    pub retry_limit: u32,
    pub retry_delay: Duration,
}

impl Default for SocketTuning {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            retry_limit: 1,
            retry_delay: Duration::from_millis(300),
        }
    }
}

pub struct TuyaDevice {
    id: String,
    ip: String,
    port: u16,
    version: ProtocolVersion,
    cipher: EcbCipher,
    capability: WriteCapability,
    tuning: SocketTuning,
    seqno: AtomicU32,
    io: Mutex<()>,
}

impl TuyaDevice {
    /// Build a session from a device record.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] for an unsupported protocol version or
    /// a local key that is not 16 bytes long.
    pub fn from_config(cfg: &DeviceConfig, tuning: SocketTuning) -> Result<Self, BridgeError> {
        let version = ProtocolVersion::parse(&cfg.version)?;
        let cipher = EcbCipher::new(cfg.key.as_bytes())
            .map_err(|e| BridgeError::Config(format!("device {}: {e}", cfg.id)))?;
        Ok(Self {
            id: cfg.id.clone(),
            ip: cfg.ip.clone(),
            port: cfg.port,
            version,
            cipher,
            capability: if cfg.bulk_write {
                WriteCapability::Bulk
            } else {
                WriteCapability::SingleOnly
            },
            tuning,
            seqno: AtomicU32::new(1),
            io: Mutex::new(()),
        })
    }

    fn query_body(&self) -> Value {
        json!({
            "gwId": self.id,
            "devId": self.id,
            "uid": self.id,
            "t": unix_time(),
        })
    }

    fn control_body(&self, dps: Value) -> Value {
        json!({
            "devId": self.id,
            "uid": self.id,
            "t": unix_time(),
            "dps": dps,
        })
    }

    /// Send `body` as `command` and return the decoded reply, retrying
    /// within the configured bounds.
    async fn request(
        &self,
        command: Command,
        body: &Value,
        expect_dps: bool,
    ) -> Result<Option<Value>, BridgeError> {
        let encoded = serde_json::to_vec(body).map_err(|e| self.protocol_error(e.into()))?;
        let _guard = self.io.lock().await;

        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(
                self.tuning.timeout,
                self.round_trip(command, &encoded, expect_dps),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ProtocolError::Timeout(self.tuning.timeout)),
            };

            match result {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_refusal() => return Err(self.protocol_error(e)),
                Err(e) if attempt < self.tuning.retry_limit => {
                    attempt += 1;
                    warn!(device = %self.id, attempt, error = %e, "device request failed; retrying");
                    tokio::time::sleep(self.tuning.retry_delay).await;
                }
                Err(e) if e.is_transport() => {
                    return Err(BridgeError::DeviceIo {
                        device: self.id.clone(),
                        details: e.to_string(),
                    });
                }
                Err(e) => return Err(self.protocol_error(e)),
            }
        }
    }

    async fn round_trip(
        &self,
        command: Command,
        body: &[u8],
        expect_dps: bool,
    ) -> Result<Option<Value>, ProtocolError> {
        let mut stream = TcpStream::connect((self.ip.as_str(), self.port)).await?;
        stream.set_nodelay(true)?;

        let payload = message::seal(self.version, &self.cipher, command, body);
        let seqno = self.seqno.fetch_add(1, Ordering::Relaxed);
        stream
            .write_all(&frame::encode(seqno, command, &payload))
            .await?;
        debug!(device = %self.id, seqno, command = ?command, "request sent");

        // Devices may answer a query with an empty ack before the status
        // frame; keep reading until the reply carries data points.
        loop {
            let reply = frame::read_frame(&mut stream).await?;
            if let Some(code) = reply.retcode
                && code != 0
            {
                return Err(ProtocolError::ReturnCode(code));
            }
            let value = message::open(self.version, &self.cipher, &reply.payload)?;
            debug!(device = %self.id, seqno = reply.seqno, command = reply.command, "reply received");
            if !expect_dps || value.as_ref().is_some_and(|v| v.get("dps").is_some()) {
                return Ok(value);
            }
        }
    }

    fn protocol_error(&self, e: ProtocolError) -> BridgeError {
        BridgeError::Protocol {
            device: self.id.clone(),
            details: e.to_string(),
        }
    }

    async fn control(&self, dps: &DpsMap) -> Result<Option<Value>, BridgeError> {
        let dps = serde_json::to_value(dps).map_err(|e| self.protocol_error(e.into()))?;
        self.request(Command::Control, &self.control_body(dps), false)
            .await
    }
}

#[async_trait]
impl DeviceSession for TuyaDevice {
    fn device_id(&self) -> &str {
        &self.id
    }

    fn write_capability(&self) -> WriteCapability {
        self.capability
    }

    async fn status(&self) -> Result<DeviceState, BridgeError> {
        let reply = self
            .request(Command::DpQuery, &self.query_body(), true)
            .await?;
        let dps = reply
            .and_then(|mut v| v.get_mut("dps").map(Value::take))
            .ok_or_else(|| BridgeError::Protocol {
                device: self.id.clone(),
                details: "status reply carries no dps".to_string(),
            })?;
        let dps: DpsMap =
            serde_json::from_value(dps).map_err(|e| self.protocol_error(e.into()))?;
        Ok(DeviceState { dps })
    }

    async fn set_value(&self, dp: DpIndex, value: &DpsValue) -> Result<Option<Value>, BridgeError> {
        let mut dps = DpsMap::new();
        dps.insert(dp, value.clone());
        self.control(&dps).await
    }

    async fn set_dps_multiple(&self, dps: &DpsMap) -> Result<Option<Value>, BridgeError> {
        if self.capability == WriteCapability::SingleOnly {
            return Err(BridgeError::Unsupported(format!(
                "device {} does not support multi data-point writes",
                self.id
            )));
        }
        self.control(dps).await
    }
}

fn unix_time() -> String {
    chrono::Utc::now().timestamp().to_string()
}
