//! The [`DeviceSession`] trait: the bridge's only view of a device.
//!
//! A session reads full device state and writes data points.  Whether a
//! session can write several points in one call is fixed when it is built
//! and advertised through [`DeviceSession::write_capability`], so callers
//! pick a write strategy without probing.

use async_trait::async_trait;
use serde_json::Value;
use tuyabridge_types::{BridgeError, DeviceState, DpIndex, DpsMap, DpsValue};

/// Write strategies a session supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteCapability {
    /// `set_dps_multiple` writes every entry in one protocol call.
    Bulk,
    /// Only `set_value` is available; entries must be written one by one.
    SingleOnly,
}

/// A long-lived protocol session bound to one configured device.
///
/// Implementations serialize their own network calls, so a poll read and a
/// command write issued concurrently never share a connection.
#[async_trait]
pub trait DeviceSession: Send + Sync {
    /// Native device identifier, e.g. `"bf3a0c5e1d2f"`.
    fn device_id(&self) -> &str;

    fn write_capability(&self) -> WriteCapability;

    /// Read the full device state.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::DeviceIo`] or [`BridgeError::Protocol`] when
    /// the device cannot be reached or answers with garbage.
    async fn status(&self) -> Result<DeviceState, BridgeError>;

    /// Write one data point and wait for the device reply.
    async fn set_value(&self, dp: DpIndex, value: &DpsValue) -> Result<Option<Value>, BridgeError>;

    /// Write every entry of `dps` in one call.
    ///
    /// Sessions with [`WriteCapability::SingleOnly`] keep this default,
    /// which refuses the call.
    async fn set_dps_multiple(&self, dps: &DpsMap) -> Result<Option<Value>, BridgeError> {
        let _ = dps;
        Err(BridgeError::Unsupported(format!(
            "device {} does not support multi data-point writes",
            self.device_id()
        )))
    }
}
