//! In-process simulated device for tests and dry runs without hardware.
//!
//! [`SimDevice`] keeps its data points in memory, applies writes to them,
//! and records every call so tests can assert on exactly what the bridge
//! asked the device to do.  It can be switched offline to exercise the
//! failure paths of the poll workers and the dispatcher.
//!
//! # Example
//!
//! ```rust
//! use tuyabridge_device::{DeviceSession, SimDevice, WriteCapability};
//! use tuyabridge_types::DpsValue;
//!
//! let rt = tokio::runtime::Runtime::new().unwrap();
//! rt.block_on(async {
//!     let device = SimDevice::new("bf01", WriteCapability::Bulk).with_dp(1, DpsValue::Bool(false));
//!     device.set_value(1, &DpsValue::Bool(true)).await.unwrap();
//!     assert_eq!(device.status().await.unwrap().dps[&1], DpsValue::Bool(true));
//! });
//! ```

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};
use tuyabridge_types::{BridgeError, DeviceState, DpIndex, DpsMap, DpsValue};

use crate::session::{DeviceSession, WriteCapability};

/// Calls kept by the log; older entries are dropped first.
pub const CALL_LOG_CAPACITY: usize = 1024;

/// One recorded call against a [`SimDevice`].
#[derive(Debug, Clone, PartialEq)]
pub enum SimCall {
    Status,
    SetValue(DpIndex, DpsValue),
    SetMultiple(DpsMap),
}

/// A simulated device session.  Always succeeds unless taken offline or
/// told to fail writes to specific data points.
pub struct SimDevice {
    id: String,
    capability: WriteCapability,
    dps: Mutex<DpsMap>,
    calls: Mutex<VecDeque<SimCall>>,
    offline: AtomicBool,
    failing_dps: Mutex<HashSet<DpIndex>>,
}

impl SimDevice {
    pub fn new(id: impl Into<String>, capability: WriteCapability) -> Self {
        Self {
            id: id.into(),
            capability,
            dps: Mutex::new(DpsMap::new()),
            calls: Mutex::new(VecDeque::new()),
            offline: AtomicBool::new(false),
            failing_dps: Mutex::new(HashSet::new()),
        }
    }

    /// Seed a data point.
    pub fn with_dp(self, dp: DpIndex, value: DpsValue) -> Self {
        lock(&self.dps).insert(dp, value);
        self
    }

    /// While offline every call fails with [`BridgeError::DeviceIo`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make writes that touch `dp` fail.
    pub fn fail_writes_to(&self, dp: DpIndex) {
        lock(&self.failing_dps).insert(dp);
    }

    /// Change a data point behind the bridge's back, as a wall switch would.
    pub fn set_local(&self, dp: DpIndex, value: DpsValue) {
        lock(&self.dps).insert(dp, value);
    }

    /// The most recent [`CALL_LOG_CAPACITY`] calls, oldest first.
    pub fn calls(&self) -> Vec<SimCall> {
        lock(&self.calls).iter().cloned().collect()
    }

    /// Recorded calls excluding status reads.
    pub fn writes(&self) -> Vec<SimCall> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, SimCall::Status))
            .collect()
    }

    fn record(&self, call: SimCall) {
        let mut calls = lock(&self.calls);
        if calls.len() == CALL_LOG_CAPACITY {
            calls.pop_front();
        }
        calls.push_back(call);
    }

    fn check_online(&self) -> Result<(), BridgeError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(BridgeError::DeviceIo {
                device: self.id.clone(),
                details: "simulated device is offline".to_string(),
            });
        }
        Ok(())
    }

    fn check_writable(&self, dp: DpIndex) -> Result<(), BridgeError> {
        if lock(&self.failing_dps).contains(&dp) {
            return Err(BridgeError::DeviceIo {
                device: self.id.clone(),
                details: format!("simulated write failure on dp {dp}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceSession for SimDevice {
    fn device_id(&self) -> &str {
        &self.id
    }

    fn write_capability(&self) -> WriteCapability {
        self.capability
    }

    async fn status(&self) -> Result<DeviceState, BridgeError> {
        self.record(SimCall::Status);
        self.check_online()?;
        Ok(DeviceState {
            dps: lock(&self.dps).clone(),
        })
    }

    async fn set_value(&self, dp: DpIndex, value: &DpsValue) -> Result<Option<Value>, BridgeError> {
        self.record(SimCall::SetValue(dp, value.clone()));
        self.check_online()?;
        self.check_writable(dp)?;
        lock(&self.dps).insert(dp, value.clone());
        Ok(Some(json!({ "devId": self.id, "dps": { dp.to_string(): value } })))
    }

    async fn set_dps_multiple(&self, dps: &DpsMap) -> Result<Option<Value>, BridgeError> {
        if self.capability == WriteCapability::SingleOnly {
            return Err(BridgeError::Unsupported(format!(
                "device {} does not support multi data-point writes",
                self.id
            )));
        }
        self.record(SimCall::SetMultiple(dps.clone()));
        self.check_online()?;
        for dp in dps.keys() {
            self.check_writable(*dp)?;
        }
        let mut state = lock(&self.dps);
        for (dp, value) in dps {
            state.insert(*dp, value.clone());
        }
        Ok(Some(json!({ "devId": self.id, "dps": dps })))
    }
}

// A poisoned lock only means a test thread panicked mid-call; the data is
// still usable.
fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
