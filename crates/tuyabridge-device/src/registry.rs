//! [`SessionRegistry`] – one device session per accepted device.
//!
//! Sessions are registered on a [`RegistryBuilder`] during startup.
//! [`RegistryBuilder::build`] freezes the set: the resulting registry has no
//! mutating methods, so it can be shared behind an `Arc` by every poll worker
//! and the command dispatcher without locking.

use std::collections::HashMap;
use std::sync::Arc;

use tuyabridge_types::BridgeError;

use crate::session::DeviceSession;

/// Collects sessions before the registry is frozen.
#[derive(Default)]
pub struct RegistryBuilder {
    sessions: HashMap<String, Arc<dyn DeviceSession>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session under its native device id.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::DuplicateDevice`] if a session with the same id
    /// is already registered; the existing session is kept.
    pub fn register(&mut self, session: Arc<dyn DeviceSession>) -> Result<(), BridgeError> {
        let id = session.device_id().to_string();
        if self.sessions.contains_key(&id) {
            return Err(BridgeError::DuplicateDevice(id));
        }
        self.sessions.insert(id, session);
        Ok(())
    }

    pub fn build(self) -> SessionRegistry {
        SessionRegistry {
            sessions: self.sessions,
        }
    }
}

/// Read-only map from native device id to its session.
pub struct SessionRegistry {
    sessions: HashMap<String, Arc<dyn DeviceSession>>,
}

impl SessionRegistry {
    /// Look up the session for `device_id`.
    pub fn session_for(&self, device_id: &str) -> Option<Arc<dyn DeviceSession>> {
        self.sessions.get(device_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn device_ids(&self) -> impl Iterator<Item = &str> {
        self.sessions.keys().map(String::as_str)
    }
}
