//! Message-bus seam between the bridge and the broker.
//!
//! [`BusPublisher`] is the only thing poll workers need to push status.  The
//! MQTT implementation lives in [`crate::mqtt`]; [`MemoryBus`] is an
//! in-process bus that keeps retained payloads per topic and fans every
//! publish out over a [`tokio::sync::broadcast`] channel, so a harness can
//! both inspect the last retained value and await new traffic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tuyabridge_types::BridgeError;

/// Default channel capacity for [`MemoryBus`] subscribers.
const DEFAULT_CAPACITY: usize = 256;

#[async_trait]
pub trait BusPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<(), BridgeError>;
}

/// A message received on a command topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// One publish observed by [`MemoryBus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

#[derive(Clone, Debug)]
pub struct MemoryBus {
    sender: broadcast::Sender<BusMessage>,
    state: Arc<Mutex<MemoryState>>,
    failing: Arc<AtomicBool>,
}

#[derive(Debug, Default)]
struct MemoryState {
    retained: HashMap<String, String>,
    history: Vec<BusMessage>,
}

impl MemoryBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            state: Arc::new(Mutex::new(MemoryState::default())),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.sender.subscribe()
    }

    /// Last retained payload on `topic`.
    pub fn retained(&self, topic: &str) -> Option<String> {
        self.lock().retained.get(topic).cloned()
    }

    /// Every accepted publish, oldest first.
    pub fn history(&self) -> Vec<BusMessage> {
        self.lock().history.clone()
    }

    /// Publishes on `topic`, oldest first.
    pub fn published_to(&self, topic: &str) -> Vec<String> {
        self.lock()
            .history
            .iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload.clone())
            .collect()
    }

    /// While set, every publish fails with [`BridgeError::Bus`].
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl BusPublisher for MemoryBus {
    async fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<(), BridgeError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BridgeError::Bus(format!("publish to {topic} refused")));
        }
        let message = BusMessage {
            topic: topic.to_string(),
            payload,
            retain,
        };
        {
            let mut state = self.lock();
            if retain {
                state.retained.insert(message.topic.clone(), message.payload.clone());
            }
            state.history.push(message.clone());
        }
        // No subscribers is fine; history still records the publish.
        let _ = self.sender.send(message);
        Ok(())
    }
}
