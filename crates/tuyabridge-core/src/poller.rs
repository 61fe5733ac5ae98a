//! Per-device status polling.
//!
//! Each [`PollWorker`] owns one device: it reads the full state, serializes
//! it canonically (data points in ascending index order) and publishes it
//! retained on `{base}/{identifier}/status` when the payload changed or the
//! force-refresh interval elapsed.  A failed read or publish only skips the
//! cycle.  Workers never share state, so one hung device cannot delay the
//! others.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};
use tuyabridge_device::DeviceSession;

use crate::bus::BusPublisher;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_FORCE_REFRESH: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTiming {
    /// Target period between the starts of two cycles.
    pub poll_interval: Duration,
    /// Maximum age of the last publish before an unchanged state is
    /// republished.
    pub force_refresh: Duration,
}

impl Default for PollTiming {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            force_refresh: DEFAULT_FORCE_REFRESH,
        }
    }
}

/// Last payload successfully published for a device.
#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    payload: String,
    published_at: Option<Instant>,
}

impl Snapshot {
    pub fn should_publish(&self, payload: &str, now: Instant, force_refresh: Duration) -> bool {
        match self.published_at {
            None => true,
            Some(at) => payload != self.payload || now.saturating_duration_since(at) >= force_refresh,
        }
    }

    pub fn record(&mut self, payload: String, now: Instant) {
        self.payload = payload;
        self.published_at = Some(now);
    }

    pub fn payload(&self) -> Option<&str> {
        self.published_at.map(|_| self.payload.as_str())
    }
}

/// What one poll cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Published,
    Unchanged,
    ReadFailed,
    PublishFailed,
}

pub struct PollWorker {
    identifier: String,
    topic: String,
    session: Arc<dyn DeviceSession>,
    bus: Arc<dyn BusPublisher>,
    timing: PollTiming,
    snapshot: Snapshot,
}

impl PollWorker {
    pub fn new(
        identifier: impl Into<String>,
        topic: impl Into<String>,
        session: Arc<dyn DeviceSession>,
        bus: Arc<dyn BusPublisher>,
        timing: PollTiming,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            topic: topic.into(),
            session,
            bus,
            timing,
            snapshot: Snapshot::default(),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Run one read → compare → publish cycle.
    pub async fn poll_once(&mut self) -> CycleOutcome {
        let state = match self.session.status().await {
            Ok(state) => state,
            Err(e) => {
                warn!(identifier = %self.identifier, "{} offline? {e}", self.identifier);
                return CycleOutcome::ReadFailed;
            }
        };

        let payload = match serde_json::to_string(&state.dps) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(identifier = %self.identifier, "cannot serialize state: {e}");
                return CycleOutcome::ReadFailed;
            }
        };

        let now = Instant::now();
        if !self.snapshot.should_publish(&payload, now, self.timing.force_refresh) {
            return CycleOutcome::Unchanged;
        }

        match self.bus.publish(&self.topic, payload.clone(), true).await {
            Ok(()) => {
                debug!("[PUB] {} {payload}", self.topic);
                self.snapshot.record(payload, now);
                CycleOutcome::Published
            }
            Err(e) => {
                warn!(identifier = %self.identifier, topic = %self.topic, "publish failed: {e}");
                CycleOutcome::PublishFailed
            }
        }
    }

    /// Poll forever, starting a cycle every `poll_interval` unless the
    /// previous one ran longer.
    pub async fn run(mut self) {
        loop {
            let started = Instant::now();
            self.poll_once().await;
            let elapsed = started.elapsed();
            tokio::time::sleep(self.timing.poll_interval.saturating_sub(elapsed)).await;
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
