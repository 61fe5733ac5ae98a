//! Bridge runtime: build the identity map and session registry from the
//! device records, connect to the broker, start the dispatcher and one poll
//! worker per device, then wait for shutdown.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tuyabridge_device::{DeviceSession, RegistryBuilder, SessionRegistry};
use tuyabridge_types::{BridgeError, DeviceConfig};

use crate::bus::BusPublisher;
use crate::dispatcher::CommandDispatcher;
use crate::identity::IdentityMap;
use crate::mqtt::{self, BusLoop, MqttPublisher, MqttSettings};
use crate::poller::{PollTiming, PollWorker};
use crate::topics::TopicScheme;

/// Inbound commands buffered between the bus loop and the dispatcher.
const INBOUND_CAPACITY: usize = 64;
/// How long shutdown waits for the DISCONNECT to go out.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

pub struct Bridge {
    topics: TopicScheme,
    identities: Arc<IdentityMap>,
    registry: Arc<SessionRegistry>,
}

impl Bridge {
    /// Accept every device record that yields a unique identifier and a
    /// session.  Rejected records are logged and skipped.
    pub fn build<F>(devices: &[DeviceConfig], topics: TopicScheme, mut open_session: F) -> Self
    where
        F: FnMut(&DeviceConfig) -> Result<Arc<dyn DeviceSession>, BridgeError>,
    {
        let mut identities = IdentityMap::new();
        let mut registry = RegistryBuilder::new();

        for cfg in devices {
            let identifier = match identities.check(cfg) {
                Ok(identifier) => identifier,
                Err(e) => {
                    error!(device_id = %cfg.id, name = %cfg.name, "skipping device: {e}");
                    continue;
                }
            };
            let session = match open_session(cfg) {
                Ok(session) => session,
                Err(e) => {
                    error!(device_id = %cfg.id, %identifier, "skipping device: {e}");
                    continue;
                }
            };
            if let Err(e) = registry.register(session) {
                error!(device_id = %cfg.id, %identifier, "skipping device: {e}");
                continue;
            }
            identities.record(identifier, cfg.id.clone());
        }

        info!("Devices loaded: {}", identities.len());
        Self {
            topics,
            identities: Arc::new(identities),
            registry: Arc::new(registry.build()),
        }
    }

    pub fn topics(&self) -> &TopicScheme {
        &self.topics
    }

    pub fn identities(&self) -> &IdentityMap {
        &self.identities
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn command_topics(&self) -> Vec<String> {
        self.identities
            .identifiers()
            .map(|identifier| self.topics.command_topic(identifier))
            .collect()
    }

    /// `(identifier, status topic, command topic)` per accepted device.
    pub fn topic_table(&self) -> Vec<(String, String, String)> {
        self.identities
            .identifiers()
            .map(|identifier| {
                (
                    identifier.to_string(),
                    self.topics.status_topic(identifier),
                    self.topics.command_topic(identifier),
                )
            })
            .collect()
    }

    pub fn log_topic_table(&self) {
        for (identifier, status, command) in self.topic_table() {
            info!(%identifier, "[PUB] {status}");
            info!(%identifier, "[SUB] {command}");
        }
    }

    pub fn dispatcher(&self) -> CommandDispatcher {
        CommandDispatcher::new(self.topics.clone(), self.identities.clone(), self.registry.clone())
    }

    pub fn poll_workers(&self, bus: Arc<dyn BusPublisher>, timing: PollTiming) -> Vec<PollWorker> {
        self.identities
            .identifiers()
            .filter_map(|identifier| {
                let device_id = self.identities.device_for(identifier)?;
                let session = self.registry.session_for(device_id)?;
                Some(PollWorker::new(
                    identifier,
                    self.topics.status_topic(identifier),
                    session,
                    bus.clone(),
                    timing,
                ))
            })
            .collect()
    }

    /// Connect, serve until `shutdown` resolves, then disconnect.
    ///
    /// # Errors
    ///
    /// Fails only when the broker cannot be reached or refuses the first
    /// connection.  Later connection losses are retried.
    pub async fn run<S>(self, settings: &MqttSettings, timing: PollTiming, shutdown: S) -> Result<(), BridgeError>
    where
        S: Future<Output = ()>,
    {
        let qos = settings.qos_level()?;
        let (client, eventloop) = mqtt::connect(settings)?;
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let stopping = Arc::new(AtomicBool::new(false));

        let mut bus_loop = BusLoop::new(
            client.clone(),
            eventloop,
            self.command_topics(),
            qos,
            inbound_tx,
            stopping.clone(),
        );
        bus_loop.wait_connected().await?;
        info!("MQTT connected to {}:{}", settings.host, settings.port);

        let bus_task = tokio::spawn(bus_loop.run());
        tokio::spawn(self.dispatcher().run(inbound_rx));

        let publisher: Arc<dyn BusPublisher> = Arc::new(MqttPublisher::new(client.clone(), qos));
        let workers: Vec<_> = self
            .poll_workers(publisher, timing)
            .into_iter()
            .map(PollWorker::spawn)
            .collect();
        info!("Started {} poll workers", workers.len());

        shutdown.await;

        info!("Stopping bridge...");
        stopping.store(true, Ordering::SeqCst);
        for worker in &workers {
            worker.abort();
        }
        if let Err(e) = client.disconnect().await {
            warn!("MQTT disconnect failed: {e}");
        }
        if tokio::time::timeout(SHUTDOWN_GRACE, bus_task).await.is_err() {
            warn!("bus loop did not stop within {SHUTDOWN_GRACE:?}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tuyabridge_device::{SimDevice, WriteCapability};

    fn cfg(id: &str, name: &str) -> DeviceConfig {
        DeviceConfig::new(id, "10.0.0.2", "0123456789abcdef", name)
    }

    fn sim_factory(cfg: &DeviceConfig) -> Result<Arc<dyn DeviceSession>, BridgeError> {
        Ok(Arc::new(SimDevice::new(cfg.id.clone(), WriteCapability::Bulk)))
    }

    #[test]
    fn build_skips_collisions_and_empty_identifiers() {
        let devices = vec![
            cfg("dev-a", "Kitchen Lamp"),
            cfg("dev-b", "kitchen_lamp "),
            cfg("dev-c", "???"),
            cfg("dev-d", "Hall Plug"),
            cfg("dev-a", "Garage"),
        ];
        let bridge = Bridge::build(&devices, TopicScheme::default(), sim_factory);

        assert_eq!(bridge.identities().len(), 2);
        assert_eq!(bridge.registry().len(), 2);
        assert_eq!(bridge.identities().device_for("kitchen_lamp"), Some("dev-a"));
        assert_eq!(bridge.identities().device_for("hall_plug"), Some("dev-d"));
        assert_eq!(
            bridge.command_topics(),
            vec!["tuya/kitchen_lamp/set", "tuya/hall_plug/set"]
        );
    }

    #[test]
    fn build_skips_devices_whose_session_fails() {
        let devices = vec![cfg("dev-a", "Lamp"), cfg("dev-b", "Plug")];
        let bridge = Bridge::build(&devices, TopicScheme::default(), |cfg| {
            if cfg.id == "dev-a" {
                Err(BridgeError::Config("bad key".to_string()))
            } else {
                sim_factory(cfg)
            }
        });

        assert_eq!(bridge.identities().identifiers().collect::<Vec<_>>(), vec!["plug"]);
        assert!(bridge.registry().session_for("dev-a").is_none());
    }

    #[test]
    fn topic_table_lists_both_directions() {
        let bridge = Bridge::build(&[cfg("dev-a", "Lamp")], TopicScheme::new("home/tuya"), sim_factory);
        assert_eq!(
            bridge.topic_table(),
            vec![(
                "lamp".to_string(),
                "home/tuya/lamp/status".to_string(),
                "home/tuya/lamp/set".to_string()
            )]
        );
    }

    #[test]
    fn one_worker_per_accepted_device() {
        let devices = vec![cfg("dev-a", "Lamp"), cfg("dev-b", "Lamp"), cfg("dev-c", "Plug")];
        let bridge = Bridge::build(&devices, TopicScheme::default(), sim_factory);
        let bus: Arc<dyn BusPublisher> = Arc::new(crate::bus::MemoryBus::default());
        let workers = bridge.poll_workers(bus, PollTiming::default());
        let identifiers: Vec<_> = workers.iter().map(|w| w.identifier().to_string()).collect();
        assert_eq!(identifiers, vec!["lamp", "plug"]);
    }
}
