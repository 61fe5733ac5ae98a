//! MQTT transport: a [`BusPublisher`] over [`rumqttc::AsyncClient`] and the
//! event loop that keeps the connection alive.
//!
//! [`BusLoop`] owns the [`EventLoop`].  It re-subscribes every command topic
//! on each `ConnAck` (the session is clean, so the broker forgets them across
//! reconnects) and forwards inbound publishes to the dispatcher over a
//! bounded channel.  Connection errors are logged and retried after a pause;
//! only an error before the very first `ConnAck` is fatal.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tuyabridge_types::BridgeError;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::bus::{BusPublisher, InboundMessage};

pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 60;

/// Pause between reconnect attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
/// Capacity of the client → event loop request channel.
const REQUEST_CAPACITY: usize = 64;
// rumqttc rejects keep-alive intervals below this.
const MIN_KEEP_ALIVE_SECS: u64 = 5;

/// Broker connection parameters.
#[derive(Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    /// `None` generates `tuyabridge-<uuid>`.
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<Zeroizing<String>>,
    pub keep_alive: Duration,
    /// QoS level (0, 1 or 2) for status publishes and command subscriptions.
    pub qos: u8,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_MQTT_PORT,
            client_id: None,
            username: None,
            password: None,
            keep_alive: Duration::from_secs(DEFAULT_KEEP_ALIVE_SECS),
            qos: 0,
        }
    }
}

impl fmt::Debug for MqttSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("keep_alive", &self.keep_alive)
            .field("qos", &self.qos)
            .finish()
    }
}

impl MqttSettings {
    pub fn qos_level(&self) -> Result<QoS, BridgeError> {
        qos_from_level(self.qos)
    }

    fn options(&self) -> MqttOptions {
        let client_id = self
            .client_id
            .clone()
            .unwrap_or_else(|| format!("tuyabridge-{}", Uuid::new_v4()));
        let mut options = MqttOptions::new(client_id, &self.host, self.port);
        let keep_alive = self.keep_alive.max(Duration::from_secs(MIN_KEEP_ALIVE_SECS));
        options.set_keep_alive(keep_alive);
        options.set_clean_session(true);
        if let Some(username) = &self.username {
            let password = self.password.as_ref().map(|p| p.as_str()).unwrap_or_default();
            options.set_credentials(username, password);
        }
        options
    }
}

pub fn qos_from_level(level: u8) -> Result<QoS, BridgeError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(BridgeError::Config(format!("invalid MQTT QoS level {other}"))),
    }
}

/// Build the client and its event loop.  No network traffic happens until
/// the loop is polled.
pub fn connect(settings: &MqttSettings) -> Result<(AsyncClient, EventLoop), BridgeError> {
    settings.qos_level()?;
    Ok(AsyncClient::new(settings.options(), REQUEST_CAPACITY))
}

/// Publishes through the shared [`AsyncClient`].
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    qos: QoS,
}

impl MqttPublisher {
    pub fn new(client: AsyncClient, qos: QoS) -> Self {
        Self { client, qos }
    }
}

#[async_trait]
impl BusPublisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<(), BridgeError> {
        self.client
            .publish(topic, self.qos, retain, payload.into_bytes())
            .await
            .map_err(|e| BridgeError::Bus(format!("publish to {topic}: {e}")))
    }
}

pub struct BusLoop {
    client: AsyncClient,
    eventloop: EventLoop,
    command_topics: Arc<Vec<String>>,
    qos: QoS,
    inbound: mpsc::Sender<InboundMessage>,
    stopping: Arc<AtomicBool>,
}

impl BusLoop {
    pub fn new(
        client: AsyncClient,
        eventloop: EventLoop,
        command_topics: Vec<String>,
        qos: QoS,
        inbound: mpsc::Sender<InboundMessage>,
        stopping: Arc<AtomicBool>,
    ) -> Self {
        Self {
            client,
            eventloop,
            command_topics: Arc::new(command_topics),
            qos,
            inbound,
            stopping,
        }
    }

    /// Poll until the broker accepts the connection, then subscribe.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Bus`] if the connection fails or is refused.
    pub async fn wait_connected(&mut self) -> Result<(), BridgeError> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code != ConnectReturnCode::Success {
                        return Err(BridgeError::Bus(format!(
                            "broker refused connection: {:?}",
                            ack.code
                        )));
                    }
                    self.subscribe_all();
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => return Err(BridgeError::Bus(format!("cannot connect to broker: {e}"))),
            }
        }
    }

    /// Drive the connection until DISCONNECT goes out or the dispatcher
    /// channel closes.
    pub async fn run(mut self) {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("MQTT reconnected");
                    self.subscribe_all();
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let message = InboundMessage {
                        topic: publish.topic.clone(),
                        payload: publish.payload.to_vec(),
                    };
                    if self.inbound.send(message).await.is_err() {
                        debug!("dispatcher gone; leaving bus loop");
                        break;
                    }
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    info!("MQTT disconnect sent");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    if self.stopping.load(Ordering::SeqCst) {
                        break;
                    }
                    warn!("MQTT connection error: {e}; retrying in {RECONNECT_DELAY:?}");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }

    // Subscriptions are queued from a separate task: awaiting them here
    // would block the only task that drains the request channel.
    fn subscribe_all(&self) {
        let client = self.client.clone();
        let topics = self.command_topics.clone();
        let qos = self.qos;
        tokio::spawn(async move {
            for topic in topics.iter() {
                match client.subscribe(topic.as_str(), qos).await {
                    Ok(()) => info!("[SUB] {topic}"),
                    Err(e) => warn!("subscribe to {topic} failed: {e}"),
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos_levels() {
        assert_eq!(qos_from_level(0).unwrap(), QoS::AtMostOnce);
        assert_eq!(qos_from_level(1).unwrap(), QoS::AtLeastOnce);
        assert_eq!(qos_from_level(2).unwrap(), QoS::ExactlyOnce);
        assert!(matches!(qos_from_level(3), Err(BridgeError::Config(_))));
    }

    #[test]
    fn debug_redacts_password() {
        let settings = MqttSettings {
            username: Some("bridge".to_string()),
            password: Some(Zeroizing::new("hunter2".to_string())),
            ..MqttSettings::default()
        };
        let rendered = format!("{settings:?}");
        assert!(rendered.contains("bridge"));
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn generated_client_id_is_prefixed() {
        let options = MqttSettings::default().options();
        assert!(options.client_id().starts_with("tuyabridge-"));
    }

    #[test]
    fn explicit_client_id_and_keep_alive_floor() {
        let settings = MqttSettings {
            client_id: Some("bridge-1".to_string()),
            keep_alive: Duration::from_secs(1),
            ..MqttSettings::default()
        };
        let options = settings.options();
        assert_eq!(options.client_id(), "bridge-1");
        assert_eq!(options.keep_alive(), Duration::from_secs(MIN_KEEP_ALIVE_SECS));
    }

    #[test]
    fn connect_rejects_bad_qos() {
        let settings = MqttSettings {
            qos: 7,
            ..MqttSettings::default()
        };
        assert!(connect(&settings).is_err());
    }
}
