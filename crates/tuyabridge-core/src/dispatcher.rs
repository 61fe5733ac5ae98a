//! Command dispatch: route an inbound `{base}/{identifier}/set` message to
//! the owning device session and write the requested data points.
//!
//! Writes go out in one bulk call when the session supports it, otherwise
//! one `set_value` per entry in ascending data-point order.  A failing
//! single write is logged and the remaining entries are still attempted.
//! Nothing here ever propagates past [`CommandDispatcher::handle`]: a bad
//! message must never take the bus loop down.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tuyabridge_device::{DeviceSession, SessionRegistry, WriteCapability};
use tuyabridge_types::{BridgeError, DpIndex, DpsMap};

use crate::bus::InboundMessage;
use crate::identity::IdentityMap;
use crate::payload::parse_command;
use crate::topics::TopicScheme;

/// Outcome of a dispatched write.
///
/// Device replies are kept so a caller can confirm writes back to the bus.
#[derive(Debug)]
pub enum WriteReport {
    /// One bulk call covered the whole map.
    Bulk(Option<Value>),
    /// One entry per data point, in write order.
    Single(Vec<(DpIndex, Result<Option<Value>, BridgeError>)>),
}

impl WriteReport {
    /// Number of single writes that failed.  Always 0 for a bulk report.
    pub fn failures(&self) -> usize {
        match self {
            WriteReport::Bulk(_) => 0,
            WriteReport::Single(results) => results.iter().filter(|(_, r)| r.is_err()).count(),
        }
    }
}

#[derive(Clone)]
pub struct CommandDispatcher {
    topics: TopicScheme,
    identities: Arc<IdentityMap>,
    registry: Arc<SessionRegistry>,
}

impl CommandDispatcher {
    pub fn new(topics: TopicScheme, identities: Arc<IdentityMap>, registry: Arc<SessionRegistry>) -> Self {
        Self {
            topics,
            identities,
            registry,
        }
    }

    /// Handle one inbound message, logging every outcome.
    pub async fn handle(&self, topic: &str, payload: &[u8]) {
        info!("[RAW] {topic} -> {}", String::from_utf8_lossy(payload));
        match self.dispatch(topic, payload).await {
            Ok(report) => {
                let failures = report.failures();
                if failures == 0 {
                    info!(topic, "[ACK] {report:?}");
                } else {
                    warn!(topic, failures, "[ACK] partial write: {report:?}");
                }
            }
            Err(e @ BridgeError::UnknownRoute(_)) => warn!(topic, "unroutable command: {e}"),
            Err(e @ BridgeError::Parse(_)) => error!(topic, "rejected command: {e}"),
            Err(e) => error!(topic, "command write failed: {e}"),
        }
    }

    /// Route, parse and write.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::UnknownRoute`] for a topic or identifier that maps to no device.
    /// - [`BridgeError::Parse`] for a malformed payload; no write is attempted.
    /// - Any session error raised by a bulk write.
    pub async fn dispatch(&self, topic: &str, payload: &[u8]) -> Result<WriteReport, BridgeError> {
        let identifier = self
            .topics
            .identifier_from_command_topic(topic)
            .ok_or_else(|| BridgeError::UnknownRoute(format!("not a command topic: {topic}")))?;
        let device_id = self
            .identities
            .device_for(identifier)
            .ok_or_else(|| BridgeError::UnknownRoute(format!("unknown identifier '{identifier}'")))?;
        let session = self
            .registry
            .session_for(device_id)
            .ok_or_else(|| BridgeError::UnknownRoute(format!("no session for device {device_id}")))?;

        let dps = parse_command(payload)?;
        info!(identifier, "[CMD] {}", format_dps(&dps));

        write_dps(session.as_ref(), identifier, &dps).await
    }

    /// Drain `inbound` one message at a time until every sender is gone.
    pub async fn run(self, mut inbound: mpsc::Receiver<InboundMessage>) {
        while let Some(message) = inbound.recv().await {
            self.handle(&message.topic, &message.payload).await;
        }
        debug!("command channel closed");
    }
}

async fn write_dps(
    session: &dyn DeviceSession,
    identifier: &str,
    dps: &DpsMap,
) -> Result<WriteReport, BridgeError> {
    match session.write_capability() {
        WriteCapability::Bulk => match session.set_dps_multiple(dps).await {
            Ok(reply) => Ok(WriteReport::Bulk(reply)),
            Err(e) => {
                error!(identifier, dps = %format_dps(dps), "bulk write failed: {e}");
                Err(e)
            }
        },
        WriteCapability::SingleOnly => {
            let mut results = Vec::with_capacity(dps.len());
            for (dp, value) in dps {
                let result = session.set_value(*dp, value).await;
                if let Err(e) = &result {
                    error!(identifier, dp, value = %value, "write failed: {e}");
                }
                results.push((*dp, result));
            }
            Ok(WriteReport::Single(results))
        }
    }
}

fn format_dps(dps: &DpsMap) -> String {
    serde_json::to_string(dps).unwrap_or_else(|_| format!("{dps:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    use tuyabridge_device::{RegistryBuilder, SimCall, SimDevice};
    use tuyabridge_types::{DeviceConfig, DpsValue};

    struct Fixture {
        dispatcher: CommandDispatcher,
        device: Arc<SimDevice>,
    }

    fn fixture(capability: WriteCapability) -> Fixture {
        let cfg = DeviceConfig::new("bf01", "10.0.0.2", "0123456789abcdef", "Kitchen Lamp");
        let mut identities = IdentityMap::new();
        identities.register(&cfg).unwrap();

        let device = Arc::new(SimDevice::new("bf01", capability));
        let mut builder = RegistryBuilder::new();
        builder.register(device.clone()).unwrap();

        Fixture {
            dispatcher: CommandDispatcher::new(
                TopicScheme::default(),
                Arc::new(identities),
                Arc::new(builder.build()),
            ),
            device,
        }
    }

    fn map(entries: &[(DpIndex, DpsValue)]) -> DpsMap {
        entries.iter().cloned().collect()
    }

    #[tokio::test]
    async fn bulk_write_is_one_call() {
        let f = fixture(WriteCapability::Bulk);
        let report = f
            .dispatcher
            .dispatch("tuya/kitchen_lamp/set", br#"{"20": true, "22": 500}"#)
            .await
            .unwrap();

        assert!(matches!(report, WriteReport::Bulk(Some(_))));
        assert_eq!(
            f.device.writes(),
            vec![SimCall::SetMultiple(map(&[
                (20, DpsValue::Bool(true)),
                (22, DpsValue::Integer(500)),
            ]))]
        );
    }

    #[tokio::test]
    async fn single_only_writes_in_ascending_order() {
        let f = fixture(WriteCapability::SingleOnly);
        f.dispatcher
            .dispatch("tuya/kitchen_lamp/set", br#"{"22": 500, "20": true}"#)
            .await
            .unwrap();

        assert_eq!(
            f.device.writes(),
            vec![
                SimCall::SetValue(20, DpsValue::Bool(true)),
                SimCall::SetValue(22, DpsValue::Integer(500)),
            ]
        );
    }

    #[tokio::test]
    async fn failed_single_write_does_not_stop_the_rest() {
        let f = fixture(WriteCapability::SingleOnly);
        f.device.fail_writes_to(20);

        let report = f
            .dispatcher
            .dispatch("tuya/kitchen_lamp/set", br#"{"20": true, "22": 500}"#)
            .await
            .unwrap();

        assert_eq!(report.failures(), 1);
        assert_eq!(f.device.writes().len(), 2);
        let state = f.device.status().await.unwrap();
        assert_eq!(state.dps.get(&22), Some(&DpsValue::Integer(500)));
        assert_eq!(state.dps.get(&20), None);
    }

    #[tokio::test]
    async fn bulk_failure_is_reported() {
        let f = fixture(WriteCapability::Bulk);
        f.device.set_offline(true);
        let result = f
            .dispatcher
            .dispatch("tuya/kitchen_lamp/set", br#"{"1": true}"#)
            .await;
        assert!(matches!(result, Err(BridgeError::DeviceIo { .. })));
    }

    #[tokio::test]
    async fn unknown_identifier_makes_no_call() {
        let f = fixture(WriteCapability::Bulk);
        let result = f.dispatcher.dispatch("tuya/garage_door/set", br#"{"1": true}"#).await;
        assert!(matches!(result, Err(BridgeError::UnknownRoute(_))));

        let result = f.dispatcher.dispatch("tuya/kitchen_lamp/status", br#"{"1": true}"#).await;
        assert!(matches!(result, Err(BridgeError::UnknownRoute(_))));
        assert!(f.device.calls().is_empty());
    }

    #[tokio::test]
    async fn malformed_payload_makes_no_call() {
        let f = fixture(WriteCapability::Bulk);
        for payload in [&br#"{"abc": 1}"#[..], b"not json", b"{}"] {
            let result = f.dispatcher.dispatch("tuya/kitchen_lamp/set", payload).await;
            assert!(matches!(result, Err(BridgeError::Parse(_))));
        }
        assert!(f.device.calls().is_empty());
    }

    #[tokio::test]
    async fn quoted_payload_is_accepted() {
        let f = fixture(WriteCapability::Bulk);
        f.dispatcher
            .dispatch("tuya/kitchen_lamp/set", br#"'{"1": false}'"#)
            .await
            .unwrap();
        assert_eq!(
            f.device.writes(),
            vec![SimCall::SetMultiple(map(&[(1, DpsValue::Bool(false))]))]
        );
    }

    #[tokio::test]
    async fn run_drains_channel_in_order() {
        let f = fixture(WriteCapability::SingleOnly);
        let (tx, rx) = mpsc::channel(8);
        for value in ["true", "false"] {
            tx.send(InboundMessage {
                topic: "tuya/kitchen_lamp/set".to_string(),
                payload: format!(r#"{{"1": {value}}}"#).into_bytes(),
            })
            .await
            .unwrap();
        }
        drop(tx);

        f.dispatcher.clone().run(rx).await;
        assert_eq!(
            f.device.writes(),
            vec![
                SimCall::SetValue(1, DpsValue::Bool(true)),
                SimCall::SetValue(1, DpsValue::Bool(false)),
            ]
        );
    }
}
