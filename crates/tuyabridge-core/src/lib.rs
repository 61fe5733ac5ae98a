//! Bridge core: identity mapping, topic layout, command dispatch, status
//! polling and the MQTT transport that ties them to a broker.
//!
//! The crate is transport-agnostic up to [`bus::BusPublisher`]; only
//! [`mqtt`] and [`bridge::Bridge::run`] know about rumqttc.

pub mod bridge;
pub mod bus;
pub mod dispatcher;
pub mod identity;
pub mod mqtt;
pub mod payload;
pub mod poller;
pub mod topics;

pub use bridge::Bridge;
pub use bus::{BusMessage, BusPublisher, InboundMessage, MemoryBus};
pub use dispatcher::{CommandDispatcher, WriteReport};
pub use identity::{IdentityMap, derive_identifier};
pub use mqtt::{MqttPublisher, MqttSettings};
pub use poller::{CycleOutcome, PollTiming, PollWorker, Snapshot};
pub use topics::TopicScheme;
