//! `tuyabridge-device` – device sessions.
//!
//! Everything the bridge knows about a device goes through the
//! [`DeviceSession`] trait, so the poll workers and the command dispatcher
//! never depend on a concrete protocol client.
//!
//! # Modules
//!
//! - [`session`] – the [`DeviceSession`] trait and its [`WriteCapability`] flag.
//! - [`registry`] – [`SessionRegistry`], frozen after startup.
//! - [`tuya`] – [`TuyaDevice`], the LAN protocol 3.2/3.3 client.
//! - [`protocol`] – framing, cipher and message helpers used by [`tuya`].
//! - [`sim`] – [`SimDevice`], an in-memory session for tests and dry runs.

pub mod protocol;
pub mod registry;
pub mod session;
pub mod sim;
pub mod tuya;

pub use registry::{RegistryBuilder, SessionRegistry};
pub use session::{DeviceSession, WriteCapability};
pub use sim::{SimCall, SimDevice};
pub use tuya::{SocketTuning, TuyaDevice};
