//! Tuya LAN protocol (3.2 / 3.3) building blocks.
//!
//! - [`frame`] – `0x55AA` framing, CRC-32 trailer, async frame reader.
//! - [`cipher`] – AES-128-ECB with PKCS#7 padding under the device local key.
//! - [`message`] – sealing request bodies and opening device replies.

pub mod cipher;
pub mod error;
pub mod frame;
pub mod message;

pub use error::ProtocolError;
pub use frame::{Command, Frame};
