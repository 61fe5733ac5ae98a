//! Request sealing and reply opening.
//!
//! Every body is JSON encrypted with the local key.  `CONTROL` requests are
//! additionally prefixed with the version tag followed by twelve zero bytes;
//! `DP_QUERY` requests are sent bare.  Replies may or may not carry that
//! prefix, may be plaintext, and may be empty.

use serde_json::Value;
use tuyabridge_types::ProtocolVersion;

use super::cipher::EcbCipher;
use super::error::ProtocolError;
use super::frame::Command;

const VERSION_HEADER_PAD: usize = 12;

pub fn version_header(version: ProtocolVersion) -> Vec<u8> {
    let mut header = version.as_str().as_bytes().to_vec();
    header.extend_from_slice(&[0u8; VERSION_HEADER_PAD]);
    header
}

/// Encrypt `body` into a frame payload for `command`.
pub fn seal(version: ProtocolVersion, cipher: &EcbCipher, command: Command, body: &[u8]) -> Vec<u8> {
    let ciphertext = cipher.encrypt(body);
    match command {
        Command::DpQuery | Command::HeartBeat => ciphertext,
        Command::Control | Command::Status => {
            let mut out = version_header(version);
            out.extend_from_slice(&ciphertext);
            out
        }
    }
}

/// Decode a reply payload.  `Ok(None)` means the device sent no data.
///
/// # Errors
///
/// Fails when the payload cannot be decrypted, is not JSON, or is one of the
/// plaintext refusals devices send (e.g. `json obj data unvalid`).
pub fn open(
    version: ProtocolVersion,
    cipher: &EcbCipher,
    payload: &[u8],
) -> Result<Option<Value>, ProtocolError> {
    let tag = version.as_str().as_bytes();
    let body = match payload.strip_prefix(tag) {
        Some(rest) => rest.get(VERSION_HEADER_PAD..).unwrap_or_default(),
        None => payload,
    };
    if body.is_empty() {
        return Ok(None);
    }

    let plain = match cipher.decrypt(body) {
        Ok(plain) => plain,
        Err(e) if body.first() == Some(&b'{') => {
            tracing::trace!(error = %e, "reply is not ciphertext; treating as plaintext");
            body.to_vec()
        }
        Err(e) => return Err(e),
    };

    let text = std::str::from_utf8(&plain)?.trim_matches(char::from(0)).trim();
    if text.is_empty() {
        return Ok(None);
    }
    if !text.starts_with('{') {
        return Err(ProtocolError::DeviceRejected(text.to_string()));
    }
    Ok(Some(serde_json::from_str(text)?))
}
