//! Wire framing.
//!
//! ```text
//! +----------+-------+---------+--------+-----------+---------+-------+----------+
//! | 000055AA | seqno | command | length | [retcode] | payload | crc32 | 0000AA55 |
//! +----------+-------+---------+--------+-----------+---------+-------+----------+
//!    u32 BE    u32     u32       u32      u32 (opt)             u32     u32 BE
//! ```
//!
//! `length` counts everything after the header: optional return code,
//! payload, CRC and suffix.  The CRC covers every byte before it.  Only
//! device replies carry a return code.

use tokio::io::{AsyncRead, AsyncReadExt};

use super::error::ProtocolError;

pub const PREFIX: u32 = 0x0000_55AA;
pub const SUFFIX: u32 = 0x0000_AA55;
pub const HEADER_LEN: usize = 16;
pub const TRAILER_LEN: usize = 8;

/// Upper bound on `length`; anything larger is treated as a corrupt stream.
pub const MAX_FRAME_BODY: usize = 64 * 1024;

/// Command words used by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Command {
    Control = 0x07,
    Status = 0x08,
    HeartBeat = 0x09,
    DpQuery = 0x0a,
}

impl Command {
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub seqno: u32,
    pub command: u32,
    pub retcode: Option<u32>,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn is(&self, command: Command) -> bool {
        self.command == command.code()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub seqno: u32,
    pub command: u32,
    pub length: usize,
}

/// Encode a client → device frame.
pub fn encode(seqno: u32, command: Command, payload: &[u8]) -> Vec<u8> {
    encode_raw(seqno, command.code(), payload)
}

pub(crate) fn encode_raw(seqno: u32, command: u32, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len() + TRAILER_LEN);
    buf.extend_from_slice(&PREFIX.to_be_bytes());
    buf.extend_from_slice(&seqno.to_be_bytes());
    buf.extend_from_slice(&command.to_be_bytes());
    buf.extend_from_slice(&((payload.len() + TRAILER_LEN) as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    let crc = crc32(&buf);
    buf.extend_from_slice(&crc.to_be_bytes());
    buf.extend_from_slice(&SUFFIX.to_be_bytes());
    buf
}

pub fn parse_header(buf: &[u8; HEADER_LEN]) -> Result<Header, ProtocolError> {
    let prefix = be_u32(&buf[0..4]);
    if prefix != PREFIX {
        return Err(ProtocolError::BadPrefix(prefix));
    }
    let length = be_u32(&buf[12..16]) as usize;
    if !(TRAILER_LEN..=MAX_FRAME_BODY).contains(&length) {
        return Err(ProtocolError::BadLength(length));
    }
    Ok(Header {
        seqno: be_u32(&buf[4..8]),
        command: be_u32(&buf[8..12]),
        length,
    })
}

/// Decode one complete frame held in `buf`.
pub fn decode(buf: &[u8]) -> Result<Frame, ProtocolError> {
    let Some(header_bytes) = buf.first_chunk::<HEADER_LEN>() else {
        return Err(ProtocolError::Truncated {
            need: HEADER_LEN,
            have: buf.len(),
        });
    };
    let header = parse_header(header_bytes)?;
    let total = HEADER_LEN + header.length;
    if buf.len() < total {
        return Err(ProtocolError::Truncated {
            need: total,
            have: buf.len(),
        });
    }

    let crc_at = total - TRAILER_LEN;
    let suffix = be_u32(&buf[total - 4..total]);
    if suffix != SUFFIX {
        return Err(ProtocolError::BadSuffix(suffix));
    }
    let carried = be_u32(&buf[crc_at..crc_at + 4]);
    let computed = crc32(&buf[..crc_at]);
    if carried != computed {
        return Err(ProtocolError::CrcMismatch { carried, computed });
    }

    let body = &buf[HEADER_LEN..crc_at];
    // Return codes are small integers; a payload never starts with three
    // zero bytes because it is either ciphertext, a version tag or JSON.
    let (retcode, payload) = match body.first_chunk::<4>() {
        Some(word) if u32::from_be_bytes(*word) & 0xFFFF_FF00 == 0 => {
            (Some(u32::from_be_bytes(*word)), &body[4..])
        }
        _ => (None, body),
    };

    Ok(Frame {
        seqno: header.seqno,
        command: header.command,
        retcode,
        payload: payload.to_vec(),
    })
}

/// Read exactly one frame from `reader`.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await?;
    let parsed = parse_header(&header)?;

    let mut buf = Vec::with_capacity(HEADER_LEN + parsed.length);
    buf.extend_from_slice(&header);
    buf.resize(HEADER_LEN + parsed.length, 0);
    reader.read_exact(&mut buf[HEADER_LEN..]).await?;
    decode(&buf)
}

/// CRC-32 (IEEE 802.3, reflected, polynomial 0xEDB88320).
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for byte in data {
        crc ^= *byte as u32;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB8_8320;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
