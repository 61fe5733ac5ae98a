use thiserror::Error;

/// Failures below the session layer: framing, crypto, and socket I/O.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("bad frame prefix 0x{0:08x}")]
    BadPrefix(u32),

    #[error("bad frame suffix 0x{0:08x}")]
    BadSuffix(u32),

    #[error("crc mismatch: frame carries 0x{carried:08x}, computed 0x{computed:08x}")]
    CrcMismatch { carried: u32, computed: u32 },

    #[error("frame length {0} outside accepted range")]
    BadLength(usize),

    #[error("frame truncated: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("local key must be 16 bytes, got {0}")]
    BadKeyLength(usize),

    #[error("ciphertext length {0} is not a multiple of the block size")]
    BadCiphertextLength(usize),

    #[error("invalid PKCS#7 padding")]
    BadPadding,

    #[error("payload is not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("device rejected request: {0}")]
    DeviceRejected(String),

    #[error("device answered with return code {0}")]
    ReturnCode(u32),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether the failure is a transport problem rather than a bad reply.
    pub fn is_transport(&self) -> bool {
        matches!(self, ProtocolError::Io(_) | ProtocolError::Timeout(_))
    }

    /// The device understood the request and refused it; retrying cannot help.
    pub fn is_refusal(&self) -> bool {
        matches!(self, ProtocolError::DeviceRejected(_) | ProtocolError::ReturnCode(_))
    }
}
