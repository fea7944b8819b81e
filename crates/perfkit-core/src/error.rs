use std::fmt;

/// Errors produced while reading or writing the wire buffer format (§4.1).
///
/// These never bubble up into connection lifecycle state; they are surfaced
/// to whichever caller invoked the decode (a response decoder, a manifest
/// decoder, a sample decoder) and turned into a [`ProtocolError`] at that
/// boundary.
///
/// [`ProtocolError`]: crate::WireError::InvalidTag
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// The buffer was exhausted before a value of the expected width could
    /// be read.
    Eof,
    /// A tag byte did not decode to one of the six known wire kinds.
    InvalidTag(u8),
    /// A varint continued for more than 10 bytes without terminating.
    VarintTooLong,
    /// A length-delimited region's length prefix pointed past the end of
    /// the buffer.
    LengthOutOfBounds { len: usize, remaining: usize },
    /// Bytes that were supposed to be UTF-8 were not.
    InvalidUtf8,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Eof => write!(f, "buffer exhausted before value could be read"),
            WireError::InvalidTag(b) => write!(f, "malformed tag byte: {:#04x}", b),
            WireError::VarintTooLong => write!(f, "varint exceeded 10 bytes without terminating"),
            WireError::LengthOutOfBounds { len, remaining } => write!(
                f,
                "length-delimited region of {} bytes exceeds {} remaining",
                len, remaining
            ),
            WireError::InvalidUtf8 => write!(f, "string field was not valid UTF-8"),
        }
    }
}

impl std::error::Error for WireError {}

/// The error taxonomy for the Perfkit client runtime (§7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PerfkitError {
    /// Operation issued in an inappropriate lifecycle state.
    InvalidState { expected: &'static str, found: &'static str },
    /// Transport could not be established.
    TransportUnavailable(String),
    /// The transport was lost mid-operation.
    Disconnected,
    /// Cooperative cancellation was observed before reply.
    Cancelled,
    /// The agent returned a structured error.
    RpcError { name: String, detail: String },
    /// The reply or inbound frame failed to decode.
    ProtocolError(String),
    /// Sample received for a source id with no resolved manifest.
    UnknownSource { source_id: u64 },
    /// Sample field type did not match manifest schema.
    TypeMismatch { row_id: u32, expected: &'static str, found: &'static str },
}

impl fmt::Display for PerfkitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PerfkitError::InvalidState { expected, found } => {
                write!(f, "invalid state: expected {}, found {}", expected, found)
            }
            PerfkitError::TransportUnavailable(detail) => {
                write!(f, "transport unavailable: {}", detail)
            }
            PerfkitError::Disconnected => write!(f, "transport was lost"),
            PerfkitError::Cancelled => write!(f, "call was cancelled"),
            PerfkitError::RpcError { name, detail } => write!(f, "{}: {}", name, detail),
            PerfkitError::ProtocolError(detail) => write!(f, "protocol error: {}", detail),
            PerfkitError::UnknownSource { source_id } => {
                write!(f, "no manifest resolved for source id {}", source_id)
            }
            PerfkitError::TypeMismatch { row_id, expected, found } => write!(
                f,
                "row {} expected wire kind {}, found {}",
                row_id, expected, found
            ),
        }
    }
}

impl std::error::Error for PerfkitError {}

impl From<WireError> for PerfkitError {
    fn from(err: WireError) -> Self {
        PerfkitError::ProtocolError(err.to_string())
    }
}
