//! Protocol error type.

use thiserror::Error;

/// Errors produced while decoding RESP2 frames. `Incomplete` is
/// internal to the parser — the public entry points turn it into
/// `Ok(None)` so callers simply read more bytes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The buffer does not yet hold a complete frame.
    #[error("incomplete frame")]
    Incomplete,

    /// Structurally invalid data; the connection should be closed.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// A declared bulk/array length was out of range.
    #[error("invalid frame length {0}")]
    InvalidLength(i64),

    /// A bulk string exceeded the 512 MB cap.
    #[error("bulk string of {0} bytes exceeds the limit")]
    BulkTooLarge(i64),

    /// Arrays nested deeper than the parser allows.
    #[error("frame nesting too deep")]
    NestingTooDeep,

    /// The frame is not a well-formed command request.
    #[error("invalid command request: {0}")]
    InvalidRequest(String),
}
