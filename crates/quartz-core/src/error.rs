//! Error types for the storage layer.

use thiserror::Error;

use crate::store::row::TypeCode;

/// Errors surfaced by the row codec when encoding or decoding engine
/// rows.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The buffer ended before the value was fully decoded.
    #[error("unexpected end of row buffer")]
    UnexpectedEof,

    /// A length prefix did not terminate within ten bytes.
    #[error("varint length prefix overflow")]
    VarintOverflow,

    /// Decoding finished but bytes remained in the buffer.
    #[error("{0} trailing bytes after decode")]
    TrailingBytes(usize),

    /// A row value carried an unknown type code byte.
    #[error("unknown type code {0:#04x}")]
    UnknownCode(u8),

    /// A row value's type code disagreed with the expected one.
    #[error("row code mismatch: expected {expected:?}, found {found:?}")]
    CodeMismatch {
        expected: TypeCode,
        found: TypeCode,
    },
}

/// Errors returned by store operations. `Display` renders the message
/// that the dispatcher sends back inside a RESP error frame.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Wrong arity or a malformed argument.
    #[error("invalid arguments - {0}")]
    Arguments(String),

    /// The key holds something other than a string.
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value, expect string")]
    NotString,

    /// The key holds something other than a hash.
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value, expect hash")]
    NotHash,

    /// The key holds something other than a list.
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value, expect list")]
    NotList,

    /// The key holds something other than a set.
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value, expect set")]
    NotSet,

    /// The key holds something other than a zset.
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value, expect zset")]
    NotZSet,

    /// SET with NX or XX hit an unmet precondition. The dispatcher maps
    /// this to a nil reply, not an error frame.
    #[error("SET flow aborted by NX|XX condition")]
    SetAborted,

    /// A zset score fell outside `[-2^53, 2^53]`.
    #[error("invalid score {0}, must be in [-2^53, 2^53]")]
    InvalidScore(i64),

    /// A float operation would produce NaN or Infinity.
    #[error("increment would produce NaN or Infinity")]
    NanOrInfinity,

    /// RESTORE against a key that already exists.
    #[error("BUSYKEY Target key name already exists.")]
    BusyKey,

    /// A stored object failed structural validation (e.g. a zset whose
    /// meta size disagrees with its data cells).
    #[error("invalid object value: {0}")]
    ObjectValue(String),

    /// Row encoding or decoding failed.
    #[error("row codec: {0}")]
    Codec(#[from] CodecError),

    /// The underlying engine reported a failure. The pending batch is
    /// discarded; nothing was committed.
    #[error("engine: {0}")]
    Engine(String),

    /// Filesystem failure from a file-backed component.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Builds the `ErrNot<Type>` variant matching an expected code.
    pub(crate) fn not_type(expected: TypeCode) -> StoreError {
        match expected {
            TypeCode::String => StoreError::NotString,
            TypeCode::Hash => StoreError::NotHash,
            TypeCode::List => StoreError::NotList,
            TypeCode::Set => StoreError::NotSet,
            TypeCode::ZSet => StoreError::NotZSet,
        }
    }
}

/// Shorthand for `StoreError::Arguments` with a formatted message.
macro_rules! err_args {
    ($($arg:tt)*) => {
        $crate::error::StoreError::Arguments(format!($($arg)*))
    };
}

pub(crate) use err_args;
