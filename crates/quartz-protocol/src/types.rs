//! RESP2 frame type.

use bytes::Bytes;

/// A single RESP2 protocol frame.
///
/// Blob payloads use `Bytes` so bulk data moves through the pipeline
/// without copying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Simple string, e.g. `+OK\r\n`.
    Simple(String),

    /// Error reply, e.g. `-ERR unknown command\r\n`.
    Error(String),

    /// 64-bit signed integer, e.g. `:42\r\n`.
    Integer(i64),

    /// Binary-safe bulk string, e.g. `$5\r\nhello\r\n`.
    Bulk(Bytes),

    /// Nil bulk string, `$-1\r\n`.
    Null,

    /// Array of frames, e.g. `*2\r\n+a\r\n+b\r\n`.
    Array(Vec<Frame>),

    /// Nil array, `*-1\r\n`.
    NullArray,
}

impl Frame {
    /// Convenience constructor for a bulk frame from anything
    /// byte-like.
    pub fn bulk(data: impl Into<Bytes>) -> Frame {
        Frame::Bulk(data.into())
    }

    /// `+OK\r\n`, the most common reply.
    pub fn ok() -> Frame {
        Frame::Simple("OK".into())
    }

    /// Returns `true` for either nil form.
    pub fn is_null(&self) -> bool {
        matches!(self, Frame::Null | Frame::NullArray)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality() {
        assert_eq!(Frame::Simple("OK".into()), Frame::ok());
        assert_ne!(Frame::Integer(1), Frame::Integer(2));
        assert_eq!(Frame::bulk("x"), Frame::Bulk(Bytes::from_static(b"x")));
    }

    #[test]
    fn null_forms() {
        assert!(Frame::Null.is_null());
        assert!(Frame::NullArray.is_null());
        assert!(!Frame::bulk("").is_null());
    }
}
