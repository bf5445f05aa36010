//! Single-pass incremental RESP2 parser.
//!
//! Operates on a byte slice the caller has buffered from the socket.
//! Returns `Ok(None)` while the buffer holds only part of a frame, so
//! the caller can retry after the next read. Inline commands (a bare
//! line such as `PING\r\n`) are tolerated and lowered to an array of
//! bulk strings.

use std::io::Cursor;

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::types::Frame;

/// Maximum nesting depth for arrays. Guards the stack against
/// malicious frames.
const MAX_NESTING_DEPTH: usize = 64;

/// Maximum declared element count for an array.
const MAX_ARRAY_ELEMENTS: i64 = 1_048_576;

/// Maximum bulk string length (512 MB, matching the reference server).
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Cap for pre-allocation from a declared array length; the vector
/// still grows organically past this.
const PREALLOC_CAP: usize = 1024;

/// Parses one complete frame from the front of `buf`.
///
/// Returns `Ok(Some((frame, consumed)))` on success, `Ok(None)` when
/// more data is needed, or an error for malformed input (the caller
/// should close the connection).
pub fn parse_frame(buf: &[u8]) -> Result<Option<(Frame, usize)>, ProtocolError> {
    if buf.is_empty() {
        return Ok(None);
    }

    let mut cursor = Cursor::new(buf);
    match try_parse(&mut cursor, 0) {
        Ok(frame) => Ok(Some((frame, cursor.position() as usize))),
        Err(ProtocolError::Incomplete) => Ok(None),
        Err(e) => Err(e),
    }
}

fn try_parse(cursor: &mut Cursor<&[u8]>, depth: usize) -> Result<Frame, ProtocolError> {
    if depth > MAX_NESTING_DEPTH {
        return Err(ProtocolError::NestingTooDeep);
    }

    let prefix = peek_byte(cursor)?;
    match prefix {
        b'+' | b'-' | b':' | b'$' | b'*' => {
            advance(cursor, 1);
        }
        // inline command: a bare line of whitespace-separated words
        _ => return parse_inline(cursor),
    }

    match prefix {
        b'+' => {
            let line = read_line(cursor)?;
            let s = std::str::from_utf8(line).map_err(|_| {
                ProtocolError::InvalidFrame("invalid utf-8 in simple string".into())
            })?;
            Ok(Frame::Simple(s.to_owned()))
        }
        b'-' => {
            let line = read_line(cursor)?;
            let s = std::str::from_utf8(line)
                .map_err(|_| ProtocolError::InvalidFrame("invalid utf-8 in error".into()))?;
            Ok(Frame::Error(s.to_owned()))
        }
        b':' => Ok(Frame::Integer(read_integer_line(cursor)?)),
        b'$' => {
            let len = read_integer_line(cursor)?;
            if len == -1 {
                return Ok(Frame::Null);
            }
            if len < 0 {
                return Err(ProtocolError::InvalidLength(len));
            }
            if len > MAX_BULK_LEN {
                return Err(ProtocolError::BulkTooLarge(len));
            }
            let len = len as usize;

            // need the payload plus the trailing \r\n
            if remaining(cursor) < len + 2 {
                return Err(ProtocolError::Incomplete);
            }
            let start = cursor.position() as usize;
            let data = Bytes::copy_from_slice(&cursor.get_ref()[start..start + len]);
            advance(cursor, len);
            expect_crlf(cursor)?;
            Ok(Frame::Bulk(data))
        }
        b'*' => {
            let count = read_integer_line(cursor)?;
            if count == -1 {
                return Ok(Frame::NullArray);
            }
            if count < 0 || count > MAX_ARRAY_ELEMENTS {
                return Err(ProtocolError::InvalidLength(count));
            }
            let mut items = Vec::with_capacity((count as usize).min(PREALLOC_CAP));
            for _ in 0..count {
                items.push(try_parse(cursor, depth + 1)?);
            }
            Ok(Frame::Array(items))
        }
        _ => unreachable!("prefix matched above"),
    }
}

/// Lowers an inline command line to an array of bulk strings.
///
/// A bare `PING` line is surfaced as `Frame::Simple("PING")` so the
/// dispatcher can recognize it without a table lookup — masters use it
/// as a connection probe and expect no reply frame in return.
fn parse_inline(cursor: &mut Cursor<&[u8]>) -> Result<Frame, ProtocolError> {
    let line = read_line(cursor)?;
    if line.iter().any(|b| *b == 0) {
        return Err(ProtocolError::InvalidFrame("NUL in inline command".into()));
    }
    let words: Vec<&[u8]> = line
        .split(|b| b.is_ascii_whitespace())
        .filter(|w| !w.is_empty())
        .collect();
    if words.is_empty() {
        return Err(ProtocolError::InvalidFrame("empty inline command".into()));
    }
    if words.len() == 1 && words[0].eq_ignore_ascii_case(b"PING") {
        return Ok(Frame::Simple("PING".into()));
    }
    let items = words
        .into_iter()
        .map(|w| Frame::Bulk(Bytes::copy_from_slice(w)))
        .collect();
    Ok(Frame::Array(items))
}

fn peek_byte(cursor: &Cursor<&[u8]>) -> Result<u8, ProtocolError> {
    let pos = cursor.position() as usize;
    cursor
        .get_ref()
        .get(pos)
        .copied()
        .ok_or(ProtocolError::Incomplete)
}

fn advance(cursor: &mut Cursor<&[u8]>, n: usize) {
    cursor.set_position(cursor.position() + n as u64);
}

fn remaining(cursor: &Cursor<&[u8]>) -> usize {
    cursor.get_ref().len() - cursor.position() as usize
}

/// Reads up to and including the next CRLF, returning the line body.
fn read_line<'a>(cursor: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], ProtocolError> {
    let buf = *cursor.get_ref();
    let start = cursor.position() as usize;
    for i in start..buf.len().saturating_sub(1) {
        if buf[i] == b'\r' && buf[i + 1] == b'\n' {
            cursor.set_position((i + 2) as u64);
            return Ok(&buf[start..i]);
        }
    }
    Err(ProtocolError::Incomplete)
}

fn read_integer_line(cursor: &mut Cursor<&[u8]>) -> Result<i64, ProtocolError> {
    let line = read_line(cursor)?;
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            ProtocolError::InvalidFrame(format!(
                "invalid integer line: {:?}",
                String::from_utf8_lossy(line)
            ))
        })
}

fn expect_crlf(cursor: &mut Cursor<&[u8]>) -> Result<(), ProtocolError> {
    if remaining(cursor) < 2 {
        return Err(ProtocolError::Incomplete);
    }
    let pos = cursor.position() as usize;
    let buf = cursor.get_ref();
    if buf[pos] != b'\r' || buf[pos + 1] != b'\n' {
        return Err(ProtocolError::InvalidFrame(
            "missing CRLF after bulk payload".into(),
        ));
    }
    advance(cursor, 2);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(input: &[u8]) -> Frame {
        let (frame, consumed) = parse_frame(input).unwrap().unwrap();
        assert_eq!(consumed, input.len());
        frame
    }

    #[test]
    fn simple_string() {
        assert_eq!(parse_one(b"+OK\r\n"), Frame::Simple("OK".into()));
    }

    #[test]
    fn error_frame() {
        assert_eq!(parse_one(b"-ERR bad\r\n"), Frame::Error("ERR bad".into()));
    }

    #[test]
    fn integer() {
        assert_eq!(parse_one(b":42\r\n"), Frame::Integer(42));
        assert_eq!(parse_one(b":-7\r\n"), Frame::Integer(-7));
    }

    #[test]
    fn bulk_string() {
        assert_eq!(parse_one(b"$5\r\nhello\r\n"), Frame::bulk("hello"));
        assert_eq!(parse_one(b"$0\r\n\r\n"), Frame::bulk(""));
    }

    #[test]
    fn nil_bulk_and_array() {
        assert_eq!(parse_one(b"$-1\r\n"), Frame::Null);
        assert_eq!(parse_one(b"*-1\r\n"), Frame::NullArray);
    }

    #[test]
    fn bulk_is_binary_safe() {
        assert_eq!(
            parse_one(b"$4\r\na\r\nb\r\n"),
            Frame::bulk(&b"a\r\nb"[..])
        );
    }

    #[test]
    fn array_of_bulks() {
        let frame = parse_one(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n");
        assert_eq!(
            frame,
            Frame::Array(vec![Frame::bulk("GET"), Frame::bulk("foo")])
        );
    }

    #[test]
    fn nested_arrays() {
        let frame = parse_one(b"*2\r\n*1\r\n:1\r\n*1\r\n:2\r\n");
        assert_eq!(
            frame,
            Frame::Array(vec![
                Frame::Array(vec![Frame::Integer(1)]),
                Frame::Array(vec![Frame::Integer(2)]),
            ])
        );
    }

    #[test]
    fn incomplete_returns_none() {
        assert_eq!(parse_frame(b"").unwrap(), None);
        assert_eq!(parse_frame(b"$5\r\nhel").unwrap(), None);
        assert_eq!(parse_frame(b"*2\r\n$3\r\nGET\r\n").unwrap(), None);
        assert_eq!(parse_frame(b"+OK").unwrap(), None);
    }

    #[test]
    fn consumed_leaves_pipelined_rest() {
        let input = b"+OK\r\n:1\r\n";
        let (frame, consumed) = parse_frame(input).unwrap().unwrap();
        assert_eq!(frame, Frame::Simple("OK".into()));
        assert_eq!(consumed, 5);
        let (frame, _) = parse_frame(&input[consumed..]).unwrap().unwrap();
        assert_eq!(frame, Frame::Integer(1));
    }

    #[test]
    fn inline_ping_is_distinguished() {
        assert_eq!(parse_one(b"PING\r\n"), Frame::Simple("PING".into()));
        assert_eq!(parse_one(b"ping\r\n"), Frame::Simple("PING".into()));
    }

    #[test]
    fn inline_command_words() {
        assert_eq!(
            parse_one(b"SET  foo   bar\r\n"),
            Frame::Array(vec![
                Frame::bulk("SET"),
                Frame::bulk("foo"),
                Frame::bulk("bar")
            ])
        );
    }

    #[test]
    fn malformed_rejected() {
        assert!(parse_frame(b"$abc\r\nxx\r\n").is_err());
        assert!(parse_frame(b"$-2\r\n").is_err());
        assert!(parse_frame(b"$3\r\nabcX\r").is_err());
        assert!(parse_frame(b"*-2\r\n").is_err());
    }

    #[test]
    fn oversized_bulk_rejected() {
        assert!(matches!(
            parse_frame(b"$536870913\r\n"),
            Err(ProtocolError::BulkTooLarge(_))
        ));
    }

    #[test]
    fn deep_nesting_rejected() {
        let mut input = Vec::new();
        for _ in 0..70 {
            input.extend_from_slice(b"*1\r\n");
        }
        input.extend_from_slice(b":1\r\n");
        assert!(matches!(
            parse_frame(&input),
            Err(ProtocolError::NestingTooDeep)
        ));
    }
}
