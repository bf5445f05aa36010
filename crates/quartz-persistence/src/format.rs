//! Binary format primitives and the dump blob codec.
//!
//! A dump blob is the payload of DUMP/RESTORE: one typed value with a
//! version byte up front and a CRC32 trailer. The same value encoding
//! is reused by the snapshot file, which adds its own framing. All
//! multi-byte integers are little-endian.

use std::io::{self, Read, Write};

use quartz_core::{is_valid_score, Value};
use thiserror::Error;

/// Magic bytes for the snapshot file header.
pub const SNAP_MAGIC: &[u8; 4] = b"QSNP";

/// Current dump/snapshot format version.
pub const FORMAT_VERSION: u8 = 1;

/// Type tags inside dump blobs and snapshot records.
const TYPE_STRING: u8 = 0;
const TYPE_HASH: u8 = 1;
const TYPE_LIST: u8 = 2;
const TYPE_SET: u8 = 3;
const TYPE_ZSET: u8 = 4;

/// Errors from reading or writing persistence formats.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("invalid magic bytes")]
    InvalidMagic,

    #[error("unsupported format version: {0}")]
    UnsupportedVersion(u8),

    #[error("crc32 mismatch (expected {expected:#010x}, got {actual:#010x})")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("unknown type tag: {0}")]
    UnknownTag(u8),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("score {0} out of range")]
    ScoreOutOfRange(i64),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// CRC32 over a byte slice.
pub fn crc32(data: &[u8]) -> u32 {
    let mut h = crc32fast::Hasher::new();
    h.update(data);
    h.finalize()
}

// ---------------------------------------------------------------------------
// write helpers
// ---------------------------------------------------------------------------

pub fn write_u8(w: &mut impl Write, val: u8) -> io::Result<()> {
    w.write_all(&[val])
}

pub fn write_u32(w: &mut impl Write, val: u32) -> io::Result<()> {
    w.write_all(&val.to_le_bytes())
}

pub fn write_u64(w: &mut impl Write, val: u64) -> io::Result<()> {
    w.write_all(&val.to_le_bytes())
}

pub fn write_i64(w: &mut impl Write, val: i64) -> io::Result<()> {
    w.write_all(&val.to_le_bytes())
}

/// Length-prefixed byte slice: `[len: u32][data]`.
pub fn write_bytes(w: &mut impl Write, data: &[u8]) -> io::Result<()> {
    let len = u32::try_from(data.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("data length {} exceeds u32::MAX", data.len()),
        )
    })?;
    write_u32(w, len)?;
    w.write_all(data)
}

// ---------------------------------------------------------------------------
// read helpers
// ---------------------------------------------------------------------------

pub fn read_u8(r: &mut impl Read) -> Result<u8, FormatError> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf).map_err(eof)?;
    Ok(buf[0])
}

pub fn read_u32(r: &mut impl Read) -> Result<u32, FormatError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).map_err(eof)?;
    Ok(u32::from_le_bytes(buf))
}

pub fn read_u64(r: &mut impl Read) -> Result<u64, FormatError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).map_err(eof)?;
    Ok(u64::from_le_bytes(buf))
}

pub fn read_i64(r: &mut impl Read) -> Result<i64, FormatError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).map_err(eof)?;
    Ok(i64::from_le_bytes(buf))
}

pub fn read_bytes(r: &mut impl Read) -> Result<Vec<u8>, FormatError> {
    let len = read_u32(r)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).map_err(eof)?;
    Ok(buf)
}

fn eof(e: io::Error) -> FormatError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        FormatError::UnexpectedEof
    } else {
        FormatError::Io(e)
    }
}

// ---------------------------------------------------------------------------
// typed value payloads
// ---------------------------------------------------------------------------

/// Writes `[type_tag][payload]` for a value.
pub(crate) fn write_value(w: &mut impl Write, value: &Value) -> Result<(), FormatError> {
    match value {
        Value::String(data) => {
            write_u8(w, TYPE_STRING)?;
            write_bytes(w, data)?;
        }
        Value::Hash(fields) => {
            write_u8(w, TYPE_HASH)?;
            write_u32(w, fields.len() as u32)?;
            for (field, val) in fields {
                write_bytes(w, field)?;
                write_bytes(w, val)?;
            }
        }
        Value::List(items) => {
            write_u8(w, TYPE_LIST)?;
            write_u32(w, items.len() as u32)?;
            for item in items {
                write_bytes(w, item)?;
            }
        }
        Value::Set(members) => {
            write_u8(w, TYPE_SET)?;
            write_u32(w, members.len() as u32)?;
            for member in members {
                write_bytes(w, member)?;
            }
        }
        Value::ZSet(members) => {
            write_u8(w, TYPE_ZSET)?;
            write_u32(w, members.len() as u32)?;
            for (member, score) in members {
                if !is_valid_score(*score) {
                    return Err(FormatError::ScoreOutOfRange(*score));
                }
                write_bytes(w, member)?;
                write_i64(w, *score)?;
            }
        }
    }
    Ok(())
}

/// Reads one `[type_tag][payload]` value.
pub(crate) fn read_value(r: &mut impl Read) -> Result<Value, FormatError> {
    let tag = read_u8(r)?;
    match tag {
        TYPE_STRING => Ok(Value::String(read_bytes(r)?)),
        TYPE_HASH => {
            let count = read_u32(r)?;
            let mut fields = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let field = read_bytes(r)?;
                let val = read_bytes(r)?;
                fields.push((field, val));
            }
            Ok(Value::Hash(fields))
        }
        TYPE_LIST => {
            let count = read_u32(r)?;
            let mut items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                items.push(read_bytes(r)?);
            }
            Ok(Value::List(items))
        }
        TYPE_SET => {
            let count = read_u32(r)?;
            let mut members = Vec::with_capacity(count as usize);
            for _ in 0..count {
                members.push(read_bytes(r)?);
            }
            Ok(Value::Set(members))
        }
        TYPE_ZSET => {
            let count = read_u32(r)?;
            let mut members = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let member = read_bytes(r)?;
                let score = read_i64(r)?;
                if !is_valid_score(score) {
                    return Err(FormatError::ScoreOutOfRange(score));
                }
                members.push((member, score));
            }
            Ok(Value::ZSet(members))
        }
        other => Err(FormatError::UnknownTag(other)),
    }
}

// ---------------------------------------------------------------------------
// dump blob
// ---------------------------------------------------------------------------

/// Serializes a typed value into a self-contained dump blob:
/// `[version][type_tag][payload][crc32]`.
pub fn encode_dump(value: &Value) -> Result<Vec<u8>, FormatError> {
    let mut buf = Vec::new();
    write_u8(&mut buf, FORMAT_VERSION)?;
    write_value(&mut buf, value)?;
    let crc = crc32(&buf);
    write_u32(&mut buf, crc)?;
    Ok(buf)
}

/// Decodes and verifies a dump blob.
pub fn decode_dump(blob: &[u8]) -> Result<Value, FormatError> {
    if blob.len() < 5 {
        return Err(FormatError::UnexpectedEof);
    }
    let (body, trailer) = blob.split_at(blob.len() - 4);
    let expected = u32::from_le_bytes(trailer.try_into().expect("4-byte trailer"));
    let actual = crc32(body);
    if expected != actual {
        return Err(FormatError::ChecksumMismatch { expected, actual });
    }

    let mut cursor = body;
    let version = read_u8(&mut cursor)?;
    if version != FORMAT_VERSION {
        return Err(FormatError::UnsupportedVersion(version));
    }
    let value = read_value(&mut cursor)?;
    if !cursor.is_empty() {
        return Err(FormatError::InvalidData(format!(
            "{} trailing bytes in dump blob",
            cursor.len()
        )));
    }
    Ok(value)
}
