//! Small helpers shared across store operations: element
//! deduplication and numeric parsing/formatting.

use std::collections::HashSet;

use crate::error::{err_args, StoreError};

/// Deduplication set over byte strings, used to count distinct
/// elements touched within a single mutation (MSET keys, ZADD
/// members, ...).
#[derive(Debug, Default)]
pub struct MarkSet {
    seen: HashSet<Vec<u8>>,
}

impl MarkSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a value. Repeated marks are idempotent.
    pub fn set(&mut self, v: &[u8]) {
        self.seen.insert(v.to_vec());
    }

    /// Returns `true` if the value has been marked.
    pub fn has(&self, v: &[u8]) -> bool {
        self.seen.contains(v)
    }

    /// Number of distinct marked values.
    pub fn len(&self) -> i64 {
        self.seen.len() as i64
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Parses a signed decimal integer from raw command bytes.
pub fn parse_int(arg: &[u8]) -> Result<i64, StoreError> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| err_args!("value is not an integer or out of range"))
}

/// Parses an unsigned decimal integer from raw command bytes.
pub fn parse_uint(arg: &[u8]) -> Result<u64, StoreError> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| err_args!("value is not an unsigned integer or out of range"))
}

/// Parses a decimal float from raw command bytes, rejecting NaN and
/// infinities.
pub fn parse_float(arg: &[u8]) -> Result<f64, StoreError> {
    let v = std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .ok_or_else(|| err_args!("value is not a valid float"))?;
    if v.is_nan() || v.is_infinite() {
        return Err(err_args!("value is not a valid float"));
    }
    Ok(v)
}

/// Formats a signed integer as decimal ASCII.
pub fn format_int(v: i64) -> Vec<u8> {
    v.to_string().into_bytes()
}

/// Formats a float the way the wire expects: integral results drop
/// the fraction, everything else uses the shortest representation
/// that round-trips.
pub fn format_float(v: f64) -> Vec<u8> {
    if v == v.trunc() && v.abs() < 1e17 {
        format!("{}", v as i64).into_bytes()
    } else {
        format!("{v}").into_bytes()
    }
}
