//! Expiration clock.
//!
//! Deadlines are absolute wall-clock milliseconds since the Unix
//! epoch, because they are persisted in meta rows and dump files and
//! must survive a process restart. 0 means "no expiry".

use std::time::{SystemTime, UNIX_EPOCH};

/// Sentinel deadline meaning "persistent".
pub const NO_EXPIRY: u64 = 0;

/// Current wall time in milliseconds.
#[inline]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Returns `true` if a deadline has passed.
#[inline]
pub fn is_expired(expire_at_ms: u64) -> bool {
    expire_at_ms != NO_EXPIRY && expire_at_ms <= now_ms()
}

/// Converts a relative TTL in milliseconds to an absolute deadline.
///
/// Returns `None` for non-positive TTLs and on overflow.
#[inline]
pub fn ttl_ms_to_expire_at(ttl_ms: i64) -> Option<u64> {
    if ttl_ms <= 0 {
        return None;
    }
    now_ms().checked_add(ttl_ms as u64)
}

/// Converts a relative TTL in seconds to an absolute deadline.
#[inline]
pub fn ttl_secs_to_expire_at(ttl_secs: i64) -> Option<u64> {
    ttl_secs.checked_mul(1000).and_then(ttl_ms_to_expire_at)
}

/// Remaining TTL in milliseconds for a deadline, if one is set.
///
/// A deadline in the past reports `Some(0)`; callers treat those rows
/// as absent before asking.
#[inline]
pub fn expire_at_to_ttl_ms(expire_at_ms: u64) -> Option<u64> {
    if expire_at_ms == NO_EXPIRY {
        None
    } else {
        Some(expire_at_ms.saturating_sub(now_ms()))
    }
}
