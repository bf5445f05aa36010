//! Key-level commands: existence, deletion, TTL management, and
//! DUMP/RESTORE of whole typed values.

use bytes::Bytes;

use crate::codec::is_valid_score;
use crate::engine::Batch;
use crate::error::{err_args, StoreError};
use crate::expire;
use crate::store::row::{HashRow, ListRow, SetRow, StringRow, TypeCode, Value, ZSetRow};
use crate::store::{Forward, Store};
use crate::util::{parse_int, MarkSet};

impl Store {
    /// DEL key [key ...]
    pub fn del(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.is_empty() {
            return Err(err_args!("len(args) = {}, expect != 0", args.len()));
        }
        let _g = self.acquire_write();

        let mut ms = MarkSet::new();
        let mut bt = Batch::new();
        let mut n = 0i64;
        for key in args {
            if ms.has(key) {
                continue;
            }
            if let Some(r) = self.load_row(db, key, Some(&mut bt))? {
                self.delete_object(&r, &mut bt)?;
                n += 1;
            }
            ms.set(key);
        }

        self.commit(bt, Forward::new(db, "Del", args))?;
        Ok(n)
    }

    /// EXISTS key
    pub fn exists(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.len() != 1 {
            return Err(err_args!("len(args) = {}, expect = 1", args.len()));
        }
        let _g = self.acquire_read();
        Ok(i64::from(self.load_row(db, &args[0], None)?.is_some()))
    }

    /// TYPE key — `None` for a missing key.
    pub fn type_of(&self, db: u32, args: &[Bytes]) -> Result<Option<TypeCode>, StoreError> {
        if args.len() != 1 {
            return Err(err_args!("len(args) = {}, expect = 1", args.len()));
        }
        let _g = self.acquire_read();
        Ok(self.load_row(db, &args[0], None)?.map(|r| r.code()))
    }

    /// TTL key — -2 missing, -1 persistent, otherwise seconds left.
    pub fn ttl(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        Ok(match self.pttl(db, args)? {
            ms if ms < 0 => ms,
            ms => ms / 1000,
        })
    }

    /// PTTL key — -2 missing, -1 persistent, otherwise milliseconds
    /// left.
    pub fn pttl(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.len() != 1 {
            return Err(err_args!("len(args) = {}, expect = 1", args.len()));
        }
        let _g = self.acquire_read();

        match self.load_row(db, &args[0], None)? {
            None => Ok(-2),
            Some(r) => match expire::expire_at_to_ttl_ms(r.header().expire_at) {
                None => Ok(-1),
                Some(ms) => Ok(ms as i64),
            },
        }
    }

    /// EXPIRE key seconds
    pub fn expire(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.len() != 2 {
            return Err(err_args!("len(args) = {}, expect = 2", args.len()));
        }
        let ttl = parse_int(&args[1])?;
        self.set_expire_at(db, args, "Expire", expire::ttl_secs_to_expire_at(ttl))
    }

    /// PEXPIRE key milliseconds
    pub fn pexpire(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.len() != 2 {
            return Err(err_args!("len(args) = {}, expect = 2", args.len()));
        }
        let ttl = parse_int(&args[1])?;
        self.set_expire_at(db, args, "PExpire", expire::ttl_ms_to_expire_at(ttl))
    }

    /// EXPIREAT key timestamp-seconds
    pub fn expire_at(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.len() != 2 {
            return Err(err_args!("len(args) = {}, expect = 2", args.len()));
        }
        let at = parse_int(&args[1])?;
        let deadline = at.checked_mul(1000).filter(|v| *v > 0).map(|v| v as u64);
        self.set_expire_at(db, args, "ExpireAt", deadline)
    }

    /// PEXPIREAT key timestamp-milliseconds
    pub fn pexpire_at(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.len() != 2 {
            return Err(err_args!("len(args) = {}, expect = 2", args.len()));
        }
        let at = parse_int(&args[1])?;
        let deadline = (at > 0).then_some(at as u64);
        self.set_expire_at(db, args, "PExpireAt", deadline)
    }

    /// Shared EXPIRE-family core. A deadline of `None` (non-positive
    /// TTL or timestamp) deletes the key outright, matching the
    /// reference semantics.
    fn set_expire_at(
        &self,
        db: u32,
        args: &[Bytes],
        op: &str,
        deadline: Option<u64>,
    ) -> Result<i64, StoreError> {
        let key = &args[0];
        let _g = self.acquire_write();

        let mut bt = Batch::new();
        let Some(mut r) = self.load_row(db, key, Some(&mut bt))? else {
            // still commit: an expired row may have been staged for
            // deletion above
            self.commit(bt, Forward::new(db, op, args))?;
            return Ok(0);
        };

        match deadline {
            Some(at) if !expire::is_expired(at) => {
                r.header_mut().expire_at = at;
                bt.set(r.header().meta_key(), r.meta_value());
            }
            _ => {
                self.delete_object(&r, &mut bt)?;
            }
        }

        self.commit(bt, Forward::new(db, op, args))?;
        Ok(1)
    }

    /// PERSIST key
    pub fn persist(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.len() != 1 {
            return Err(err_args!("len(args) = {}, expect = 1", args.len()));
        }
        let _g = self.acquire_write();

        let mut bt = Batch::new();
        let Some(mut r) = self.load_row(db, &args[0], Some(&mut bt))? else {
            self.commit(bt, Forward::new(db, "Persist", args))?;
            return Ok(0);
        };

        if r.header().expire_at == expire::NO_EXPIRY {
            return Ok(0);
        }

        r.header_mut().expire_at = expire::NO_EXPIRY;
        bt.set(r.header().meta_key(), r.meta_value());
        self.commit(bt, Forward::new(db, "Persist", args))?;
        Ok(1)
    }

    /// DUMP key — the fully-typed value, for the dump codec to
    /// serialize. `None` for a missing key.
    pub fn dump(&self, db: u32, args: &[Bytes]) -> Result<Option<Value>, StoreError> {
        if args.len() != 1 {
            return Err(err_args!("len(args) = {}, expect = 1", args.len()));
        }
        let _g = self.acquire_read();

        match self.load_row(db, &args[0], None)? {
            Some(r) => Ok(Some(self.load_object(&r)?)),
            None => Ok(None),
        }
    }

    /// RESTORE key ttlms value — `args` is the original wire triple
    /// (kept for forwarding); `value` is the decoded dump payload.
    pub fn restore_object(
        &self,
        db: u32,
        args: &[Bytes],
        ttl_ms: i64,
        value: Value,
    ) -> Result<(), StoreError> {
        if args.len() != 3 {
            return Err(err_args!("len(args) = {}, expect = 3", args.len()));
        }
        let key = &args[0];
        if ttl_ms < 0 {
            return Err(err_args!("invalid ttl = {ttl_ms}"));
        }
        let _g = self.acquire_write();

        let mut bt = Batch::new();
        if self.load_row(db, key, Some(&mut bt))?.is_some() {
            return Err(StoreError::BusyKey);
        }

        let expire_at = if ttl_ms == 0 {
            expire::NO_EXPIRY
        } else {
            expire::ttl_ms_to_expire_at(ttl_ms)
                .ok_or_else(|| err_args!("invalid ttl = {ttl_ms}"))?
        };

        store_object(&mut bt, db, key, expire_at, &value)?;
        self.commit(bt, Forward::new(db, "Restore", args))
    }
}

/// Stages every engine row of a typed value. Used by RESTORE and by
/// anything replaying a dump record into the store.
pub(crate) fn store_object(
    bt: &mut Batch,
    db: u32,
    key: &[u8],
    expire_at: u64,
    value: &Value,
) -> Result<(), StoreError> {
    match value {
        Value::String(v) => {
            if v.is_empty() {
                return Err(StoreError::ObjectValue("empty string value".into()));
            }
            let mut o = StringRow::new(db, key);
            o.value = v.clone();
            o.hdr.expire_at = expire_at;
            bt.set(o.data_key(), o.data_value());
            bt.set(o.hdr.meta_key(), o.meta_value());
        }
        Value::Hash(fields) => {
            if fields.is_empty() {
                return Err(StoreError::ObjectValue("empty hash".into()));
            }
            let mut o = HashRow::new(db, key);
            o.hdr.expire_at = expire_at;
            let mut ms = MarkSet::new();
            for (field, v) in fields {
                if field.is_empty() {
                    return Err(StoreError::ObjectValue("empty hash field".into()));
                }
                ms.set(field);
                bt.set(o.field_key(field), HashRow::field_value(v));
            }
            o.size = ms.len();
            bt.set(o.hdr.meta_key(), o.meta_value());
        }
        Value::List(items) => {
            if items.is_empty() {
                return Err(StoreError::ObjectValue("empty list".into()));
            }
            let mut o = ListRow::new(db, key);
            o.hdr.expire_at = expire_at;
            o.head = 0;
            o.tail = items.len() as i64 - 1;
            for (i, v) in items.iter().enumerate() {
                bt.set(o.slot_key(i as i64), ListRow::slot_value(v));
            }
            bt.set(o.hdr.meta_key(), o.meta_value());
        }
        Value::Set(members) => {
            if members.is_empty() {
                return Err(StoreError::ObjectValue("empty set".into()));
            }
            let mut o = SetRow::new(db, key);
            o.hdr.expire_at = expire_at;
            let mut ms = MarkSet::new();
            for member in members {
                if member.is_empty() {
                    return Err(StoreError::ObjectValue("empty set member".into()));
                }
                ms.set(member);
                bt.set(o.member_key(member), SetRow::member_value());
            }
            o.size = ms.len();
            bt.set(o.hdr.meta_key(), o.meta_value());
        }
        Value::ZSet(members) => {
            if members.is_empty() {
                return Err(StoreError::ObjectValue("empty zset".into()));
            }
            let mut o = ZSetRow::new(db, key);
            o.hdr.expire_at = expire_at;
            let mut ms = MarkSet::new();
            for (member, score) in members {
                if member.is_empty() {
                    return Err(StoreError::ObjectValue("empty zset member".into()));
                }
                if !is_valid_score(*score) {
                    return Err(StoreError::InvalidScore(*score));
                }
                ms.set(member);
                bt.set(o.member_key(member), ZSetRow::member_value(*score));
                bt.set(o.index_key(*score, member), ZSetRow::index_value());
            }
            o.size = ms.len();
            bt.set(o.hdr.meta_key(), o.meta_value());
        }
    }
    Ok(())
}
