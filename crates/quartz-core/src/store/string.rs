//! String commands.

use bytes::Bytes;

use crate::codec::MAX_VARBYTES_LEN;
use crate::engine::Batch;
use crate::error::{err_args, StoreError};
use crate::expire;
use crate::store::row::{Row, StringRow, TypeCode};
use crate::store::{Forward, Store};
use crate::util::{format_float, format_int, parse_float, parse_int, parse_uint, MarkSet};

const SET_NX_FLAG: u8 = 1 << 0;
const SET_XX_FLAG: u8 = 1 << 1;

/// Popcount over a byte slice.
fn bit_count(buf: &[u8]) -> i64 {
    buf.iter().map(|b| b.count_ones() as i64).sum()
}

/// Clamps a possibly-negative range index into `[min, max)` space.
fn adjust_index(index: i64, min: i64, max: i64) -> i64 {
    if index >= 0 {
        index + min
    } else {
        index + max
    }
}

impl Store {
    pub(crate) fn load_string_row(
        &self,
        db: u32,
        key: &[u8],
        batch: Option<&mut Batch>,
    ) -> Result<Option<StringRow>, StoreError> {
        match self.load_row(db, key, batch)? {
            Some(Row::String(o)) => Ok(Some(o)),
            Some(_) => Err(StoreError::NotString),
            None => Ok(None),
        }
    }

    fn load_string_value(&self, o: &mut StringRow) -> Result<bool, StoreError> {
        match self.reader().get(&o.data_key())? {
            Some(raw) => {
                o.value = StringRow::parse_data_value(&raw)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// GET key
    pub fn get(&self, db: u32, args: &[Bytes]) -> Result<Option<Vec<u8>>, StoreError> {
        if args.len() != 1 {
            return Err(err_args!("len(args) = {}, expect = 1", args.len()));
        }
        let _g = self.acquire_read();

        match self.load_string_row(db, &args[0], None)? {
            Some(mut o) => {
                self.load_string_value(&mut o)?;
                Ok(Some(o.value))
            }
            None => Ok(None),
        }
    }

    /// APPEND key value
    pub fn append(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.len() != 2 {
            return Err(err_args!("len(args) = {}, expect = 2", args.len()));
        }
        let key = &args[0];
        let value = &args[1];
        let _g = self.acquire_write();

        let mut bt = Batch::new();
        let o = match self.load_string_row(db, key, Some(&mut bt))? {
            Some(mut o) => {
                self.load_string_value(&mut o)?;
                o.value.extend_from_slice(value);
                o
            }
            None => {
                let mut o = StringRow::new(db, key);
                o.value = value.to_vec();
                bt.set(o.hdr.meta_key(), o.meta_value());
                o
            }
        };
        bt.set(o.data_key(), o.data_value());

        let n = o.value.len() as i64;
        self.commit(bt, Forward::new(db, "Append", args))?;
        Ok(n)
    }

    /// SET key value [EX seconds] [PX milliseconds] [NX|XX]
    pub fn set(&self, db: u32, args: &[Bytes]) -> Result<(), StoreError> {
        if args.len() < 2 {
            return Err(err_args!("len(args) = {}, expect >= 2", args.len()));
        }
        let key = &args[0];
        let value = &args[1];

        let mut expire_at = expire::NO_EXPIRY;
        let mut flag = 0u8;

        let mut i = 2;
        while i < args.len() {
            match args[i].to_ascii_uppercase().as_slice() {
                b"EX" => {
                    let ttl = args
                        .get(i + 1)
                        .ok_or_else(|| err_args!("invalid set argument for EX"))
                        .and_then(|a| parse_int(a))?;
                    expire_at = expire::ttl_secs_to_expire_at(ttl)
                        .ok_or_else(|| err_args!("invalid EX seconds = {ttl}"))?;
                    i += 2;
                }
                b"PX" => {
                    let ttl = args
                        .get(i + 1)
                        .ok_or_else(|| err_args!("invalid set argument for PX"))
                        .and_then(|a| parse_int(a))?;
                    expire_at = expire::ttl_ms_to_expire_at(ttl)
                        .ok_or_else(|| err_args!("invalid PX milliseconds = {ttl}"))?;
                    i += 2;
                }
                b"NX" => {
                    flag |= SET_NX_FLAG;
                    i += 1;
                }
                b"XX" => {
                    flag |= SET_XX_FLAG;
                    i += 1;
                }
                _ => return Err(err_args!("invalid set argument at {i}")),
            }
        }

        let _g = self.acquire_write();

        let mut bt = Batch::new();
        let existing = self.load_row(db, key, Some(&mut bt))?;

        // NX demands the key be absent (or expired), XX the opposite
        if flag & SET_NX_FLAG != 0 && existing.is_some() {
            return Err(StoreError::SetAborted);
        }
        if flag & SET_XX_FLAG != 0 && existing.is_none() {
            return Err(StoreError::SetAborted);
        }

        // a non-string value must be torn down before the overwrite
        if let Some(r) = existing {
            if r.code() != TypeCode::String {
                self.delete_object(&r, &mut bt)?;
            }
        }

        let mut o = StringRow::new(db, key);
        o.value = value.to_vec();
        o.hdr.expire_at = expire_at;
        bt.set(o.data_key(), o.data_value());
        bt.set(o.hdr.meta_key(), o.meta_value());

        self.commit(bt, Forward::new(db, "Set", args))
    }

    /// PSETEX key milliseconds value
    pub fn pset_ex(&self, db: u32, args: &[Bytes]) -> Result<(), StoreError> {
        if args.len() != 3 {
            return Err(err_args!("len(args) = {}, expect = 3", args.len()));
        }
        let rewritten = [
            args[0].clone(),
            args[2].clone(),
            Bytes::from_static(b"PX"),
            args[1].clone(),
        ];
        self.set(db, &rewritten)
    }

    /// SETEX key seconds value
    pub fn set_ex(&self, db: u32, args: &[Bytes]) -> Result<(), StoreError> {
        if args.len() != 3 {
            return Err(err_args!("len(args) = {}, expect = 3", args.len()));
        }
        let rewritten = [
            args[0].clone(),
            args[2].clone(),
            Bytes::from_static(b"EX"),
            args[1].clone(),
        ];
        self.set(db, &rewritten)
    }

    /// SETNX key value
    pub fn set_nx(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.len() != 2 {
            return Err(err_args!("len(args) = {}, expect = 2", args.len()));
        }
        let rewritten = [args[0].clone(), args[1].clone(), Bytes::from_static(b"NX")];
        match self.set(db, &rewritten) {
            Ok(()) => Ok(1),
            Err(StoreError::SetAborted) => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// GETSET key value
    pub fn get_set(&self, db: u32, args: &[Bytes]) -> Result<Option<Vec<u8>>, StoreError> {
        if args.len() != 2 {
            return Err(err_args!("len(args) = {}, expect = 2", args.len()));
        }
        let key = &args[0];
        let value = &args[1];
        let _g = self.acquire_write();

        let mut bt = Batch::new();
        let (mut o, old) = match self.load_string_row(db, key, Some(&mut bt))? {
            Some(mut o) => {
                self.load_string_value(&mut o)?;
                let old = std::mem::take(&mut o.value);
                // plain SET semantics: any surviving TTL is dropped
                if o.hdr.expire_at != expire::NO_EXPIRY {
                    o.hdr.expire_at = expire::NO_EXPIRY;
                    bt.set(o.hdr.meta_key(), o.meta_value());
                }
                (o, Some(old))
            }
            None => {
                let o = StringRow::new(db, key);
                bt.set(o.hdr.meta_key(), o.meta_value());
                (o, None)
            }
        };

        o.value = value.to_vec();
        bt.set(o.data_key(), o.data_value());

        self.commit(bt, Forward::new(db, "Set", args))?;
        Ok(old)
    }

    fn incr_int(&self, db: u32, key: &Bytes, delta: i64) -> Result<i64, StoreError> {
        let mut bt = Batch::new();
        let (mut o, existed) = match self.load_string_row(db, key, Some(&mut bt))? {
            Some(mut o) => {
                self.load_string_value(&mut o)?;
                (o, true)
            }
            None => {
                let o = StringRow::new(db, key);
                bt.set(o.hdr.meta_key(), o.meta_value());
                (o, false)
            }
        };

        // a missing key counts from 0; an existing value must parse
        let base = if existed { parse_int(&o.value)? } else { 0 };
        let next = base
            .checked_add(delta)
            .ok_or_else(|| err_args!("increment or decrement would overflow"))?;

        o.value = format_int(next);
        bt.set(o.data_key(), o.data_value());

        // replicas replay the delta against their own copy
        let fw_args = vec![key.clone(), Bytes::from(format_int(delta))];
        self.commit(bt, Forward { db, op: "IncrBy".into(), args: fw_args })?;
        Ok(next)
    }

    fn incr_float(&self, db: u32, key: &Bytes, delta: f64) -> Result<f64, StoreError> {
        let mut bt = Batch::new();
        let (mut o, existed) = match self.load_string_row(db, key, Some(&mut bt))? {
            Some(mut o) => {
                self.load_string_value(&mut o)?;
                (o, true)
            }
            None => {
                let o = StringRow::new(db, key);
                bt.set(o.hdr.meta_key(), o.meta_value());
                (o, false)
            }
        };

        let base = if existed { parse_float(&o.value)? } else { 0.0 };
        let next = base + delta;
        if next.is_nan() || next.is_infinite() {
            return Err(StoreError::NanOrInfinity);
        }

        o.value = format_float(next);
        bt.set(o.data_key(), o.data_value());

        let fw_args = vec![key.clone(), Bytes::from(format_float(delta))];
        self.commit(
            bt,
            Forward { db, op: "IncrByFloat".into(), args: fw_args },
        )?;
        Ok(next)
    }

    /// INCR key
    pub fn incr(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.len() != 1 {
            return Err(err_args!("len(args) = {}, expect = 1", args.len()));
        }
        let _g = self.acquire_write();
        self.incr_int(db, &args[0], 1)
    }

    /// INCRBY key delta
    pub fn incr_by(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.len() != 2 {
            return Err(err_args!("len(args) = {}, expect = 2", args.len()));
        }
        let delta = parse_int(&args[1])?;
        let _g = self.acquire_write();
        self.incr_int(db, &args[0], delta)
    }

    /// DECR key
    pub fn decr(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.len() != 1 {
            return Err(err_args!("len(args) = {}, expect = 1", args.len()));
        }
        let _g = self.acquire_write();
        self.incr_int(db, &args[0], -1)
    }

    /// DECRBY key delta
    pub fn decr_by(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.len() != 2 {
            return Err(err_args!("len(args) = {}, expect = 2", args.len()));
        }
        let delta = parse_int(&args[1])?;
        let _g = self.acquire_write();
        self.incr_int(db, &args[0], delta.checked_neg().ok_or_else(|| {
            err_args!("increment or decrement would overflow")
        })?)
    }

    /// INCRBYFLOAT key delta
    pub fn incr_by_float(&self, db: u32, args: &[Bytes]) -> Result<f64, StoreError> {
        if args.len() != 2 {
            return Err(err_args!("len(args) = {}, expect = 2", args.len()));
        }
        let delta = parse_float(&args[1])?;
        let _g = self.acquire_write();
        self.incr_float(db, &args[0], delta)
    }

    /// SETBIT key offset value
    pub fn set_bit(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.len() != 3 {
            return Err(err_args!("len(args) = {}, expect = 3", args.len()));
        }
        let key = &args[0];
        let offset = parse_uint(&args[1])?;
        let value = parse_uint(&args[2])?;

        if offset > MAX_VARBYTES_LEN {
            return Err(err_args!("bit offset is out of range, offset = {offset}"));
        }
        if value > 1 {
            return Err(err_args!("bit is not 0 or 1, bit = {value}"));
        }

        let _g = self.acquire_write();

        let mut bt = Batch::new();
        let mut o = match self.load_string_row(db, key, Some(&mut bt))? {
            Some(mut o) => {
                self.load_string_value(&mut o)?;
                o
            }
            None => {
                let o = StringRow::new(db, key);
                bt.set(o.hdr.meta_key(), o.meta_value());
                o
            }
        };

        let byte_offset = (offset >> 3) as usize;
        if byte_offset + 1 > o.value.len() {
            o.value.resize(byte_offset + 1, 0);
        }

        let bit = 7 - (offset & 0x7) as u8;
        let old = (o.value[byte_offset] >> bit) & 1;
        o.value[byte_offset] &= !(1 << bit);
        o.value[byte_offset] |= ((value & 1) as u8) << bit;

        bt.set(o.data_key(), o.data_value());
        self.commit(bt, Forward::new(db, "SetBit", args))?;
        Ok(i64::from(old))
    }

    /// SETRANGE key offset value
    pub fn set_range(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.len() != 3 {
            return Err(err_args!("len(args) = {}, expect = 3", args.len()));
        }
        let key = &args[0];
        let offset = parse_uint(&args[1])?;
        let value = &args[2];

        if offset > MAX_VARBYTES_LEN {
            return Err(err_args!("offset = {offset} out of range"));
        }

        let _g = self.acquire_write();

        let mut bt = Batch::new();
        let mut o = match self.load_string_row(db, key, Some(&mut bt))? {
            Some(mut o) => {
                self.load_string_value(&mut o)?;
                o
            }
            None => {
                let o = StringRow::new(db, key);
                bt.set(o.hdr.meta_key(), o.meta_value());
                o
            }
        };

        let end = offset as usize + value.len();
        if end > o.value.len() {
            o.value.resize(end, 0);
        }
        o.value[offset as usize..end].copy_from_slice(value);

        bt.set(o.data_key(), o.data_value());
        let n = o.value.len() as i64;
        self.commit(bt, Forward::new(db, "SetRange", args))?;
        Ok(n)
    }

    /// MSET key value [key value ...]
    pub fn mset(&self, db: u32, args: &[Bytes]) -> Result<(), StoreError> {
        if args.is_empty() || args.len() % 2 != 0 {
            return Err(err_args!(
                "len(args) = {}, expect != 0 && mod 2 = 0",
                args.len()
            ));
        }
        let _g = self.acquire_write();

        // walk back-to-front so a repeated key keeps its last value
        let mut ms = MarkSet::new();
        let mut bt = Batch::new();
        for i in (0..args.len() / 2).rev() {
            let (key, value) = (&args[i * 2], &args[i * 2 + 1]);
            if ms.has(key) {
                continue;
            }
            self.check_exist_and_delete(&mut bt, db, key)?;

            let mut o = StringRow::new(db, key);
            o.value = value.to_vec();
            bt.set(o.data_key(), o.data_value());
            bt.set(o.hdr.meta_key(), o.meta_value());
            ms.set(key);
        }

        self.commit(bt, Forward::new(db, "MSet", args))
    }

    /// MSETNX key value [key value ...]
    pub fn mset_nx(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.is_empty() || args.len() % 2 != 0 {
            return Err(err_args!(
                "len(args) = {}, expect != 0 && mod 2 = 0",
                args.len()
            ));
        }
        let _g = self.acquire_write();

        let mut bt = Batch::new();
        for i in (0..args.len()).step_by(2) {
            if self.load_row(db, &args[i], Some(&mut bt))?.is_some() {
                return Ok(0);
            }
        }

        let mut ms = MarkSet::new();
        for i in (0..args.len() / 2).rev() {
            let (key, value) = (&args[i * 2], &args[i * 2 + 1]);
            if ms.has(key) {
                continue;
            }
            let mut o = StringRow::new(db, key);
            o.value = value.to_vec();
            bt.set(o.data_key(), o.data_value());
            bt.set(o.hdr.meta_key(), o.meta_value());
            ms.set(key);
        }

        self.commit(bt, Forward::new(db, "MSet", args))?;
        Ok(1)
    }

    /// MGET key [key ...]
    pub fn mget(&self, db: u32, args: &[Bytes]) -> Result<Vec<Option<Vec<u8>>>, StoreError> {
        if args.is_empty() {
            return Err(err_args!("len(args) = {}, expect != 0", args.len()));
        }
        let _g = self.acquire_read();

        let mut values = Vec::with_capacity(args.len());
        for key in args {
            match self.load_string_row(db, key, None)? {
                Some(mut o) => {
                    self.load_string_value(&mut o)?;
                    values.push(Some(o.value));
                }
                None => values.push(None),
            }
        }
        Ok(values)
    }

    /// GETBIT key offset
    pub fn get_bit(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.len() != 2 {
            return Err(err_args!("len(args) = {}, expect = 2", args.len()));
        }
        let offset = parse_uint(&args[1])?;
        if offset > MAX_VARBYTES_LEN {
            return Err(err_args!("bit offset is out of range, offset = {offset}"));
        }
        let _g = self.acquire_read();

        let Some(mut o) = self.load_string_row(db, &args[0], None)? else {
            return Ok(0);
        };
        self.load_string_value(&mut o)?;

        let byte_offset = (offset >> 3) as usize;
        if byte_offset >= o.value.len() {
            return Ok(0);
        }
        let bit = 7 - (offset & 0x7) as u8;
        Ok(i64::from((o.value[byte_offset] >> bit) & 1))
    }

    /// GETRANGE key beg end
    pub fn get_range(&self, db: u32, args: &[Bytes]) -> Result<Option<Vec<u8>>, StoreError> {
        if args.len() != 3 {
            return Err(err_args!("len(args) = {}, expect = 3", args.len()));
        }
        let beg = parse_int(&args[1])?;
        let end = parse_int(&args[2])?;
        let _g = self.acquire_read();

        let Some(mut o) = self.load_string_row(db, &args[0], None)? else {
            return Ok(None);
        };
        self.load_string_value(&mut o)?;

        let (min, max) = (0i64, o.value.len() as i64);
        let beg = adjust_index(beg, min, max).max(min);
        let end = adjust_index(end, min, max).min(max - 1);
        if beg <= end {
            Ok(Some(o.value[beg as usize..=end as usize].to_vec()))
        } else {
            Ok(None)
        }
    }

    /// STRLEN key
    pub fn strlen(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.len() != 1 {
            return Err(err_args!("len(args) = {}, expect = 1", args.len()));
        }
        let _g = self.acquire_read();

        match self.load_string_row(db, &args[0], None)? {
            Some(mut o) => {
                self.load_string_value(&mut o)?;
                Ok(o.value.len() as i64)
            }
            None => Ok(0),
        }
    }

    /// BITCOUNT key [beg end]
    pub fn bit_count(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.len() != 1 && args.len() != 3 {
            return Err(err_args!("len(args) = {}, expect = 1 or 3", args.len()));
        }
        let (mut beg, mut end) = (0i64, -1i64);
        if args.len() == 3 {
            beg = parse_int(&args[1])?;
            end = parse_int(&args[2])?;
        }
        let _g = self.acquire_read();

        let Some(mut o) = self.load_string_row(db, &args[0], None)? else {
            return Ok(0);
        };
        self.load_string_value(&mut o)?;

        let (min, max) = (0i64, o.value.len() as i64);
        beg = adjust_index(beg, min, max).max(min);
        end = adjust_index(end, min, max).min(max - 1);
        if beg > end {
            return Ok(0);
        }
        Ok(bit_count(&o.value[beg as usize..=end as usize]))
    }

    /// BITOP op destkey key [key ...]
    pub fn bit_op(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.len() < 3 {
            return Err(err_args!("len(args) = {}, expect >= 3", args.len()));
        }
        let op = args[0].to_ascii_lowercase();
        let dest_key = &args[1];
        let src_keys = &args[2..];

        if op.as_slice() == b"not" && src_keys.len() > 1 {
            return Err(err_args!(
                "BITOP NOT must be called with a single source key, got {}",
                src_keys.len()
            ));
        }
        if !matches!(op.as_slice(), b"and" | b"or" | b"xor" | b"not") {
            return Err(err_args!("invalid op type"));
        }

        let _g = self.acquire_write();
        let mut bt = Batch::new();

        let mut value = match self.load_string_row(db, &src_keys[0], Some(&mut bt))? {
            Some(mut o) => {
                self.load_string_value(&mut o)?;
                if op.as_slice() == b"not" {
                    for b in o.value.iter_mut() {
                        *b = !*b;
                    }
                }
                o.value
            }
            None => Vec::new(),
        };

        for src in &src_keys[1..] {
            let mut operand = match self.load_string_row(db, src, Some(&mut bt))? {
                Some(mut o) => {
                    self.load_string_value(&mut o)?;
                    o.value
                }
                None => Vec::new(),
            };

            // keep the longer buffer as the accumulator
            if value.len() < operand.len() {
                std::mem::swap(&mut value, &mut operand);
            }

            for j in 0..operand.len() {
                match op.as_slice() {
                    b"and" => value[j] &= operand[j],
                    b"or" => value[j] |= operand[j],
                    b"xor" => value[j] ^= operand[j],
                    _ => unreachable!("op validated above"),
                }
            }
            // the tail combines with implicit zero bytes
            if op.as_slice() == b"and" {
                for b in value.iter_mut().skip(operand.len()) {
                    *b = 0;
                }
            }
        }

        self.check_exist_and_delete(&mut bt, db, dest_key)?;

        let mut no = StringRow::new(db, dest_key);
        no.value = value;
        bt.set(no.data_key(), no.data_value());
        bt.set(no.hdr.meta_key(), no.meta_value());

        let n = no.value.len() as i64;
        self.commit(bt, Forward::new(db, "BitOp", args))?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::StoreError;
    use crate::store::testutil::{args, new_store};

    #[test]
    fn set_then_get() {
        let s = new_store();
        s.set(0, &args(&[b"foo", b"bar"])).unwrap();
        assert_eq!(s.get(0, &args(&[b"foo"])).unwrap().unwrap(), b"bar");
        assert_eq!(s.get(0, &args(&[b"missing"])).unwrap(), None);
    }

    #[test]
    fn databases_are_disjoint() {
        let s = new_store();
        s.set(0, &args(&[b"k", b"zero"])).unwrap();
        s.set(1, &args(&[b"k", b"one"])).unwrap();
        assert_eq!(s.get(0, &args(&[b"k"])).unwrap().unwrap(), b"zero");
        assert_eq!(s.get(1, &args(&[b"k"])).unwrap().unwrap(), b"one");
    }

    #[test]
    fn append_grows_value() {
        let s = new_store();
        s.set(0, &args(&[b"foo", b"bar"])).unwrap();
        assert_eq!(s.append(0, &args(&[b"foo", b"baz"])).unwrap(), 6);
        assert_eq!(s.get(0, &args(&[b"foo"])).unwrap().unwrap(), b"barbaz");
        assert_eq!(s.strlen(0, &args(&[b"foo"])).unwrap(), 6);
    }

    #[test]
    fn append_creates_missing_key() {
        let s = new_store();
        assert_eq!(s.append(0, &args(&[b"new", b"abc"])).unwrap(), 3);
        assert_eq!(s.get(0, &args(&[b"new"])).unwrap().unwrap(), b"abc");
    }

    #[test]
    fn set_nx_and_xx() {
        let s = new_store();
        // NX on a fresh key succeeds, on an existing one aborts
        assert_eq!(s.set_nx(0, &args(&[b"k", b"v1"])).unwrap(), 1);
        assert_eq!(s.set_nx(0, &args(&[b"k", b"v2"])).unwrap(), 0);
        assert_eq!(s.get(0, &args(&[b"k"])).unwrap().unwrap(), b"v1");

        // XX on a missing key aborts
        let err = s.set(0, &args(&[b"absent", b"v", b"XX"])).unwrap_err();
        assert!(matches!(err, StoreError::SetAborted));
        // XX on an existing key succeeds
        s.set(0, &args(&[b"k", b"v3", b"XX"])).unwrap();
        assert_eq!(s.get(0, &args(&[b"k"])).unwrap().unwrap(), b"v3");
    }

    #[test]
    fn set_rejects_bad_options() {
        let s = new_store();
        assert!(s.set(0, &args(&[b"k", b"v", b"EX"])).is_err());
        assert!(s.set(0, &args(&[b"k", b"v", b"EX", b"nope"])).is_err());
        assert!(s.set(0, &args(&[b"k", b"v", b"EX", b"-1"])).is_err());
        assert!(s.set(0, &args(&[b"k", b"v", b"BOGUS"])).is_err());
    }

    #[test]
    fn getset_swaps_and_clears_ttl() {
        let s = new_store();
        assert_eq!(s.get_set(0, &args(&[b"k", b"new"])).unwrap(), None);
        assert_eq!(
            s.get_set(0, &args(&[b"k", b"newer"])).unwrap().unwrap(),
            b"new"
        );

        s.set(0, &args(&[b"t", b"v", b"EX", b"100"])).unwrap();
        s.get_set(0, &args(&[b"t", b"w"])).unwrap();
        assert_eq!(s.ttl(0, &args(&[b"t"])).unwrap(), -1);
    }

    #[test]
    fn incr_decr_family() {
        let s = new_store();
        assert_eq!(s.incr(0, &args(&[b"n"])).unwrap(), 1);
        assert_eq!(s.incr_by(0, &args(&[b"n", b"10"])).unwrap(), 11);
        assert_eq!(s.decr(0, &args(&[b"n"])).unwrap(), 10);
        assert_eq!(s.decr_by(0, &args(&[b"n", b"4"])).unwrap(), 6);
        assert_eq!(s.get(0, &args(&[b"n"])).unwrap().unwrap(), b"6");
    }

    #[test]
    fn incr_non_numeric_errors() {
        let s = new_store();
        s.set(0, &args(&[b"k", b"v"])).unwrap();
        assert!(s.incr(0, &args(&[b"k"])).is_err());
        // SET "5"; INCR; GET = "6"
        s.set(0, &args(&[b"k", b"5"])).unwrap();
        assert_eq!(s.incr(0, &args(&[b"k"])).unwrap(), 6);
        assert_eq!(s.get(0, &args(&[b"k"])).unwrap().unwrap(), b"6");
    }

    #[test]
    fn incr_overflow_errors() {
        let s = new_store();
        s.set(0, &args(&[b"k", b"9223372036854775807"])).unwrap();
        assert!(s.incr(0, &args(&[b"k"])).is_err());
    }

    #[test]
    fn incr_by_float() {
        let s = new_store();
        assert_eq!(s.incr_by_float(0, &args(&[b"f", b"1.5"])).unwrap(), 1.5);
        assert_eq!(s.incr_by_float(0, &args(&[b"f", b"2.5"])).unwrap(), 4.0);
        assert_eq!(s.get(0, &args(&[b"f"])).unwrap().unwrap(), b"4");
        assert!(s.incr_by_float(0, &args(&[b"f", b"nan"])).is_err());
    }

    #[test]
    fn setbit_getbit_bitcount() {
        let s = new_store();
        assert_eq!(s.set_bit(0, &args(&[b"b", b"7", b"1"])).unwrap(), 0);
        assert_eq!(s.get_bit(0, &args(&[b"b", b"7"])).unwrap(), 1);
        assert_eq!(s.get_bit(0, &args(&[b"b", b"6"])).unwrap(), 0);
        // value is now 0x01 — one set bit
        assert_eq!(s.bit_count(0, &args(&[b"b"])).unwrap(), 1);

        assert_eq!(s.set_bit(0, &args(&[b"b", b"0", b"1"])).unwrap(), 0);
        assert_eq!(s.bit_count(0, &args(&[b"b"])).unwrap(), 2);

        // flipping back down
        assert_eq!(s.set_bit(0, &args(&[b"b", b"7", b"0"])).unwrap(), 1);
        assert_eq!(s.bit_count(0, &args(&[b"b"])).unwrap(), 1);
    }

    #[test]
    fn setbit_rejects_bad_bit() {
        let s = new_store();
        assert!(s.set_bit(0, &args(&[b"b", b"0", b"2"])).is_err());
        assert!(s.set_bit(0, &args(&[b"b", b"x", b"1"])).is_err());
    }

    #[test]
    fn setrange_extends_with_zeroes() {
        let s = new_store();
        assert_eq!(s.set_range(0, &args(&[b"r", b"5", b"hi"])).unwrap(), 7);
        let v = s.get(0, &args(&[b"r"])).unwrap().unwrap();
        assert_eq!(v, b"\0\0\0\0\0hi");

        assert_eq!(s.set_range(0, &args(&[b"r", b"0", b"ab"])).unwrap(), 7);
        assert_eq!(s.get(0, &args(&[b"r"])).unwrap().unwrap(), b"ab\0\0\0hi");
    }

    #[test]
    fn getrange_negative_indices() {
        let s = new_store();
        s.set(0, &args(&[b"k", b"Hello World"])).unwrap();
        assert_eq!(
            s.get_range(0, &args(&[b"k", b"0", b"4"])).unwrap().unwrap(),
            b"Hello"
        );
        assert_eq!(
            s.get_range(0, &args(&[b"k", b"-5", b"-1"])).unwrap().unwrap(),
            b"World"
        );
        assert_eq!(s.get_range(0, &args(&[b"k", b"9", b"2"])).unwrap(), None);
    }

    #[test]
    fn mset_mget() {
        let s = new_store();
        s.mset(0, &args(&[b"a", b"1", b"b", b"2"])).unwrap();
        let got = s.mget(0, &args(&[b"a", b"b", b"c"])).unwrap();
        assert_eq!(
            got,
            vec![Some(b"1".to_vec()), Some(b"2".to_vec()), None]
        );
    }

    #[test]
    fn mset_last_value_wins_for_repeated_key() {
        let s = new_store();
        s.mset(0, &args(&[b"k", b"first", b"k", b"second"])).unwrap();
        assert_eq!(s.get(0, &args(&[b"k"])).unwrap().unwrap(), b"second");
    }

    #[test]
    fn msetnx_all_or_nothing() {
        let s = new_store();
        assert_eq!(s.mset_nx(0, &args(&[b"a", b"1", b"b", b"2"])).unwrap(), 1);
        // "b" exists, so nothing is written
        assert_eq!(s.mset_nx(0, &args(&[b"b", b"x", b"c", b"3"])).unwrap(), 0);
        assert_eq!(s.get(0, &args(&[b"b"])).unwrap().unwrap(), b"2");
        assert_eq!(s.get(0, &args(&[b"c"])).unwrap(), None);
    }

    #[test]
    fn bitop_and_or_xor_not() {
        let s = new_store();
        s.set(0, &args(&[b"x", b"\xff\x0f"])).unwrap();
        s.set(0, &args(&[b"y", b"\x0f"])).unwrap();

        // AND: the tail of the longer operand is zeroed
        assert_eq!(s.bit_op(0, &args(&[b"AND", b"d", b"x", b"y"])).unwrap(), 2);
        assert_eq!(s.get(0, &args(&[b"d"])).unwrap().unwrap(), b"\x0f\x00");

        // OR: the tail survives unchanged
        assert_eq!(s.bit_op(0, &args(&[b"OR", b"d", b"x", b"y"])).unwrap(), 2);
        assert_eq!(s.get(0, &args(&[b"d"])).unwrap().unwrap(), b"\xff\x0f");

        // XOR
        assert_eq!(s.bit_op(0, &args(&[b"XOR", b"d", b"x", b"y"])).unwrap(), 2);
        assert_eq!(s.get(0, &args(&[b"d"])).unwrap().unwrap(), b"\xf0\x0f");

        // NOT takes exactly one source
        assert_eq!(s.bit_op(0, &args(&[b"NOT", b"d", b"y"])).unwrap(), 1);
        assert_eq!(s.get(0, &args(&[b"d"])).unwrap().unwrap(), b"\xf0");
        assert!(s.bit_op(0, &args(&[b"NOT", b"d", b"x", b"y"])).is_err());
    }

    #[test]
    fn wrong_type_rejected() {
        let s = new_store();
        s.lpush(0, &args(&[b"l", b"a"])).unwrap();
        assert!(matches!(
            s.get(0, &args(&[b"l"])).unwrap_err(),
            StoreError::NotString
        ));
        assert!(matches!(
            s.append(0, &args(&[b"l", b"x"])).unwrap_err(),
            StoreError::NotString
        ));
    }

    #[test]
    fn expired_key_reads_as_absent() {
        let s = new_store();
        s.set(0, &args(&[b"k", b"v", b"PX", b"1"])).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert_eq!(s.get(0, &args(&[b"k"])).unwrap(), None);
        assert_eq!(s.strlen(0, &args(&[b"k"])).unwrap(), 0);
    }

    #[test]
    fn mutator_reclaims_expired_rows() {
        let s = new_store();
        s.set(0, &args(&[b"k", b"v", b"PX", b"1"])).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        // APPEND on the expired key starts from scratch
        assert_eq!(s.append(0, &args(&[b"k", b"fresh"])).unwrap(), 5);
        assert_eq!(s.get(0, &args(&[b"k"])).unwrap().unwrap(), b"fresh");
        assert_eq!(s.ttl(0, &args(&[b"k"])).unwrap(), -1);
    }
}
