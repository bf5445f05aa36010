//! Hash commands.

use bytes::Bytes;

use crate::engine::Batch;
use crate::error::{err_args, StoreError};
use crate::store::row::{HashRow, Row};
use crate::store::{Forward, Store};
use crate::util::{format_float, format_int, parse_float, parse_int, MarkSet};

impl Store {
    pub(crate) fn load_hash_row(
        &self,
        db: u32,
        key: &[u8],
        batch: Option<&mut Batch>,
    ) -> Result<Option<HashRow>, StoreError> {
        match self.load_row(db, key, batch)? {
            Some(Row::Hash(o)) => Ok(Some(o)),
            Some(_) => Err(StoreError::NotHash),
            None => Ok(None),
        }
    }

    fn get_field(&self, o: &HashRow, field: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        match self.reader().get(&o.field_key(field))? {
            Some(raw) => Ok(Some(HashRow::parse_field_value(&raw)?)),
            None => Ok(None),
        }
    }

    /// Collects `(field, value)` cells of a live hash in engine order.
    fn scan_fields(&self, o: &HashRow) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let prefix = o.hdr.data_key_prefix();
        let mut out = Vec::with_capacity(o.size.max(0) as usize);
        let mut guard = self.get_iterator()?;
        let it = guard.iter();
        it.seek_to(&prefix);
        while it.valid() {
            let key = it.key();
            if !key.starts_with(&prefix) {
                break;
            }
            let field = HashRow::parse_field_suffix(&key[prefix.len()..])?;
            let value = HashRow::parse_field_value(it.value())?;
            out.push((field, value));
            it.next();
        }
        Ok(out)
    }

    /// HSET key field value — 1 iff the field was created.
    pub fn hset(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.len() != 3 {
            return Err(err_args!("len(args) = {}, expect = 3", args.len()));
        }
        let (key, field, value) = (&args[0], &args[1], &args[2]);
        let _g = self.acquire_write();

        let mut bt = Batch::new();
        let mut o = match self.load_hash_row(db, key, Some(&mut bt))? {
            Some(o) => o,
            None => HashRow::new(db, key),
        };

        let created = self.get_field(&o, field)?.is_none();
        bt.set(o.field_key(field), HashRow::field_value(value));
        if created {
            o.size += 1;
            bt.set(o.hdr.meta_key(), o.meta_value());
        }

        self.commit(bt, Forward::new(db, "HSet", args))?;
        Ok(i64::from(created))
    }

    /// HSETNX key field value
    pub fn hset_nx(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.len() != 3 {
            return Err(err_args!("len(args) = {}, expect = 3", args.len()));
        }
        let (key, field, value) = (&args[0], &args[1], &args[2]);
        let _g = self.acquire_write();

        let mut bt = Batch::new();
        let mut o = match self.load_hash_row(db, key, Some(&mut bt))? {
            Some(o) => o,
            None => HashRow::new(db, key),
        };

        if self.get_field(&o, field)?.is_some() {
            return Ok(0);
        }

        bt.set(o.field_key(field), HashRow::field_value(value));
        o.size += 1;
        bt.set(o.hdr.meta_key(), o.meta_value());

        self.commit(bt, Forward::new(db, "HSetNX", args))?;
        Ok(1)
    }

    /// HMSET key field value [field value ...]
    pub fn hmset(&self, db: u32, args: &[Bytes]) -> Result<(), StoreError> {
        if args.len() < 3 || args.len() % 2 != 1 {
            return Err(err_args!(
                "len(args) = {}, expect >= 3 && odd",
                args.len()
            ));
        }
        let key = &args[0];
        let _g = self.acquire_write();

        let mut bt = Batch::new();
        let mut o = match self.load_hash_row(db, key, Some(&mut bt))? {
            Some(o) => o,
            None => HashRow::new(db, key),
        };

        // back-to-front: a repeated field keeps its last value
        let mut ms = MarkSet::new();
        let mut created = 0i64;
        for i in (0..args.len() / 2).rev() {
            let (field, value) = (&args[i * 2 + 1], &args[i * 2 + 2]);
            if ms.has(field) {
                continue;
            }
            if self.get_field(&o, field)?.is_none() {
                created += 1;
            }
            bt.set(o.field_key(field), HashRow::field_value(value));
            ms.set(field);
        }

        if created != 0 {
            o.size += created;
            bt.set(o.hdr.meta_key(), o.meta_value());
        }

        self.commit(bt, Forward::new(db, "HMSet", args))
    }

    /// HGET key field
    pub fn hget(&self, db: u32, args: &[Bytes]) -> Result<Option<Vec<u8>>, StoreError> {
        if args.len() != 2 {
            return Err(err_args!("len(args) = {}, expect = 2", args.len()));
        }
        let _g = self.acquire_read();

        match self.load_hash_row(db, &args[0], None)? {
            Some(o) => self.get_field(&o, &args[1]),
            None => Ok(None),
        }
    }

    /// HMGET key field [field ...]
    pub fn hmget(&self, db: u32, args: &[Bytes]) -> Result<Vec<Option<Vec<u8>>>, StoreError> {
        if args.len() < 2 {
            return Err(err_args!("len(args) = {}, expect >= 2", args.len()));
        }
        let _g = self.acquire_read();

        let fields = &args[1..];
        match self.load_hash_row(db, &args[0], None)? {
            Some(o) => fields.iter().map(|f| self.get_field(&o, f)).collect(),
            None => Ok(vec![None; fields.len()]),
        }
    }

    /// HGETALL key — flat `[field, value, field, value, ...]`.
    pub fn hget_all(&self, db: u32, args: &[Bytes]) -> Result<Vec<Vec<u8>>, StoreError> {
        if args.len() != 1 {
            return Err(err_args!("len(args) = {}, expect = 1", args.len()));
        }
        let _g = self.acquire_read();

        let Some(o) = self.load_hash_row(db, &args[0], None)? else {
            return Ok(Vec::new());
        };
        let mut out = Vec::with_capacity(o.size.max(0) as usize * 2);
        for (field, value) in self.scan_fields(&o)? {
            out.push(field);
            out.push(value);
        }
        Ok(out)
    }

    /// HKEYS key
    pub fn hkeys(&self, db: u32, args: &[Bytes]) -> Result<Vec<Vec<u8>>, StoreError> {
        if args.len() != 1 {
            return Err(err_args!("len(args) = {}, expect = 1", args.len()));
        }
        let _g = self.acquire_read();

        match self.load_hash_row(db, &args[0], None)? {
            Some(o) => Ok(self.scan_fields(&o)?.into_iter().map(|(f, _)| f).collect()),
            None => Ok(Vec::new()),
        }
    }

    /// HVALS key
    pub fn hvals(&self, db: u32, args: &[Bytes]) -> Result<Vec<Vec<u8>>, StoreError> {
        if args.len() != 1 {
            return Err(err_args!("len(args) = {}, expect = 1", args.len()));
        }
        let _g = self.acquire_read();

        match self.load_hash_row(db, &args[0], None)? {
            Some(o) => Ok(self.scan_fields(&o)?.into_iter().map(|(_, v)| v).collect()),
            None => Ok(Vec::new()),
        }
    }

    /// HDEL key field [field ...]
    pub fn hdel(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.len() < 2 {
            return Err(err_args!("len(args) = {}, expect >= 2", args.len()));
        }
        let key = &args[0];
        let _g = self.acquire_write();

        let mut bt = Batch::new();
        let Some(mut o) = self.load_hash_row(db, key, Some(&mut bt))? else {
            self.commit(bt, Forward::new(db, "HDel", args))?;
            return Ok(0);
        };

        let mut ms = MarkSet::new();
        for field in &args[1..] {
            if ms.has(field) {
                continue;
            }
            if self.get_field(&o, field)?.is_some() {
                bt.del(o.field_key(field));
                ms.set(field);
            }
        }

        let n = ms.len();
        if n != 0 {
            o.size -= n;
            if o.size > 0 {
                bt.set(o.hdr.meta_key(), o.meta_value());
            } else {
                bt.del(o.hdr.meta_key());
            }
        }

        self.commit(bt, Forward::new(db, "HDel", args))?;
        Ok(n)
    }

    /// HEXISTS key field
    pub fn hexists(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.len() != 2 {
            return Err(err_args!("len(args) = {}, expect = 2", args.len()));
        }
        let _g = self.acquire_read();

        match self.load_hash_row(db, &args[0], None)? {
            Some(o) => Ok(i64::from(self.get_field(&o, &args[1])?.is_some())),
            None => Ok(0),
        }
    }

    /// HLEN key
    pub fn hlen(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.len() != 1 {
            return Err(err_args!("len(args) = {}, expect = 1", args.len()));
        }
        let _g = self.acquire_read();

        Ok(self
            .load_hash_row(db, &args[0], None)?
            .map(|o| o.size)
            .unwrap_or(0))
    }

    /// HINCRBY key field delta
    pub fn hincr_by(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.len() != 3 {
            return Err(err_args!("len(args) = {}, expect = 3", args.len()));
        }
        let (key, field) = (&args[0], &args[1]);
        let delta = parse_int(&args[2])?;
        let _g = self.acquire_write();

        let mut bt = Batch::new();
        let mut o = match self.load_hash_row(db, key, Some(&mut bt))? {
            Some(o) => o,
            None => HashRow::new(db, key),
        };

        let existing = self.get_field(&o, field)?;
        let base = match &existing {
            Some(raw) => parse_int(raw)?,
            None => 0,
        };
        let next = base
            .checked_add(delta)
            .ok_or_else(|| err_args!("increment or decrement would overflow"))?;

        bt.set(o.field_key(field), HashRow::field_value(&format_int(next)));
        if existing.is_none() {
            o.size += 1;
            bt.set(o.hdr.meta_key(), o.meta_value());
        }

        self.commit(bt, Forward::new(db, "HIncrBy", args))?;
        Ok(next)
    }

    /// HINCRBYFLOAT key field delta
    pub fn hincr_by_float(&self, db: u32, args: &[Bytes]) -> Result<f64, StoreError> {
        if args.len() != 3 {
            return Err(err_args!("len(args) = {}, expect = 3", args.len()));
        }
        let (key, field) = (&args[0], &args[1]);
        let delta = parse_float(&args[2])?;
        let _g = self.acquire_write();

        let mut bt = Batch::new();
        let mut o = match self.load_hash_row(db, key, Some(&mut bt))? {
            Some(o) => o,
            None => HashRow::new(db, key),
        };

        let existing = self.get_field(&o, field)?;
        let base = match &existing {
            Some(raw) => parse_float(raw)?,
            None => 0.0,
        };
        let next = base + delta;
        if next.is_nan() || next.is_infinite() {
            return Err(StoreError::NanOrInfinity);
        }

        bt.set(
            o.field_key(field),
            HashRow::field_value(&format_float(next)),
        );
        if existing.is_none() {
            o.size += 1;
            bt.set(o.hdr.meta_key(), o.meta_value());
        }

        self.commit(bt, Forward::new(db, "HIncrByFloat", args))?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::StoreError;
    use crate::store::testutil::{args, new_store};

    #[test]
    fn hset_reports_creation() {
        let s = new_store();
        assert_eq!(s.hset(0, &args(&[b"h", b"a", b"1"])).unwrap(), 1);
        assert_eq!(s.hset(0, &args(&[b"h", b"a", b"2"])).unwrap(), 0);
        assert_eq!(s.hget(0, &args(&[b"h", b"a"])).unwrap().unwrap(), b"2");
    }

    #[test]
    fn hdel_last_field_removes_key() {
        let s = new_store();
        s.hset(0, &args(&[b"h", b"a", b"1"])).unwrap();
        assert_eq!(s.hdel(0, &args(&[b"h", b"a"])).unwrap(), 1);
        assert_eq!(s.exists(0, &args(&[b"h"])).unwrap(), 0);
        assert_eq!(s.hlen(0, &args(&[b"h"])).unwrap(), 0);
    }

    #[test]
    fn hdel_partial_keeps_meta() {
        let s = new_store();
        s.hset(0, &args(&[b"h", b"a", b"1"])).unwrap();
        s.hset(0, &args(&[b"h", b"b", b"2"])).unwrap();
        // duplicate and missing fields count once / not at all
        assert_eq!(s.hdel(0, &args(&[b"h", b"a", b"a", b"zz"])).unwrap(), 1);
        assert_eq!(s.hlen(0, &args(&[b"h"])).unwrap(), 1);
        assert_eq!(s.hexists(0, &args(&[b"h", b"b"])).unwrap(), 1);
    }

    #[test]
    fn hmset_hmget() {
        let s = new_store();
        s.hmset(0, &args(&[b"h", b"a", b"1", b"b", b"2"])).unwrap();
        let got = s.hmget(0, &args(&[b"h", b"a", b"b", b"c"])).unwrap();
        assert_eq!(
            got,
            vec![Some(b"1".to_vec()), Some(b"2".to_vec()), None]
        );
        // repeated field keeps the last value, counted once
        s.hmset(0, &args(&[b"h2", b"f", b"first", b"f", b"last"]))
            .unwrap();
        assert_eq!(s.hlen(0, &args(&[b"h2"])).unwrap(), 1);
        assert_eq!(s.hget(0, &args(&[b"h2", b"f"])).unwrap().unwrap(), b"last");
    }

    #[test]
    fn hmget_missing_key_is_all_nil() {
        let s = new_store();
        let got = s.hmget(0, &args(&[b"nope", b"a", b"b"])).unwrap();
        assert_eq!(got, vec![None, None]);
    }

    #[test]
    fn hgetall_hkeys_hvals() {
        let s = new_store();
        s.hset(0, &args(&[b"h", b"a", b"1"])).unwrap();
        s.hset(0, &args(&[b"h", b"b", b"2"])).unwrap();

        let all = s.hget_all(0, &args(&[b"h"])).unwrap();
        assert_eq!(all.len(), 4);

        let mut keys = s.hkeys(0, &args(&[b"h"])).unwrap();
        keys.sort();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);

        let mut vals = s.hvals(0, &args(&[b"h"])).unwrap();
        vals.sort();
        assert_eq!(vals, vec![b"1".to_vec(), b"2".to_vec()]);

        assert!(s.hget_all(0, &args(&[b"missing"])).unwrap().is_empty());
    }

    #[test]
    fn hsetnx_only_creates() {
        let s = new_store();
        assert_eq!(s.hset_nx(0, &args(&[b"h", b"f", b"1"])).unwrap(), 1);
        assert_eq!(s.hset_nx(0, &args(&[b"h", b"f", b"2"])).unwrap(), 0);
        assert_eq!(s.hget(0, &args(&[b"h", b"f"])).unwrap().unwrap(), b"1");
    }

    #[test]
    fn hincrby_creates_and_accumulates() {
        let s = new_store();
        assert_eq!(s.hincr_by(0, &args(&[b"h", b"n", b"5"])).unwrap(), 5);
        assert_eq!(s.hincr_by(0, &args(&[b"h", b"n", b"-2"])).unwrap(), 3);
        assert_eq!(s.hlen(0, &args(&[b"h"])).unwrap(), 1);

        s.hset(0, &args(&[b"h", b"txt", b"abc"])).unwrap();
        assert!(s.hincr_by(0, &args(&[b"h", b"txt", b"1"])).is_err());
    }

    #[test]
    fn hincrbyfloat() {
        let s = new_store();
        assert_eq!(
            s.hincr_by_float(0, &args(&[b"h", b"f", b"1.5"])).unwrap(),
            1.5
        );
        assert_eq!(
            s.hincr_by_float(0, &args(&[b"h", b"f", b"0.5"])).unwrap(),
            2.0
        );
        assert_eq!(s.hget(0, &args(&[b"h", b"f"])).unwrap().unwrap(), b"2");
    }

    #[test]
    fn wrong_type_rejected() {
        let s = new_store();
        s.set(0, &args(&[b"k", b"v"])).unwrap();
        assert!(matches!(
            s.hget(0, &args(&[b"k", b"f"])).unwrap_err(),
            StoreError::NotHash
        ));
        assert!(matches!(
            s.hset(0, &args(&[b"k", b"f", b"v"])).unwrap_err(),
            StoreError::NotHash
        ));
    }
}
