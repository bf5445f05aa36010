//! Set commands.

use bytes::Bytes;
use rand::Rng;

use crate::engine::Batch;
use crate::error::{err_args, StoreError};
use crate::store::row::{Row, SetRow};
use crate::store::{Forward, Store};
use crate::util::{parse_int, MarkSet};

impl Store {
    pub(crate) fn load_set_row(
        &self,
        db: u32,
        key: &[u8],
        batch: Option<&mut Batch>,
    ) -> Result<Option<SetRow>, StoreError> {
        match self.load_row(db, key, batch)? {
            Some(Row::Set(o)) => Ok(Some(o)),
            Some(_) => Err(StoreError::NotSet),
            None => Ok(None),
        }
    }

    fn member_exists(&self, o: &SetRow, member: &[u8]) -> Result<bool, StoreError> {
        Ok(self.reader().get(&o.member_key(member))?.is_some())
    }

    /// Collects every member of a live set, in engine order.
    fn scan_members(&self, o: &SetRow) -> Result<Vec<Vec<u8>>, StoreError> {
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
            out.push(SetRow::parse_member_suffix(&key[prefix.len()..])?);
            it.next();
        }
        Ok(out)
    }

    /// SADD key member [member ...]
    pub fn sadd(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.len() < 2 {
            return Err(err_args!("len(args) = {}, expect >= 2", args.len()));
        }
        let key = &args[0];
        let _g = self.acquire_write();

        let mut bt = Batch::new();
        let mut o = match self.load_set_row(db, key, Some(&mut bt))? {
            Some(o) => o,
            None => SetRow::new(db, key),
        };

        let mut ms = MarkSet::new();
        for member in &args[1..] {
            if member.is_empty() {
                return Err(err_args!("empty set member"));
            }
            if ms.has(member) {
                continue;
            }
            if !self.member_exists(&o, member)? {
                bt.set(o.member_key(member), SetRow::member_value());
                ms.set(member);
            }
        }

        let n = ms.len();
        if n != 0 {
            o.size += n;
            bt.set(o.hdr.meta_key(), o.meta_value());
        }

        self.commit(bt, Forward::new(db, "SAdd", args))?;
        Ok(n)
    }

    /// SREM key member [member ...]
    pub fn srem(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.len() < 2 {
            return Err(err_args!("len(args) = {}, expect >= 2", args.len()));
        }
        let key = &args[0];
        let _g = self.acquire_write();

        let mut bt = Batch::new();
        let Some(mut o) = self.load_set_row(db, key, Some(&mut bt))? else {
            self.commit(bt, Forward::new(db, "SRem", args))?;
            return Ok(0);
        };

        let mut ms = MarkSet::new();
        for member in &args[1..] {
            if ms.has(member) {
                continue;
            }
            if self.member_exists(&o, member)? {
                bt.del(o.member_key(member));
                ms.set(member);
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

        self.commit(bt, Forward::new(db, "SRem", args))?;
        Ok(n)
    }

    /// SCARD key
    pub fn scard(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.len() != 1 {
            return Err(err_args!("len(args) = {}, expect = 1", args.len()));
        }
        let _g = self.acquire_read();

        Ok(self
            .load_set_row(db, &args[0], None)?
            .map(|o| o.size)
            .unwrap_or(0))
    }

    /// SISMEMBER key member
    pub fn sismember(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.len() != 2 {
            return Err(err_args!("len(args) = {}, expect = 2", args.len()));
        }
        let _g = self.acquire_read();

        match self.load_set_row(db, &args[0], None)? {
            Some(o) => Ok(i64::from(self.member_exists(&o, &args[1])?)),
            None => Ok(0),
        }
    }

    /// SMEMBERS key
    pub fn smembers(&self, db: u32, args: &[Bytes]) -> Result<Vec<Vec<u8>>, StoreError> {
        if args.len() != 1 {
            return Err(err_args!("len(args) = {}, expect = 1", args.len()));
        }
        let _g = self.acquire_read();

        match self.load_set_row(db, &args[0], None)? {
            Some(o) => self.scan_members(&o),
            None => Ok(Vec::new()),
        }
    }

    /// SPOP key — removes and returns one random member.
    pub fn spop(&self, db: u32, args: &[Bytes]) -> Result<Option<Vec<u8>>, StoreError> {
        if args.len() != 1 {
            return Err(err_args!("len(args) = {}, expect = 1", args.len()));
        }
        let key = &args[0];
        let _g = self.acquire_write();

        let mut bt = Batch::new();
        let Some(mut o) = self.load_set_row(db, key, Some(&mut bt))? else {
            self.commit(bt, Forward::new(db, "SPop", args))?;
            return Ok(None);
        };

        let members = self.scan_members(&o)?;
        if members.is_empty() {
            return Err(StoreError::ObjectValue("set has no members".into()));
        }
        let pick = rand::rng().random_range(0..members.len());
        let member = members[pick].clone();

        bt.del(o.member_key(&member));
        o.size -= 1;
        if o.size > 0 {
            bt.set(o.hdr.meta_key(), o.meta_value());
        } else {
            bt.del(o.hdr.meta_key());
        }

        // forward the concrete member so replicas pop the same one
        let fw_args = vec![key.clone(), Bytes::from(member.clone())];
        self.commit(bt, Forward { db, op: "SRem".into(), args: fw_args })?;
        Ok(Some(member))
    }

    /// SRANDMEMBER key [count]
    ///
    /// Positive count returns up to `count` distinct members; negative
    /// count returns exactly `|count|` members, possibly repeated.
    pub fn srandmember(&self, db: u32, args: &[Bytes]) -> Result<Vec<Vec<u8>>, StoreError> {
        if args.len() != 1 && args.len() != 2 {
            return Err(err_args!("len(args) = {}, expect = 1 or 2", args.len()));
        }
        let count = if args.len() == 2 {
            parse_int(&args[1])?
        } else {
            1
        };
        let _g = self.acquire_read();

        let Some(o) = self.load_set_row(db, &args[0], None)? else {
            return Ok(Vec::new());
        };
        let members = self.scan_members(&o)?;
        if members.is_empty() || count == 0 {
            return Ok(Vec::new());
        }

        let mut rng = rand::rng();
        if count > 0 {
            let take = (count as usize).min(members.len());
            // partial shuffle: draw `take` distinct members
            let mut pool = members;
            for i in 0..take {
                let j = rng.random_range(i..pool.len());
                pool.swap(i, j);
            }
            pool.truncate(take);
            Ok(pool)
        } else {
            let take = count.unsigned_abs() as usize;
            Ok((0..take)
                .map(|_| members[rng.random_range(0..members.len())].clone())
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::StoreError;
    use crate::store::testutil::{args, new_store};

    #[test]
    fn sadd_counts_new_members() {
        let s = new_store();
        assert_eq!(s.sadd(0, &args(&[b"s", b"a", b"b", b"a"])).unwrap(), 2);
        assert_eq!(s.sadd(0, &args(&[b"s", b"b", b"c"])).unwrap(), 1);
        assert_eq!(s.scard(0, &args(&[b"s"])).unwrap(), 3);
    }

    #[test]
    fn sismember() {
        let s = new_store();
        s.sadd(0, &args(&[b"s", b"a"])).unwrap();
        assert_eq!(s.sismember(0, &args(&[b"s", b"a"])).unwrap(), 1);
        assert_eq!(s.sismember(0, &args(&[b"s", b"b"])).unwrap(), 0);
        assert_eq!(s.sismember(0, &args(&[b"nope", b"a"])).unwrap(), 0);
    }

    #[test]
    fn srem_removes_and_cleans_up() {
        let s = new_store();
        s.sadd(0, &args(&[b"s", b"a", b"b"])).unwrap();
        assert_eq!(s.srem(0, &args(&[b"s", b"a", b"zz"])).unwrap(), 1);
        assert_eq!(s.scard(0, &args(&[b"s"])).unwrap(), 1);
        assert_eq!(s.srem(0, &args(&[b"s", b"b"])).unwrap(), 1);
        // removing the last member removes the key
        assert_eq!(s.exists(0, &args(&[b"s"])).unwrap(), 0);
    }

    #[test]
    fn smembers_returns_all() {
        let s = new_store();
        s.sadd(0, &args(&[b"s", b"c", b"a", b"b"])).unwrap();
        let mut members = s.smembers(0, &args(&[b"s"])).unwrap();
        members.sort();
        assert_eq!(members, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert!(s.smembers(0, &args(&[b"nope"])).unwrap().is_empty());
    }

    #[test]
    fn spop_drains_the_set() {
        let s = new_store();
        s.sadd(0, &args(&[b"s", b"a", b"b", b"c"])).unwrap();

        let mut popped = Vec::new();
        for _ in 0..3 {
            popped.push(s.spop(0, &args(&[b"s"])).unwrap().unwrap());
        }
        popped.sort();
        assert_eq!(popped, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);

        assert_eq!(s.spop(0, &args(&[b"s"])).unwrap(), None);
        assert_eq!(s.exists(0, &args(&[b"s"])).unwrap(), 0);
    }

    #[test]
    fn srandmember_counts() {
        let s = new_store();
        s.sadd(0, &args(&[b"s", b"a", b"b", b"c"])).unwrap();

        // default: one member
        assert_eq!(s.srandmember(0, &args(&[b"s"])).unwrap().len(), 1);

        // positive count caps at the cardinality, all distinct
        let got = s.srandmember(0, &args(&[b"s", b"10"])).unwrap();
        let mut sorted = got.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 3);

        // negative count repeats as needed
        assert_eq!(s.srandmember(0, &args(&[b"s", b"-7"])).unwrap().len(), 7);

        // membership never lies
        for m in s.srandmember(0, &args(&[b"s", b"-20"])).unwrap() {
            assert_eq!(s.sismember(0, &args(&[b"s", &m])).unwrap(), 1);
        }
    }

    #[test]
    fn wrong_type_rejected() {
        let s = new_store();
        s.set(0, &args(&[b"k", b"v"])).unwrap();
        assert!(matches!(
            s.sadd(0, &args(&[b"k", b"m"])).unwrap_err(),
            StoreError::NotSet
        ));
        assert!(matches!(
            s.smembers(0, &args(&[b"k"])).unwrap_err(),
            StoreError::NotSet
        ));
    }
}
