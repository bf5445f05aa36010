//! List commands.
//!
//! A list is addressed by two signed slot cursors kept in its meta
//! row: the elements live at engine slots `head..=tail`. Pushing to
//! the left writes slot `head - 1`, pushing to the right writes
//! `tail + 1`, and popping moves the matching cursor inward. Slots
//! are dense — only push and pop ever create or remove them.

use bytes::Bytes;

use crate::engine::Batch;
use crate::error::{err_args, StoreError};
use crate::store::row::{ListRow, Row};
use crate::store::{sanitize_indexes, Forward, Store};
use crate::util::parse_int;

impl Store {
    pub(crate) fn load_list_row(
        &self,
        db: u32,
        key: &[u8],
        batch: Option<&mut Batch>,
    ) -> Result<Option<ListRow>, StoreError> {
        match self.load_row(db, key, batch)? {
            Some(Row::List(o)) => Ok(Some(o)),
            Some(_) => Err(StoreError::NotList),
            None => Ok(None),
        }
    }

    fn get_slot(&self, o: &ListRow, index: i64) -> Result<Vec<u8>, StoreError> {
        let raw = self
            .reader()
            .get(&o.slot_key(index))?
            .ok_or_else(|| StoreError::ObjectValue(format!("list slot {index} missing")))?;
        ListRow::parse_slot_value(&raw)
    }

    fn push(
        &self,
        db: u32,
        args: &[Bytes],
        op: &str,
        left: bool,
        require_existing: bool,
    ) -> Result<i64, StoreError> {
        if args.len() < 2 {
            return Err(err_args!("len(args) = {}, expect >= 2", args.len()));
        }
        let key = &args[0];
        let _g = self.acquire_write();

        let mut bt = Batch::new();
        let mut o = match self.load_list_row(db, key, Some(&mut bt))? {
            Some(o) => o,
            None if require_existing => return Ok(0),
            None => ListRow::new(db, key),
        };

        for value in &args[1..] {
            let slot = if o.len() == 0 {
                // first element of a fresh list sits at slot 0
                o.head = 0;
                o.tail = 0;
                0
            } else if left {
                o.head -= 1;
                o.head
            } else {
                o.tail += 1;
                o.tail
            };
            bt.set(o.slot_key(slot), ListRow::slot_value(value));
        }
        bt.set(o.hdr.meta_key(), o.meta_value());

        let n = o.len();
        self.commit(bt, Forward::new(db, op, args))?;
        Ok(n)
    }

    fn pop(&self, db: u32, args: &[Bytes], op: &str, left: bool) -> Result<Option<Vec<u8>>, StoreError> {
        if args.len() != 1 {
            return Err(err_args!("len(args) = {}, expect = 1", args.len()));
        }
        let key = &args[0];
        let _g = self.acquire_write();

        let mut bt = Batch::new();
        let Some(mut o) = self.load_list_row(db, key, Some(&mut bt))? else {
            self.commit(bt, Forward::new(db, op, args))?;
            return Ok(None);
        };

        let slot = if left { o.head } else { o.tail };
        let value = self.get_slot(&o, slot)?;
        bt.del(o.slot_key(slot));

        if left {
            o.head += 1;
        } else {
            o.tail -= 1;
        }
        if o.len() > 0 {
            bt.set(o.hdr.meta_key(), o.meta_value());
        } else {
            bt.del(o.hdr.meta_key());
        }

        self.commit(bt, Forward::new(db, op, args))?;
        Ok(Some(value))
    }

    /// LPUSH key value [value ...]
    pub fn lpush(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        self.push(db, args, "LPush", true, false)
    }

    /// RPUSH key value [value ...]
    pub fn rpush(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        self.push(db, args, "RPush", false, false)
    }

    /// LPUSHX key value [value ...] — no-op unless the list exists.
    pub fn lpush_x(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        self.push(db, args, "LPushX", true, true)
    }

    /// RPUSHX key value [value ...]
    pub fn rpush_x(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        self.push(db, args, "RPushX", false, true)
    }

    /// LPOP key
    pub fn lpop(&self, db: u32, args: &[Bytes]) -> Result<Option<Vec<u8>>, StoreError> {
        self.pop(db, args, "LPop", true)
    }

    /// RPOP key
    pub fn rpop(&self, db: u32, args: &[Bytes]) -> Result<Option<Vec<u8>>, StoreError> {
        self.pop(db, args, "RPop", false)
    }

    /// LINDEX key index
    pub fn lindex(&self, db: u32, args: &[Bytes]) -> Result<Option<Vec<u8>>, StoreError> {
        if args.len() != 2 {
            return Err(err_args!("len(args) = {}, expect = 2", args.len()));
        }
        let index = parse_int(&args[1])?;
        let _g = self.acquire_read();

        let Some(o) = self.load_list_row(db, &args[0], None)? else {
            return Ok(None);
        };

        let slot = if index >= 0 {
            o.head + index
        } else {
            o.tail + index + 1
        };
        if slot < o.head || slot > o.tail {
            return Ok(None);
        }
        Ok(Some(self.get_slot(&o, slot)?))
    }

    /// LLEN key
    pub fn llen(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.len() != 1 {
            return Err(err_args!("len(args) = {}, expect = 1", args.len()));
        }
        let _g = self.acquire_read();

        Ok(self
            .load_list_row(db, &args[0], None)?
            .map(|o| o.len())
            .unwrap_or(0))
    }

    /// LRANGE key beg end
    pub fn lrange(&self, db: u32, args: &[Bytes]) -> Result<Vec<Vec<u8>>, StoreError> {
        if args.len() != 3 {
            return Err(err_args!("len(args) = {}, expect = 3", args.len()));
        }
        let beg = parse_int(&args[1])?;
        let end = parse_int(&args[2])?;
        let _g = self.acquire_read();

        let Some(o) = self.load_list_row(db, &args[0], None)? else {
            return Ok(Vec::new());
        };

        let (start, stop, len) = sanitize_indexes(beg, end, o.len());
        let mut out = Vec::with_capacity(len.max(0) as usize);
        if len > 0 {
            for offset in start..=stop {
                out.push(self.get_slot(&o, o.head + offset)?);
            }
        }
        Ok(out)
    }

    /// LSET key index value
    pub fn lset(&self, db: u32, args: &[Bytes]) -> Result<(), StoreError> {
        if args.len() != 3 {
            return Err(err_args!("len(args) = {}, expect = 3", args.len()));
        }
        let key = &args[0];
        let index = parse_int(&args[1])?;
        let value = &args[2];
        let _g = self.acquire_write();

        let mut bt = Batch::new();
        let Some(o) = self.load_list_row(db, key, Some(&mut bt))? else {
            return Err(err_args!("no such key"));
        };

        let slot = if index >= 0 {
            o.head + index
        } else {
            o.tail + index + 1
        };
        if slot < o.head || slot > o.tail {
            return Err(err_args!("index out of range, index = {index}"));
        }

        bt.set(o.slot_key(slot), ListRow::slot_value(value));
        self.commit(bt, Forward::new(db, "LSet", args))
    }

    /// LTRIM key beg end
    pub fn ltrim(&self, db: u32, args: &[Bytes]) -> Result<(), StoreError> {
        if args.len() != 3 {
            return Err(err_args!("len(args) = {}, expect = 3", args.len()));
        }
        let key = &args[0];
        let beg = parse_int(&args[1])?;
        let end = parse_int(&args[2])?;
        let _g = self.acquire_write();

        let mut bt = Batch::new();
        let Some(mut o) = self.load_list_row(db, key, Some(&mut bt))? else {
            self.commit(bt, Forward::new(db, "LTrim", args))?;
            return Ok(());
        };

        let (start, stop, len) = sanitize_indexes(beg, end, o.len());
        if len == 0 {
            // the whole list goes away
            self.delete_object(&Row::List(o), &mut bt)?;
        } else {
            let new_head = o.head + start;
            let new_tail = o.head + stop;
            for slot in o.head..new_head {
                bt.del(o.slot_key(slot));
            }
            for slot in (new_tail + 1)..=o.tail {
                bt.del(o.slot_key(slot));
            }
            o.head = new_head;
            o.tail = new_tail;
            bt.set(o.hdr.meta_key(), o.meta_value());
        }

        self.commit(bt, Forward::new(db, "LTrim", args))
    }
}

#[cfg(test)]
mod tests {
    use crate::error::StoreError;
    use crate::store::testutil::{args, new_store};

    #[test]
    fn push_pop_both_ends() {
        let s = new_store();
        assert_eq!(s.lpush(0, &args(&[b"l", b"a"])).unwrap(), 1);
        assert_eq!(s.rpush(0, &args(&[b"l", b"b"])).unwrap(), 2);
        assert_eq!(s.lpush(0, &args(&[b"l", b"c"])).unwrap(), 3);

        // order: c, a, b
        assert_eq!(s.lpop(0, &args(&[b"l"])).unwrap().unwrap(), b"c");
        assert_eq!(s.rpop(0, &args(&[b"l"])).unwrap().unwrap(), b"b");
        assert_eq!(s.lpop(0, &args(&[b"l"])).unwrap().unwrap(), b"a");
        assert_eq!(s.lpop(0, &args(&[b"l"])).unwrap(), None);
        // popping the last element removed the key entirely
        assert_eq!(s.exists(0, &args(&[b"l"])).unwrap(), 0);
    }

    #[test]
    fn multi_value_push_order() {
        let s = new_store();
        // LPUSH pushes one at a time: final order is c, b, a
        s.lpush(0, &args(&[b"l", b"a", b"b", b"c"])).unwrap();
        assert_eq!(
            s.lrange(0, &args(&[b"l", b"0", b"-1"])).unwrap(),
            vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]
        );
    }

    #[test]
    fn pushx_requires_existing() {
        let s = new_store();
        assert_eq!(s.lpush_x(0, &args(&[b"l", b"a"])).unwrap(), 0);
        assert_eq!(s.rpush_x(0, &args(&[b"l", b"a"])).unwrap(), 0);
        assert_eq!(s.exists(0, &args(&[b"l"])).unwrap(), 0);

        s.rpush(0, &args(&[b"l", b"x"])).unwrap();
        assert_eq!(s.lpush_x(0, &args(&[b"l", b"a"])).unwrap(), 2);
        assert_eq!(s.rpush_x(0, &args(&[b"l", b"z"])).unwrap(), 3);
    }

    #[test]
    fn lindex_positive_and_negative() {
        let s = new_store();
        s.rpush(0, &args(&[b"l", b"a", b"b", b"c"])).unwrap();
        assert_eq!(s.lindex(0, &args(&[b"l", b"0"])).unwrap().unwrap(), b"a");
        assert_eq!(s.lindex(0, &args(&[b"l", b"2"])).unwrap().unwrap(), b"c");
        assert_eq!(s.lindex(0, &args(&[b"l", b"-1"])).unwrap().unwrap(), b"c");
        assert_eq!(s.lindex(0, &args(&[b"l", b"-3"])).unwrap().unwrap(), b"a");
        assert_eq!(s.lindex(0, &args(&[b"l", b"3"])).unwrap(), None);
        assert_eq!(s.lindex(0, &args(&[b"l", b"-4"])).unwrap(), None);
    }

    #[test]
    fn llen_counts() {
        let s = new_store();
        assert_eq!(s.llen(0, &args(&[b"l"])).unwrap(), 0);
        s.rpush(0, &args(&[b"l", b"a", b"b", b"c"])).unwrap();
        assert_eq!(s.llen(0, &args(&[b"l"])).unwrap(), 3);
    }

    #[test]
    fn lrange_negative_indices() {
        let s = new_store();
        s.rpush(0, &args(&[b"l", b"a", b"b", b"c", b"d"])).unwrap();
        assert_eq!(
            s.lrange(0, &args(&[b"l", b"1", b"2"])).unwrap(),
            vec![b"b".to_vec(), b"c".to_vec()]
        );
        assert_eq!(
            s.lrange(0, &args(&[b"l", b"-2", b"-1"])).unwrap(),
            vec![b"c".to_vec(), b"d".to_vec()]
        );
        assert!(s.lrange(0, &args(&[b"l", b"3", b"1"])).unwrap().is_empty());
        assert!(s
            .lrange(0, &args(&[b"missing", b"0", b"-1"]))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn lset_replaces_in_place() {
        let s = new_store();
        s.rpush(0, &args(&[b"l", b"a", b"b", b"c"])).unwrap();
        s.lset(0, &args(&[b"l", b"1", b"B"])).unwrap();
        s.lset(0, &args(&[b"l", b"-1", b"C"])).unwrap();
        assert_eq!(
            s.lrange(0, &args(&[b"l", b"0", b"-1"])).unwrap(),
            vec![b"a".to_vec(), b"B".to_vec(), b"C".to_vec()]
        );

        assert!(s.lset(0, &args(&[b"l", b"9", b"X"])).is_err());
        assert!(s.lset(0, &args(&[b"missing", b"0", b"X"])).is_err());
    }

    #[test]
    fn ltrim_keeps_window() {
        let s = new_store();
        s.rpush(0, &args(&[b"l", b"a", b"b", b"c", b"d", b"e"])).unwrap();
        s.ltrim(0, &args(&[b"l", b"1", b"3"])).unwrap();
        assert_eq!(
            s.lrange(0, &args(&[b"l", b"0", b"-1"])).unwrap(),
            vec![b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]
        );
        // pushing still works against the trimmed cursors
        s.lpush(0, &args(&[b"l", b"a"])).unwrap();
        assert_eq!(s.llen(0, &args(&[b"l"])).unwrap(), 4);
    }

    #[test]
    fn ltrim_empty_range_deletes_key() {
        let s = new_store();
        s.rpush(0, &args(&[b"l", b"a", b"b"])).unwrap();
        s.ltrim(0, &args(&[b"l", b"5", b"1"])).unwrap();
        assert_eq!(s.exists(0, &args(&[b"l"])).unwrap(), 0);
    }

    #[test]
    fn wrong_type_rejected() {
        let s = new_store();
        s.set(0, &args(&[b"k", b"v"])).unwrap();
        assert!(matches!(
            s.rpush(0, &args(&[b"k", b"a"])).unwrap_err(),
            StoreError::NotList
        ));
        assert!(matches!(
            s.llen(0, &args(&[b"k"])).unwrap_err(),
            StoreError::NotList
        ));
    }
}
