//! Sorted-set commands.
//!
//! Alongside its per-member data cells a zset maintains index cells
//! keyed by `(sign, score, member)`, so every range command is an
//! ordered walk over the index prefix. Scores are integers bounded to
//! `[-2^53, 2^53]`; see [`crate::codec`].

use std::collections::HashMap;

use bytes::Bytes;

use crate::codec::is_valid_score;
pub use crate::codec::{MAX_SCORE, MIN_SCORE};
use crate::engine::Batch;
use crate::error::{err_args, StoreError};
use crate::store::row::{Row, ZSetRow};
use crate::store::{sanitize_indexes, Forward, Store};
use crate::util::{format_int, parse_int, MarkSet};

/// Sentinel scores used only to position range seeks; never stored.
const NEG_INF_SCORE: i64 = i64::MIN;
const POS_INF_SCORE: i64 = i64::MAX;

/// Inclusive/exclusive score interval.
#[derive(Debug, Clone, Copy)]
struct RangeSpec {
    min: i64,
    max: i64,
    min_ex: bool,
    max_ex: bool,
}

impl RangeSpec {
    fn all() -> Self {
        Self {
            min: NEG_INF_SCORE,
            max: POS_INF_SCORE,
            min_ex: false,
            max_ex: false,
        }
    }

    fn gte_min(&self, v: i64) -> bool {
        if self.min_ex {
            v > self.min
        } else {
            v >= self.min
        }
    }

    fn lte_max(&self, v: i64) -> bool {
        if self.max_ex {
            v < self.max
        } else {
            v <= self.max
        }
    }

    fn in_range(&self, v: i64) -> bool {
        if self.min > self.max || (self.min == self.max && (self.min_ex || self.max_ex)) {
            return false;
        }
        self.gte_min(v) && self.lte_max(v)
    }
}

/// Parses one score bound: optional `(` for exclusive, `-inf`/`+inf`,
/// or a decimal score within the storable range.
fn parse_range_score(buf: &[u8]) -> Result<(i64, bool), StoreError> {
    if buf.is_empty() {
        return Err(err_args!("empty range score argument"));
    }
    let (buf, ex) = if buf[0] == b'(' {
        (&buf[1..], true)
    } else {
        (buf, false)
    };
    match buf.to_ascii_lowercase().as_slice() {
        b"-inf" => Ok((NEG_INF_SCORE, ex)),
        b"+inf" | b"inf" => Ok((POS_INF_SCORE, ex)),
        _ => {
            let score = parse_int(buf)?;
            if !is_valid_score(score) {
                return Err(StoreError::InvalidScore(score));
            }
            Ok((score, ex))
        }
    }
}

fn parse_range_spec(min: &[u8], max: &[u8]) -> Result<RangeSpec, StoreError> {
    let (min, min_ex) = parse_range_score(min)?;
    let (max, max_ex) = parse_range_score(max)?;
    Ok(RangeSpec {
        min,
        max,
        min_ex,
        max_ex,
    })
}

/// One end of a lexicographic interval.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LexBound {
    /// `-`: before every member.
    NegInf,
    /// `+`: after every member.
    PosInf,
    Value(Vec<u8>),
}

#[derive(Debug, Clone)]
struct LexRangeSpec {
    min: LexBound,
    max: LexBound,
    min_ex: bool,
    max_ex: bool,
}

impl LexRangeSpec {
    fn gte_min(&self, v: &[u8]) -> bool {
        match &self.min {
            LexBound::NegInf => true,
            LexBound::PosInf => false,
            LexBound::Value(m) => {
                if self.min_ex {
                    v > m.as_slice()
                } else {
                    v >= m.as_slice()
                }
            }
        }
    }

    fn lte_max(&self, v: &[u8]) -> bool {
        match &self.max {
            LexBound::PosInf => true,
            LexBound::NegInf => false,
            LexBound::Value(m) => {
                if self.max_ex {
                    v < m.as_slice()
                } else {
                    v <= m.as_slice()
                }
            }
        }
    }

    fn in_range(&self, v: &[u8]) -> bool {
        if let (LexBound::Value(min), LexBound::Value(max)) = (&self.min, &self.max) {
            if min > max || (min == max && (self.min_ex || self.max_ex)) {
                return false;
            }
        }
        self.gte_min(v) && self.lte_max(v)
    }
}

/// Parses one lex bound: `-`, `+`, `[member`, or `(member`.
fn parse_lex_item(buf: &[u8]) -> Result<(LexBound, bool), StoreError> {
    if buf.is_empty() {
        return Err(err_args!("empty lex range item"));
    }
    match buf[0] {
        b'+' if buf.len() == 1 => Ok((LexBound::PosInf, false)),
        b'-' if buf.len() == 1 => Ok((LexBound::NegInf, false)),
        b'[' | b'(' if buf.len() > 1 => {
            Ok((LexBound::Value(buf[1..].to_vec()), buf[0] == b'('))
        }
        _ => Err(err_args!("invalid lex range item")),
    }
}

fn parse_lex_range_spec(min: &[u8], max: &[u8]) -> Result<LexRangeSpec, StoreError> {
    let (min, min_ex) = parse_lex_item(min)?;
    let (max, max_ex) = parse_lex_item(max)?;
    Ok(LexRangeSpec {
        min,
        max,
        min_ex,
        max_ex,
    })
}

impl Store {
    pub(crate) fn load_zset_row(
        &self,
        db: u32,
        key: &[u8],
        batch: Option<&mut Batch>,
    ) -> Result<Option<ZSetRow>, StoreError> {
        match self.load_row(db, key, batch)? {
            Some(Row::ZSet(o)) => Ok(Some(o)),
            Some(_) => Err(StoreError::NotZSet),
            None => Ok(None),
        }
    }

    fn member_score(&self, o: &ZSetRow, member: &[u8]) -> Result<Option<i64>, StoreError> {
        match self.reader().get(&o.member_key(member))? {
            Some(raw) => Ok(Some(ZSetRow::parse_member_value(&raw)?)),
            None => Ok(None),
        }
    }

    /// Walks the index forward within `r`, calling `f(score, member)`
    /// for each entry in range. `f` returns `false` to stop early.
    fn travel_in_range(
        &self,
        o: &ZSetRow,
        r: &RangeSpec,
        f: &mut dyn FnMut(i64, &[u8]) -> Result<bool, StoreError>,
    ) -> Result<(), StoreError> {
        let prefix = o.hdr.index_key_prefix();
        let mut guard = self.get_iterator()?;
        let it = guard.iter();

        it.seek_to(&o.index_key(r.min, b""));
        while it.valid() {
            let key = it.key();
            if !key.starts_with(&prefix) {
                return Ok(());
            }
            let (score, member) = ZSetRow::parse_index_suffix(&key[prefix.len()..])?;
            if r.in_range(score) {
                if !f(score, &member)? {
                    return Ok(());
                }
            } else if !r.lte_max(score) {
                return Ok(());
            }
            it.next();
        }
        Ok(())
    }

    /// Reverse walk of the index within `r`.
    fn reverse_travel_in_range(
        &self,
        o: &ZSetRow,
        r: &RangeSpec,
        f: &mut dyn FnMut(i64, &[u8]) -> Result<bool, StoreError>,
    ) -> Result<(), StoreError> {
        let prefix = o.hdr.index_key_prefix();
        let mut guard = self.get_iterator()?;
        let it = guard.iter();

        // land just past the range end, then step back onto it
        let seek_score = if r.max == POS_INF_SCORE {
            POS_INF_SCORE
        } else {
            r.max + 1
        };
        it.seek_to(&o.index_key(seek_score, b""));
        if !it.valid() {
            it.seek_to_last();
        } else {
            it.prev();
        }

        while it.valid() {
            let key = it.key();
            if !key.starts_with(&prefix) {
                return Ok(());
            }
            let (score, member) = ZSetRow::parse_index_suffix(&key[prefix.len()..])?;
            if r.in_range(score) {
                if !f(score, &member)? {
                    return Ok(());
                }
            } else if !r.gte_min(score) {
                return Ok(());
            }
            it.prev();
        }
        Ok(())
    }

    /// Forward walk in a lex interval; all entries share one score
    /// class for lex semantics, so ordering is by member.
    fn travel_in_lex_range(
        &self,
        o: &ZSetRow,
        r: &LexRangeSpec,
        f: &mut dyn FnMut(i64, &[u8]) -> Result<bool, StoreError>,
    ) -> Result<(), StoreError> {
        let prefix = o.hdr.index_key_prefix();
        let mut guard = self.get_iterator()?;
        let it = guard.iter();

        let seek_member: &[u8] = match &r.min {
            LexBound::Value(m) => m,
            _ => b"",
        };
        it.seek_to(&o.index_key(MIN_SCORE, seek_member));
        while it.valid() {
            let key = it.key();
            if !key.starts_with(&prefix) {
                return Ok(());
            }
            let (score, member) = ZSetRow::parse_index_suffix(&key[prefix.len()..])?;
            if r.in_range(&member) {
                if !f(score, &member)? {
                    return Ok(());
                }
            } else if !r.lte_max(&member) {
                return Ok(());
            }
            it.next();
        }
        Ok(())
    }

    /// Reverse walk in a lex interval.
    fn reverse_travel_in_lex_range(
        &self,
        o: &ZSetRow,
        r: &LexRangeSpec,
        f: &mut dyn FnMut(i64, &[u8]) -> Result<bool, StoreError>,
    ) -> Result<(), StoreError> {
        let prefix = o.hdr.index_key_prefix();
        let mut guard = self.get_iterator()?;
        let it = guard.iter();

        // no stored score reaches the sentinel, so this key sorts past
        // every entry of the zset
        match &r.max {
            LexBound::Value(m) => it.seek_to(&o.index_key(POS_INF_SCORE, m)),
            _ => {
                let mut key = prefix.clone();
                key.push(0xff);
                it.seek_to(&key);
            }
        }
        if !it.valid() {
            it.seek_to_last();
        } else {
            it.prev();
        }

        while it.valid() {
            let key = it.key();
            if !key.starts_with(&prefix) {
                return Ok(());
            }
            let (score, member) = ZSetRow::parse_index_suffix(&key[prefix.len()..])?;
            if r.in_range(&member) {
                if !f(score, &member)? {
                    return Ok(());
                }
            } else if !r.gte_min(&member) {
                return Ok(());
            }
            it.prev();
        }
        Ok(())
    }

    /// ZGETALL key — flat `[member, score, member, score, ...]`.
    pub fn zget_all(&self, db: u32, args: &[Bytes]) -> Result<Vec<Vec<u8>>, StoreError> {
        if args.len() != 1 {
            return Err(err_args!("len(args) = {}, expect = 1", args.len()));
        }
        let _g = self.acquire_read();

        let Some(o) = self.load_zset_row(db, &args[0], None)? else {
            return Ok(Vec::new());
        };
        let mut out = Vec::with_capacity(o.size.max(0) as usize * 2);
        self.travel_in_range(&o, &RangeSpec::all(), &mut |score, member| {
            out.push(member.to_vec());
            out.push(format_int(score));
            Ok(true)
        })?;
        Ok(out)
    }

    /// ZCARD key
    pub fn zcard(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.len() != 1 {
            return Err(err_args!("len(args) = {}, expect = 1", args.len()));
        }
        let _g = self.acquire_read();

        Ok(self
            .load_zset_row(db, &args[0], None)?
            .map(|o| o.size)
            .unwrap_or(0))
    }

    /// ZADD key score member [score member ...] — returns the number
    /// of members created.
    pub fn zadd(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.len() < 3 || args.len() % 2 != 1 {
            return Err(err_args!(
                "len(args) = {}, expect odd >= 3",
                args.len()
            ));
        }
        let key = &args[0];

        let mut pairs = Vec::with_capacity(args.len() / 2);
        for i in 0..args.len() / 2 {
            let score = parse_int(&args[i * 2 + 1])?;
            if !is_valid_score(score) {
                return Err(StoreError::InvalidScore(score));
            }
            let member = &args[i * 2 + 2];
            if member.is_empty() {
                return Err(err_args!("empty zset member"));
            }
            pairs.push((score, member));
        }

        let _g = self.acquire_write();

        let mut bt = Batch::new();
        let mut o = match self.load_zset_row(db, key, Some(&mut bt))? {
            Some(o) => o,
            None => ZSetRow::new(db, key),
        };

        // pending tracks scores staged earlier in this same command so
        // a repeated member replaces its own uncommitted index entry
        let mut ms = MarkSet::new();
        let mut pending: HashMap<Vec<u8>, i64> = HashMap::new();
        for (score, member) in pairs {
            let old = match pending.get(member.as_ref()) {
                Some(staged) => Some(*staged),
                None => self.member_score(&o, member)?,
            };
            match old {
                Some(old_score) => {
                    bt.del(o.index_key(old_score, member));
                }
                None => {
                    ms.set(member);
                }
            }
            bt.set(o.member_key(member), ZSetRow::member_value(score));
            bt.set(o.index_key(score, member), ZSetRow::index_value());
            pending.insert(member.to_vec(), score);
        }

        let n = ms.len();
        if n != 0 {
            o.size += n;
            bt.set(o.hdr.meta_key(), o.meta_value());
        }

        self.commit(bt, Forward::new(db, "ZAdd", args))?;
        Ok(n)
    }

    /// ZREM key member [member ...]
    pub fn zrem(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.len() < 2 {
            return Err(err_args!("len(args) = {}, expect >= 2", args.len()));
        }
        let key = &args[0];
        let _g = self.acquire_write();

        let mut bt = Batch::new();
        let Some(mut o) = self.load_zset_row(db, key, Some(&mut bt))? else {
            self.commit(bt, Forward::new(db, "ZRem", args))?;
            return Ok(0);
        };

        let mut ms = MarkSet::new();
        for member in &args[1..] {
            if ms.has(member) {
                continue;
            }
            if let Some(score) = self.member_score(&o, member)? {
                bt.del(o.member_key(member));
                bt.del(o.index_key(score, member));
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

        self.commit(bt, Forward::new(db, "ZRem", args))?;
        Ok(n)
    }

    /// ZSCORE key member
    pub fn zscore(&self, db: u32, args: &[Bytes]) -> Result<Option<i64>, StoreError> {
        if args.len() != 2 {
            return Err(err_args!("len(args) = {}, expect = 2", args.len()));
        }
        let _g = self.acquire_read();

        match self.load_zset_row(db, &args[0], None)? {
            Some(o) => self.member_score(&o, &args[1]),
            None => Ok(None),
        }
    }

    /// ZINCRBY key delta member
    pub fn zincr_by(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.len() != 3 {
            return Err(err_args!("len(args) = {}, expect = 3", args.len()));
        }
        let key = &args[0];
        let delta = parse_int(&args[1])?;
        let member = &args[2];
        let _g = self.acquire_write();

        let mut bt = Batch::new();
        let mut o = match self.load_zset_row(db, key, Some(&mut bt))? {
            Some(o) => o,
            None => ZSetRow::new(db, key),
        };

        let old = self.member_score(&o, member)?;
        let score = match old {
            Some(old_score) => {
                // the stale index entry must go before the new one lands
                bt.del(o.index_key(old_score, member));
                old_score
                    .checked_add(delta)
                    .ok_or_else(|| err_args!("increment would overflow"))?
            }
            None => {
                o.size += 1;
                bt.set(o.hdr.meta_key(), o.meta_value());
                delta
            }
        };
        if !is_valid_score(score) {
            return Err(StoreError::InvalidScore(score));
        }

        bt.set(o.member_key(member), ZSetRow::member_value(score));
        bt.set(o.index_key(score, member), ZSetRow::index_value());

        self.commit(bt, Forward::new(db, "ZIncrBy", args))?;
        Ok(score)
    }

    /// ZCOUNT key min max
    pub fn zcount(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.len() != 3 {
            return Err(err_args!("len(args) = {}, expect = 3", args.len()));
        }
        let r = parse_range_spec(&args[1], &args[2])?;
        let _g = self.acquire_read();

        let Some(o) = self.load_zset_row(db, &args[0], None)? else {
            return Ok(0);
        };
        let mut count = 0i64;
        self.travel_in_range(&o, &r, &mut |_, _| {
            count += 1;
            Ok(true)
        })?;
        Ok(count)
    }

    /// ZLEXCOUNT key min max
    pub fn zlex_count(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.len() != 3 {
            return Err(err_args!("len(args) = {}, expect = 3", args.len()));
        }
        let r = parse_lex_range_spec(&args[1], &args[2])?;
        let _g = self.acquire_read();

        let Some(o) = self.load_zset_row(db, &args[0], None)? else {
            return Ok(0);
        };
        let mut count = 0i64;
        self.travel_in_lex_range(&o, &r, &mut |_, _| {
            count += 1;
            Ok(true)
        })?;
        Ok(count)
    }

    fn generic_zrange(
        &self,
        db: u32,
        args: &[Bytes],
        reverse: bool,
    ) -> Result<Vec<Vec<u8>>, StoreError> {
        if args.len() != 3 && args.len() != 4 {
            return Err(err_args!("len(args) = {}, expect = 3 or 4", args.len()));
        }
        let start = parse_int(&args[1])?;
        let stop = parse_int(&args[2])?;
        let with_scores = match args.get(3) {
            Some(a) if a.to_ascii_uppercase() == b"WITHSCORES" => true,
            Some(_) => return Err(err_args!("expect WITHSCORES")),
            None => false,
        };
        let _g = self.acquire_read();

        let Some(o) = self.load_zset_row(db, &args[0], None)? else {
            return Ok(Vec::new());
        };

        let (start, _stop, mut range_len) = sanitize_indexes(start, stop, o.size);
        if range_len == 0 {
            return Ok(Vec::new());
        }

        let mut res = Vec::new();
        let mut offset = 0i64;
        let mut f = |score: i64, member: &[u8]| {
            if offset >= start {
                res.push(member.to_vec());
                if with_scores {
                    res.push(format_int(score));
                }
                range_len -= 1;
                if range_len <= 0 {
                    return Ok(false);
                }
            }
            offset += 1;
            Ok(true)
        };

        let r = RangeSpec::all();
        if reverse {
            self.reverse_travel_in_range(&o, &r, &mut f)?;
        } else {
            self.travel_in_range(&o, &r, &mut f)?;
        }
        Ok(res)
    }

    /// ZRANGE key start stop [WITHSCORES]
    pub fn zrange(&self, db: u32, args: &[Bytes]) -> Result<Vec<Vec<u8>>, StoreError> {
        self.generic_zrange(db, args, false)
    }

    /// ZREVRANGE key start stop [WITHSCORES]
    pub fn zrev_range(&self, db: u32, args: &[Bytes]) -> Result<Vec<Vec<u8>>, StoreError> {
        self.generic_zrange(db, args, true)
    }

    fn generic_zrange_by_score(
        &self,
        db: u32,
        args: &[Bytes],
        reverse: bool,
    ) -> Result<Vec<Vec<u8>>, StoreError> {
        if args.len() < 3 {
            return Err(err_args!("len(args) = {}, expect >= 3", args.len()));
        }
        // reverse commands take (max, min) on the wire
        let (min, max) = if reverse {
            (&args[2], &args[1])
        } else {
            (&args[1], &args[2])
        };
        let r = parse_range_spec(min, max)?;

        let mut with_scores = false;
        let mut offset = 0i64;
        let mut count = -1i64;
        let mut i = 3;
        while i < args.len() {
            match args[i].to_ascii_uppercase().as_slice() {
                b"WITHSCORES" => {
                    with_scores = true;
                    i += 1;
                }
                b"LIMIT" => {
                    if i + 2 >= args.len() {
                        return Err(err_args!("invalid LIMIT format"));
                    }
                    offset = parse_int(&args[i + 1])?;
                    count = parse_int(&args[i + 2])?;
                    i += 3;
                }
                _ => return Err(err_args!("unexpected argument at {i}")),
            }
        }

        let _g = self.acquire_read();

        let Some(o) = self.load_zset_row(db, &args[0], None)? else {
            return Ok(Vec::new());
        };

        let mut res = Vec::new();
        let mut n = 0i64;
        let mut f = |score: i64, member: &[u8]| {
            if n >= offset {
                if count == 0 {
                    return Ok(false);
                }
                res.push(member.to_vec());
                if with_scores {
                    res.push(format_int(score));
                }
                count -= 1;
            }
            n += 1;
            Ok(true)
        };

        if reverse {
            self.reverse_travel_in_range(&o, &r, &mut f)?;
        } else {
            self.travel_in_range(&o, &r, &mut f)?;
        }
        Ok(res)
    }

    /// ZRANGEBYSCORE key min max [WITHSCORES] [LIMIT offset count]
    pub fn zrange_by_score(&self, db: u32, args: &[Bytes]) -> Result<Vec<Vec<u8>>, StoreError> {
        self.generic_zrange_by_score(db, args, false)
    }

    /// ZREVRANGEBYSCORE key max min [WITHSCORES] [LIMIT offset count]
    pub fn zrev_range_by_score(&self, db: u32, args: &[Bytes]) -> Result<Vec<Vec<u8>>, StoreError> {
        self.generic_zrange_by_score(db, args, true)
    }

    fn generic_zrange_by_lex(
        &self,
        db: u32,
        args: &[Bytes],
        reverse: bool,
    ) -> Result<Vec<Vec<u8>>, StoreError> {
        if args.len() != 3 && args.len() != 6 {
            return Err(err_args!("len(args) = {}, expect = 3 or 6", args.len()));
        }
        let (min, max) = if reverse {
            (&args[2], &args[1])
        } else {
            (&args[1], &args[2])
        };
        let r = parse_lex_range_spec(min, max)?;

        let mut offset = 0i64;
        let mut count = -1i64;
        if args.len() == 6 {
            if args[3].to_ascii_uppercase() != b"LIMIT" {
                return Err(err_args!("expect LIMIT"));
            }
            offset = parse_int(&args[4])?;
            count = parse_int(&args[5])?;
        }

        let _g = self.acquire_read();

        let Some(o) = self.load_zset_row(db, &args[0], None)? else {
            return Ok(Vec::new());
        };

        let mut res = Vec::new();
        let mut n = 0i64;
        let mut f = |_score: i64, member: &[u8]| {
            if n >= offset {
                if count == 0 {
                    return Ok(false);
                }
                res.push(member.to_vec());
                count -= 1;
            }
            n += 1;
            Ok(true)
        };

        if reverse {
            self.reverse_travel_in_lex_range(&o, &r, &mut f)?;
        } else {
            self.travel_in_lex_range(&o, &r, &mut f)?;
        }
        Ok(res)
    }

    /// ZRANGEBYLEX key min max [LIMIT offset count]
    pub fn zrange_by_lex(&self, db: u32, args: &[Bytes]) -> Result<Vec<Vec<u8>>, StoreError> {
        self.generic_zrange_by_lex(db, args, false)
    }

    /// ZREVRANGEBYLEX key max min [LIMIT offset count]
    pub fn zrev_range_by_lex(&self, db: u32, args: &[Bytes]) -> Result<Vec<Vec<u8>>, StoreError> {
        self.generic_zrange_by_lex(db, args, true)
    }

    fn generic_zrank(
        &self,
        db: u32,
        args: &[Bytes],
        reverse: bool,
    ) -> Result<Option<i64>, StoreError> {
        if args.len() != 2 {
            return Err(err_args!("len(args) = {}, expect = 2", args.len()));
        }
        let member = &args[1];
        let _g = self.acquire_read();

        let Some(o) = self.load_zset_row(db, &args[0], None)? else {
            return Ok(None);
        };
        let Some(score) = self.member_score(&o, member)? else {
            return Ok(None);
        };

        // rank = number of index entries ahead of the member's own
        let mut rank = 0i64;
        let r = RangeSpec {
            min: NEG_INF_SCORE,
            max: score,
            min_ex: false,
            max_ex: false,
        };
        let target = member.as_ref();
        self.travel_in_range(&o, &r, &mut |s, m| {
            if s == score && m == target {
                Ok(false)
            } else {
                rank += 1;
                Ok(true)
            }
        })?;

        if reverse {
            Ok(Some(o.size - 1 - rank))
        } else {
            Ok(Some(rank))
        }
    }

    /// ZRANK key member — 0-based; `None` for a missing member.
    pub fn zrank(&self, db: u32, args: &[Bytes]) -> Result<Option<i64>, StoreError> {
        self.generic_zrank(db, args, false)
    }

    /// ZREVRANK key member
    pub fn zrev_rank(&self, db: u32, args: &[Bytes]) -> Result<Option<i64>, StoreError> {
        self.generic_zrank(db, args, true)
    }

    /// Shared tail for the ZREMRANGE* family: stage deletions
    /// collected by the walk, fix up the meta row, commit.
    fn finish_rem_range(
        &self,
        db: u32,
        args: &[Bytes],
        op: &str,
        mut bt: Batch,
        mut o: ZSetRow,
        victims: Vec<(i64, Vec<u8>)>,
    ) -> Result<i64, StoreError> {
        let n = victims.len() as i64;
        for (score, member) in victims {
            bt.del(o.member_key(&member));
            bt.del(o.index_key(score, &member));
        }
        if n > 0 {
            o.size -= n;
            if o.size > 0 {
                bt.set(o.hdr.meta_key(), o.meta_value());
            } else {
                bt.del(o.hdr.meta_key());
            }
        }
        self.commit(bt, Forward::new(db, op, args))?;
        Ok(n)
    }

    /// ZREMRANGEBYLEX key min max
    pub fn zrem_range_by_lex(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.len() != 3 {
            return Err(err_args!("len(args) = {}, expect = 3", args.len()));
        }
        let r = parse_lex_range_spec(&args[1], &args[2])?;
        let _g = self.acquire_write();

        let mut bt = Batch::new();
        let Some(o) = self.load_zset_row(db, &args[0], Some(&mut bt))? else {
            self.commit(bt, Forward::new(db, "ZRemRangeByLex", args))?;
            return Ok(0);
        };

        let mut victims = Vec::new();
        self.travel_in_lex_range(&o, &r, &mut |score, member| {
            victims.push((score, member.to_vec()));
            Ok(true)
        })?;
        self.finish_rem_range(db, args, "ZRemRangeByLex", bt, o, victims)
    }

    /// ZREMRANGEBYRANK key start stop
    pub fn zrem_range_by_rank(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.len() != 3 {
            return Err(err_args!("len(args) = {}, expect = 3", args.len()));
        }
        let start = parse_int(&args[1])?;
        let stop = parse_int(&args[2])?;
        let _g = self.acquire_write();

        let mut bt = Batch::new();
        let Some(o) = self.load_zset_row(db, &args[0], Some(&mut bt))? else {
            self.commit(bt, Forward::new(db, "ZRemRangeByRank", args))?;
            return Ok(0);
        };

        let (start, _stop, mut range_len) = sanitize_indexes(start, stop, o.size);
        let mut victims = Vec::new();
        if range_len > 0 {
            let mut offset = 0i64;
            self.travel_in_range(&o, &RangeSpec::all(), &mut |score, member| {
                if offset >= start {
                    victims.push((score, member.to_vec()));
                    range_len -= 1;
                    if range_len <= 0 {
                        return Ok(false);
                    }
                }
                offset += 1;
                Ok(true)
            })?;
        }
        self.finish_rem_range(db, args, "ZRemRangeByRank", bt, o, victims)
    }

    /// ZREMRANGEBYSCORE key min max
    pub fn zrem_range_by_score(&self, db: u32, args: &[Bytes]) -> Result<i64, StoreError> {
        if args.len() != 3 {
            return Err(err_args!("len(args) = {}, expect = 3", args.len()));
        }
        let r = parse_range_spec(&args[1], &args[2])?;
        let _g = self.acquire_write();

        let mut bt = Batch::new();
        let Some(o) = self.load_zset_row(db, &args[0], Some(&mut bt))? else {
            self.commit(bt, Forward::new(db, "ZRemRangeByScore", args))?;
            return Ok(0);
        };

        let mut victims = Vec::new();
        self.travel_in_range(&o, &r, &mut |score, member| {
            victims.push((score, member.to_vec()));
            Ok(true)
        })?;
        self.finish_rem_range(db, args, "ZRemRangeByScore", bt, o, victims)
    }
}
