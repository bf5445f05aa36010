//! Typed rows and their engine-key grammar.
//!
//! Every engine key starts with a kind byte (meta / data / index), the
//! database number, and the length-prefixed user key. The per-kind
//! suffix and the value layout depend on the row's type code — see the
//! encoders below. Values always lead with the type code byte so a
//! mismatched read fails loudly instead of misparsing.

use crate::codec::{score_sign_byte, BufReader, BufWriter};
use crate::error::{CodecError, StoreError};
use crate::expire;

/// Key kind bytes. Distinct prefixes keep the three row families in
/// disjoint, individually scannable regions of the engine.
pub(crate) const META_PREFIX: u8 = b'm';
pub(crate) const DATA_PREFIX: u8 = b'd';
pub(crate) const INDEX_PREFIX: u8 = b'i';

/// The five storable object types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TypeCode {
    String = 1,
    Hash = 2,
    List = 3,
    Set = 4,
    ZSet = 5,
}

impl TypeCode {
    pub fn from_u8(b: u8) -> Result<TypeCode, CodecError> {
        match b {
            1 => Ok(TypeCode::String),
            2 => Ok(TypeCode::Hash),
            3 => Ok(TypeCode::List),
            4 => Ok(TypeCode::Set),
            5 => Ok(TypeCode::ZSet),
            other => Err(CodecError::UnknownCode(other)),
        }
    }

    /// Name reported by the TYPE command.
    pub fn as_str(self) -> &'static str {
        match self {
            TypeCode::String => "string",
            TypeCode::Hash => "hash",
            TypeCode::List => "list",
            TypeCode::Set => "set",
            TypeCode::ZSet => "zset",
        }
    }
}

/// A fully-loaded typed value, as exchanged with DUMP/RESTORE and the
/// snapshot writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    String(Vec<u8>),
    Hash(Vec<(Vec<u8>, Vec<u8>)>),
    List(Vec<Vec<u8>>),
    Set(Vec<Vec<u8>>),
    ZSet(Vec<(Vec<u8>, i64)>),
}

impl Value {
    pub fn code(&self) -> TypeCode {
        match self {
            Value::String(_) => TypeCode::String,
            Value::Hash(_) => TypeCode::Hash,
            Value::List(_) => TypeCode::List,
            Value::Set(_) => TypeCode::Set,
            Value::ZSet(_) => TypeCode::ZSet,
        }
    }
}

fn key_tuple(prefix: u8, db: u32, key: &[u8]) -> BufWriter {
    let mut w = BufWriter::new();
    w.put_u8(prefix).put_u32(db).put_varbytes(key);
    w
}

/// `m <db> <key>`
pub(crate) fn meta_key(db: u32, key: &[u8]) -> Vec<u8> {
    key_tuple(META_PREFIX, db, key).into_bytes()
}

/// `d <db> <key>` — every data cell of the key extends this.
pub(crate) fn data_key_prefix(db: u32, key: &[u8]) -> Vec<u8> {
    key_tuple(DATA_PREFIX, db, key).into_bytes()
}

/// `i <db> <key>` — every zset index cell of the key extends this.
pub(crate) fn index_key_prefix(db: u32, key: &[u8]) -> Vec<u8> {
    key_tuple(INDEX_PREFIX, db, key).into_bytes()
}

/// Key prefix for an entire database's meta rows.
pub(crate) fn meta_db_prefix(db: u32) -> Vec<u8> {
    let mut w = BufWriter::new();
    w.put_u8(META_PREFIX).put_u32(db);
    w.into_bytes()
}

/// First byte of the whole meta region; scanning from here visits
/// every key of every database.
pub(crate) fn meta_region_start() -> Vec<u8> {
    vec![META_PREFIX]
}

/// Splits a full meta key back into `(db, key)`.
pub(crate) fn parse_meta_key(raw: &[u8]) -> Result<(u32, Vec<u8>), CodecError> {
    let mut r = BufReader::new(raw);
    let prefix = r.get_u8()?;
    if prefix != META_PREFIX {
        return Err(CodecError::UnknownCode(prefix));
    }
    let db = r.get_u32()?;
    let key = r.get_varbytes()?.to_vec();
    r.finish()?;
    Ok((db, key))
}

/// List slot indices are signed (LPUSH allocates below the head) but
/// must sort as unsigned engine bytes; flipping the sign bit gives an
/// order-preserving u64 image.
#[inline]
pub(crate) fn list_index_ordered(index: i64) -> u64 {
    (index as u64) ^ (1u64 << 63)
}

/// Common header shared by every typed row.
#[derive(Debug, Clone)]
pub(crate) struct RowHeader {
    pub db: u32,
    pub key: Vec<u8>,
    pub expire_at: u64,
}

impl RowHeader {
    pub fn new(db: u32, key: &[u8]) -> Self {
        Self {
            db,
            key: key.to_vec(),
            expire_at: expire::NO_EXPIRY,
        }
    }

    pub fn is_expired(&self) -> bool {
        expire::is_expired(self.expire_at)
    }

    pub fn meta_key(&self) -> Vec<u8> {
        meta_key(self.db, &self.key)
    }

    pub fn data_key_prefix(&self) -> Vec<u8> {
        data_key_prefix(self.db, &self.key)
    }

    pub fn index_key_prefix(&self) -> Vec<u8> {
        index_key_prefix(self.db, &self.key)
    }

    fn meta_value_header(&self, code: TypeCode) -> BufWriter {
        let mut w = BufWriter::new();
        w.put_u8(code as u8).put_u64(self.expire_at);
        w
    }
}

// ---------------------------------------------------------------------------
// typed rows
// ---------------------------------------------------------------------------

/// String: one data cell, no aggregates.
#[derive(Debug, Clone)]
pub(crate) struct StringRow {
    pub hdr: RowHeader,
    pub value: Vec<u8>,
}

impl StringRow {
    pub fn new(db: u32, key: &[u8]) -> Self {
        Self {
            hdr: RowHeader::new(db, key),
            value: Vec::new(),
        }
    }

    pub fn data_key(&self) -> Vec<u8> {
        self.hdr.data_key_prefix()
    }

    pub fn data_value(&self) -> Vec<u8> {
        let mut w = BufWriter::new();
        w.put_u8(TypeCode::String as u8);
        let mut out = w.into_bytes();
        out.extend_from_slice(&self.value);
        out
    }

    pub fn meta_value(&self) -> Vec<u8> {
        self.hdr.meta_value_header(TypeCode::String).into_bytes()
    }

    pub fn parse_data_value(raw: &[u8]) -> Result<Vec<u8>, StoreError> {
        let mut r = BufReader::new(raw);
        expect_code(&mut r, TypeCode::String)?;
        Ok(r.get_rest().to_vec())
    }
}

/// Hash: one data cell per field, meta carries the field count.
#[derive(Debug, Clone)]
pub(crate) struct HashRow {
    pub hdr: RowHeader,
    pub size: i64,
}

impl HashRow {
    pub fn new(db: u32, key: &[u8]) -> Self {
        Self {
            hdr: RowHeader::new(db, key),
            size: 0,
        }
    }

    pub fn field_key(&self, field: &[u8]) -> Vec<u8> {
        let mut w = BufWriter::with_prefix(&self.hdr.data_key_prefix());
        w.put_varbytes(field);
        w.into_bytes()
    }

    pub fn field_value(value: &[u8]) -> Vec<u8> {
        let mut w = BufWriter::new();
        w.put_u8(TypeCode::Hash as u8);
        let mut out = w.into_bytes();
        out.extend_from_slice(value);
        out
    }

    pub fn parse_field_value(raw: &[u8]) -> Result<Vec<u8>, StoreError> {
        let mut r = BufReader::new(raw);
        expect_code(&mut r, TypeCode::Hash)?;
        Ok(r.get_rest().to_vec())
    }

    /// Splits a full data key into the field suffix.
    pub fn parse_field_suffix(suffix: &[u8]) -> Result<Vec<u8>, StoreError> {
        let mut r = BufReader::new(suffix);
        let field = r.get_varbytes()?.to_vec();
        r.finish()?;
        Ok(field)
    }

    pub fn meta_value(&self) -> Vec<u8> {
        let mut w = self.hdr.meta_value_header(TypeCode::Hash);
        w.put_i64(self.size);
        w.into_bytes()
    }
}

/// List: data cells addressed by slot index; meta carries the two
/// cursors. The list occupies `head..=tail`; an empty list has no
/// rows at all.
#[derive(Debug, Clone)]
pub(crate) struct ListRow {
    pub hdr: RowHeader,
    pub head: i64,
    pub tail: i64,
}

impl ListRow {
    pub fn new(db: u32, key: &[u8]) -> Self {
        Self {
            hdr: RowHeader::new(db, key),
            head: 0,
            tail: -1,
        }
    }

    pub fn len(&self) -> i64 {
        self.tail - self.head + 1
    }

    pub fn slot_key(&self, index: i64) -> Vec<u8> {
        let mut w = BufWriter::with_prefix(&self.hdr.data_key_prefix());
        w.put_u64(list_index_ordered(index));
        w.into_bytes()
    }

    pub fn slot_value(value: &[u8]) -> Vec<u8> {
        let mut w = BufWriter::new();
        w.put_u8(TypeCode::List as u8);
        let mut out = w.into_bytes();
        out.extend_from_slice(value);
        out
    }

    pub fn parse_slot_value(raw: &[u8]) -> Result<Vec<u8>, StoreError> {
        let mut r = BufReader::new(raw);
        expect_code(&mut r, TypeCode::List)?;
        Ok(r.get_rest().to_vec())
    }

    pub fn meta_value(&self) -> Vec<u8> {
        let mut w = self.hdr.meta_value_header(TypeCode::List);
        w.put_i64(self.head).put_i64(self.tail);
        w.into_bytes()
    }
}

/// Set: one empty-valued data cell per member, meta carries the
/// cardinality.
#[derive(Debug, Clone)]
pub(crate) struct SetRow {
    pub hdr: RowHeader,
    pub size: i64,
}

impl SetRow {
    pub fn new(db: u32, key: &[u8]) -> Self {
        Self {
            hdr: RowHeader::new(db, key),
            size: 0,
        }
    }

    pub fn member_key(&self, member: &[u8]) -> Vec<u8> {
        let mut w = BufWriter::with_prefix(&self.hdr.data_key_prefix());
        w.put_varbytes(member);
        w.into_bytes()
    }

    pub fn member_value() -> Vec<u8> {
        vec![TypeCode::Set as u8]
    }

    pub fn parse_member_suffix(suffix: &[u8]) -> Result<Vec<u8>, StoreError> {
        let mut r = BufReader::new(suffix);
        let member = r.get_varbytes()?.to_vec();
        r.finish()?;
        Ok(member)
    }

    pub fn meta_value(&self) -> Vec<u8> {
        let mut w = self.hdr.meta_value_header(TypeCode::Set);
        w.put_i64(self.size);
        w.into_bytes()
    }
}

/// ZSet: a data cell per member holding its score, plus a score-ordered
/// index cell. Meta carries the cardinality.
#[derive(Debug, Clone)]
pub(crate) struct ZSetRow {
    pub hdr: RowHeader,
    pub size: i64,
}

impl ZSetRow {
    pub fn new(db: u32, key: &[u8]) -> Self {
        Self {
            hdr: RowHeader::new(db, key),
            size: 0,
        }
    }

    pub fn member_key(&self, member: &[u8]) -> Vec<u8> {
        let mut w = BufWriter::with_prefix(&self.hdr.data_key_prefix());
        w.put_varbytes(member);
        w.into_bytes()
    }

    pub fn member_value(score: i64) -> Vec<u8> {
        let mut w = BufWriter::new();
        w.put_u8(TypeCode::ZSet as u8).put_i64(score);
        w.into_bytes()
    }

    pub fn parse_member_value(raw: &[u8]) -> Result<i64, StoreError> {
        let mut r = BufReader::new(raw);
        expect_code(&mut r, TypeCode::ZSet)?;
        let score = r.get_i64()?;
        r.finish()?;
        Ok(score)
    }

    pub fn parse_member_suffix(suffix: &[u8]) -> Result<Vec<u8>, StoreError> {
        let mut r = BufReader::new(suffix);
        let member = r.get_varbytes()?.to_vec();
        r.finish()?;
        Ok(member)
    }

    /// `i <db> <key> <sign> <score> <member>`
    pub fn index_key(&self, score: i64, member: &[u8]) -> Vec<u8> {
        let mut w = BufWriter::with_prefix(&self.hdr.index_key_prefix());
        w.put_u8(score_sign_byte(score))
            .put_i64(score)
            .put_varbytes(member);
        w.into_bytes()
    }

    pub fn index_value() -> Vec<u8> {
        vec![TypeCode::ZSet as u8]
    }

    /// Decodes `(score, member)` from an index key suffix.
    pub fn parse_index_suffix(suffix: &[u8]) -> Result<(i64, Vec<u8>), StoreError> {
        let mut r = BufReader::new(suffix);
        let _sign = r.get_u8()?;
        let score = r.get_i64()?;
        let member = r.get_varbytes()?.to_vec();
        r.finish()?;
        Ok((score, member))
    }

    pub fn meta_value(&self) -> Vec<u8> {
        let mut w = self.hdr.meta_value_header(TypeCode::ZSet);
        w.put_i64(self.size);
        w.into_bytes()
    }
}

fn expect_code(r: &mut BufReader<'_>, expected: TypeCode) -> Result<(), StoreError> {
    let found = TypeCode::from_u8(r.get_u8()?)?;
    if found != expected {
        return Err(CodecError::CodeMismatch { expected, found }.into());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// meta decoding
// ---------------------------------------------------------------------------

/// A decoded meta row of any type.
#[derive(Debug, Clone)]
pub(crate) enum Row {
    String(StringRow),
    Hash(HashRow),
    List(ListRow),
    Set(SetRow),
    ZSet(ZSetRow),
}

impl Row {
    /// Decodes a meta row value for `(db, key)`.
    pub fn decode_meta(db: u32, key: &[u8], raw: &[u8]) -> Result<Row, StoreError> {
        let mut r = BufReader::new(raw);
        let code = TypeCode::from_u8(r.get_u8()?)?;
        let expire_at = r.get_u64()?;

        let mut hdr = RowHeader::new(db, key);
        hdr.expire_at = expire_at;

        let row = match code {
            TypeCode::String => Row::String(StringRow {
                hdr,
                value: Vec::new(),
            }),
            TypeCode::Hash => {
                let size = r.get_i64()?;
                Row::Hash(HashRow { hdr, size })
            }
            TypeCode::List => {
                let head = r.get_i64()?;
                let tail = r.get_i64()?;
                Row::List(ListRow { hdr, head, tail })
            }
            TypeCode::Set => {
                let size = r.get_i64()?;
                Row::Set(SetRow { hdr, size })
            }
            TypeCode::ZSet => {
                let size = r.get_i64()?;
                Row::ZSet(ZSetRow { hdr, size })
            }
        };
        r.finish()?;
        Ok(row)
    }

    pub fn code(&self) -> TypeCode {
        match self {
            Row::String(_) => TypeCode::String,
            Row::Hash(_) => TypeCode::Hash,
            Row::List(_) => TypeCode::List,
            Row::Set(_) => TypeCode::Set,
            Row::ZSet(_) => TypeCode::ZSet,
        }
    }

    pub fn header(&self) -> &RowHeader {
        match self {
            Row::String(o) => &o.hdr,
            Row::Hash(o) => &o.hdr,
            Row::List(o) => &o.hdr,
            Row::Set(o) => &o.hdr,
            Row::ZSet(o) => &o.hdr,
        }
    }

    pub fn header_mut(&mut self) -> &mut RowHeader {
        match self {
            Row::String(o) => &mut o.hdr,
            Row::Hash(o) => &mut o.hdr,
            Row::List(o) => &mut o.hdr,
            Row::Set(o) => &mut o.hdr,
            Row::ZSet(o) => &mut o.hdr,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.header().is_expired()
    }

    /// Re-encodes the meta value with the row's current fields.
    pub fn meta_value(&self) -> Vec<u8> {
        match self {
            Row::String(o) => o.meta_value(),
            Row::Hash(o) => o.meta_value(),
            Row::List(o) => o.meta_value(),
            Row::Set(o) => o.meta_value(),
            Row::ZSet(o) => o.meta_value(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_prefixes_are_disjoint_per_kind() {
        let m = meta_key(0, b"k");
        let d = data_key_prefix(0, b"k");
        let i = index_key_prefix(0, b"k");
        assert_ne!(m[0], d[0]);
        assert_ne!(d[0], i[0]);
        assert_ne!(m[0], i[0]);
    }

    #[test]
    fn keys_group_by_db_then_key() {
        assert!(meta_key(0, b"z") < meta_key(1, b"a"));
        assert!(data_key_prefix(3, b"a") < data_key_prefix(3, b"b"));
    }

    #[test]
    fn meta_key_round_trips() {
        let raw = meta_key(42, b"mykey");
        let (db, key) = parse_meta_key(&raw).unwrap();
        assert_eq!(db, 42);
        assert_eq!(key, b"mykey");
    }

    #[test]
    fn string_meta_round_trip() {
        let mut o = StringRow::new(1, b"s");
        o.hdr.expire_at = 12345;
        let row = Row::decode_meta(1, b"s", &o.meta_value()).unwrap();
        assert_eq!(row.code(), TypeCode::String);
        assert_eq!(row.header().expire_at, 12345);
    }

    #[test]
    fn hash_meta_round_trip() {
        let mut o = HashRow::new(2, b"h");
        o.size = 7;
        match Row::decode_meta(2, b"h", &o.meta_value()).unwrap() {
            Row::Hash(h) => assert_eq!(h.size, 7),
            other => panic!("expected hash row, got {other:?}"),
        }
    }

    #[test]
    fn list_meta_round_trip() {
        let mut o = ListRow::new(0, b"l");
        o.head = -3;
        o.tail = 4;
        match Row::decode_meta(0, b"l", &o.meta_value()).unwrap() {
            Row::List(l) => {
                assert_eq!((l.head, l.tail), (-3, 4));
                assert_eq!(l.len(), 8);
            }
            other => panic!("expected list row, got {other:?}"),
        }
    }

    #[test]
    fn zset_member_value_round_trip() {
        let raw = ZSetRow::member_value(-99);
        assert_eq!(ZSetRow::parse_member_value(&raw).unwrap(), -99);
    }

    #[test]
    fn zset_index_suffix_round_trip() {
        let o = ZSetRow::new(0, b"z");
        let prefix = o.hdr.index_key_prefix();
        let full = o.index_key(-5, b"mem");
        let (score, member) = ZSetRow::parse_index_suffix(&full[prefix.len()..]).unwrap();
        assert_eq!(score, -5);
        assert_eq!(member, b"mem");
    }

    #[test]
    fn zset_index_keys_sort_by_score() {
        let o = ZSetRow::new(0, b"z");
        let neg = o.index_key(-10, b"a");
        let zero = o.index_key(0, b"a");
        let pos = o.index_key(10, b"a");
        assert!(neg < zero);
        assert!(zero < pos);
    }

    #[test]
    fn list_slot_keys_sort_by_index() {
        let o = ListRow::new(0, b"l");
        assert!(o.slot_key(-2) < o.slot_key(-1));
        assert!(o.slot_key(-1) < o.slot_key(0));
        assert!(o.slot_key(0) < o.slot_key(1));
    }

    #[test]
    fn data_value_code_mismatch_rejected() {
        let raw = HashRow::field_value(b"v");
        assert!(StringRow::parse_data_value(&raw).is_err());
    }

    #[test]
    fn unknown_meta_code_rejected() {
        let raw = vec![0xEEu8, 0, 0, 0, 0, 0, 0, 0, 0];
        assert!(Row::decode_meta(0, b"k", &raw).is_err());
    }
}
