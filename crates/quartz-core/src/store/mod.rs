//! The typed object store.
//!
//! Maps string / hash / list / set / zset objects onto engine rows and
//! exposes each data-type command as a method `(db, args) -> result`.
//! Every mutator runs the same read-verify-batch cycle: load the meta
//! row under the store-wide writer lock, verify the type code, stage
//! data/index/meta updates into a batch, then commit the batch
//! atomically and hand a [`Forward`] record to every registered
//! post-commit handler (the replication feed, in the server).
//!
//! Expiration is lazy: an expired row reads as absent; mutators with a
//! batch in hand physically delete it as part of their own commit.

pub mod row;

mod hash;
mod keys;
mod list;
mod set;
mod string;
mod zset;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::warn;

use crate::engine::{Batch, Database, ReadView, Snapshot, StoreIterator};
use crate::error::StoreError;
use crate::pool::Pool;
#[allow(unused_imports)]
use crate::store::row::{Row, TypeCode, Value};

pub use crate::store::zset::{MAX_SCORE, MIN_SCORE};

/// A committed mutation, as seen by forwarding handlers.
#[derive(Debug, Clone)]
pub struct Forward {
    pub db: u32,
    pub op: String,
    pub args: Vec<Bytes>,
}

impl Forward {
    pub fn new(db: u32, op: &str, args: &[Bytes]) -> Self {
        Self {
            db,
            op: op.to_string(),
            args: args.to_vec(),
        }
    }
}

/// Callback invoked around batch commits.
pub type ForwardHandler = Arc<dyn Fn(&Forward) + Send + Sync>;

/// Iterator pool sizing. Iterators are cheap for the in-memory engine
/// but disk engines pin resources per cursor, so the pool is bounded.
const ITER_POOL_CAPACITY: usize = 8;
const ITER_POOL_MAX: usize = 128;
const ITER_POOL_IDLE: Duration = Duration::from_secs(60);

/// The store. All public command methods live in the sibling modules
/// (`string`, `hash`, `list`, `set`, `zset`, `keys`); this module owns
/// the shared machinery.
pub struct Store {
    /// Store-wide readers-writer lock: read-only commands take it
    /// shared, mutators exclusive. The engine itself is thread-safe;
    /// this lock serializes the logical read-verify-batch cycle.
    lock: RwLock<()>,
    engine: Arc<dyn Database>,
    iters: Pool<Box<dyn StoreIterator>>,
    pre_commit: RwLock<Vec<ForwardHandler>>,
    post_commit: RwLock<Vec<ForwardHandler>>,
}

impl Store {
    /// Opens a store over an engine.
    pub fn open(engine: Arc<dyn Database>) -> Self {
        let factory_engine = Arc::clone(&engine);
        Self {
            lock: RwLock::new(()),
            engine,
            iters: Pool::new(
                move || Ok(factory_engine.iterator()),
                ITER_POOL_CAPACITY,
                ITER_POOL_MAX,
                ITER_POOL_IDLE,
            ),
            pre_commit: RwLock::new(Vec::new()),
            post_commit: RwLock::new(Vec::new()),
        }
    }

    /// Registers a handler called before each batch is applied.
    pub fn register_pre_commit(&self, h: ForwardHandler) {
        self.pre_commit.write().push(h);
    }

    /// Registers a handler called after each batch is applied. The
    /// replication feed registers here.
    pub fn register_post_commit(&self, h: ForwardHandler) {
        self.post_commit.write().push(h);
    }

    /// Drops every row in every database and tells forwarding handlers
    /// about it (FLUSHALL).
    pub fn reset(&self) -> Result<(), StoreError> {
        let _g = self.lock.write();
        let fw = Forward::new(0, "FlushAll", &[]);
        for h in self.pre_commit.read().iter() {
            h(&fw);
        }
        self.engine.clear()?;
        for h in self.post_commit.read().iter() {
            h(&fw);
        }
        Ok(())
    }

    /// Asks the engine to reclaim space across the whole keyspace.
    pub fn compact_all(&self) -> Result<(), StoreError> {
        let _g = self.lock.write();
        self.engine.compact_all()
    }

    /// Waits out in-flight commands, closes the iterator pool, and
    /// releases the engine.
    pub fn close(&self) {
        let _g = self.lock.write();
        self.iters.close();
        self.engine.close();
    }

    /// Opens a point-in-time snapshot. Holds the writer lock while
    /// `capture` runs — replication uses the callback to read and bump
    /// its offsets atomically with the snapshot cut.
    pub fn new_snapshot(&self, capture: impl FnOnce()) -> StoreSnapshot {
        let _g = self.lock.write();
        capture();
        StoreSnapshot {
            snap: self.engine.snapshot(),
        }
    }

    // -- shared row machinery --------------------------------------------

    pub(crate) fn acquire_read(&self) -> parking_lot::RwLockReadGuard<'_, ()> {
        self.lock.read()
    }

    pub(crate) fn acquire_write(&self) -> parking_lot::RwLockWriteGuard<'_, ()> {
        self.lock.write()
    }

    pub(crate) fn reader(&self) -> &dyn ReadView {
        self.engine.as_ref()
    }

    /// Takes an iterator from the pool; it returns on drop.
    pub(crate) fn get_iterator(&self) -> Result<PooledIter<'_>, StoreError> {
        let it = self
            .iters
            .get()
            .map_err(|e| StoreError::Engine(e.to_string()))?;
        Ok(PooledIter {
            pool: &self.iters,
            it: Some(it),
        })
    }

    /// Loads the meta row for `(db, key)`. Expired rows read as
    /// absent; when `batch` is supplied their physical rows are
    /// additionally staged for deletion in that batch.
    pub(crate) fn load_row(
        &self,
        db: u32,
        key: &[u8],
        batch: Option<&mut Batch>,
    ) -> Result<Option<Row>, StoreError> {
        let raw = match self.engine.get(&row::meta_key(db, key))? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        let r = Row::decode_meta(db, key, &raw)?;
        if r.is_expired() {
            if let Some(bt) = batch {
                self.delete_object(&r, bt)?;
            }
            return Ok(None);
        }
        Ok(Some(r))
    }

    /// Stages deletion of every physical row belonging to `row`.
    pub(crate) fn delete_object(&self, row: &Row, bt: &mut Batch) -> Result<(), StoreError> {
        let hdr = row.header();
        match row {
            Row::String(_) => {
                bt.del(hdr.data_key_prefix());
            }
            Row::List(o) => {
                for index in o.head..=o.tail {
                    bt.del(o.slot_key(index));
                }
            }
            Row::Hash(_) | Row::Set(_) => {
                self.delete_prefix(&hdr.data_key_prefix(), bt)?;
            }
            Row::ZSet(_) => {
                self.delete_prefix(&hdr.data_key_prefix(), bt)?;
                self.delete_prefix(&hdr.index_key_prefix(), bt)?;
            }
        }
        bt.del(hdr.meta_key());
        Ok(())
    }

    fn delete_prefix(&self, prefix: &[u8], bt: &mut Batch) -> Result<(), StoreError> {
        let mut guard = self.get_iterator()?;
        let it = guard.iter();
        it.seek_to(prefix);
        while it.valid() {
            if !it.key().starts_with(prefix) {
                break;
            }
            bt.del(it.key().to_vec());
            it.next();
        }
        Ok(())
    }

    /// If `(db, key)` holds any live row, stages its deletion and
    /// reports `true`. Used by whole-value overwrites (MSET, BITOP,
    /// RESTORE).
    pub(crate) fn check_exist_and_delete(
        &self,
        bt: &mut Batch,
        db: u32,
        key: &[u8],
    ) -> Result<bool, StoreError> {
        match self.load_row(db, key, Some(bt))? {
            Some(r) => {
                self.delete_object(&r, bt)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Runs pre-commit handlers, applies the batch atomically, then
    /// runs post-commit handlers with the forward record.
    pub(crate) fn commit(&self, bt: Batch, fw: Forward) -> Result<(), StoreError> {
        for h in self.pre_commit.read().iter() {
            h(&fw);
        }
        self.engine.commit(bt)?;
        for h in self.post_commit.read().iter() {
            h(&fw);
        }
        Ok(())
    }

    /// Loads the fully-typed value for a live row, via the live
    /// engine.
    pub(crate) fn load_object(&self, r: &Row) -> Result<Value, StoreError> {
        let mut guard = self.get_iterator()?;
        load_object_with(self.engine.as_ref(), guard.iter(), r)
    }
}

/// Pool guard: hands the iterator back when dropped, including on
/// error paths.
pub(crate) struct PooledIter<'a> {
    pool: &'a Pool<Box<dyn StoreIterator>>,
    it: Option<Box<dyn StoreIterator>>,
}

impl PooledIter<'_> {
    pub fn iter(&mut self) -> &mut dyn StoreIterator {
        self.it.as_mut().expect("iterator present until drop").as_mut()
    }
}

impl Drop for PooledIter<'_> {
    fn drop(&mut self) {
        self.pool.put(self.it.take());
    }
}

/// Loads a typed value through any read view — the live engine for
/// DUMP, a snapshot for the full-resync export.
fn load_object_with(
    view: &dyn ReadView,
    it: &mut dyn StoreIterator,
    r: &Row,
) -> Result<Value, StoreError> {
    let hdr = r.header();
    match r {
        Row::String(_) => {
            let raw = view
                .get(&hdr.data_key_prefix())?
                .ok_or_else(|| StoreError::ObjectValue("string data cell missing".into()))?;
            Ok(Value::String(row::StringRow::parse_data_value(&raw)?))
        }
        Row::Hash(o) => {
            let prefix = hdr.data_key_prefix();
            let mut fields = Vec::with_capacity(o.size.max(0) as usize);
            it.seek_to(&prefix);
            while it.valid() {
                let key = it.key();
                if !key.starts_with(&prefix) {
                    break;
                }
                let field = row::HashRow::parse_field_suffix(&key[prefix.len()..])?;
                let value = row::HashRow::parse_field_value(it.value())?;
                fields.push((field, value));
                it.next();
            }
            if fields.len() as i64 != o.size {
                return Err(StoreError::ObjectValue(format!(
                    "hash has {} fields, meta says {}",
                    fields.len(),
                    o.size
                )));
            }
            Ok(Value::Hash(fields))
        }
        Row::List(o) => {
            let mut items = Vec::with_capacity(o.len().max(0) as usize);
            for index in o.head..=o.tail {
                let raw = view.get(&o.slot_key(index))?.ok_or_else(|| {
                    StoreError::ObjectValue(format!("list slot {index} missing"))
                })?;
                items.push(row::ListRow::parse_slot_value(&raw)?);
            }
            Ok(Value::List(items))
        }
        Row::Set(o) => {
            let prefix = hdr.data_key_prefix();
            let mut members = Vec::with_capacity(o.size.max(0) as usize);
            it.seek_to(&prefix);
            while it.valid() {
                let key = it.key();
                if !key.starts_with(&prefix) {
                    break;
                }
                members.push(row::SetRow::parse_member_suffix(&key[prefix.len()..])?);
                it.next();
            }
            if members.len() as i64 != o.size {
                return Err(StoreError::ObjectValue(format!(
                    "set has {} members, meta says {}",
                    members.len(),
                    o.size
                )));
            }
            Ok(Value::Set(members))
        }
        Row::ZSet(o) => {
            let prefix = hdr.data_key_prefix();
            let mut members = Vec::with_capacity(o.size.max(0) as usize);
            it.seek_to(&prefix);
            while it.valid() {
                let key = it.key();
                if !key.starts_with(&prefix) {
                    break;
                }
                let member = row::ZSetRow::parse_member_suffix(&key[prefix.len()..])?;
                let score = row::ZSetRow::parse_member_value(it.value())?;
                members.push((member, score));
                it.next();
            }
            if members.len() as i64 != o.size {
                return Err(StoreError::ObjectValue(format!(
                    "zset has {} members, meta says {}",
                    members.len(),
                    o.size
                )));
            }
            Ok(Value::ZSet(members))
        }
    }
}

/// One exported key in a snapshot walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpEntry {
    pub db: u32,
    pub key: Vec<u8>,
    pub expire_at: u64,
    pub value: Value,
}

/// A point-in-time view of the whole store.
pub struct StoreSnapshot {
    snap: Box<dyn Snapshot>,
}

impl StoreSnapshot {
    /// Walks every non-expired key in every database, in engine order.
    pub fn iter_objects(&self) -> ObjectIter<'_> {
        let mut meta_it = self.snap.iterator();
        meta_it.seek_to(&row::meta_region_start());
        ObjectIter {
            snap: self.snap.as_ref(),
            meta_it,
            done: false,
        }
    }
}

/// Iterator over [`DumpEntry`] records of a snapshot.
pub struct ObjectIter<'a> {
    snap: &'a dyn Snapshot,
    meta_it: Box<dyn StoreIterator>,
    done: bool,
}

impl Iterator for ObjectIter<'_> {
    type Item = Result<DumpEntry, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done && self.meta_it.valid() {
            let raw_key = self.meta_it.key().to_vec();
            if raw_key.first() != Some(&row::META_PREFIX) {
                self.done = true;
                break;
            }
            let raw_value = self.meta_it.value().to_vec();
            self.meta_it.next();

            let entry = (|| -> Result<Option<DumpEntry>, StoreError> {
                let (db, key) = row::parse_meta_key(&raw_key)?;
                let r = Row::decode_meta(db, &key, &raw_value)?;
                if r.is_expired() {
                    return Ok(None);
                }
                let snap = self.snap;
                let mut data_it = snap.iterator();
                let value = load_object_with(snap.as_readview(), data_it.as_mut(), &r)?;
                Ok(Some(DumpEntry {
                    db,
                    key,
                    expire_at: r.header().expire_at,
                    value,
                }))
            })();

            match entry {
                Ok(Some(e)) => return Some(Ok(e)),
                Ok(None) => continue,
                Err(e) => {
                    warn!("skipping corrupt row in snapshot walk: {e}");
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

/// Object-safe upcast helper: `&dyn Snapshot` to `&dyn ReadView`.
trait AsReadView {
    fn as_readview(&self) -> &dyn ReadView;
}

impl<'a> AsReadView for dyn Snapshot + 'a {
    fn as_readview(&self) -> &dyn ReadView {
        self
    }
}

/// Maps a pair of Redis-style range indices (negative = from the end)
/// onto `[0, size)`, returning `(start, stop, len)`; `len` is 0 for an
/// empty range.
pub(crate) fn sanitize_indexes(start: i64, stop: i64, size: i64) -> (i64, i64, i64) {
    let mut start = if start < 0 { size + start } else { start };
    let mut stop = if stop < 0 { size + stop } else { stop };
    if start < 0 {
        start = 0;
    }
    if start > stop || start >= size {
        return (start, stop, 0);
    }
    if stop >= size {
        stop = size - 1;
    }
    (start, stop, stop - start + 1)
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::engine::MemDb;

    /// Fresh store over an in-memory engine.
    pub fn new_store() -> Store {
        Store::open(Arc::new(MemDb::new()))
    }

    pub fn args(parts: &[&[u8]]) -> Vec<Bytes> {
        parts.iter().map(|p| Bytes::copy_from_slice(p)).collect()
    }
}
