//! Engine adapter: the contract the object store demands from an
//! ordered key-value backend.
//!
//! The store only ever needs point gets, ordered iteration, atomic
//! write batches, point-in-time snapshots, and whole-store compaction.
//! Anything that offers those — an LSM tree, a B-tree, a sorted file —
//! can sit underneath. Reads must be safe from multiple threads; the
//! store serializes writes above this layer.

mod memdb;

pub use memdb::MemDb;

use crate::error::StoreError;

/// A single operation inside a write batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Set(Vec<u8>, Vec<u8>),
    Del(Vec<u8>),
}

/// An ordered list of writes applied atomically by
/// [`Database::commit`]. Later operations win over earlier ones for
/// the same key.
#[derive(Debug, Default)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Set(key, value));
    }

    pub fn del(&mut self, key: Vec<u8>) {
        self.ops.push(BatchOp::Del(key));
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }
}

/// Read-only view: point gets plus ordered iteration. Implemented by
/// both the live database and its snapshots.
pub trait ReadView: Send + Sync {
    /// Returns the value stored at `key`, if any.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Opens a fresh iterator over this view.
    fn iterator(&self) -> Box<dyn StoreIterator>;
}

/// An ordered cursor over engine keys.
///
/// Mirrors the LevelDB iterator shape: position with `seek_to` /
/// `seek_to_last`, then step with `next` / `prev`, reading `key` /
/// `value` while `valid`.
pub trait StoreIterator: Send {
    /// Positions at the first key `>= key`. Invalid if none exists.
    fn seek_to(&mut self, key: &[u8]);

    /// Positions at the last key in the store. Invalid if empty.
    fn seek_to_last(&mut self);

    /// Steps forward.
    fn next(&mut self);

    /// Steps backward.
    fn prev(&mut self);

    /// Returns `true` while positioned on a live entry.
    fn valid(&self) -> bool;

    /// Current key. Empty when not valid.
    fn key(&self) -> &[u8];

    /// Current value. Empty when not valid.
    fn value(&self) -> &[u8];
}

/// A point-in-time read view, independent of later writes.
pub trait Snapshot: ReadView {}

/// The full engine contract.
pub trait Database: ReadView {
    /// Applies every operation in `batch` atomically: after a
    /// successful return all writes are visible; after an error none
    /// are.
    fn commit(&self, batch: Batch) -> Result<(), StoreError>;

    /// Opens a point-in-time snapshot.
    fn snapshot(&self) -> Box<dyn Snapshot>;

    /// Drops every row. Used by FLUSHALL.
    fn clear(&self) -> Result<(), StoreError>;

    /// Reclaims space across the whole keyspace. A no-op for engines
    /// without background garbage.
    fn compact_all(&self) -> Result<(), StoreError>;

    /// Flushes and releases resources. The engine must not be used
    /// afterwards.
    fn close(&self);
}
