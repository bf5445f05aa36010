//! In-process ordered engine backed by a `BTreeMap`.
//!
//! The default `dbtype = "memory"` driver and the engine used by the
//! test suites. Iterators are stateless cursors that re-range into the
//! tree on every step, so they stay valid across concurrent writes —
//! the hand-rolled equivalent of what an LSM iterator gets from its
//! immutable files. Snapshots clone the tree; cloning a `BTreeMap` of
//! small rows is cheap enough for the full-resync path this backs.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::engine::{Batch, BatchOp, Database, ReadView, Snapshot, StoreIterator};
use crate::error::StoreError;

type Tree = BTreeMap<Vec<u8>, Vec<u8>>;

/// Shared, ordered, in-memory key-value store.
#[derive(Debug, Default, Clone)]
pub struct MemDb {
    tree: Arc<RwLock<Tree>>,
}

impl MemDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live rows. Test-suite convenience.
    pub fn len(&self) -> usize {
        self.tree.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.read().is_empty()
    }
}

impl ReadView for MemDb {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.tree.read().get(key).cloned())
    }

    fn iterator(&self) -> Box<dyn StoreIterator> {
        Box::new(MemIterator {
            tree: TreeHandle::Live(Arc::clone(&self.tree)),
            cursor: None,
        })
    }
}

impl Database for MemDb {
    fn commit(&self, batch: Batch) -> Result<(), StoreError> {
        let mut tree = self.tree.write();
        for op in batch.ops() {
            match op {
                BatchOp::Set(k, v) => {
                    tree.insert(k.clone(), v.clone());
                }
                BatchOp::Del(k) => {
                    tree.remove(k);
                }
            }
        }
        Ok(())
    }

    fn snapshot(&self) -> Box<dyn Snapshot> {
        Box::new(MemSnapshot {
            tree: Arc::new(self.tree.read().clone()),
        })
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.tree.write().clear();
        Ok(())
    }

    fn compact_all(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn close(&self) {}
}

/// Frozen copy of the tree at snapshot time.
struct MemSnapshot {
    tree: Arc<Tree>,
}

impl ReadView for MemSnapshot {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.tree.get(key).cloned())
    }

    fn iterator(&self) -> Box<dyn StoreIterator> {
        Box::new(MemIterator {
            tree: TreeHandle::Frozen(Arc::clone(&self.tree)),
            cursor: None,
        })
    }
}

impl Snapshot for MemSnapshot {}

/// Either the live (locked) tree or a frozen snapshot of it.
enum TreeHandle {
    Live(Arc<RwLock<Tree>>),
    Frozen(Arc<Tree>),
}

impl TreeHandle {
    fn with<T>(&self, f: impl FnOnce(&Tree) -> T) -> T {
        match self {
            TreeHandle::Live(t) => f(&t.read()),
            TreeHandle::Frozen(t) => f(t),
        }
    }
}

/// Stateless cursor: holds the current entry by value and re-ranges
/// into the tree for every reposition.
struct MemIterator {
    tree: TreeHandle,
    cursor: Option<(Vec<u8>, Vec<u8>)>,
}

impl StoreIterator for MemIterator {
    fn seek_to(&mut self, key: &[u8]) {
        self.cursor = self.tree.with(|t| {
            t.range::<[u8], _>((Bound::Included(key), Bound::Unbounded))
                .next()
                .map(|(k, v)| (k.clone(), v.clone()))
        });
    }

    fn seek_to_last(&mut self) {
        self.cursor = self
            .tree
            .with(|t| t.iter().next_back().map(|(k, v)| (k.clone(), v.clone())));
    }

    fn next(&mut self) {
        let Some((cur, _)) = self.cursor.take() else {
            return;
        };
        self.cursor = self.tree.with(|t| {
            t.range::<[u8], _>((Bound::Excluded(cur.as_slice()), Bound::Unbounded))
                .next()
                .map(|(k, v)| (k.clone(), v.clone()))
        });
    }

    fn prev(&mut self) {
        let Some((cur, _)) = self.cursor.take() else {
            return;
        };
        self.cursor = self.tree.with(|t| {
            t.range::<[u8], _>((Bound::Unbounded, Bound::Excluded(cur.as_slice())))
                .next_back()
                .map(|(k, v)| (k.clone(), v.clone()))
        });
    }

    fn valid(&self) -> bool {
        self.cursor.is_some()
    }

    fn key(&self) -> &[u8] {
        self.cursor.as_ref().map(|(k, _)| k.as_slice()).unwrap_or(&[])
    }

    fn value(&self) -> &[u8] {
        self.cursor.as_ref().map(|(_, v)| v.as_slice()).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit_pairs(db: &MemDb, pairs: &[(&[u8], &[u8])]) {
        let mut batch = Batch::new();
        for (k, v) in pairs {
            batch.set(k.to_vec(), v.to_vec());
        }
        db.commit(batch).unwrap();
    }

    #[test]
    fn batch_set_and_get() {
        let db = MemDb::new();
        commit_pairs(&db, &[(b"a", b"1"), (b"b", b"2")]);
        assert_eq!(db.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(db.get(b"b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(db.get(b"c").unwrap(), None);
    }

    #[test]
    fn batch_later_op_wins() {
        let db = MemDb::new();
        let mut batch = Batch::new();
        batch.set(b"k".to_vec(), b"old".to_vec());
        batch.set(b"k".to_vec(), b"new".to_vec());
        batch.del(b"gone".to_vec());
        db.commit(batch).unwrap();
        assert_eq!(db.get(b"k").unwrap(), Some(b"new".to_vec()));
    }

    #[test]
    fn iterator_walks_in_order() {
        let db = MemDb::new();
        commit_pairs(&db, &[(b"b", b"2"), (b"a", b"1"), (b"c", b"3")]);

        let mut it = db.iterator();
        it.seek_to(b"a");
        let mut keys = Vec::new();
        while it.valid() {
            keys.push(it.key().to_vec());
            it.next();
        }
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn iterator_seek_lands_on_next_key() {
        let db = MemDb::new();
        commit_pairs(&db, &[(b"a", b"1"), (b"c", b"3")]);

        let mut it = db.iterator();
        it.seek_to(b"b");
        assert!(it.valid());
        assert_eq!(it.key(), b"c");

        it.seek_to(b"d");
        assert!(!it.valid());
    }

    #[test]
    fn iterator_walks_backward() {
        let db = MemDb::new();
        commit_pairs(&db, &[(b"a", b"1"), (b"b", b"2"), (b"c", b"3")]);

        let mut it = db.iterator();
        it.seek_to_last();
        let mut keys = Vec::new();
        while it.valid() {
            keys.push(it.key().to_vec());
            it.prev();
        }
        assert_eq!(keys, vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
    }

    #[test]
    fn iterator_survives_concurrent_write() {
        let db = MemDb::new();
        commit_pairs(&db, &[(b"a", b"1"), (b"c", b"3")]);

        let mut it = db.iterator();
        it.seek_to(b"a");
        assert_eq!(it.key(), b"a");

        // insert between the cursor and the next key
        commit_pairs(&db, &[(b"b", b"2")]);

        it.next();
        assert_eq!(it.key(), b"b");
    }

    #[test]
    fn snapshot_is_point_in_time() {
        let db = MemDb::new();
        commit_pairs(&db, &[(b"k", b"before")]);

        let snap = db.snapshot();
        commit_pairs(&db, &[(b"k", b"after"), (b"new", b"x")]);

        assert_eq!(snap.get(b"k").unwrap(), Some(b"before".to_vec()));
        assert_eq!(snap.get(b"new").unwrap(), None);
        assert_eq!(db.get(b"k").unwrap(), Some(b"after".to_vec()));
    }

    #[test]
    fn clear_empties_the_tree() {
        let db = MemDb::new();
        commit_pairs(&db, &[(b"a", b"1")]);
        db.clear().unwrap();
        assert!(db.is_empty());
        assert_eq!(db.get(b"a").unwrap(), None);
    }
}
