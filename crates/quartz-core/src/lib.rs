//! quartz-core: the storage heart of the server.
//!
//! Maps typed objects (string, hash, list, set, zset) onto any ordered
//! key-value engine, with per-key expiration, atomic batched
//! mutations, and post-commit forwarding hooks that the replication
//! engine plugs into. Also home to the ring backlog, the bounded
//! iterator pool, and the row codec underneath it all.

pub mod codec;
pub mod engine;
pub mod error;
pub mod expire;
pub mod pool;
pub mod ring;
pub mod store;
pub mod util;

pub use codec::{is_valid_score, MAX_SCORE, MIN_SCORE};
pub use engine::{Batch, Database, MemDb, ReadView, Snapshot, StoreIterator};
pub use error::{CodecError, StoreError};
pub use pool::{Pool, PoolError, PoolResource, PoolStats};
pub use ring::{FileRing, MemRing, Ring};
pub use store::row::{TypeCode, Value};
pub use store::{DumpEntry, Forward, ForwardHandler, Store, StoreSnapshot};
