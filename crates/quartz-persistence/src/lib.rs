//! quartz-persistence: the dump blob codec (DUMP/RESTORE payloads)
//! and the full-resync snapshot file.

pub mod format;
pub mod snapshot;

pub use format::{decode_dump, encode_dump, FormatError};
pub use snapshot::{read_snapshot, write_snapshot, SnapshotError, SnapshotWriter};
