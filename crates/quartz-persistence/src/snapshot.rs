//! Full-resync snapshot files.
//!
//! The master writes every non-expired key of every database to a
//! single dump file, which is then streamed to a syncing replica as
//! one bulk string. Writes go to a `.tmp` file and are atomically
//! renamed on completion, so a crashed dump never clobbers the
//! previous one.
//!
//! File layout:
//! ```text
//! [QSNP magic: 4B][version: 1B]
//! per record: [0x01][db: 4B][expire_at: 8B][key][value]
//! [0x00 terminator][crc32 over everything after the header: 4B]
//! ```

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use quartz_core::{DumpEntry, StoreError, StoreSnapshot};
use tracing::info;

use crate::format::{self, FormatError};

const RECORD_TAG: u8 = 0x01;
const END_TAG: u8 = 0x00;

/// Streams snapshot records to disk.
pub struct SnapshotWriter {
    final_path: PathBuf,
    tmp_path: PathBuf,
    writer: BufWriter<File>,
    hasher: crc32fast::Hasher,
    count: u64,
    finished: bool,
}

impl SnapshotWriter {
    /// Opens the temp file and writes the header. Nothing appears at
    /// `path` until [`SnapshotWriter::finish`].
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, FormatError> {
        let final_path = path.into();
        if let Some(dir) = final_path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let tmp_path = final_path.with_extension("dump.tmp");
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        let mut writer = BufWriter::new(file);

        writer.write_all(format::SNAP_MAGIC)?;
        format::write_u8(&mut writer, format::FORMAT_VERSION)?;

        Ok(Self {
            final_path,
            tmp_path,
            writer,
            hasher: crc32fast::Hasher::new(),
            count: 0,
            finished: false,
        })
    }

    /// Appends one key record.
    pub fn write_entry(&mut self, entry: &DumpEntry) -> Result<(), FormatError> {
        let mut buf = Vec::new();
        format::write_u8(&mut buf, RECORD_TAG)?;
        format::write_u32(&mut buf, entry.db)?;
        format::write_u64(&mut buf, entry.expire_at)?;
        format::write_bytes(&mut buf, &entry.key)?;
        format::write_value(&mut buf, &entry.value)?;

        self.hasher.update(&buf);
        self.writer.write_all(&buf)?;
        self.count += 1;
        Ok(())
    }

    /// Writes the terminator and checksum, then atomically renames the
    /// temp file into place. Returns the number of records written.
    pub fn finish(mut self) -> Result<u64, FormatError> {
        let mut tail = Vec::new();
        format::write_u8(&mut tail, END_TAG)?;
        self.hasher.update(&tail);
        let crc = self.hasher.clone().finalize();
        format::write_u32(&mut tail, crc)?;

        self.writer.write_all(&tail)?;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        std::fs::rename(&self.tmp_path, &self.final_path)?;
        self.finished = true;
        Ok(self.count)
    }
}

impl Drop for SnapshotWriter {
    fn drop(&mut self) {
        if !self.finished {
            let _ = std::fs::remove_file(&self.tmp_path);
        }
    }
}

/// Walks a store snapshot and writes the whole keyspace to `path`,
/// replacing any previous dump file.
pub fn write_snapshot(path: &Path, snap: &StoreSnapshot) -> Result<u64, SnapshotError> {
    let mut writer = SnapshotWriter::create(path)?;
    for entry in snap.iter_objects() {
        writer.write_entry(&entry?)?;
    }
    let count = writer.finish()?;
    info!(path = %path.display(), keys = count, "snapshot dump written");
    Ok(count)
}

/// Reads every record of a snapshot file, verifying the checksum.
pub fn read_snapshot(path: &Path) -> Result<Vec<DumpEntry>, FormatError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != format::SNAP_MAGIC {
        return Err(FormatError::InvalidMagic);
    }
    let version = format::read_u8(&mut reader)?;
    if version != format::FORMAT_VERSION {
        return Err(FormatError::UnsupportedVersion(version));
    }

    // body (records + terminator) is covered by the trailing crc
    let mut body = Vec::new();
    reader.read_to_end(&mut body)?;
    if body.len() < 5 {
        return Err(FormatError::UnexpectedEof);
    }
    let (records, trailer) = body.split_at(body.len() - 4);
    let expected = u32::from_le_bytes(trailer.try_into().expect("4-byte trailer"));
    let actual = format::crc32(records);
    if expected != actual {
        return Err(FormatError::ChecksumMismatch { expected, actual });
    }

    let mut cursor = records;
    let mut entries = Vec::new();
    loop {
        match format::read_u8(&mut cursor)? {
            RECORD_TAG => {
                let db = format::read_u32(&mut cursor)?;
                let expire_at = format::read_u64(&mut cursor)?;
                let key = format::read_bytes(&mut cursor)?;
                let value = format::read_value(&mut cursor)?;
                entries.push(DumpEntry {
                    db,
                    key,
                    expire_at,
                    value,
                });
            }
            END_TAG => break,
            other => return Err(FormatError::UnknownTag(other)),
        }
    }
    if !cursor.is_empty() {
        return Err(FormatError::InvalidData(format!(
            "{} bytes after snapshot terminator",
            cursor.len()
        )));
    }
    Ok(entries)
}

/// Either side of a snapshot export can fail: the store walk or the
/// file write.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("format: {0}")]
    Format(#[from] FormatError),
}
