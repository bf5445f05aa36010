//! Master-side replication: backlog, fan-out, full/partial resync,
//! heartbeat.
//!
//! Every committed mutation reaches [`Replication::feed`] through the
//! store's post-commit hook. The forward is RESP-encoded (preceded by
//! a `SELECT` frame whenever the database changes) and appended to the
//! backlog ring; each registered slave is then nudged through a
//! capacity-1 notification channel, and its pump task copies the new
//! backlog bytes to the socket.
//!
//! Offsets: `master_offset` counts every byte ever fed;
//! `backlog_offset` is the master offset of the oldest byte still in
//! the ring. A replica holding any offset inside that window can
//! partial-resync; anyone else gets a full dump behind the bgsave
//! semaphore.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use parking_lot::Mutex;
use quartz_core::{FileRing, Forward, MemRing, Ring, Store};
use quartz_protocol::Request;
use rand::Rng;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{debug, info, warn};

use crate::server::Counters;

/// Initial `last_select_db` sentinel: outside the u32 database range,
/// so the first forward always injects a SELECT.
const LAST_SELECT_SENTINEL: i64 = 1 << 32;

/// Copy buffer per slave pump.
const PUMP_BUF_SIZE: usize = 1024 * 1024;

/// Write deadline for one backlog flush to a slave socket.
const SLAVE_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Full-resync snapshots are serialized; waiting this long for the
/// slot means giving up.
const FULL_SYNC_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ReplError {
    #[error("wait other slave full sync bgsave timeout")]
    FullSyncTimeout,

    #[error("bgsave failed: {0}")]
    BgSave(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Replication knobs, distilled from the server config.
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    pub dump_path: PathBuf,
    /// `None` keeps the backlog in memory.
    pub backlog_file_path: Option<PathBuf>,
    pub backlog_size: u64,
    pub ping_period: Duration,
}

/// Per-slave session state shared between the connection, the pump
/// task, and REPLCONF handling.
pub struct SlaveHandle {
    pub peer: String,
    /// The connection's write half. Normal replies and the pump take
    /// this same lock, so frames never interleave mid-stream.
    pub writer: Arc<tokio::sync::Mutex<OwnedWriteHalf>>,
    /// Next master offset to deliver.
    pub sync_offset: AtomicI64,
    /// Last REPLCONF ACK offset and unix time.
    pub ack_offset: AtomicI64,
    pub ack_time: AtomicI64,
    /// Advertised replica listening port.
    pub listening_port: AtomicI64,
}

impl SlaveHandle {
    pub fn new(peer: String, writer: Arc<tokio::sync::Mutex<OwnedWriteHalf>>) -> Arc<Self> {
        Arc::new(Self {
            peer,
            writer,
            sync_offset: AtomicI64::new(0),
            ack_offset: AtomicI64::new(0),
            ack_time: AtomicI64::new(0),
            listening_port: AtomicI64::new(0),
        })
    }
}

struct SlaveSession {
    notify: mpsc::Sender<()>,
    handle: Arc<SlaveHandle>,
}

struct ReplState {
    master_offset: i64,
    backlog_offset: i64,
    backlog: Option<Box<dyn Ring>>,
    last_select_db: i64,
    slaves: HashMap<u64, SlaveSession>,
}

/// Point-in-time replication facts for INFO.
pub struct ReplInfo {
    pub master_offset: i64,
    pub backlog_active: bool,
    pub backlog_size: u64,
    pub backlog_first_byte_offset: i64,
    pub backlog_histlen: u64,
    pub slaves: Vec<String>,
}

pub struct Replication {
    run_id: String,
    config: ReplicationConfig,
    state: Mutex<ReplState>,
    full_sync_sem: Semaphore,
    counters: Arc<Counters>,
    shutdown: watch::Receiver<bool>,
}

impl Replication {
    pub fn new(
        config: ReplicationConfig,
        counters: Arc<Counters>,
        shutdown: watch::Receiver<bool>,
    ) -> Arc<Replication> {
        Arc::new(Replication {
            run_id: generate_run_id(),
            config,
            state: Mutex::new(ReplState {
                master_offset: 0,
                backlog_offset: 0,
                backlog: None,
                last_select_db: LAST_SELECT_SENTINEL,
                slaves: HashMap::new(),
            }),
            full_sync_sem: Semaphore::new(1),
            counters,
            shutdown,
        })
    }

    /// Identifies this master's lifetime; replicas quote it in PSYNC.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Hooks the feed into the store's post-commit path and starts the
    /// heartbeat.
    pub fn install(self: &Arc<Self>, store: &Store) {
        let repl = Arc::clone(self);
        store.register_post_commit(Arc::new(move |f: &Forward| repl.feed(f)));
        self.spawn_heartbeat();
    }

    // -- feed path -------------------------------------------------------

    /// Post-commit handler: append the forward to the backlog and wake
    /// every slave.
    pub fn feed(&self, f: &Forward) {
        self.feed_encoded(Some(f.db), &f.op, &f.args);
    }

    /// Heartbeat variant: no SELECT bookkeeping, the PING applies to
    /// whatever database the stream is already positioned on.
    fn feed_ping(&self) {
        self.feed_encoded(None, "PING", &[]);
    }

    fn feed_encoded(&self, select_db: Option<u32>, op: &str, args: &[Bytes]) {
        let mut st = self.state.lock();
        if st.backlog.is_none() && st.slaves.is_empty() {
            return;
        }
        if st.backlog.is_none() {
            if let Err(e) = self.create_backlog(&mut st) {
                warn!("cannot create replication backlog: {e}");
                return;
            }
        }

        if let Some(db) = select_db {
            if st.last_select_db != i64::from(db) {
                let select = Request::to_frame(
                    "SELECT",
                    &[Bytes::from(db.to_string().into_bytes())],
                )
                .to_bytes();
                if !self.feed_backlog(&mut st, &select) {
                    return;
                }
                st.last_select_db = i64::from(db);
            }
        }

        let frame = Request::to_frame(op, args).to_bytes();
        if !self.feed_backlog(&mut st, &frame) {
            return;
        }

        // coalescing wakeup: a full channel already has one pending
        for session in st.slaves.values() {
            let _ = session.notify.try_send(());
        }
    }

    /// Appends raw bytes to the backlog, maintaining the offsets. On a
    /// write failure the backlog is destroyed, forcing the next
    /// replica interaction into a full resync.
    fn feed_backlog(&self, st: &mut ReplState, buf: &[u8]) -> bool {
        st.master_offset += buf.len() as i64;
        let backlog = st.backlog.as_mut().expect("backlog created by caller");
        if let Err(e) = backlog.write(buf) {
            warn!("replication backlog write failed, dropping backlog: {e}");
            st.backlog = None;
            return false;
        }
        st.backlog_offset = st.master_offset - st.backlog.as_ref().unwrap().len() as i64 + 1;
        true
    }

    fn create_backlog(&self, st: &mut ReplState) -> Result<(), ReplError> {
        let size = self.config.backlog_size;
        let mut ring: Box<dyn Ring> = match &self.config.backlog_file_path {
            Some(path) => Box::new(FileRing::create(path, size)?),
            None => Box::new(MemRing::new(size as usize)),
        };
        ring.reset();

        // bump the offset so no replica of a previous backlog
        // incarnation can partial-resync against this one
        st.master_offset += 1;
        st.backlog_offset = st.master_offset + 1;
        st.backlog = Some(ring);
        info!(size, "replication backlog created");
        Ok(())
    }

    // -- resync decisions ------------------------------------------------

    /// Decides whether `PSYNC <run_id> <offset>` can continue from the
    /// backlog. Returns the accepted offset, or `None` for full
    /// resync.
    pub fn accept_partial(&self, run_id: &[u8], offset: Option<i64>) -> Option<i64> {
        if !run_id.eq_ignore_ascii_case(self.run_id.as_bytes()) {
            if run_id != b"?" {
                info!(
                    "partial resync refused: run id mismatch, ours {}",
                    self.run_id
                );
            }
            return None;
        }
        let offset = offset?;

        let st = self.state.lock();
        let backlog = st.backlog.as_ref()?;
        let start = st.backlog_offset;
        let end = st.backlog_offset + backlog.len() as i64;
        if offset < start || offset > end {
            info!(
                offset,
                start, end, "partial resync refused: offset outside backlog window"
            );
            return None;
        }
        Some(offset)
    }

    /// The offset quoted in a `+FULLRESYNC` reply: where the stream
    /// will begin once the dump is cut.
    pub fn full_resync_offset(&self) -> i64 {
        let st = self.state.lock();
        let mut offset = st.master_offset + 1;
        if st.backlog.is_none() {
            // backlog creation will bump the master offset once more
            offset += 1;
        }
        offset
    }

    /// Runs the bgsave for a full resync: cut a snapshot (capturing
    /// the stream offset atomically), write the dump file, and return
    /// it opened along with its size and the capture offset. The file
    /// is opened before the bgsave semaphore is released, so a
    /// following full sync overwriting the path cannot disturb this
    /// stream.
    pub async fn full_sync(
        self: &Arc<Self>,
        store: Arc<Store>,
    ) -> Result<(tokio::fs::File, u64, i64), ReplError> {
        let _permit = tokio::time::timeout(FULL_SYNC_TIMEOUT, self.full_sync_sem.acquire())
            .await
            .map_err(|_| ReplError::FullSyncTimeout)?
            .map_err(|_| ReplError::FullSyncTimeout)?;

        self.counters.sync_full.fetch_add(1, Ordering::Relaxed);
        self.counters.bgsave.fetch_add(1, Ordering::Relaxed);

        let repl = Arc::clone(self);
        let path = self.config.dump_path.clone();
        let result =
            tokio::task::spawn_blocking(move || -> Result<(std::fs::File, u64, i64), ReplError> {
                let mut sync_offset = 0i64;
                let snap = store.new_snapshot(|| {
                    let mut st = repl.state.lock();
                    sync_offset = st.master_offset + 1;
                    if st.backlog.is_none() {
                        sync_offset += 1;
                    }
                    // the stream restarts after the dump; force an explicit
                    // SELECT before the first forwarded op
                    st.last_select_db = LAST_SELECT_SENTINEL;
                });
                quartz_persistence::write_snapshot(&path, &snap)
                    .map_err(|e| ReplError::BgSave(e.to_string()))?;

                let file = std::fs::File::open(&path)?;
                let size = file.metadata()?.len();
                Ok((file, size, sync_offset))
            })
            .await
            .map_err(|e| ReplError::BgSave(e.to_string()));

        self.counters.bgsave.fetch_sub(1, Ordering::Relaxed);
        let (file, size, sync_offset) = result??;
        Ok((tokio::fs::File::from_std(file), size, sync_offset))
    }

    // -- slave registry --------------------------------------------------

    pub fn is_slave(&self, conn_id: u64) -> bool {
        self.state.lock().slaves.contains_key(&conn_id)
    }

    /// Registers a slave at `sync_offset` and starts its pump. The
    /// initial notification makes the pump drain whatever the backlog
    /// already holds past the offset.
    pub fn start_slave(self: &Arc<Self>, conn_id: u64, handle: Arc<SlaveHandle>, sync_offset: i64) {
        handle.sync_offset.store(sync_offset, Ordering::SeqCst);
        handle.ack_time.store(unix_now(), Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(1);
        let _ = tx.try_send(());

        self.state.lock().slaves.insert(
            conn_id,
            SlaveSession {
                notify: tx,
                handle: Arc::clone(&handle),
            },
        );
        info!(peer = %handle.peer, sync_offset, "slave replication started");
        self.spawn_pump(conn_id, handle, rx);
    }

    pub fn remove_slave(&self, conn_id: u64) {
        if let Some(session) = self.state.lock().slaves.remove(&conn_id) {
            debug!(peer = %session.handle.peer, "slave removed");
        }
    }

    /// REPLCONF ACK bookkeeping.
    pub fn update_ack(&self, conn_id: u64, offset: i64) {
        let st = self.state.lock();
        if let Some(session) = st.slaves.get(&conn_id) {
            session.handle.ack_offset.store(offset, Ordering::SeqCst);
            session.handle.ack_time.store(unix_now(), Ordering::SeqCst);
        }
    }

    /// Tears down every slave session and the backlog. Pump tasks see
    /// their notify channels close and exit.
    pub fn close(&self) {
        let mut st = self.state.lock();
        st.slaves.clear();
        st.backlog = None;
    }

    pub fn info(&self) -> ReplInfo {
        let st = self.state.lock();
        ReplInfo {
            master_offset: st.master_offset,
            backlog_active: st.backlog.is_some(),
            backlog_size: st.backlog.as_ref().map(|b| b.size()).unwrap_or(0),
            backlog_first_byte_offset: st.backlog_offset,
            backlog_histlen: st.backlog.as_ref().map(|b| b.len()).unwrap_or(0),
            slaves: st.slaves.values().map(|s| s.handle.peer.clone()).collect(),
        }
    }

    // -- background tasks ------------------------------------------------

    /// One task per slave: wait for a nudge, then copy backlog bytes
    /// until the slave is caught up.
    fn spawn_pump(self: &Arc<Self>, conn_id: u64, handle: Arc<SlaveHandle>, mut rx: mpsc::Receiver<()>) {
        let repl = Arc::clone(self);
        let mut shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; PUMP_BUF_SIZE];
            'session: loop {
                tokio::select! {
                    _ = shutdown.changed() => break 'session,
                    msg = rx.recv() => {
                        if msg.is_none() {
                            break 'session;
                        }
                        loop {
                            let n = match repl.copy_backlog(&handle, &mut buf) {
                                Ok(n) => n,
                                Err(e) => {
                                    warn!(peer = %handle.peer, "closing slave: {e}");
                                    break 'session;
                                }
                            };
                            if n == 0 {
                                break;
                            }

                            let write = async {
                                let mut w = handle.writer.lock().await;
                                w.write_all(&buf[..n]).await?;
                                w.flush().await
                            };
                            match tokio::time::timeout(SLAVE_WRITE_TIMEOUT, write).await {
                                Ok(Ok(())) => {
                                    handle.sync_offset.fetch_add(n as i64, Ordering::SeqCst);
                                }
                                Ok(Err(e)) => {
                                    warn!(peer = %handle.peer, "slave write failed: {e}");
                                    break 'session;
                                }
                                Err(_) => {
                                    warn!(peer = %handle.peer, "slave write timed out");
                                    break 'session;
                                }
                            }

                            if n < buf.len() {
                                // caught up; wait for the next nudge
                                break;
                            }
                        }
                    }
                }
            }
            repl.remove_slave(conn_id);
            let mut w = handle.writer.lock().await;
            let _ = w.shutdown().await;
        });
    }

    /// Copies up to `buf.len()` backlog bytes at the slave's current
    /// offset. An offset outside the retained window is fatal for the
    /// session — the replica must full-resync.
    fn copy_backlog(&self, handle: &SlaveHandle, buf: &mut [u8]) -> Result<usize, String> {
        let st = self.state.lock();
        let Some(backlog) = st.backlog.as_ref() else {
            return Ok(0);
        };

        let offset = handle.sync_offset.load(Ordering::SeqCst);
        let start = st.backlog_offset;
        let end = st.backlog_offset + backlog.len() as i64;
        if offset < start || offset > end {
            return Err(format!(
                "slave sync offset {offset} outside backlog window [{start}, {end}]"
            ));
        }

        backlog
            .read_at(buf, (offset - start) as u64)
            .map_err(|e| format!("backlog read failed: {e}"))
    }

    /// Periodic PING through the normal feed path: keeps slave TCP
    /// sessions alive and the offset stream moving.
    fn spawn_heartbeat(self: &Arc<Self>) {
        let repl = Arc::clone(self);
        let mut shutdown = self.shutdown.clone();
        let period = self.config.ping_period;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = tokio::time::sleep(period) => repl.feed_ping(),
                }
            }
        });
    }
}

/// 40 lowercase hex characters, fresh per master lifetime.
fn generate_run_id() -> String {
    let mut rng = rand::rng();
    (0..40)
        .map(|_| {
            let n: u8 = rng.random_range(0..16);
            char::from_digit(n as u32, 16).expect("hex digit")
        })
        .collect()
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
