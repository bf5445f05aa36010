//! Per-connection dispatcher.
//!
//! Reads RESP2 requests off the socket, routes them through the
//! command table, and writes typed replies back. The write half lives
//! behind an async mutex shared with the replication pump, so command
//! replies and backlog bytes interleave only at frame boundaries. A
//! connection that completes SYNC/PSYNC stays in this loop to service
//! REPLCONF ACK, but with its idle timeout disabled.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use quartz_core::StoreError;
use quartz_protocol::{parse_frame, Frame, Request};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::command::{CommandKind, ControlCmd};
use crate::replication::SlaveHandle;
use crate::server::Server;

/// Initial read buffer size.
const BUF_CAPACITY: usize = 4096;

/// Hard cap on buffered, unparsed request bytes.
const MAX_BUF_SIZE: usize = 64 * 1024 * 1024;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

pub struct Connection {
    id: u64,
    server: Arc<Server>,
    reader: OwnedReadHalf,
    /// Writer plus the slave-session fields this connection would use
    /// if it turns into a replica.
    handle: Arc<SlaveHandle>,
    buf: BytesMut,
    db: u32,
    authenticated: bool,
    summary: String,
    /// Idle timeout for reads and writes; cleared once the connection
    /// becomes a replica.
    timeout: Option<Duration>,
}

impl Connection {
    /// Drives one client connection to completion.
    pub async fn serve(server: Arc<Server>, socket: TcpStream) {
        let summary = match (socket.local_addr(), socket.peer_addr()) {
            (Ok(local), Ok(peer)) => format!("<local> {local} -- {peer} <remote>"),
            _ => "<local> ? -- ? <remote>".into(),
        };
        let peer = socket
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "?".into());

        let (reader, writer) = socket.into_split();
        let handle = SlaveHandle::new(peer, Arc::new(tokio::sync::Mutex::new(writer)));

        let timeout = (server.config.conn_timeout > 0)
            .then(|| Duration::from_secs(server.config.conn_timeout));

        let mut conn = Connection {
            id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            authenticated: server.config.auth.is_empty(),
            server,
            reader,
            handle,
            buf: BytesMut::with_capacity(BUF_CAPACITY),
            db: 0,
            summary,
            timeout,
        };

        if let Err(e) = conn.run().await {
            debug!(conn = %conn.summary, "connection closed: {e}");
        }
        // a replica session dies with its connection
        conn.server.repl.remove_slave(conn.id);
    }

    async fn run(&mut self) -> std::io::Result<()> {
        use tokio::io::AsyncReadExt;

        loop {
            if self.buf.len() > MAX_BUF_SIZE {
                let frame = Frame::Error("ERR request buffer exceeded".into());
                let _ = self.write_frame(&frame).await;
                return Ok(());
            }

            let n = match self.timeout {
                Some(t) => match tokio::time::timeout(t, self.reader.read_buf(&mut self.buf)).await
                {
                    Ok(r) => r?,
                    Err(_) => {
                        debug!(conn = %self.summary, "idle timeout");
                        return Ok(());
                    }
                },
                None => self.reader.read_buf(&mut self.buf).await?,
            };
            if n == 0 {
                return Ok(());
            }

            // drain every complete frame in the buffer (pipelining)
            loop {
                let (frame, consumed) = match parse_frame(&self.buf) {
                    Ok(Some(parsed)) => parsed,
                    Ok(None) => break,
                    Err(e) => {
                        // framing failures close the connection
                        warn!(conn = %self.summary, "protocol error: {e}");
                        let frame = Frame::Error(format!("ERR protocol error: {e}"));
                        let _ = self.write_frame(&frame).await;
                        return Ok(());
                    }
                };
                self.buf.advance(consumed);

                // bare inline PING is a liveness probe, not a command
                if matches!(&frame, Frame::Simple(s) if s.eq_ignore_ascii_case("ping")) {
                    continue;
                }

                let request = match Request::from_frame(frame) {
                    Ok(r) => r,
                    Err(e) => {
                        let frame = Frame::Error(format!("ERR {e}"));
                        self.write_frame(&frame).await?;
                        continue;
                    }
                };

                self.server.counters.commands.fetch_add(1, Ordering::Relaxed);
                if let Some(reply) = self.dispatch(request).await {
                    self.write_frame(&reply).await?;
                }
            }
        }
    }

    /// Looks the command up and runs it. `None` means "no reply"
    /// (REPLCONF ACK, a completed SYNC/PSYNC).
    async fn dispatch(&mut self, request: Request) -> Option<Frame> {
        let server = Arc::clone(&self.server);
        let Some(spec) = server.table.lookup(&request.command) else {
            self.count_failed();
            return Some(Frame::Error(format!(
                "ERR unknown command '{}'",
                request.command
            )));
        };

        if !self.authenticated && spec.name != "auth" {
            self.count_failed();
            return Some(Frame::Error("NOAUTH Authentication required.".into()));
        }

        match &spec.kind {
            CommandKind::Store(f) => match f(&server.store, self.db, &request.args) {
                Ok(reply) => reply,
                // an unmet SET NX|XX condition is a nil reply, not an error
                Err(StoreError::SetAborted) => Some(Frame::Null),
                Err(e) => {
                    self.count_failed();
                    Some(error_frame(&e))
                }
            },
            CommandKind::Control(cmd) => self.control(*cmd, &request.args).await,
        }
    }

    fn count_failed(&self) {
        self.server
            .counters
            .commands_failed
            .fetch_add(1, Ordering::Relaxed);
    }

    async fn control(&mut self, cmd: ControlCmd, args: &[Bytes]) -> Option<Frame> {
        match cmd {
            ControlCmd::Ping => {
                if args.is_empty() {
                    Some(Frame::Simple("PONG".into()))
                } else {
                    Some(arity_error("ping"))
                }
            }
            ControlCmd::Echo => {
                if args.len() == 1 {
                    Some(Frame::Bulk(args[0].clone()))
                } else {
                    Some(arity_error("echo"))
                }
            }
            ControlCmd::Select => self.select(args),
            ControlCmd::Auth => self.auth(args),
            ControlCmd::Info => {
                let section = args
                    .first()
                    .map(|a| String::from_utf8_lossy(a).to_lowercase())
                    .unwrap_or_else(|| "all".into());
                Some(Frame::bulk(self.server.info(&section)))
            }
            ControlCmd::Config => self.config_cmd(args),
            ControlCmd::FlushAll => match self.server.store.reset() {
                Ok(()) => Some(Frame::ok()),
                Err(e) => {
                    self.count_failed();
                    Some(error_frame(&e))
                }
            },
            ControlCmd::CompactAll => match self.server.store.compact_all() {
                Ok(()) => Some(Frame::ok()),
                Err(e) => {
                    self.count_failed();
                    Some(error_frame(&e))
                }
            },
            ControlCmd::Shutdown => self.server.shutdown_and_exit(),
            ControlCmd::ReplConf => self.replconf(args),
            ControlCmd::Sync => self.handle_sync_command(false, args).await,
            ControlCmd::PSync => self.handle_sync_command(true, args).await,
        }
    }

    fn select(&mut self, args: &[Bytes]) -> Option<Frame> {
        if args.len() != 1 {
            return Some(arity_error("select"));
        }
        match std::str::from_utf8(&args[0])
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
        {
            Some(db) => {
                self.db = db;
                Some(Frame::ok())
            }
            None => Some(Frame::Error("ERR invalid DB index".into())),
        }
    }

    fn auth(&mut self, args: &[Bytes]) -> Option<Frame> {
        if args.len() != 1 {
            return Some(arity_error("auth"));
        }
        if self.server.config.auth.is_empty() {
            return Some(Frame::Error(
                "ERR Client sent AUTH, but no password is set".into(),
            ));
        }
        if args[0].as_ref() == self.server.config.auth.as_bytes() {
            self.authenticated = true;
            Some(Frame::ok())
        } else {
            self.count_failed();
            Some(Frame::Error("ERR invalid password".into()))
        }
    }

    fn config_cmd(&self, args: &[Bytes]) -> Option<Frame> {
        if args.len() != 2 {
            return Some(arity_error("config"));
        }
        let sub = args[0].to_ascii_lowercase();
        if sub != b"get" {
            return Some(Frame::Error(format!(
                "ERR unknown sub-command '{}'",
                String::from_utf8_lossy(&sub)
            )));
        }
        match args[1].to_ascii_lowercase().as_slice() {
            b"maxmemory" => Some(Frame::Simple("0".into())),
            other => Some(Frame::Error(format!(
                "ERR unknown entry '{}'",
                String::from_utf8_lossy(other)
            ))),
        }
    }

    fn replconf(&mut self, args: &[Bytes]) -> Option<Frame> {
        if args.len() != 2 {
            return Some(arity_error("replconf"));
        }
        match args[0].to_ascii_lowercase().as_slice() {
            b"listening-port" => {
                match std::str::from_utf8(&args[1])
                    .ok()
                    .and_then(|s| s.parse::<u16>().ok())
                {
                    Some(port) => {
                        self.handle
                            .listening_port
                            .store(i64::from(port), Ordering::SeqCst);
                        Some(Frame::ok())
                    }
                    None => Some(Frame::Error(
                        "ERR invalid REPLCONF listening-port".into(),
                    )),
                }
            }
            b"ack" => {
                match std::str::from_utf8(&args[1])
                    .ok()
                    .and_then(|s| s.parse::<i64>().ok())
                {
                    Some(offset) => {
                        self.server.repl.update_ack(self.id, offset);
                        // ACK never gets a reply
                        None
                    }
                    None => Some(Frame::Error("ERR invalid REPLCONF ACK offset".into())),
                }
            }
            other => Some(Frame::Error(format!(
                "ERR unrecognized REPLCONF option '{}'",
                String::from_utf8_lossy(other)
            ))),
        }
    }

    /// SYNC / PSYNC: decide partial vs full, stream the dump when
    /// needed, then register this connection as a slave. After this
    /// returns the replication pump owns the outbound stream.
    async fn handle_sync_command(&mut self, psync: bool, args: &[Bytes]) -> Option<Frame> {
        if self.server.repl.is_slave(self.id) {
            // already replicating; ignore the repeat
            return None;
        }

        if psync {
            if args.len() != 2 {
                return Some(arity_error("psync"));
            }
            let run_id = &args[0];
            let offset = std::str::from_utf8(&args[1])
                .ok()
                .and_then(|s| s.parse::<i64>().ok());

            if let Some(offset) = self.server.repl.accept_partial(run_id, offset) {
                if self.write_frame(&Frame::Simple("CONTINUE".into())).await.is_err() {
                    return None;
                }
                self.server
                    .counters
                    .sync_partial_ok
                    .fetch_add(1, Ordering::Relaxed);
                self.become_slave(offset);
                return None;
            }

            // full resync it is; quote the offset the stream will start at
            let offset = self.server.repl.full_resync_offset();
            let reply = format!("FULLRESYNC {} {}", self.server.repl.run_id(), offset);
            if self.write_frame(&Frame::Simple(reply)).await.is_err() {
                return None;
            }
            if args[0].as_ref() != b"?" {
                self.server
                    .counters
                    .sync_partial_err
                    .fetch_add(1, Ordering::Relaxed);
            }
        }

        let (file, size, sync_offset) = match self
            .server
            .repl
            .full_sync(Arc::clone(&self.server.store))
            .await
        {
            Ok(r) => r,
            Err(e) => {
                self.count_failed();
                return Some(Frame::Error(format!("ERR {e}")));
            }
        };

        if let Err(e) = self.stream_dump(file, size).await {
            warn!(conn = %self.summary, "dump stream to slave failed: {e}");
            return None;
        }

        self.become_slave(sync_offset);
        None
    }

    /// Registers the slave session and disables the idle timeout — a
    /// healthy replica may never send another byte.
    fn become_slave(&mut self, sync_offset: i64) {
        self.timeout = None;
        self.server
            .repl
            .start_slave(self.id, Arc::clone(&self.handle), sync_offset);
    }

    /// Sends the dump as one bulk string: `$<len>\r\n<bytes>`. The
    /// writer lock is held for the whole stream so nothing interleaves.
    async fn stream_dump(&self, mut file: tokio::fs::File, size: u64) -> std::io::Result<()> {
        let mut w = self.handle.writer.lock().await;
        w.write_all(format!("${size}\r\n").as_bytes()).await?;
        let copied = tokio::io::copy(&mut file, &mut *w).await?;
        if copied != size {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "short dump stream",
            ));
        }
        w.flush().await
    }

    /// Serializes and writes one reply frame under the shared writer
    /// lock, with the configured write deadline.
    async fn write_frame(&self, frame: &Frame) -> std::io::Result<()> {
        let mut out = BytesMut::new();
        frame.serialize(&mut out);

        let write = async {
            let mut w = self.handle.writer.lock().await;
            w.write_all(&out).await?;
            w.flush().await
        };
        match self.timeout {
            Some(t) => tokio::time::timeout(t, write)
                .await
                .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "write timeout"))?,
            None => write.await,
        }
    }
}

/// Formats a store error for the wire. Errors that already carry a
/// Redis error code pass through; everything else gets the generic
/// `ERR` prefix.
fn error_frame(e: &StoreError) -> Frame {
    let msg = e.to_string();
    if msg.starts_with("WRONGTYPE") || msg.starts_with("BUSYKEY") {
        Frame::Error(msg)
    } else {
        Frame::Error(format!("ERR {msg}"))
    }
}

fn arity_error(cmd: &str) -> Frame {
    Frame::Error(format!("ERR wrong number of arguments for '{cmd}'"))
}
