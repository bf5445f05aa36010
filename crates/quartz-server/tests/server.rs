//! End-to-end tests over a live listener: wire-level command replies,
//! expiration, and master-side replication (SYNC, PSYNC full and
//! partial resync).

use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use quartz_core::{MemDb, Store};
use quartz_protocol::{parse_frame, Frame, Request};
use quartz_server::{Config, Server};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

struct TestServer {
    server: Arc<Server>,
    addr: std::net::SocketAddr,
    _dir: tempfile::TempDir,
}

impl TestServer {
    async fn start() -> TestServer {
        Self::start_with(|_| {}).await
    }

    async fn start_with(tweak: impl FnOnce(&mut Config)) -> TestServer {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config {
            listen: "127.0.0.1:0".into(),
            dump_path: dir
                .path()
                .join("dump.qdb")
                .to_string_lossy()
                .into_owned(),
            // keep heartbeats out of byte-exact stream assertions
            repl_ping_slave_period: 1000,
            ..Config::default()
        };
        tweak(&mut config);

        let store = Arc::new(Store::open(Arc::new(MemDb::new())));
        let server = Server::new(config, store);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept_server = Arc::clone(&server);
        tokio::spawn(async move {
            let _ = accept_server.serve_listener(listener).await;
        });

        TestServer {
            server,
            addr,
            _dir: dir,
        }
    }

    async fn connect(&self) -> TestClient {
        TestClient {
            stream: TcpStream::connect(self.addr).await.unwrap(),
            buf: BytesMut::new(),
        }
    }
}

struct TestClient {
    stream: TcpStream,
    buf: BytesMut,
}

impl TestClient {
    async fn send(&mut self, parts: &[&[u8]]) {
        let args: Vec<Bytes> = parts[1..]
            .iter()
            .map(|p| Bytes::copy_from_slice(p))
            .collect();
        let frame = Request::to_frame(std::str::from_utf8(parts[0]).unwrap(), &args);
        self.stream.write_all(&frame.to_bytes()).await.unwrap();
    }

    async fn read_frame(&mut self) -> Frame {
        loop {
            if let Some((frame, consumed)) = parse_frame(&self.buf).unwrap() {
                self.buf.advance(consumed);
                return frame;
            }
            let n = self.stream.read_buf(&mut self.buf).await.unwrap();
            assert!(n > 0, "connection closed while waiting for a frame");
        }
    }

    /// Reads exactly `n` raw bytes (dump payload streaming).
    async fn read_raw(&mut self, n: usize) -> Vec<u8> {
        while self.buf.len() < n {
            let read = self.stream.read_buf(&mut self.buf).await.unwrap();
            assert!(read > 0, "connection closed mid-payload");
        }
        self.buf.split_to(n).to_vec()
    }

    async fn cmd(&mut self, parts: &[&[u8]]) -> Frame {
        self.send(parts).await;
        self.read_frame().await
    }

    async fn get_int(&mut self, parts: &[&[u8]]) -> i64 {
        match self.cmd(parts).await {
            Frame::Integer(n) => n,
            other => panic!("expected integer, got {other:?}"),
        }
    }

    async fn get_bulk(&mut self, parts: &[&[u8]]) -> Option<Vec<u8>> {
        match self.cmd(parts).await {
            Frame::Bulk(data) => Some(data.to_vec()),
            Frame::Null => None,
            other => panic!("expected bulk, got {other:?}"),
        }
    }

    async fn expect_ok(&mut self, parts: &[&[u8]]) {
        match self.cmd(parts).await {
            Frame::Simple(s) if s == "OK" => {}
            other => panic!("expected +OK, got {other:?}"),
        }
    }
}

// --- basic wire behavior ---------------------------------------------------

#[tokio::test]
async fn ping_and_echo() {
    let server = TestServer::start().await;
    let mut c = server.connect().await;

    match c.cmd(&[b"PING"]).await {
        Frame::Simple(s) => assert_eq!(s, "PONG"),
        other => panic!("expected +PONG, got {other:?}"),
    }
    assert_eq!(c.get_bulk(&[b"ECHO", b"hello"]).await.unwrap(), b"hello");
}

#[tokio::test]
async fn unknown_command_is_an_error() {
    let server = TestServer::start().await;
    let mut c = server.connect().await;
    match c.cmd(&[b"NOSUCHCMD", b"x"]).await {
        Frame::Error(msg) => assert!(msg.contains("unknown command 'nosuchcmd'")),
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn scenario_strings() {
    let server = TestServer::start().await;
    let mut c = server.connect().await;

    // SET foo bar; APPEND foo baz; GET foo; STRLEN foo
    c.expect_ok(&[b"SET", b"foo", b"bar"]).await;
    assert_eq!(c.get_int(&[b"APPEND", b"foo", b"baz"]).await, 6);
    assert_eq!(c.get_bulk(&[b"GET", b"foo"]).await.unwrap(), b"barbaz");
    assert_eq!(c.get_int(&[b"STRLEN", b"foo"]).await, 6);
}

#[tokio::test]
async fn scenario_expire() {
    let server = TestServer::start().await;
    let mut c = server.connect().await;

    c.expect_ok(&[b"SET", b"k", b"v", b"PX", b"50"]).await;
    assert_eq!(c.get_bulk(&[b"GET", b"k"]).await.unwrap(), b"v");

    tokio::time::sleep(std::time::Duration::from_millis(80)).await;
    assert_eq!(c.get_bulk(&[b"GET", b"k"]).await, None);
    assert_eq!(c.get_int(&[b"TTL", b"k"]).await, -2);
}

#[tokio::test]
async fn scenario_hash() {
    let server = TestServer::start().await;
    let mut c = server.connect().await;

    assert_eq!(c.get_int(&[b"HSET", b"h", b"a", b"1"]).await, 1);
    assert_eq!(c.get_int(&[b"HSET", b"h", b"a", b"2"]).await, 0);
    assert_eq!(c.get_bulk(&[b"HGET", b"h", b"a"]).await.unwrap(), b"2");
    assert_eq!(c.get_int(&[b"HDEL", b"h", b"a"]).await, 1);
    assert_eq!(c.get_int(&[b"EXISTS", b"h"]).await, 0);
}

#[tokio::test]
async fn scenario_zset() {
    let server = TestServer::start().await;
    let mut c = server.connect().await;

    assert_eq!(
        c.get_int(&[b"ZADD", b"z", b"1", b"a", b"2", b"b", b"3", b"c"])
            .await,
        3
    );
    match c.cmd(&[b"ZRANGEBYSCORE", b"z", b"(1", b"3"]).await {
        Frame::Array(items) => {
            assert_eq!(items.len(), 2);
            assert_eq!(items[0], Frame::bulk("b"));
            assert_eq!(items[1], Frame::bulk("c"));
        }
        other => panic!("expected array, got {other:?}"),
    }
    assert_eq!(c.get_int(&[b"ZREM", b"z", b"b", b"c"]).await, 2);
    assert_eq!(c.get_int(&[b"ZCARD", b"z"]).await, 1);
}

#[tokio::test]
async fn wrongtype_error_reaches_the_wire() {
    let server = TestServer::start().await;
    let mut c = server.connect().await;

    c.expect_ok(&[b"SET", b"k", b"v"]).await;
    match c.cmd(&[b"LPUSH", b"k", b"x"]).await {
        Frame::Error(msg) => assert!(msg.starts_with("WRONGTYPE")),
        other => panic!("expected WRONGTYPE, got {other:?}"),
    }
}

#[tokio::test]
async fn set_nx_unmet_condition_is_nil() {
    let server = TestServer::start().await;
    let mut c = server.connect().await;

    c.expect_ok(&[b"SET", b"k", b"v"]).await;
    let reply = c.cmd(&[b"SET", b"k", b"other", b"NX"]).await;
    assert_eq!(reply, Frame::Null);
    assert_eq!(c.get_bulk(&[b"GET", b"k"]).await.unwrap(), b"v");
}

#[tokio::test]
async fn select_isolates_databases() {
    let server = TestServer::start().await;
    let mut c = server.connect().await;

    c.expect_ok(&[b"SET", b"k", b"zero"]).await;
    c.expect_ok(&[b"SELECT", b"3"]).await;
    assert_eq!(c.get_bulk(&[b"GET", b"k"]).await, None);
    c.expect_ok(&[b"SET", b"k", b"three"]).await;
    c.expect_ok(&[b"SELECT", b"0"]).await;
    assert_eq!(c.get_bulk(&[b"GET", b"k"]).await.unwrap(), b"zero");
}

#[tokio::test]
async fn dump_restore_over_the_wire() {
    let server = TestServer::start().await;
    let mut c = server.connect().await;

    c.get_int(&[b"RPUSH", b"l", b"a", b"b", b"c"]).await;
    let blob = c.get_bulk(&[b"DUMP", b"l"]).await.unwrap();

    c.expect_ok(&[b"RESTORE", b"copy", b"0", &blob]).await;
    match c.cmd(&[b"LRANGE", b"copy", b"0", b"-1"]).await {
        Frame::Array(items) => assert_eq!(items.len(), 3),
        other => panic!("expected array, got {other:?}"),
    }
}

#[tokio::test]
async fn flushall_empties_every_database() {
    let server = TestServer::start().await;
    let mut c = server.connect().await;

    c.expect_ok(&[b"SET", b"a", b"1"]).await;
    c.expect_ok(&[b"SELECT", b"2"]).await;
    c.expect_ok(&[b"SET", b"b", b"2"]).await;
    c.expect_ok(&[b"FLUSHALL"]).await;
    assert_eq!(c.get_bulk(&[b"GET", b"b"]).await, None);
    c.expect_ok(&[b"SELECT", b"0"]).await;
    assert_eq!(c.get_bulk(&[b"GET", b"a"]).await, None);
}

#[tokio::test]
async fn auth_gate() {
    let server = TestServer::start_with(|c| c.auth = "sesame".into()).await;
    let mut c = server.connect().await;

    match c.cmd(&[b"GET", b"k"]).await {
        Frame::Error(msg) => assert!(msg.starts_with("NOAUTH")),
        other => panic!("expected NOAUTH, got {other:?}"),
    }
    match c.cmd(&[b"AUTH", b"wrong"]).await {
        Frame::Error(msg) => assert!(msg.contains("invalid password")),
        other => panic!("expected error, got {other:?}"),
    }
    c.expect_ok(&[b"AUTH", b"sesame"]).await;
    assert_eq!(c.get_bulk(&[b"GET", b"k"]).await, None);
}

#[tokio::test]
async fn info_reports_replication_section() {
    let server = TestServer::start().await;
    let mut c = server.connect().await;

    let info = c.get_bulk(&[b"INFO", b"replication"]).await.unwrap();
    let text = String::from_utf8(info).unwrap();
    assert!(text.contains("role:master"));
    assert!(text.contains("master_repl_offset:0"));
}

// --- replication -----------------------------------------------------------

/// Reads a `$<len>\r\n<bytes>` dump payload from a replica socket.
async fn read_dump_payload(c: &mut TestClient) -> Vec<u8> {
    // the length header line
    let header_end = loop {
        if let Some(pos) = c.buf.iter().position(|b| *b == b'\n') {
            break pos + 1;
        }
        let n = c.stream.read_buf(&mut c.buf).await.unwrap();
        assert!(n > 0, "connection closed before dump header");
    };
    let header = c.buf.split_to(header_end).to_vec();
    assert_eq!(header[0], b'$', "expected bulk header, got {header:?}");
    let len: usize = std::str::from_utf8(&header[1..header.len() - 2])
        .unwrap()
        .parse()
        .unwrap();
    c.read_raw(len).await
}

/// Parses dump bytes through the snapshot reader.
fn parse_dump(dir: &tempfile::TempDir, raw: &[u8]) -> Vec<quartz_core::DumpEntry> {
    let path = dir.path().join("received.qdb");
    std::fs::write(&path, raw).unwrap();
    quartz_persistence::read_snapshot(&path).unwrap()
}

#[tokio::test]
async fn scenario_sync_full_resync() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;
    client.expect_ok(&[b"SET", b"x", b"1"]).await;

    // replica connects and SYNCs
    let mut replica = server.connect().await;
    replica.send(&[b"SYNC"]).await;
    let dump = read_dump_payload(&mut replica).await;

    let received_dir = tempfile::tempdir().unwrap();
    let entries = parse_dump(&received_dir, &dump);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].key, b"x");
    assert_eq!(
        entries[0].value,
        quartz_core::Value::String(b"1".to_vec())
    );

    // a later mutation streams through the backlog
    client.expect_ok(&[b"SET", b"y", b"2"]).await;

    // first frame selects the database, second carries the write
    let select = replica.read_frame().await;
    match select {
        Frame::Array(items) => assert_eq!(items[0], Frame::bulk("SELECT")),
        other => panic!("expected SELECT frame, got {other:?}"),
    }
    match replica.read_frame().await {
        Frame::Array(items) => {
            assert_eq!(items[0], Frame::bulk("Set"));
            assert_eq!(items[1], Frame::bulk("y"));
            assert_eq!(items[2], Frame::bulk("2"));
        }
        other => panic!("expected Set frame, got {other:?}"),
    }
}

#[tokio::test]
async fn scenario_psync_partial_resync() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;
    client.expect_ok(&[b"SET", b"x", b"1"]).await;

    // full resync via PSYNC ? -1
    let mut replica = server.connect().await;
    replica.send(&[b"PSYNC", b"?", b"-1"]).await;
    let (run_id, sync_offset) = match replica.read_frame().await {
        Frame::Simple(s) => {
            let mut parts = s.split(' ');
            assert_eq!(parts.next(), Some("FULLRESYNC"));
            let run_id = parts.next().unwrap().to_string();
            let offset: i64 = parts.next().unwrap().parse().unwrap();
            (run_id, offset)
        }
        other => panic!("expected FULLRESYNC, got {other:?}"),
    };
    assert_eq!(run_id, server.server.repl.run_id());
    let _dump = read_dump_payload(&mut replica).await;

    // drop the replica connection entirely
    drop(replica);

    // a write happens while the replica is away
    client.expect_ok(&[b"SET", b"z", b"3"]).await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    // reconnect and partial-resync from the recorded offset
    let mut replica = server.connect().await;
    replica
        .send(&[b"PSYNC", run_id.as_bytes(), sync_offset.to_string().as_bytes()])
        .await;
    match replica.read_frame().await {
        Frame::Simple(s) => assert_eq!(s, "CONTINUE"),
        other => panic!("expected +CONTINUE, got {other:?}"),
    }

    // the stream replays exactly what was missed: SELECT 0, then the SET
    match replica.read_frame().await {
        Frame::Array(items) => {
            assert_eq!(items[0], Frame::bulk("SELECT"));
            assert_eq!(items[1], Frame::bulk("0"));
        }
        other => panic!("expected SELECT frame, got {other:?}"),
    }
    match replica.read_frame().await {
        Frame::Array(items) => {
            assert_eq!(items[0], Frame::bulk("Set"));
            assert_eq!(items[1], Frame::bulk("z"));
            assert_eq!(items[2], Frame::bulk("3"));
        }
        other => panic!("expected Set frame, got {other:?}"),
    }
}

#[tokio::test]
async fn psync_with_stale_offset_forces_full_resync() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;
    client.expect_ok(&[b"SET", b"x", b"1"]).await;

    let run_id = server.server.repl.run_id().to_string();
    let mut replica = server.connect().await;
    // offset 0 predates the backlog window
    replica.send(&[b"PSYNC", run_id.as_bytes(), b"0"]).await;
    match replica.read_frame().await {
        Frame::Simple(s) => assert!(s.starts_with("FULLRESYNC")),
        other => panic!("expected FULLRESYNC, got {other:?}"),
    }
    let dump = read_dump_payload(&mut replica).await;
    assert!(!dump.is_empty());
}

#[tokio::test]
async fn replconf_listening_port_and_ack() {
    let server = TestServer::start().await;
    let mut c = server.connect().await;

    c.expect_ok(&[b"REPLCONF", b"listening-port", b"6381"]).await;

    // ACK produces no reply; a following PING answers immediately,
    // proving the server did not write anything for the ACK
    c.send(&[b"REPLCONF", b"ACK", b"42"]).await;
    match c.cmd(&[b"PING"]).await {
        Frame::Simple(s) => assert_eq!(s, "PONG"),
        other => panic!("expected PONG, got {other:?}"),
    }
}
