//! Listener, shared server state, counters, INFO.

use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use quartz_core::Store;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::command::CommandTable;
use crate::config::Config;
use crate::connection::Connection;
use crate::replication::{Replication, ReplicationConfig};

/// Server-wide counters, exposed by INFO. Plain atomics: readers take
/// a relaxed snapshot, no lock involved.
#[derive(Debug, Default)]
pub struct Counters {
    pub clients: AtomicI64,
    pub clients_accepted: AtomicI64,
    pub commands: AtomicI64,
    pub commands_failed: AtomicI64,
    pub bgsave: AtomicI64,
    pub sync_full: AtomicI64,
    pub sync_partial_ok: AtomicI64,
    pub sync_partial_err: AtomicI64,
}

/// Shared server state: one per process, behind an `Arc`.
pub struct Server {
    pub config: Config,
    pub store: Arc<Store>,
    pub table: CommandTable,
    pub repl: Arc<Replication>,
    pub counters: Arc<Counters>,
    shutdown_tx: watch::Sender<bool>,
}

impl Server {
    /// Wires the store, command table, and replication engine
    /// together. Must run inside a tokio runtime — the replication
    /// heartbeat task starts here.
    pub fn new(config: Config, store: Arc<Store>) -> Arc<Server> {
        let counters = Arc::new(Counters::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let repl = Replication::new(
            ReplicationConfig {
                dump_path: PathBuf::from(&config.dump_path),
                backlog_file_path: (!config.repl_backlog_file_path.is_empty())
                    .then(|| PathBuf::from(&config.repl_backlog_file_path)),
                backlog_size: config.repl_backlog_size,
                ping_period: Duration::from_secs(config.repl_ping_slave_period),
            },
            Arc::clone(&counters),
            shutdown_rx,
        );
        repl.install(&store);

        Arc::new(Server {
            config,
            store,
            table: CommandTable::build(),
            repl,
            counters,
            shutdown_tx,
        })
    }

    /// Binds the configured address and serves until shutdown.
    pub async fn serve(self: &Arc<Self>) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.config.listen).await?;
        self.serve_listener(listener).await
    }

    /// Accept loop over an already-bound listener. Runs until the
    /// listener fails fatally or the process shuts down.
    pub async fn serve_listener(self: &Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        info!(listen = %self.config.listen, run_id = %self.repl.run_id(), "server listening");

        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        debug!(%peer, "client connected");
                        self.counters.clients_accepted.fetch_add(1, Ordering::Relaxed);
                        self.counters.clients.fetch_add(1, Ordering::Relaxed);
                        let server = Arc::clone(self);
                        tokio::spawn(async move {
                            Connection::serve(Arc::clone(&server), socket).await;
                            server.counters.clients.fetch_sub(1, Ordering::Relaxed);
                        });
                    }
                    Err(e) => {
                        error!("accept error: {e}");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }
    }

    /// Orderly teardown: signal background tasks, drop slaves, close
    /// the store.
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(true);
        self.repl.close();
        self.store.close();
    }

    /// SHUTDOWN command: close everything and leave.
    pub fn shutdown_and_exit(&self) -> ! {
        info!("shutdown requested");
        self.close();
        std::process::exit(0);
    }

    /// Builds the INFO reply for a section (`all` for everything).
    pub fn info(&self, section: &str) -> String {
        let mut out = String::new();
        match section {
            "database" => self.info_database(&mut out),
            "config" => self.info_config(&mut out),
            "clients" => self.info_clients(&mut out),
            "replication" => self.info_replication(&mut out),
            _ => {
                self.info_database(&mut out);
                out.push_str("\r\n");
                self.info_config(&mut out);
                out.push_str("\r\n");
                self.info_clients(&mut out);
                out.push_str("\r\n");
                self.info_replication(&mut out);
            }
        }
        out.push_str("\r\n");
        out
    }

    fn info_database(&self, out: &mut String) {
        out.push_str("# Database\r\n");
        out.push_str(&format!("dbtype:{}\r\n", self.config.dbtype));
        out.push_str(&format!("dbpath:{}\r\n", self.config.dbpath));
    }

    fn info_config(&self, out: &mut String) {
        out.push_str("# Config\r\n");
        out.push_str(&self.config.render());
    }

    fn info_clients(&self, out: &mut String) {
        let c = &self.counters;
        out.push_str("# Clients\r\n");
        out.push_str(&format!("bgsave:{}\r\n", c.bgsave.load(Ordering::Relaxed)));
        out.push_str(&format!("clients:{}\r\n", c.clients.load(Ordering::Relaxed)));
        out.push_str(&format!(
            "clients_accepted:{}\r\n",
            c.clients_accepted.load(Ordering::Relaxed)
        ));
        out.push_str(&format!(
            "commands:{}\r\n",
            c.commands.load(Ordering::Relaxed)
        ));
        out.push_str(&format!(
            "commands_failed:{}\r\n",
            c.commands_failed.load(Ordering::Relaxed)
        ));
    }

    fn info_replication(&self, out: &mut String) {
        let ri = self.repl.info();
        out.push_str("# Replication\r\n");
        out.push_str("role:master\r\n");
        out.push_str(&format!("master_repl_offset:{}\r\n", ri.master_offset));
        if ri.backlog_active {
            out.push_str("repl_backlog_active:1\r\n");
            out.push_str(&format!("repl_backlog_size:{}\r\n", ri.backlog_size));
            out.push_str(&format!(
                "repl_backlog_first_byte_offset:{}\r\n",
                ri.backlog_first_byte_offset
            ));
            out.push_str(&format!("repl_backlog_histlen:{}\r\n", ri.backlog_histlen));
        } else {
            out.push_str("repl_backlog_active:0\r\n");
        }
        out.push_str(&format!("slaves:{}\r\n", ri.slaves.join(",")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quartz_core::MemDb;

    fn test_server() -> Arc<Server> {
        let mut config = Config::default();
        config.listen = "127.0.0.1:0".into();
        let store = Arc::new(Store::open(Arc::new(MemDb::new())));
        Server::new(config, store)
    }

    #[tokio::test]
    async fn info_sections_render() {
        let server = test_server();
        let all = server.info("all");
        assert!(all.contains("# Database"));
        assert!(all.contains("# Config"));
        assert!(all.contains("# Clients"));
        assert!(all.contains("# Replication"));
        assert!(all.contains("role:master"));
        assert!(all.contains("repl_backlog_active:0"));

        let repl = server.info("replication");
        assert!(repl.contains("master_repl_offset:0"));
        assert!(!repl.contains("# Config"));
    }

    #[tokio::test]
    async fn counters_show_in_info() {
        let server = test_server();
        server.counters.commands.fetch_add(3, Ordering::Relaxed);
        let clients = server.info("clients");
        assert!(clients.contains("commands:3"));
        assert!(clients.contains("commands_failed:0"));
    }
}
