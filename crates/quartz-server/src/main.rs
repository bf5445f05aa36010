//! Process bootstrap: CLI, config, engine selection, signals.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use quartz_core::{Database, MemDb, Store};
use quartz_server::{Config, Server};
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "quartz-server", about = "Redis-wire-compatible persistent KV server")]
struct Cli {
    /// Config file (TOML).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Engine driver (overrides the config file).
    #[arg(long)]
    dbtype: Option<String>,

    /// Engine data directory.
    #[arg(long)]
    dbpath: Option<String>,

    /// Listen address.
    #[arg(long)]
    addr: Option<String>,

    /// Connection password.
    #[arg(long)]
    auth: Option<String>,

    /// PID file path.
    #[arg(long)]
    pidfile: Option<String>,

    /// Connection idle timeout in seconds.
    #[arg(long)]
    conn_timeout: Option<u64>,

    /// Full-resync dump file path.
    #[arg(long)]
    dump_path: Option<String>,

    /// Replication backlog file; memory-only backlog when unset.
    #[arg(long)]
    repl_backlog_file_path: Option<String>,

    /// Replication backlog size in bytes (minimum 1 MiB).
    #[arg(long)]
    repl_backlog_size: Option<u64>,

    /// Master-to-replica ping period in seconds.
    #[arg(long)]
    repl_ping_slave_period: Option<u64>,

    /// Password presented to a master when replicating.
    #[arg(long)]
    master_auth: Option<String>,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        macro_rules! set {
            ($field:ident) => {
                if let Some(v) = &self.$field {
                    config.$field = v.clone();
                }
            };
        }
        set!(dbtype);
        set!(dbpath);
        set!(auth);
        set!(pidfile);
        set!(dump_path);
        set!(repl_backlog_file_path);
        set!(master_auth);
        if let Some(v) = &self.addr {
            config.listen = v.clone();
        }
        if let Some(v) = self.conn_timeout {
            config.conn_timeout = v;
        }
        if let Some(v) = self.repl_backlog_size {
            config.repl_backlog_size = v;
        }
        if let Some(v) = self.repl_ping_slave_period {
            config.repl_ping_slave_period = v;
        }
    }
}

/// Opens the engine named by `dbtype`. Disk engines register here as
/// they grow drivers; the in-process tree is always available.
fn open_engine(config: &Config) -> Result<Arc<dyn Database>, String> {
    match config.dbtype.as_str() {
        "memory" => Ok(Arc::new(MemDb::new())),
        other => Err(format!("unknown dbtype '{other}'")),
    }
}

fn write_pid_file(path: &str) -> std::io::Result<()> {
    if let Some(dir) = std::path::Path::new(path).parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    std::fs::write(path, std::process::id().to_string())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quartz=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!("config error: {e}");
            std::process::exit(1);
        }
    };
    cli.apply(&mut config);
    if let Err(e) = config.validate() {
        error!("config error: {e}");
        std::process::exit(1);
    }

    let engine = match open_engine(&config) {
        Ok(e) => e,
        Err(e) => {
            error!("engine error: {e}");
            std::process::exit(1);
        }
    };
    let store = Arc::new(Store::open(engine));

    let pidfile = config.pidfile.clone();
    if !pidfile.is_empty() {
        if let Err(e) = write_pid_file(&pidfile) {
            error!(pidfile, "cannot write pid file: {e}");
            std::process::exit(1);
        }
    }

    let server = Server::new(config, store);
    info!("quartz server starting");

    // SIGINT/SIGTERM close the store and remove the pid file
    {
        let server = Arc::clone(&server);
        let pidfile = pidfile.clone();
        tokio::spawn(async move {
            let ctrl_c = tokio::signal::ctrl_c();
            #[cfg(unix)]
            {
                let mut term =
                    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                        .expect("install SIGTERM handler");
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                let _ = ctrl_c.await;
            }
            info!("interrupt, shutting down");
            server.close();
            if !pidfile.is_empty() {
                let _ = std::fs::remove_file(&pidfile);
            }
            std::process::exit(0);
        });
    }

    if let Err(e) = server.serve().await {
        error!("serve failed: {e}");
    }
    server.close();
    if !pidfile.is_empty() {
        let _ = std::fs::remove_file(&pidfile);
    }
}
