//! Server configuration.
//!
//! Layered in the usual order: a TOML config file at the bottom,
//! `QUARTZ_*` environment variables over it, CLI flags on top. The
//! struct also carries the defaults, so an empty config still boots a
//! usable server.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Smallest allowed replication backlog (1 MiB). Configured sizes
/// below this are clamped up.
pub const MIN_REPL_BACKLOG_SIZE: u64 = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// All recognized options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Engine driver name. Only "memory" ships in-tree; disk engines
    /// plug in behind the same adapter.
    pub dbtype: String,
    /// Engine data directory (driver-specific; unused by "memory").
    pub dbpath: String,
    /// Listen address for the wire protocol.
    pub listen: String,
    /// Connection password. Empty disables AUTH.
    pub auth: String,
    /// PID file path. Empty disables the PID file.
    pub pidfile: String,
    /// Per-connection idle timeout in seconds; 0 disables it.
    pub conn_timeout: u64,
    /// Where the full-resync snapshot file is written.
    pub dump_path: String,
    /// Spill file for replication sync data on the replica side.
    pub sync_file_path: String,
    /// Maximum size of the sync spill file, in bytes.
    pub sync_file_size: u64,
    /// Maximum in-memory sync buffer, in bytes.
    pub sync_buff_size: u64,
    /// Backlog ring file; empty keeps the backlog in memory.
    pub repl_backlog_file_path: String,
    /// Backlog ring capacity in bytes (minimum 1 MiB).
    pub repl_backlog_size: u64,
    /// Master-to-replica heartbeat period in seconds.
    pub repl_ping_slave_period: u64,
    /// Password presented to a master when this process replicates it.
    pub master_auth: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dbtype: "memory".into(),
            dbpath: "./var/quartz".into(),
            listen: "127.0.0.1:6380".into(),
            auth: String::new(),
            pidfile: String::new(),
            conn_timeout: 0,
            dump_path: "./var/quartz-dump.qdb".into(),
            sync_file_path: "./var/quartz-sync.tmp".into(),
            sync_file_size: 32 * 1024 * 1024,
            sync_buff_size: 8 * 1024 * 1024,
            repl_backlog_file_path: String::new(),
            repl_backlog_size: 10 * 1024 * 1024,
            repl_ping_slave_period: 10,
            master_auth: String::new(),
        }
    }
}

impl Config {
    /// Loads a config file, or the defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        let mut config = match path {
            Some(p) => toml::from_str(&std::fs::read_to_string(p)?)?,
            None => Config::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Applies `QUARTZ_*` environment overrides.
    fn apply_env(&mut self) {
        fn set_string(dest: &mut String, key: &str) {
            if let Ok(v) = std::env::var(key) {
                if !v.is_empty() {
                    *dest = v;
                }
            }
        }
        fn set_u64(dest: &mut u64, key: &str) {
            if let Ok(v) = std::env::var(key) {
                if let Ok(n) = v.parse() {
                    *dest = n;
                }
            }
        }

        set_string(&mut self.dbtype, "QUARTZ_DBTYPE");
        set_string(&mut self.dbpath, "QUARTZ_DBPATH");
        set_string(&mut self.listen, "QUARTZ_LISTEN");
        set_string(&mut self.auth, "QUARTZ_AUTH");
        set_string(&mut self.pidfile, "QUARTZ_PIDFILE");
        set_u64(&mut self.conn_timeout, "QUARTZ_CONN_TIMEOUT");
        set_string(&mut self.dump_path, "QUARTZ_DUMP_PATH");
        set_string(&mut self.sync_file_path, "QUARTZ_SYNC_FILE_PATH");
        set_u64(&mut self.sync_file_size, "QUARTZ_SYNC_FILE_SIZE");
        set_u64(&mut self.sync_buff_size, "QUARTZ_SYNC_BUFF_SIZE");
        set_string(
            &mut self.repl_backlog_file_path,
            "QUARTZ_REPL_BACKLOG_FILE_PATH",
        );
        set_u64(&mut self.repl_backlog_size, "QUARTZ_REPL_BACKLOG_SIZE");
        set_u64(
            &mut self.repl_ping_slave_period,
            "QUARTZ_REPL_PING_SLAVE_PERIOD",
        );
        set_string(&mut self.master_auth, "QUARTZ_MASTER_AUTH");
    }

    /// Normalizes and sanity-checks the final values.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.listen.is_empty() {
            return Err(ConfigError::Invalid {
                key: "listen",
                message: "listen address must not be empty".into(),
            });
        }
        if self.dump_path.is_empty() {
            return Err(ConfigError::Invalid {
                key: "dump_path",
                message: "dump path must not be empty".into(),
            });
        }
        if self.repl_ping_slave_period == 0 {
            return Err(ConfigError::Invalid {
                key: "repl_ping_slave_period",
                message: "ping period must be at least 1 second".into(),
            });
        }
        if self.repl_backlog_size < MIN_REPL_BACKLOG_SIZE {
            self.repl_backlog_size = MIN_REPL_BACKLOG_SIZE;
        }
        Ok(())
    }

    /// Renders the config for the INFO command, one `key:value` line
    /// per option. Secrets are masked.
    pub fn render(&self) -> String {
        fn mask(s: &str) -> &str {
            if s.is_empty() {
                ""
            } else {
                "*****"
            }
        }
        format!(
            "dbtype:{}\r\ndbpath:{}\r\nlisten:{}\r\nauth:{}\r\n\
             pidfile:{}\r\nconn_timeout:{}\r\ndump_path:{}\r\n\
             sync_file_path:{}\r\nsync_file_size:{}\r\nsync_buff_size:{}\r\n\
             repl_backlog_file_path:{}\r\nrepl_backlog_size:{}\r\n\
             repl_ping_slave_period:{}\r\nmaster_auth:{}\r\n",
            self.dbtype,
            self.dbpath,
            self.listen,
            mask(&self.auth),
            self.pidfile,
            self.conn_timeout,
            self.dump_path,
            self.sync_file_path,
            self.sync_file_size,
            self.sync_buff_size,
            self.repl_backlog_file_path,
            self.repl_backlog_size,
            self.repl_ping_slave_period,
            mask(&self.master_auth),
        )
    }
}
