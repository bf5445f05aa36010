//! The command table.
//!
//! Built once at server construction: every command module returns its
//! `(name, handler, flag)` entries and the builder merges them,
//! refusing duplicates. Handlers come in two kinds — store handlers,
//! which run a typed store operation and produce a reply frame, and
//! control commands, which need the session or the socket and are
//! executed by the connection dispatcher itself (SELECT, AUTH, INFO,
//! SYNC/PSYNC, ...).

use std::collections::HashMap;

use bytes::Bytes;
use quartz_core::{Store, StoreError};
use quartz_protocol::Frame;

use crate::commands;

/// Read commands take the store lock shared; write commands exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandFlag {
    Read,
    Write,
}

/// A store-backed handler: produces a reply frame, or `None` for
/// "no reply".
pub type StoreHandler =
    Box<dyn Fn(&Store, u32, &[Bytes]) -> Result<Option<Frame>, StoreError> + Send + Sync>;

/// Commands the dispatcher executes itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCmd {
    Ping,
    Echo,
    Select,
    Auth,
    Info,
    Config,
    FlushAll,
    CompactAll,
    Shutdown,
    ReplConf,
    Sync,
    PSync,
}

pub enum CommandKind {
    Store(StoreHandler),
    Control(ControlCmd),
}

pub struct CommandSpec {
    pub name: &'static str,
    pub flag: CommandFlag,
    pub kind: CommandKind,
}

/// Immutable name → spec map.
pub struct CommandTable {
    map: HashMap<&'static str, CommandSpec>,
}

impl CommandTable {
    /// Merges every module's entries. Panics on a duplicate name —
    /// that is a programming error caught at construction.
    pub fn build() -> CommandTable {
        let mut map = HashMap::new();
        let mut add = |specs: Vec<CommandSpec>| {
            for spec in specs {
                if map.insert(spec.name, spec).is_some() {
                    panic!("duplicate command registration");
                }
            }
        };
        add(commands::strings::table());
        add(commands::hashes::table());
        add(commands::lists::table());
        add(commands::sets::table());
        add(commands::zsets::table());
        add(commands::keys::table());
        add(control_table());
        CommandTable { map }
    }

    pub fn lookup(&self, name: &str) -> Option<&CommandSpec> {
        self.map.get(name)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

fn control(name: &'static str, flag: CommandFlag, cmd: ControlCmd) -> CommandSpec {
    CommandSpec {
        name,
        flag,
        kind: CommandKind::Control(cmd),
    }
}

fn control_table() -> Vec<CommandSpec> {
    use CommandFlag::{Read, Write};
    vec![
        control("ping", Read, ControlCmd::Ping),
        control("echo", Read, ControlCmd::Echo),
        control("select", Read, ControlCmd::Select),
        control("auth", Read, ControlCmd::Auth),
        control("info", Read, ControlCmd::Info),
        control("config", Read, ControlCmd::Config),
        control("flushall", Write, ControlCmd::FlushAll),
        control("compactall", Write, ControlCmd::CompactAll),
        control("shutdown", Write, ControlCmd::Shutdown),
        control("replconf", Read, ControlCmd::ReplConf),
        control("sync", Read, ControlCmd::Sync),
        control("psync", Read, ControlCmd::PSync),
    ]
}

// ---------------------------------------------------------------------------
// registration helpers: the reply taxonomy
// ---------------------------------------------------------------------------

pub(crate) fn store_cmd(
    name: &'static str,
    flag: CommandFlag,
    f: impl Fn(&Store, u32, &[Bytes]) -> Result<Option<Frame>, StoreError> + Send + Sync + 'static,
) -> CommandSpec {
    CommandSpec {
        name,
        flag,
        kind: CommandKind::Store(Box::new(f)),
    }
}

/// `+OK` on success.
pub(crate) fn ok_cmd(
    name: &'static str,
    flag: CommandFlag,
    f: fn(&Store, u32, &[Bytes]) -> Result<(), StoreError>,
) -> CommandSpec {
    store_cmd(name, flag, move |s, db, args| {
        f(s, db, args)?;
        Ok(Some(Frame::ok()))
    })
}

/// `:n`.
pub(crate) fn int_cmd(
    name: &'static str,
    flag: CommandFlag,
    f: fn(&Store, u32, &[Bytes]) -> Result<i64, StoreError>,
) -> CommandSpec {
    store_cmd(name, flag, move |s, db, args| {
        Ok(Some(Frame::Integer(f(s, db, args)?)))
    })
}

/// Bulk string, or nil for `None`.
pub(crate) fn bulk_cmd(
    name: &'static str,
    flag: CommandFlag,
    f: fn(&Store, u32, &[Bytes]) -> Result<Option<Vec<u8>>, StoreError>,
) -> CommandSpec {
    store_cmd(name, flag, move |s, db, args| {
        Ok(Some(match f(s, db, args)? {
            Some(data) => Frame::bulk(data),
            None => Frame::Null,
        }))
    })
}

/// Array of bulk strings.
pub(crate) fn array_cmd(
    name: &'static str,
    flag: CommandFlag,
    f: fn(&Store, u32, &[Bytes]) -> Result<Vec<Vec<u8>>, StoreError>,
) -> CommandSpec {
    store_cmd(name, flag, move |s, db, args| {
        let items = f(s, db, args)?.into_iter().map(Frame::bulk).collect();
        Ok(Some(Frame::Array(items)))
    })
}

/// Array of nullable bulk strings (MGET, HMGET).
pub(crate) fn nil_array_cmd(
    name: &'static str,
    flag: CommandFlag,
    f: fn(&Store, u32, &[Bytes]) -> Result<Vec<Option<Vec<u8>>>, StoreError>,
) -> CommandSpec {
    store_cmd(name, flag, move |s, db, args| {
        let items = f(s, db, args)?
            .into_iter()
            .map(|v| match v {
                Some(data) => Frame::bulk(data),
                None => Frame::Null,
            })
            .collect();
        Ok(Some(Frame::Array(items)))
    })
}
