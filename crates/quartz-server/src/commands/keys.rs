//! Key command registrations, including DUMP/RESTORE which go through
//! the dump blob codec.

use quartz_core::util::parse_int;
use quartz_core::{Store, StoreError};
use quartz_persistence::{decode_dump, encode_dump};
use quartz_protocol::Frame;

use crate::command::{
    int_cmd, store_cmd, CommandFlag::Read, CommandFlag::Write, CommandSpec,
};

pub(crate) fn table() -> Vec<CommandSpec> {
    vec![
        int_cmd("del", Write, Store::del),
        int_cmd("exists", Read, Store::exists),
        store_cmd("type", Read, |s, db, args| {
            let name = match s.type_of(db, args)? {
                Some(code) => code.as_str(),
                None => "none",
            };
            Ok(Some(Frame::Simple(name.into())))
        }),
        int_cmd("ttl", Read, Store::ttl),
        int_cmd("pttl", Read, Store::pttl),
        int_cmd("expire", Write, Store::expire),
        int_cmd("pexpire", Write, Store::pexpire),
        int_cmd("expireat", Write, Store::expire_at),
        int_cmd("pexpireat", Write, Store::pexpire_at),
        int_cmd("persist", Write, Store::persist),
        store_cmd("dump", Read, |s, db, args| {
            Ok(Some(match s.dump(db, args)? {
                Some(value) => {
                    let blob = encode_dump(&value)
                        .map_err(|e| StoreError::ObjectValue(e.to_string()))?;
                    Frame::bulk(blob)
                }
                None => Frame::Null,
            }))
        }),
        store_cmd("restore", Write, |s, db, args| {
            if args.len() != 3 {
                return Err(StoreError::Arguments(format!(
                    "len(args) = {}, expect = 3",
                    args.len()
                )));
            }
            let ttl_ms = parse_int(&args[1])?;
            let value = decode_dump(&args[2])
                .map_err(|e| StoreError::ObjectValue(e.to_string()))?;
            s.restore_object(db, args, ttl_ms, value)?;
            Ok(Some(Frame::ok()))
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use quartz_core::MemDb;
    use std::sync::Arc;

    fn call(
        table: &[CommandSpec],
        name: &str,
        store: &Store,
        args: &[Bytes],
    ) -> Result<Option<Frame>, StoreError> {
        let spec = table.iter().find(|c| c.name == name).unwrap();
        match &spec.kind {
            crate::command::CommandKind::Store(f) => f(store, 0, args),
            _ => panic!("not a store command"),
        }
    }

    fn args(parts: &[&[u8]]) -> Vec<Bytes> {
        parts.iter().map(|p| Bytes::copy_from_slice(p)).collect()
    }

    #[test]
    fn dump_then_restore_reproduces_value() {
        let store = Store::open(Arc::new(MemDb::new()));
        let t = table();

        store.set(0, &args(&[b"src", b"payload"])).unwrap();
        let reply = call(&t, "dump", &store, &args(&[b"src"])).unwrap().unwrap();
        let blob = match reply {
            Frame::Bulk(b) => b,
            other => panic!("expected bulk dump, got {other:?}"),
        };

        let restore_args = vec![
            Bytes::from_static(b"dst"),
            Bytes::from_static(b"0"),
            blob,
        ];
        let reply = call(&t, "restore", &store, &restore_args).unwrap().unwrap();
        assert_eq!(reply, Frame::ok());
        assert_eq!(
            store.get(0, &args(&[b"dst"])).unwrap().unwrap(),
            b"payload"
        );
    }

    #[test]
    fn dump_missing_key_is_nil() {
        let store = Store::open(Arc::new(MemDb::new()));
        let reply = call(&table(), "dump", &store, &args(&[b"nope"]))
            .unwrap()
            .unwrap();
        assert_eq!(reply, Frame::Null);
    }

    #[test]
    fn restore_rejects_garbage_blob() {
        let store = Store::open(Arc::new(MemDb::new()));
        let err = call(
            &table(),
            "restore",
            &store,
            &args(&[b"k", b"0", b"not-a-blob"]),
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::ObjectValue(_)));
    }

    #[test]
    fn type_reports_none_for_missing() {
        let store = Store::open(Arc::new(MemDb::new()));
        let reply = call(&table(), "type", &store, &args(&[b"nope"]))
            .unwrap()
            .unwrap();
        assert_eq!(reply, Frame::Simple("none".into()));
    }
}
