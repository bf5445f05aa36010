//! Hash command registrations.

use quartz_core::util::format_float;
use quartz_core::Store;
use quartz_protocol::Frame;

use crate::command::{
    array_cmd, bulk_cmd, int_cmd, nil_array_cmd, ok_cmd, store_cmd,
    CommandFlag::Read, CommandFlag::Write, CommandSpec,
};

pub(crate) fn table() -> Vec<CommandSpec> {
    vec![
        int_cmd("hset", Write, Store::hset),
        int_cmd("hsetnx", Write, Store::hset_nx),
        ok_cmd("hmset", Write, Store::hmset),
        nil_array_cmd("hmget", Read, Store::hmget),
        bulk_cmd("hget", Read, Store::hget),
        array_cmd("hgetall", Read, Store::hget_all),
        int_cmd("hdel", Write, Store::hdel),
        int_cmd("hexists", Read, Store::hexists),
        int_cmd("hlen", Read, Store::hlen),
        int_cmd("hincrby", Write, Store::hincr_by),
        store_cmd("hincrbyfloat", Write, |s, db, args| {
            let v = s.hincr_by_float(db, args)?;
            Ok(Some(Frame::bulk(format_float(v))))
        }),
        array_cmd("hkeys", Read, Store::hkeys),
        array_cmd("hvals", Read, Store::hvals),
    ]
}
