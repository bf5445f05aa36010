//! String command registrations.

use quartz_core::util::format_float;
use quartz_core::Store;
use quartz_protocol::Frame;

use crate::command::{
    bulk_cmd, int_cmd, nil_array_cmd, ok_cmd, store_cmd, CommandFlag::Read,
    CommandFlag::Write, CommandSpec,
};

pub(crate) fn table() -> Vec<CommandSpec> {
    vec![
        bulk_cmd("get", Read, Store::get),
        ok_cmd("set", Write, Store::set),
        int_cmd("append", Write, Store::append),
        int_cmd("incr", Write, Store::incr),
        int_cmd("incrby", Write, Store::incr_by),
        int_cmd("decr", Write, Store::decr),
        int_cmd("decrby", Write, Store::decr_by),
        // INCRBYFLOAT replies with the formatted result as a bulk
        store_cmd("incrbyfloat", Write, |s, db, args| {
            let v = s.incr_by_float(db, args)?;
            Ok(Some(Frame::bulk(format_float(v))))
        }),
        bulk_cmd("getset", Write, Store::get_set),
        int_cmd("setnx", Write, Store::set_nx),
        ok_cmd("setex", Write, Store::set_ex),
        ok_cmd("psetex", Write, Store::pset_ex),
        int_cmd("setbit", Write, Store::set_bit),
        int_cmd("getbit", Read, Store::get_bit),
        int_cmd("setrange", Write, Store::set_range),
        bulk_cmd("getrange", Read, Store::get_range),
        int_cmd("strlen", Read, Store::strlen),
        nil_array_cmd("mget", Read, Store::mget),
        ok_cmd("mset", Write, Store::mset),
        int_cmd("msetnx", Write, Store::mset_nx),
        int_cmd("bitcount", Read, Store::bit_count),
        int_cmd("bitop", Write, Store::bit_op),
    ]
}
