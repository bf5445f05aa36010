//! List command registrations.

use quartz_core::Store;

use crate::command::{
    array_cmd, bulk_cmd, int_cmd, ok_cmd, CommandFlag::Read, CommandFlag::Write,
    CommandSpec,
};

pub(crate) fn table() -> Vec<CommandSpec> {
    vec![
        int_cmd("lpush", Write, Store::lpush),
        int_cmd("rpush", Write, Store::rpush),
        int_cmd("lpushx", Write, Store::lpush_x),
        int_cmd("rpushx", Write, Store::rpush_x),
        bulk_cmd("lpop", Write, Store::lpop),
        bulk_cmd("rpop", Write, Store::rpop),
        bulk_cmd("lindex", Read, Store::lindex),
        int_cmd("llen", Read, Store::llen),
        array_cmd("lrange", Read, Store::lrange),
        ok_cmd("lset", Write, Store::lset),
        ok_cmd("ltrim", Write, Store::ltrim),
    ]
}
