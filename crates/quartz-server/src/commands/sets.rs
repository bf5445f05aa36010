//! Set command registrations.

use quartz_core::Store;
use quartz_protocol::Frame;

use crate::command::{
    array_cmd, bulk_cmd, int_cmd, store_cmd, CommandFlag::Read, CommandFlag::Write,
    CommandSpec,
};

pub(crate) fn table() -> Vec<CommandSpec> {
    vec![
        int_cmd("sadd", Write, Store::sadd),
        int_cmd("srem", Write, Store::srem),
        int_cmd("scard", Read, Store::scard),
        int_cmd("sismember", Read, Store::sismember),
        array_cmd("smembers", Read, Store::smembers),
        bulk_cmd("spop", Write, Store::spop),
        // without a count the reply is a single bulk (or nil); with a
        // count it is an array
        store_cmd("srandmember", Read, |s, db, args| {
            let with_count = args.len() == 2;
            let mut members = s.srandmember(db, args)?;
            Ok(Some(if with_count {
                Frame::Array(members.into_iter().map(Frame::bulk).collect())
            } else {
                match members.pop() {
                    Some(m) => Frame::bulk(m),
                    None => Frame::Null,
                }
            }))
        }),
    ]
}
