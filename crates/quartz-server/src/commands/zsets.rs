//! Sorted-set command registrations.

use quartz_core::util::format_int;
use quartz_core::Store;
use quartz_protocol::Frame;

use crate::command::{
    array_cmd, int_cmd, store_cmd, CommandFlag::Read, CommandFlag::Write, CommandSpec,
};

pub(crate) fn table() -> Vec<CommandSpec> {
    vec![
        int_cmd("zadd", Write, Store::zadd),
        int_cmd("zrem", Write, Store::zrem),
        // ZSCORE replies with the score as a bulk string, nil when the
        // member is absent
        store_cmd("zscore", Read, |s, db, args| {
            Ok(Some(match s.zscore(db, args)? {
                Some(score) => Frame::bulk(format_int(score)),
                None => Frame::Null,
            }))
        }),
        store_cmd("zincrby", Write, |s, db, args| {
            let score = s.zincr_by(db, args)?;
            Ok(Some(Frame::bulk(format_int(score))))
        }),
        int_cmd("zcard", Read, Store::zcard),
        int_cmd("zcount", Read, Store::zcount),
        int_cmd("zlexcount", Read, Store::zlex_count),
        array_cmd("zrange", Read, Store::zrange),
        array_cmd("zrevrange", Read, Store::zrev_range),
        array_cmd("zrangebyscore", Read, Store::zrange_by_score),
        array_cmd("zrevrangebyscore", Read, Store::zrev_range_by_score),
        array_cmd("zrangebylex", Read, Store::zrange_by_lex),
        array_cmd("zrevrangebylex", Read, Store::zrev_range_by_lex),
        store_cmd("zrank", Read, |s, db, args| {
            Ok(Some(match s.zrank(db, args)? {
                Some(rank) => Frame::Integer(rank),
                None => Frame::Null,
            }))
        }),
        store_cmd("zrevrank", Read, |s, db, args| {
            Ok(Some(match s.zrev_rank(db, args)? {
                Some(rank) => Frame::Integer(rank),
                None => Frame::Null,
            }))
        }),
        int_cmd("zremrangebylex", Write, Store::zrem_range_by_lex),
        int_cmd("zremrangebyrank", Write, Store::zrem_range_by_rank),
        int_cmd("zremrangebyscore", Write, Store::zrem_range_by_score),
        array_cmd("zgetall", Read, Store::zget_all),
    ]
}
