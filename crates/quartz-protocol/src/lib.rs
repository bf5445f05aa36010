//! quartz-protocol: RESP2 wire protocol.
//!
//! A [`Frame`] models one RESP2 value. The parser is a single-pass
//! incremental decoder over a byte buffer; the serializer writes
//! directly into a `BytesMut`. [`Request`] lowers an inbound array of
//! bulk strings into a dispatchable `(command, args)` pair.

mod error;
mod parse;
mod request;
mod serialize;
mod types;

pub use error::ProtocolError;
pub use parse::parse_frame;
pub use request::Request;
pub use types::Frame;
