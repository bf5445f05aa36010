//! Inbound request decomposition.

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::types::Frame;

/// A parsed command request: lowercase command name plus raw byte
/// arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub command: String,
    pub args: Vec<Bytes>,
}

impl Request {
    /// Lowers an array-of-bulks frame into a request.
    ///
    /// Simple-string elements are accepted too — inline commands and
    /// some clients send them.
    pub fn from_frame(frame: Frame) -> Result<Request, ProtocolError> {
        let items = match frame {
            Frame::Array(items) if !items.is_empty() => items,
            Frame::Array(_) => {
                return Err(ProtocolError::InvalidRequest("empty command array".into()))
            }
            other => {
                return Err(ProtocolError::InvalidRequest(format!(
                    "expected command array, got {other:?}"
                )))
            }
        };

        let mut parts = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Frame::Bulk(data) => parts.push(data),
                Frame::Simple(s) => parts.push(Bytes::from(s.into_bytes())),
                other => {
                    return Err(ProtocolError::InvalidRequest(format!(
                        "command element must be a string, got {other:?}"
                    )))
                }
            }
        }

        let command = String::from_utf8(parts[0].to_vec())
            .map_err(|_| ProtocolError::InvalidRequest("command is not utf-8".into()))?
            .to_lowercase();
        Ok(Request {
            command,
            args: parts.split_off(1),
        })
    }

    /// Builds the wire frame for a command — used by tests and by the
    /// replication feed to encode forwards.
    pub fn to_frame(command: &str, args: &[Bytes]) -> Frame {
        let mut items = Vec::with_capacity(args.len() + 1);
        items.push(Frame::Bulk(Bytes::copy_from_slice(command.as_bytes())));
        items.extend(args.iter().map(|a| Frame::Bulk(a.clone())));
        Frame::Array(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowers_array_of_bulks() {
        let frame = Frame::Array(vec![
            Frame::bulk("GET"),
            Frame::bulk("mykey"),
        ]);
        let req = Request::from_frame(frame).unwrap();
        assert_eq!(req.command, "get");
        assert_eq!(req.args, vec![Bytes::from_static(b"mykey")]);
    }

    #[test]
    fn command_is_lowercased() {
        let frame = Frame::Array(vec![Frame::bulk("PiNg")]);
        assert_eq!(Request::from_frame(frame).unwrap().command, "ping");
    }

    #[test]
    fn rejects_non_array() {
        assert!(Request::from_frame(Frame::Integer(1)).is_err());
        assert!(Request::from_frame(Frame::Array(vec![])).is_err());
        assert!(Request::from_frame(Frame::Array(vec![Frame::Integer(1)])).is_err());
    }

    #[test]
    fn to_frame_round_trips() {
        let args = vec![Bytes::from_static(b"k"), Bytes::from_static(b"v")];
        let frame = Request::to_frame("SET", &args);
        let req = Request::from_frame(frame).unwrap();
        assert_eq!(req.command, "set");
        assert_eq!(req.args, args);
    }
}
