// ── Wire frames ──
//
// One JSON document per line. Clients send `ClientFrame`s; servers answer
// with `ServerFrame::Reply` (matched by id) and push `ServerFrame::Event`
// once the client has opened the stream.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::message::{Event, Request};
use crate::value::Attrs;

/// Upper bound on a single frame. A full dump of a large namespace is the
/// biggest thing that travels in one line.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Call { id: u64, call: Call },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "args", rename_all = "snake_case")]
pub enum Call {
    Open,
    Dump,
    Request(Request),
    Close,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Reply { id: u64, result: Outcome },
    Event { event: Event },
    /// The served stream dropped `skipped` events.
    Lagged { skipped: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ok(Payload),
    Rejected { code: i32, message: String },
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    Unit,
    Events(Vec<Event>),
    Attrs(Attrs),
}

impl Outcome {
    pub fn from_result(result: Result<Payload, Error>) -> Self {
        match result {
            Ok(payload) => Self::Ok(payload),
            Err(Error::Rejected { code, message }) => Self::Rejected { code, message },
            Err(other) => Self::Failed {
                message: other.to_string(),
            },
        }
    }

    pub fn into_result(self) -> Result<Payload, Error> {
        match self {
            Self::Ok(payload) => Ok(payload),
            Self::Rejected { code, message } => Err(Error::Rejected { code, message }),
            Self::Failed { message } => Err(Error::Protocol(message)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::message::Kind;

    #[test]
    fn call_frame_layout() {
        let frame = ClientFrame::Call {
            id: 7,
            call: Call::Request(Request::delete(
                Kind::Interface,
                Attrs::new().with("index", 3),
            )),
        };
        let json: serde_json::Value = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "call");
        assert_eq!(json["call"]["op"], "request");
        assert_eq!(json["call"]["args"]["action"], "delete");
        assert_eq!(json["call"]["args"]["key"]["index"]["int"], 3);
    }

    #[test]
    fn rejection_keeps_errno() {
        let outcome = Outcome::from_result(Err(Error::rejected(crate::errno::EEXIST)));
        let line = serde_json::to_string(&ServerFrame::Reply { id: 1, result: outcome }).unwrap();
        let ServerFrame::Reply { result, .. } = serde_json::from_str(&line).unwrap() else {
            panic!("expected reply");
        };
        assert_eq!(result.into_result().unwrap_err().code(), Some(17));
    }
}
