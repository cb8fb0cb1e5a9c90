//! Bus wire messages
//!
//! Every frame is one JSON object tagged by `type`:
//!
//! | type          | direction         | fields               |
//! |---------------|-------------------|----------------------|
//! | `initialise`  | caller → executor | `id`, `args`         |
//! | `initialised` | executor → caller | `id`                 |
//! | `request`     | caller → executor | `id`, `operation`    |
//! | `ack`         | executor → caller | `id`                 |
//! | `response`    | executor → caller | `id`, `result`       |
//! | `failure`     | executor → caller | `id`, `message`      |
//! | `event`       | executor → caller | `topic`, `payload`   |

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BusError;
use crate::schema::{ExecutionResult, OperationRequest};

/// Opaque id pairing a response with its request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// A fresh random id.
    pub fn new() -> Self {
        CorrelationId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        CorrelationId(id.to_string())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Start-up arguments of an executor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorArgs {
    /// Build the mocked execution context instead of the real one
    #[serde(default)]
    pub mocked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BusMessage {
    Initialise {
        id: CorrelationId,
        args: ExecutorArgs,
    },
    Initialised {
        id: CorrelationId,
    },
    Request {
        id: CorrelationId,
        operation: OperationRequest,
    },
    Ack {
        id: CorrelationId,
    },
    Response {
        id: CorrelationId,
        result: ExecutionResult,
    },
    Failure {
        id: CorrelationId,
        message: String,
    },
    Event {
        topic: String,
        payload: Value,
    },
}

impl BusMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            BusMessage::Initialise { .. } => "initialise",
            BusMessage::Initialised { .. } => "initialised",
            BusMessage::Request { .. } => "request",
            BusMessage::Ack { .. } => "ack",
            BusMessage::Response { .. } => "response",
            BusMessage::Failure { .. } => "failure",
            BusMessage::Event { .. } => "event",
        }
    }
}

/// A received frame
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(BusMessage),
    /// Undecodable frame; `id` is set when one could still be read from it
    Malformed {
        id: Option<CorrelationId>,
        reason: String,
    },
}

pub fn encode(message: &BusMessage) -> Result<String, BusError> {
    serde_json::to_string(message).map_err(|e| BusError::Malformed(e.to_string()))
}

pub fn decode(frame: &str) -> Inbound {
    match serde_json::from_str::<BusMessage>(frame) {
        Ok(message) => Inbound::Message(message),
        Err(e) => Inbound::Malformed {
            id: recover_id(frame),
            reason: e.to_string(),
        },
    }
}

/// Decode a raw frame. Bytes that are not UTF-8 are always malformed,
/// though the id is still recovered when the rest of the frame allows.
pub fn decode_bytes(frame: &[u8]) -> Inbound {
    match std::str::from_utf8(frame) {
        Ok(text) => decode(text),
        Err(e) => Inbound::Malformed {
            id: recover_id(&String::from_utf8_lossy(frame)),
            reason: format!("frame is not valid UTF-8: {e}"),
        },
    }
}

fn recover_id(frame: &str) -> Option<CorrelationId> {
    serde_json::from_str::<Value>(frame)
        .ok()
        .and_then(|v| v.get("id").and_then(Value::as_str).map(CorrelationId::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_frame_shape() {
        let message = BusMessage::Request {
            id: CorrelationId::from("c-1"),
            operation: OperationRequest::new("{ edgeTxReleases { id } }"),
        };
        let frame: Value = serde_json::from_str(&encode(&message).unwrap()).unwrap();
        assert_eq!(
            frame,
            json!({
                "type": "request",
                "id": "c-1",
                "operation": {"query": "{ edgeTxReleases { id } }"}
            })
        );
        assert_eq!(decode(&frame.to_string()), Inbound::Message(message));
    }

    #[test]
    fn malformed_frame_keeps_recoverable_id() {
        match decode(r#"{"type": "request", "id": "c-2", "operation": 42}"#) {
            Inbound::Malformed { id, .. } => assert_eq!(id, Some(CorrelationId::from("c-2"))),
            other => panic!("expected malformed, got {other:?}"),
        }
        match decode("not json at all") {
            Inbound::Malformed { id, .. } => assert!(id.is_none()),
            other => panic!("expected malformed, got {other:?}"),
        }
    }

    #[test]
    fn non_utf8_frames_are_malformed() {
        let mut frame = br#"{"type": "request", "id": "c-3", "operation": {"query": ""#.to_vec();
        frame.extend_from_slice(b"\xff\"}}");
        match decode_bytes(&frame) {
            Inbound::Malformed { id, reason } => {
                assert_eq!(id, Some(CorrelationId::from("c-3")));
                assert!(reason.contains("UTF-8"));
            }
            other => panic!("expected malformed, got {other:?}"),
        }
        assert!(matches!(
            decode_bytes(b"\xff\xfe garbage"),
            Inbound::Malformed { id: None, .. }
        ));
        assert!(matches!(
            decode_bytes(br#"{"type": "ack", "id": "c-4"}"#),
            Inbound::Message(BusMessage::Ack { .. })
        ));
    }

    #[test]
    fn correlation_ids_are_unique() {
        assert_ne!(CorrelationId::new(), CorrelationId::new());
    }

    #[test]
    fn initialise_args_default_to_real() {
        match decode(r#"{"type": "initialise", "id": "i", "args": {}}"#) {
            Inbound::Message(BusMessage::Initialise { args, .. }) => assert!(!args.mocked),
            other => panic!("unexpected {other:?}"),
        }
    }
}
