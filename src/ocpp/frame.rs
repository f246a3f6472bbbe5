//! OCPP 1.6-JSON wire framing.
//!
//! Every frame is a JSON array: `[2, messageId, action, payload]` for a
//! Call and `[3, messageId, payload]` for a CallResult. The message id is
//! echoed by the remote party and is the sole correlation key.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ProtocolError;

/// OCPP message type discriminant, the first array element of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Call = 2,
    CallResult = 3,
}

impl MessageType {
    pub fn from_discriminant(raw: u64) -> Option<Self> {
        match raw {
            2 => Some(Self::Call),
            3 => Some(Self::CallResult),
            _ => None,
        }
    }
}

/// A Call frame: either station-originated (inbound, answered immediately)
/// or server-originated (held in `pending_requests` until its response
/// correlates back).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub message_id: String,
    pub action: String,
    pub payload: Value,
    pub is_pending: bool,
}

impl Request {
    pub fn new(message_id: impl Into<String>, action: impl Into<String>, payload: Value) -> Self {
        Self {
            message_id: message_id.into(),
            action: action.into(),
            payload,
            is_pending: true,
        }
    }

    pub fn encode(&self) -> String {
        json!([MessageType::Call as u8, self.message_id, self.action, self.payload]).to_string()
    }
}

/// A CallResult frame answering the Call that shares its message id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub message_id: String,
    pub payload: Value,
    pub is_pending: bool,
}

impl Response {
    pub fn new(message_id: impl Into<String>, payload: Value) -> Self {
        Self {
            message_id: message_id.into(),
            payload,
            is_pending: true,
        }
    }

    pub fn encode(&self) -> String {
        json!([MessageType::CallResult as u8, self.message_id, self.payload]).to_string()
    }

    /// The status field almost every CallResult payload carries.
    pub fn status(&self) -> Option<&str> {
        self.payload.get("status").and_then(Value::as_str)
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone)]
pub enum OcppMessage {
    Request(Request),
    Response(Response),
}

/// Decode one wire frame. Anything that fails the minimal shape check is a
/// `MalformedFrame`; the caller logs and drops it without closing the
/// connection.
pub fn decode(raw: &str) -> Result<OcppMessage, ProtocolError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| ProtocolError::MalformedFrame(format!("invalid JSON: {e}")))?;
    let frame = value
        .as_array()
        .ok_or_else(|| ProtocolError::MalformedFrame("frame is not an array".into()))?;

    let discriminant = frame
        .first()
        .and_then(Value::as_u64)
        .ok_or_else(|| ProtocolError::MalformedFrame("missing message type".into()))?;
    let message_type = MessageType::from_discriminant(discriminant)
        .ok_or_else(|| ProtocolError::MalformedFrame(format!("unknown message type {discriminant}")))?;

    let message_id = frame
        .get(1)
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::MalformedFrame("missing message id".into()))?;

    match message_type {
        MessageType::Call => {
            let action = frame
                .get(2)
                .and_then(Value::as_str)
                .ok_or_else(|| ProtocolError::MalformedFrame("call without action".into()))?;
            let payload = frame.get(3).cloned().unwrap_or_else(|| json!({}));
            Ok(OcppMessage::Request(Request::new(message_id, action, payload)))
        }
        MessageType::CallResult => {
            let payload = frame.get(2).cloned().unwrap_or_else(|| json!({}));
            Ok(OcppMessage::Response(Response::new(message_id, payload)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn decodes_call_frame() {
        let msg = decode(r#"[2,"19223201","BootNotification",{"chargePointVendor":"AVT"}]"#).unwrap();
        match msg {
            OcppMessage::Request(req) => {
                assert_eq!(req.message_id, "19223201");
                assert_eq!(req.action, "BootNotification");
                assert_eq!(req.payload["chargePointVendor"], "AVT");
                assert!(req.is_pending);
            }
            OcppMessage::Response(_) => panic!("expected a request"),
        }
    }

    #[test]
    fn decodes_call_result_frame() {
        let msg = decode(r#"[3,"19223201",{"status":"Accepted"}]"#).unwrap();
        match msg {
            OcppMessage::Response(res) => {
                assert_eq!(res.message_id, "19223201");
                assert_eq!(res.status(), Some("Accepted"));
            }
            OcppMessage::Request(_) => panic!("expected a response"),
        }
    }

    #[rstest]
    #[case::not_json("boot plz")]
    #[case::not_an_array(r#"{"action":"Heartbeat"}"#)]
    #[case::empty_array("[]")]
    #[case::call_error_type(r#"[4,"1","NotImplemented","",{}]"#)]
    #[case::numeric_message_id(r#"[2,7,"Heartbeat",{}]"#)]
    #[case::call_without_action(r#"[2,"1"]"#)]
    fn rejects_malformed_frames(#[case] raw: &str) {
        assert!(matches!(decode(raw), Err(ProtocolError::MalformedFrame(_))));
    }

    #[test]
    fn request_round_trips_through_encode() {
        let req = Request::new("42", "Heartbeat", json!({}));
        let decoded = decode(&req.encode()).unwrap();
        match decoded {
            OcppMessage::Request(r) => {
                assert_eq!(r.message_id, "42");
                assert_eq!(r.action, "Heartbeat");
            }
            _ => panic!("expected a request"),
        }
    }
}
