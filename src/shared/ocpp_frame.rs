//! OCPP-J message framing
//!
//! Implements the OCPP-J (JSON over WebSocket) envelope used by OCPP 1.6J:
//!
//! - **Call**       `[2, "<uniqueId>", "<action>", {<payload>}]`
//! - **CallResult** `[3, "<uniqueId>", {<payload>}]`
//! - **CallError**  `[4, "<uniqueId>", "<errorCode>", "<errorDescription>", {<errorDetails>}]`
//!
//! Decoding is strict: the element count must match the variant exactly and
//! the unique id must be a non-empty string.

use serde_json::Value;
use thiserror::Error;

// ── Message-type constants ─────────────────────────────────────

const MSG_TYPE_CALL: u64 = 2;
const MSG_TYPE_CALL_RESULT: u64 = 3;
const MSG_TYPE_CALL_ERROR: u64 = 4;

/// Unique id used when answering a frame whose id could not be recovered.
pub const UNPARSABLE_MESSAGE_ID: &str = "-1";

// ── OcppFrame ──────────────────────────────────────────────────

/// A parsed OCPP-J frame.
#[derive(Debug, Clone, PartialEq)]
pub enum OcppFrame {
    /// `[2, uniqueId, action, payload]`
    Call {
        unique_id: String,
        action: String,
        payload: Value,
    },
    /// `[3, uniqueId, payload]`
    CallResult { unique_id: String, payload: Value },
    /// `[4, uniqueId, errorCode, errorDescription, errorDetails]`
    CallError {
        unique_id: String,
        error_code: String,
        error_description: String,
        error_details: Value,
    },
}

impl OcppFrame {
    // ── Parsing ────────────────────────────────────────────

    /// Parse raw wire text into an `OcppFrame`.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| FrameError::InvalidJson(e.to_string()))?;

        let arr = match value {
            Value::Array(arr) => arr,
            _ => return Err(FrameError::NotAnArray),
        };

        let msg_type = arr
            .first()
            .ok_or(FrameError::EmptyArray)?
            .as_u64()
            .ok_or(FrameError::InvalidMessageType)?;

        match msg_type {
            MSG_TYPE_CALL => Self::parse_call(arr),
            MSG_TYPE_CALL_RESULT => Self::parse_call_result(arr),
            MSG_TYPE_CALL_ERROR => Self::parse_call_error(arr),
            other => Err(FrameError::UnknownMessageType(other)),
        }
    }

    fn parse_call(arr: Vec<Value>) -> Result<Self, FrameError> {
        let [_, unique_id, action, payload] = expect_arity::<4>(arr)?;
        Ok(Self::Call {
            unique_id: unique_id_of(unique_id)?,
            action: string_field(action, "action must be a string")?,
            payload,
        })
    }

    fn parse_call_result(arr: Vec<Value>) -> Result<Self, FrameError> {
        let [_, unique_id, payload] = expect_arity::<3>(arr)?;
        Ok(Self::CallResult {
            unique_id: unique_id_of(unique_id)?,
            payload,
        })
    }

    fn parse_call_error(arr: Vec<Value>) -> Result<Self, FrameError> {
        let [_, unique_id, error_code, error_description, error_details] =
            expect_arity::<5>(arr)?;
        Ok(Self::CallError {
            unique_id: unique_id_of(unique_id)?,
            error_code: string_field(error_code, "errorCode must be a string")?,
            error_description: string_field(
                error_description,
                "errorDescription must be a string",
            )?,
            error_details,
        })
    }

    // ── Serialization ──────────────────────────────────────

    /// Serialize this frame to its wire text.
    pub fn serialize(&self) -> String {
        let arr = match self {
            Self::Call {
                unique_id,
                action,
                payload,
            } => vec![
                Value::from(MSG_TYPE_CALL),
                Value::from(unique_id.as_str()),
                Value::from(action.as_str()),
                payload.clone(),
            ],
            Self::CallResult { unique_id, payload } => vec![
                Value::from(MSG_TYPE_CALL_RESULT),
                Value::from(unique_id.as_str()),
                payload.clone(),
            ],
            Self::CallError {
                unique_id,
                error_code,
                error_description,
                error_details,
            } => vec![
                Value::from(MSG_TYPE_CALL_ERROR),
                Value::from(unique_id.as_str()),
                Value::from(error_code.as_str()),
                Value::from(error_description.as_str()),
                error_details.clone(),
            ],
        };

        // A Value tree with string keys always serializes.
        Value::Array(arr).to_string()
    }

    // ── Helpers ────────────────────────────────────────────

    /// Get the unique message ID.
    pub fn unique_id(&self) -> &str {
        match self {
            Self::Call { unique_id, .. }
            | Self::CallResult { unique_id, .. }
            | Self::CallError { unique_id, .. } => unique_id,
        }
    }

    /// Wire label of the frame kind, used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Call { .. } => "call",
            Self::CallResult { .. } => "call_result",
            Self::CallError { .. } => "call_error",
        }
    }

    /// Create a `CallError` with empty details.
    pub fn error_response(
        unique_id: impl Into<String>,
        error_code: impl Into<String>,
        error_description: impl Into<String>,
    ) -> Self {
        Self::CallError {
            unique_id: unique_id.into(),
            error_code: error_code.into(),
            error_description: error_description.into(),
            error_details: Value::Object(Default::default()),
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(self, Self::Call { .. })
    }
}

// ── Error codes ────────────────────────────────────────────────

/// OCPP-J 1.6 CallError codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NotImplemented,
    NotSupported,
    InternalError,
    ProtocolError,
    SecurityError,
    FormationViolation,
    PropertyConstraintViolation,
    OccurenceConstraintViolation,
    TypeConstraintViolation,
    GenericError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotImplemented => "NotImplemented",
            Self::NotSupported => "NotSupported",
            Self::InternalError => "InternalError",
            Self::ProtocolError => "ProtocolError",
            Self::SecurityError => "SecurityError",
            Self::FormationViolation => "FormationViolation",
            Self::PropertyConstraintViolation => "PropertyConstraintViolation",
            Self::OccurenceConstraintViolation => "OccurenceConstraintViolation",
            Self::TypeConstraintViolation => "TypeConstraintViolation",
            Self::GenericError => "GenericError",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn expect_arity<const N: usize>(arr: Vec<Value>) -> Result<[Value; N], FrameError> {
    let got = arr.len();
    arr.try_into()
        .map_err(|_| FrameError::WrongArity { expected: N, got })
}

fn unique_id_of(value: Value) -> Result<String, FrameError> {
    match value {
        Value::String(id) if !id.is_empty() => Ok(id),
        Value::String(_) => Err(FrameError::EmptyUniqueId),
        _ => Err(FrameError::FieldTypeMismatch("uniqueId must be a string")),
    }
}

fn string_field(value: Value, what: &'static str) -> Result<String, FrameError> {
    match value {
        Value::String(s) => Ok(s),
        _ => Err(FrameError::FieldTypeMismatch(what)),
    }
}

// ── Errors ─────────────────────────────────────────────────────

/// Reasons a text frame is not a well-formed OCPP-J message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
    #[error("Message is not a JSON array")]
    NotAnArray,
    #[error("Empty OCPP message array")]
    EmptyArray,
    #[error("Message type is not a number")]
    InvalidMessageType,
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u64),
    #[error("Expected {expected} fields, got {got}")]
    WrongArity { expected: usize, got: usize },
    #[error("uniqueId must not be empty")]
    EmptyUniqueId,
    #[error("Field type mismatch: {0}")]
    FieldTypeMismatch(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_call() {
        let text = r#"[2,"abc123","BootNotification",{"chargePointVendor":"Vendor","chargePointModel":"Model"}]"#;
        match OcppFrame::parse(text).unwrap() {
            OcppFrame::Call {
                unique_id,
                action,
                payload,
            } => {
                assert_eq!(unique_id, "abc123");
                assert_eq!(action, "BootNotification");
                assert_eq!(payload["chargePointVendor"], "Vendor");
            }
            other => panic!("Expected Call frame, got {:?}", other),
        }
    }

    #[test]
    fn parse_heartbeat_call() {
        let frame = OcppFrame::parse(r#"[2,"123","Heartbeat",{}]"#).unwrap();
        assert_eq!(
            frame,
            OcppFrame::Call {
                unique_id: "123".into(),
                action: "Heartbeat".into(),
                payload: json!({}),
            }
        );
    }

    #[test]
    fn parse_call_error() {
        let text = r#"[4,"abc123","NotImplemented","Action not supported",{}]"#;
        match OcppFrame::parse(text).unwrap() {
            OcppFrame::CallError {
                unique_id,
                error_code,
                error_description,
                ..
            } => {
                assert_eq!(unique_id, "abc123");
                assert_eq!(error_code, "NotImplemented");
                assert_eq!(error_description, "Action not supported");
            }
            other => panic!("Expected CallError frame, got {:?}", other),
        }
    }

    #[test]
    fn rejects_non_array() {
        assert_eq!(
            OcppFrame::parse(r#"{"type":2}"#),
            Err(FrameError::NotAnArray)
        );
        assert!(matches!(
            OcppFrame::parse("not json"),
            Err(FrameError::InvalidJson(_))
        ));
    }

    #[test]
    fn rejects_unknown_type_tag() {
        assert_eq!(
            OcppFrame::parse(r#"[5,"id",{}]"#),
            Err(FrameError::UnknownMessageType(5))
        );
        assert_eq!(
            OcppFrame::parse(r#"["2","id","Heartbeat",{}]"#),
            Err(FrameError::InvalidMessageType)
        );
        assert_eq!(OcppFrame::parse("[]"), Err(FrameError::EmptyArray));
    }

    #[test]
    fn rejects_wrong_arity() {
        assert_eq!(
            OcppFrame::parse(r#"[2,"id","Heartbeat"]"#),
            Err(FrameError::WrongArity {
                expected: 4,
                got: 3
            })
        );
        assert_eq!(
            OcppFrame::parse(r#"[3,"id",{},{}]"#),
            Err(FrameError::WrongArity {
                expected: 3,
                got: 4
            })
        );
        assert_eq!(
            OcppFrame::parse(r#"[4,"id","GenericError","oops"]"#),
            Err(FrameError::WrongArity {
                expected: 5,
                got: 4
            })
        );
    }

    #[test]
    fn rejects_bad_unique_id() {
        assert_eq!(
            OcppFrame::parse(r#"[3,42,{}]"#),
            Err(FrameError::FieldTypeMismatch("uniqueId must be a string"))
        );
        assert_eq!(
            OcppFrame::parse(r#"[3,"",{}]"#),
            Err(FrameError::EmptyUniqueId)
        );
    }

    #[test]
    fn serializes_canonical_wire_form() {
        let call = OcppFrame::Call {
            unique_id: "id1".into(),
            action: "Heartbeat".into(),
            payload: json!({}),
        };
        assert_eq!(call.serialize(), r#"[2,"id1","Heartbeat",{}]"#);

        let error = OcppFrame::error_response("-1", "FormationViolation", "bad frame");
        assert_eq!(
            error.serialize(),
            r#"[4,"-1","FormationViolation","bad frame",{}]"#
        );
    }

    #[test]
    fn decode_inverts_encode() {
        let frames = [
            OcppFrame::Call {
                unique_id: "c".into(),
                action: "StartTransaction".into(),
                payload: json!({"connectorId": 1, "idTag": "TAG", "meterStart": 0}),
            },
            OcppFrame::CallResult {
                unique_id: "r".into(),
                payload: json!({"currentTime": "2024-01-01T00:00:00Z"}),
            },
            OcppFrame::CallError {
                unique_id: "e".into(),
                error_code: "InternalError".into(),
                error_description: "store down".into(),
                error_details: json!({"retry": true}),
            },
        ];
        for frame in frames {
            assert_eq!(OcppFrame::parse(&frame.serialize()).unwrap(), frame);
        }
    }
}
