/// JSON-RPC 2.0 payloads exchanged with the relay and between peers.
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::TransportError;

pub const JSONRPC_VERSION: &str = "2.0";

pub type RpcId = u64;

/// Per-process sequence mixed into generated ids.
static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Current time in milliseconds since UNIX epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Generate a payload id: milliseconds since epoch with three extra digits.
///
/// Ids generated in the same process never repeat unless more than a
/// thousand are requested within one millisecond.
pub fn payload_id() -> RpcId {
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed) % 1000;
    now_ms() * 1000 + seq
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest<T = Value> {
    pub id: RpcId,
    pub jsonrpc: String,
    pub method: String,
    pub params: T,
}

impl<T> JsonRpcRequest<T> {
    /// Build a request with a freshly generated id.
    pub fn new(method: impl Into<String>, params: T) -> Self {
        Self {
            id: payload_id(),
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResult<T = Value> {
    pub id: RpcId,
    pub jsonrpc: String,
    pub result: T,
}

impl<T> JsonRpcResult<T> {
    pub fn new(id: RpcId, result: T) -> Self {
        Self {
            id,
            jsonrpc: JSONRPC_VERSION.to_string(),
            result,
        }
    }
}

/// The `error` member of a JSON-RPC error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl ErrorPayload {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub id: RpcId,
    pub jsonrpc: String,
    pub error: ErrorPayload,
}

impl JsonRpcError {
    pub fn new(id: RpcId, error: ErrorPayload) -> Self {
        Self {
            id,
            jsonrpc: JSONRPC_VERSION.to_string(),
            error,
        }
    }
}

/// Any JSON-RPC payload, classified by its members.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonRpcPayload {
    Request(JsonRpcRequest),
    Result(JsonRpcResult),
    Error(JsonRpcError),
}

impl JsonRpcPayload {
    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self, TransportError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| TransportError::Deserialization(e.to_string()))?;
        Self::from_value(value)
    }

    /// Classify an already-parsed JSON value.
    ///
    /// `method` marks a request, `error` an error response, `result` a
    /// success response. Anything else is rejected.
    pub fn from_value(value: Value) -> Result<Self, TransportError> {
        let de = |e: serde_json::Error| TransportError::Deserialization(e.to_string());
        let Some(obj) = value.as_object() else {
            return Err(TransportError::Deserialization(
                "payload is not a JSON object".into(),
            ));
        };
        if obj.contains_key("method") {
            serde_json::from_value(value).map(JsonRpcPayload::Request).map_err(de)
        } else if obj.contains_key("error") {
            serde_json::from_value(value).map(JsonRpcPayload::Error).map_err(de)
        } else if obj.contains_key("result") {
            serde_json::from_value(value).map(JsonRpcPayload::Result).map_err(de)
        } else {
            Err(TransportError::Deserialization(
                "payload is neither a request nor a response".into(),
            ))
        }
    }

    pub fn id(&self) -> RpcId {
        match self {
            JsonRpcPayload::Request(r) => r.id,
            JsonRpcPayload::Result(r) => r.id,
            JsonRpcPayload::Error(r) => r.id,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, JsonRpcPayload::Request(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_request() {
        let text = r#"{"id":1,"jsonrpc":"2.0","method":"irn_subscribe","params":{"topic":"t"}}"#;
        let payload = JsonRpcPayload::parse(text).unwrap();
        match payload {
            JsonRpcPayload::Request(r) => {
                assert_eq!(r.method, "irn_subscribe");
                assert_eq!(r.params, json!({"topic": "t"}));
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn parse_result_and_error() {
        let ok = JsonRpcPayload::parse(r#"{"id":7,"jsonrpc":"2.0","result":true}"#).unwrap();
        assert_eq!(ok, JsonRpcPayload::Result(JsonRpcResult::new(7, json!(true))));

        let err = JsonRpcPayload::parse(
            r#"{"id":8,"jsonrpc":"2.0","error":{"code":5000,"message":"User rejected."}}"#,
        )
        .unwrap();
        assert_eq!(err.id(), 8);
        assert!(matches!(err, JsonRpcPayload::Error(e) if e.error.code == 5000));
    }

    #[test]
    fn null_result_is_still_a_response() {
        let payload = JsonRpcPayload::parse(r#"{"id":3,"jsonrpc":"2.0","result":null}"#).unwrap();
        assert!(matches!(payload, JsonRpcPayload::Result(_)));
    }

    #[test]
    fn reject_unclassifiable_payload() {
        assert!(JsonRpcPayload::parse(r#"{"id":1,"jsonrpc":"2.0"}"#).is_err());
        assert!(JsonRpcPayload::parse("[1,2,3]").is_err());
        assert!(JsonRpcPayload::parse("not json").is_err());
    }

    #[test]
    fn error_data_omitted_when_absent() {
        let text = serde_json::to_string(&ErrorPayload::new(1, "x")).unwrap();
        assert_eq!(text, r#"{"code":1,"message":"x"}"#);
    }

    #[test]
    fn payload_ids_are_unique_and_time_based() {
        let before = now_ms() * 1000;
        let ids: Vec<RpcId> = (0..100).map(|_| payload_id()).collect();
        let unique: std::collections::HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
        assert!(ids.iter().all(|id| *id >= before));
    }
}
