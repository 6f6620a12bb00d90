//! JSON-RPC 2.0 envelope

use serde::{Deserialize, Serialize};

use crate::error::error_codes;

pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub params: serde_json::Value,
    /// Absent for notifications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
}

impl Request {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: Some(id.into()),
        }
    }

    pub fn notification(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params: serde_json::Value::Null,
            id: None,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Request ID (can be string or number)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId::Number(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        RequestId::String(id.to_string())
    }
}

/// JSON-RPC response; exactly one of `result` or `error` is on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    #[serde(flatten)]
    pub payload: ResponsePayload,
    /// `null` when the request id could not be determined
    pub id: Option<RequestId>,
}

/// Outcome carried by a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponsePayload {
    #[serde(rename = "result")]
    Result(serde_json::Value),
    #[serde(rename = "error")]
    Error(RpcError),
}

/// JSON-RPC error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

impl Response {
    pub fn success(id: Option<RequestId>, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            payload: ResponsePayload::Result(result),
            id,
        }
    }

    pub fn error(id: Option<RequestId>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            payload: ResponsePayload::Error(RpcError::new(code, message)),
            id,
        }
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::error(None, error_codes::PARSE_ERROR, message)
    }

    pub fn result(&self) -> Option<&serde_json::Value> {
        match &self.payload {
            ResponsePayload::Result(value) => Some(value),
            ResponsePayload::Error(_) => None,
        }
    }

    pub fn rpc_error(&self) -> Option<&RpcError> {
        match &self.payload {
            ResponsePayload::Error(err) => Some(err),
            ResponsePayload::Result(_) => None,
        }
    }

    pub fn into_result(self) -> Result<serde_json::Value, RpcError> {
        match self.payload {
            ResponsePayload::Result(value) => Ok(value),
            ResponsePayload::Error(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_has_result_only() {
        let wire = serde_json::to_value(Response::success(Some(1.into()), json!({"ok": true}))).unwrap();
        assert_eq!(wire["jsonrpc"], "2.0");
        assert_eq!(wire["result"]["ok"], true);
        assert!(wire.get("error").is_none());
        assert_eq!(wire["id"], 1);
    }

    #[test]
    fn test_error_has_error_only_and_null_id() {
        let wire = serde_json::to_value(Response::parse_error("bad json")).unwrap();
        assert_eq!(wire["error"]["code"], -32700);
        assert!(wire.get("result").is_none());
        assert!(wire["id"].is_null());
    }

    #[test]
    fn test_response_parses_either_shape() {
        let ok: Response =
            serde_json::from_value(json!({"jsonrpc": "2.0", "result": [], "id": "a"})).unwrap();
        assert_eq!(ok.result(), Some(&json!([])));
        let err: Response = serde_json::from_value(
            json!({"jsonrpc": "2.0", "error": {"code": -32601, "message": "nope"}, "id": 3}),
        )
        .unwrap();
        assert_eq!(err.rpc_error().unwrap().code, -32601);
    }

    #[test]
    fn test_request_without_id_is_notification() {
        let req: Request =
            serde_json::from_value(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
                .unwrap();
        assert!(req.is_notification());
        assert!(req.params.is_null());
    }
}
