use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::operation::Operation;

/// JSON-RPC protocol version
pub const JSON_RPC_VERSION: &str = "2.0";

/// Error code a management endpoint answers with until the connection authenticates
pub const AUTHENTICATION_REQUIRED: i32 = -32001;

/// Error code used to fail requests still pending when the connection closes
pub const CONNECTION_CLOSED: i32 = -32099;

/// Any line read from a management connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    /// Sent by the runner
    Request(JsonRpcRequest),
    /// Answer to one of the runner's requests
    Response(JsonRpcResponse),
    /// Unsolicited event pushed by the server; ignored
    Notification(JsonRpcNotification),
}

/// Request line; `method` is `execute` or `authenticate`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    /// String or number; responses are matched on it
    pub id: Value,
    pub method: String,
    /// The operation object, or the credentials
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSON_RPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Request running `operation` on the server
    pub fn execute(id: impl Into<Value>, operation: &Operation) -> Self {
        Self::new(id, "execute", Some(operation.to_value()))
    }

    /// Request logging the connection in
    pub fn authenticate(id: impl Into<Value>, username: &str, password: &str) -> Self {
        let params = serde_json::json!({
            "username": username,
            "password": password
        });
        Self::new(id, "authenticate", Some(params))
    }
}

/// Server push without an id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Protocol-level failure. Failed operations are not errors; they come
/// back as a result with a `failed` outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// See [`AUTHENTICATION_REQUIRED`] and [`CONNECTION_CLOSED`]
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// Response line carrying an operation result or an error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC protocol version
    pub jsonrpc: String,
    /// Id of the request answered; null when the connection closed
    pub id: Value,
    /// Serialized operation result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: impl Into<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSON_RPC_VERSION.to_string(),
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    pub fn error(
        id: impl Into<Value>,
        code: i32,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        Self {
            jsonrpc: JSON_RPC_VERSION.to_string(),
            id: id.into(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data,
            }),
        }
    }

    /// Whether a result arrived without an error
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.result.is_some()
    }
}

/// Render a request or response id as the key used to correlate them.
pub(crate) fn id_key(id: &Value) -> Option<String> {
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
