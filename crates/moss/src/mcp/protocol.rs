//! JSON-RPC 2.0 framing and the MCP message shapes moss relies on.
use serde::Deserialize;
use serde_json::{json, Value};

use crate::errors::McpError;

pub const JSONRPC_VERSION: &str = "2.0";
pub const PROTOCOL_VERSION: &str = "2025-03-26";
pub const CLIENT_NAME: &str = "moss-mcp-client";

pub const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<RemoteTool>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// A decoded inbound message.
#[derive(Debug, PartialEq)]
pub enum Incoming {
    Response {
        id: u64,
        result: Result<Value, (i64, String)>,
    },
    Request {
        id: Value,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
}

pub fn request(id: u64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "method": method,
        "params": params,
    })
}

pub fn notification(method: &str, params: Option<Value>) -> Value {
    let mut message = json!({
        "jsonrpc": JSONRPC_VERSION,
        "method": method,
    });
    if let Some(params) = params {
        message["params"] = params;
    }
    message
}

pub fn response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "result": result,
    })
}

pub fn error_response(id: Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "error": {"code": code, "message": message},
    })
}

pub fn classify(message: Value) -> Result<Incoming, McpError> {
    let mut object = match message {
        Value::Object(object) => object,
        other => {
            return Err(McpError::Protocol(format!(
                "expected a JSON-RPC object, got {other}"
            )))
        }
    };

    let params = object.remove("params").unwrap_or(Value::Null);
    match (object.remove("id"), object.remove("method")) {
        (Some(id), Some(Value::String(method))) => Ok(Incoming::Request { id, method, params }),
        (None, Some(Value::String(method))) => Ok(Incoming::Notification { method, params }),
        (Some(id), None) => {
            let id = id
                .as_u64()
                .or_else(|| id.as_str().and_then(|id| id.parse().ok()))
                .ok_or_else(|| McpError::Protocol(format!("unexpected response id {id}")))?;
            let result = match object.remove("error") {
                Some(error) => Err((
                    error.get("code").and_then(Value::as_i64).unwrap_or(0),
                    error
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error")
                        .to_string(),
                )),
                None => Ok(object.remove("result").unwrap_or(Value::Null)),
            };
            Ok(Incoming::Response { id, result })
        }
        _ => Err(McpError::Protocol(
            "message is neither a request, a notification nor a response".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(
            classify(json!({"jsonrpc": "2.0", "id": 3, "result": {"tools": []}})).unwrap(),
            Incoming::Response {
                id: 3,
                result: Ok(json!({"tools": []}))
            }
        );
        assert_eq!(
            classify(json!({"jsonrpc": "2.0", "id": "4", "error": {"code": -32602, "message": "bad"}}))
                .unwrap(),
            Incoming::Response {
                id: 4,
                result: Err((-32602, "bad".to_string()))
            }
        );
        assert_eq!(
            classify(json!({"jsonrpc": "2.0", "id": "srv-1", "method": "ping"})).unwrap(),
            Incoming::Request {
                id: json!("srv-1"),
                method: "ping".into(),
                params: Value::Null
            }
        );
        assert!(matches!(
            classify(json!({"jsonrpc": "2.0", "method": "notifications/tools/list_changed"})),
            Ok(Incoming::Notification { .. })
        ));
        assert!(classify(json!([1, 2])).is_err());
    }

    #[test]
    fn test_remote_tool_defaults() {
        let tool: RemoteTool = serde_json::from_value(json!({"name": "search"})).unwrap();
        assert_eq!(tool.description, None);
        assert_eq!(tool.input_schema["type"], "object");
    }
}
