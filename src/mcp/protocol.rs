//! Plain JSON-RPC 2.0 envelope types for the MCP surface. Requests carry an
//! `id`; notifications do not and never get a response.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::ServerError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

fn default_jsonrpc() -> String {
    "2.0".to_string()
}

impl RpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Parse one incoming frame. A frame that is not an object with a string
/// `method` is an invalid request; unparseable bytes are a parse error.
pub fn parse_frame(raw: &str) -> Result<RpcRequest, ServerError> {
    let v: Value = serde_json::from_str(raw).map_err(|e| ServerError::Parse(e.to_string()))?;
    parse_value(v)
}

pub fn parse_value(v: Value) -> Result<RpcRequest, ServerError> {
    if !v.is_object() {
        return Err(ServerError::InvalidRequest(
            "expected a JSON-RPC object".to_string(),
        ));
    }
    if v.get("method").and_then(|m| m.as_str()).is_none() {
        return Err(ServerError::InvalidRequest(
            "missing 'method'".to_string(),
        ));
    }
    serde_json::from_value(v).map_err(|e| ServerError::InvalidRequest(e.to_string()))
}

pub fn success_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

pub fn error_response(id: Value, error: &ServerError) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": error.code(),
            "message": error.to_string()
        }
    })
}

/// Error for frames whose id never materialized (parse failures).
pub fn error_response_null_id(error: &ServerError) -> Value {
    error_response(Value::Null, error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request_and_notification() {
        let req = parse_frame(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).unwrap();
        assert_eq!(req.method, "ping");
        assert!(!req.is_notification());

        let notif = parse_frame(r#"{"jsonrpc":"2.0","method":"initialized"}"#).unwrap();
        assert!(notif.is_notification());
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let err = parse_frame("{nope").unwrap_err();
        assert_eq!(err.code(), -32700);
    }

    #[test]
    fn missing_method_is_invalid_request() {
        let err = parse_frame(r#"{"jsonrpc":"2.0","id":1}"#).unwrap_err();
        assert_eq!(err.code(), -32600);
        let err = parse_frame(r#"[1,2]"#).unwrap_err();
        assert_eq!(err.code(), -32600);
    }

    #[test]
    fn responses_carry_code_and_id() {
        let ok = success_response(json!(7), json!({"pong": true}));
        assert_eq!(ok["id"], 7);
        assert_eq!(ok["result"]["pong"], true);

        let err = error_response(json!("abc"), &ServerError::ToolNotFound("x".into()));
        assert_eq!(err["id"], "abc");
        assert_eq!(err["error"]["code"], -32601);
    }

    #[test]
    fn string_and_number_ids_round_trip() {
        let req = parse_frame(r#"{"id":"req-1","method":"tools/list"}"#).unwrap();
        assert_eq!(req.id, Some(json!("req-1")));
    }
}
