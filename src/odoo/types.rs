use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Structured error payload Odoo attaches to failed calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OdooErrorBody {
    pub name: Option<String>,
    pub message: Option<String>,
    #[serde(default)]
    pub arguments: Vec<Value>,
    #[serde(default)]
    pub context: Value,
    pub debug: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum OdooError {
    /// Network-layer fault (connect, read, TLS) surfaced after the retry budget.
    #[error("transport error: {0}")]
    Transport(String),

    /// Per-attempt timeout reached.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Login failure or missing/rejected credential.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Odoo refused the operation for the authenticated user.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Application-level error returned by Odoo.
    #[error("Odoo API error (status {status}): {message}")]
    Api {
        status: u16,
        message: String,
        body: Option<OdooErrorBody>,
    },

    /// The HTTP exchange succeeded but the payload was not what we expect.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl OdooError {
    /// Transient faults are retried inside the client; everything else
    /// surfaces immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            OdooError::Transport(_) | OdooError::Timeout(_) => true,
            OdooError::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    pub fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            OdooError::Timeout(e.to_string())
        } else {
            OdooError::Transport(e.to_string())
        }
    }

    /// Classify a non-2xx HTTP response from either Odoo surface.
    pub fn from_http_status(status: u16, raw_body: &str) -> Self {
        let body = parse_error_body(raw_body);
        let message = body
            .as_ref()
            .and_then(|b| b.message.clone())
            .unwrap_or_else(|| raw_body.to_string());
        match status {
            401 => OdooError::Auth(message),
            403 => OdooError::AccessDenied(message),
            _ => OdooError::Api {
                status,
                message,
                body,
            },
        }
    }

    /// Classify the `error` object of a JSON-RPC 2.0 envelope.
    pub fn from_jsonrpc_error(error: &Value) -> Self {
        let name = error
            .pointer("/data/name")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let message = error
            .pointer("/data/message")
            .and_then(|v| v.as_str())
            .or_else(|| error.get("message").and_then(|v| v.as_str()))
            .unwrap_or("Unknown JSON-RPC error")
            .to_string();

        if name.ends_with("AccessDenied") || message.contains("Session expired") {
            OdooError::Auth(message)
        } else if name.ends_with("AccessError") {
            OdooError::AccessDenied(message)
        } else {
            OdooError::Api {
                status: 400,
                message,
                body: None,
            }
        }
    }
}

/// Odoo wraps error payloads either directly or under an `error` key.
fn parse_error_body(raw: &str) -> Option<OdooErrorBody> {
    let v: Value = serde_json::from_str(raw).ok()?;
    let inner = v.get("error").cloned().unwrap_or(v);
    serde_json::from_value(inner).ok()
}

pub type OdooResult<T> = Result<T, OdooError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn api_error_display_contains_status_and_message() {
        let err = OdooError::Api {
            status: 500,
            message: "Internal Server Error".to_string(),
            body: None,
        };
        let display = err.to_string();
        assert!(display.contains("500"));
        assert!(display.contains("Internal Server Error"));
    }

    #[test]
    fn transient_classification() {
        assert!(OdooError::Timeout("t".into()).is_transient());
        assert!(OdooError::Transport("t".into()).is_transient());
        assert!(
            OdooError::Api {
                status: 503,
                message: String::new(),
                body: None
            }
            .is_transient()
        );
        assert!(
            OdooError::Api {
                status: 429,
                message: String::new(),
                body: None
            }
            .is_transient()
        );
        assert!(
            !OdooError::Api {
                status: 400,
                message: String::new(),
                body: None
            }
            .is_transient()
        );
        assert!(!OdooError::Auth("bad".into()).is_transient());
    }

    #[test]
    fn http_status_401_maps_to_auth() {
        let err = OdooError::from_http_status(401, r#"{"error":{"message":"Bad key"}}"#);
        assert!(matches!(err, OdooError::Auth(m) if m == "Bad key"));
    }

    #[test]
    fn http_status_403_maps_to_access_denied() {
        let err = OdooError::from_http_status(403, "forbidden");
        assert!(matches!(err, OdooError::AccessDenied(_)));
    }

    #[test]
    fn jsonrpc_access_denied_maps_to_auth() {
        let error = json!({
            "code": 200,
            "message": "Odoo Server Error",
            "data": {
                "name": "odoo.exceptions.AccessDenied",
                "message": "Access Denied"
            }
        });
        let err = OdooError::from_jsonrpc_error(&error);
        assert!(matches!(err, OdooError::Auth(_)));
    }

    #[test]
    fn jsonrpc_access_error_maps_to_access_denied() {
        let error = json!({
            "data": {
                "name": "odoo.exceptions.AccessError",
                "message": "Not allowed"
            }
        });
        let err = OdooError::from_jsonrpc_error(&error);
        assert!(matches!(err, OdooError::AccessDenied(m) if m == "Not allowed"));
    }

    #[test]
    fn error_body_deserialize() {
        let json = r#"{
            "name": "odoo.exceptions.ValidationError",
            "message": "Invalid value",
            "arguments": ["x", 1],
            "debug": "traceback"
        }"#;
        let body: OdooErrorBody = serde_json::from_str(json).unwrap();
        assert_eq!(body.name.as_deref(), Some("odoo.exceptions.ValidationError"));
        assert_eq!(body.arguments.len(), 2);
    }
}
