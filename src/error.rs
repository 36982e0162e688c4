use crate::odoo::types::OdooError;

/// Unified error taxonomy surfaced to MCP clients as `{code, message}`.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Unknown or disabled tool: {0}")]
    ToolNotFound(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Odoo error: {0}")]
    Odoo(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Operation disabled: {0}")]
    OperationDisabled(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl ServerError {
    pub fn code(&self) -> i64 {
        match self {
            ServerError::Parse(_) => -32700,
            ServerError::InvalidRequest(_) => -32600,
            ServerError::MethodNotFound(_) | ServerError::ToolNotFound(_) => -32601,
            ServerError::InvalidArguments(_) => -32602,
            ServerError::Internal(_) => -32603,
            ServerError::Odoo(_) => -32000,
            ServerError::Authentication(_) => -32001,
            ServerError::AccessDenied(_) => -32002,
            ServerError::OperationDisabled(_) => -32003,
            ServerError::Timeout(_) => -32004,
            ServerError::Transport(_) => -32005,
        }
    }

    pub fn invalid_arguments(msg: impl Into<String>) -> Self {
        ServerError::InvalidArguments(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ServerError::Internal(msg.into())
    }
}

impl From<OdooError> for ServerError {
    fn from(e: OdooError) -> Self {
        match e {
            OdooError::Transport(m) => ServerError::Transport(m),
            OdooError::Timeout(m) => ServerError::Timeout(m),
            OdooError::Auth(m) => ServerError::Authentication(m),
            OdooError::AccessDenied(m) => ServerError::AccessDenied(m),
            api @ OdooError::Api { .. } => ServerError::Odoo(api.to_string()),
            OdooError::InvalidResponse(m) => ServerError::Internal(m),
        }
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
