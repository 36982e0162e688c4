pub mod http;
pub mod protocol;
pub mod resources;
pub mod stdio;
pub mod ws;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::{Value, json};

use crate::error::{ServerError, ServerResult};
use crate::odoo::pool::ClientPool;
use crate::ops;
use crate::registry::Registry;

use protocol::{RpcRequest, error_response, error_response_null_id, success_response};

/// Stateless MCP method surface shared by every transport. All mutable
/// state lives in the process singletons (registry snapshot, pool, cache);
/// the handler just glues them together.
#[derive(Clone)]
pub struct McpHandler {
    pool: ClientPool,
    registry: Arc<Registry>,
}

impl McpHandler {
    pub fn new(pool: ClientPool, registry: Arc<Registry>) -> Self {
        Self { pool, registry }
    }

    pub async fn instance_names(&self) -> Vec<String> {
        self.pool.instance_names().await
    }

    /// The `initialize` result: negotiated protocol version, capability set,
    /// server info and instructions from the current snapshot.
    pub async fn initialize_result(&self, params: &Value) -> (Value, String) {
        let snapshot = self.registry.snapshot().await;
        let protocol_version = params
            .get("protocolVersion")
            .and_then(|v| v.as_str())
            .unwrap_or(snapshot.server.protocol_version_default())
            .to_string();
        let instances = self.instance_names().await;

        let result = json!({
            "protocolVersion": protocol_version,
            "capabilities": {
                "tools": { "listChanged": true },
                "prompts": { "listChanged": true },
                "resources": {},
                "experimental": {
                    "odooInstances": { "available": instances }
                }
            },
            "serverInfo": {
                "name": snapshot.server.server_name(),
                "version": env!("CARGO_PKG_VERSION")
            },
            "instructions": snapshot.server.instructions()
        });
        (result, protocol_version)
    }

    /// Route one MCP method. The snapshot is taken once per call; a reload
    /// published mid-flight does not affect this invocation.
    pub async fn dispatch(&self, method: &str, params: Option<Value>) -> ServerResult<Value> {
        match method {
            "ping" => Ok(json!({})),
            "tools/list" => {
                let snapshot = self.registry.snapshot().await;
                let tools: Vec<Value> = snapshot
                    .visible_tools()
                    .into_iter()
                    .map(|t| {
                        json!({
                            "name": t.name,
                            "description": t.description,
                            "inputSchema": t.input_schema
                        })
                    })
                    .collect();
                Ok(json!({ "tools": tools }))
            }
            "tools/call" => {
                let params = params
                    .ok_or_else(|| ServerError::invalid_arguments("missing params for tools/call"))?;
                let name = params
                    .get("name")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| ServerError::invalid_arguments("tools/call missing 'name'"))?;
                let args = params
                    .get("arguments")
                    .cloned()
                    .unwrap_or_else(|| json!({}));

                let snapshot = self.registry.snapshot().await;
                let Some(tool) = snapshot.tool(name) else {
                    return Err(ServerError::ToolNotFound(name.to_string()));
                };
                ops::call_tool(&self.pool, tool, args).await
            }
            "prompts/list" => {
                let snapshot = self.registry.snapshot().await;
                let prompts: Vec<Value> = snapshot
                    .prompts()
                    .iter()
                    .map(|p| json!({ "name": p.name, "description": p.description }))
                    .collect();
                Ok(json!({ "prompts": prompts }))
            }
            "prompts/get" => {
                let params = params
                    .ok_or_else(|| ServerError::invalid_arguments("missing params for prompts/get"))?;
                let name = params
                    .get("name")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| ServerError::invalid_arguments("prompts/get missing 'name'"))?;
                let snapshot = self.registry.snapshot().await;
                let prompt = snapshot.prompt(name).ok_or_else(|| {
                    ServerError::invalid_arguments(format!("unknown prompt: {name}"))
                })?;
                Ok(json!({
                    "description": prompt.description,
                    "messages": [{
                        "role": "user",
                        "content": { "type": "text", "text": prompt.content }
                    }]
                }))
            }
            "resources/list" => resources::list_resources(&self.pool).await,
            "resources/read" => {
                let params = params.ok_or_else(|| {
                    ServerError::invalid_arguments("missing params for resources/read")
                })?;
                let uri = params
                    .get("uri")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| ServerError::invalid_arguments("resources/read missing 'uri'"))?;
                resources::read_resource(&self.pool, uri).await
            }
            other => Err(ServerError::MethodNotFound(other.to_string())),
        }
    }
}

/// Per-connection session: initialize gating plus in-order frame handling.
/// Transports feed frames sequentially, which preserves request → response
/// ordering within the connection.
pub struct McpSession {
    handler: Arc<McpHandler>,
    initialized: AtomicBool,
    exited: AtomicBool,
}

impl McpSession {
    pub fn new(handler: Arc<McpHandler>) -> Self {
        Self {
            handler,
            initialized: AtomicBool::new(false),
            exited: AtomicBool::new(false),
        }
    }

    pub fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::SeqCst);
    }

    pub fn exit_requested(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    /// Handle one raw frame. Requests produce a response; notifications and
    /// unparseable notifications produce `None`.
    pub async fn handle_frame(&self, raw: &str) -> Option<Value> {
        match protocol::parse_frame(raw) {
            Ok(req) => self.handle_request(req).await,
            Err(e) => Some(error_response_null_id(&e)),
        }
    }

    pub async fn handle_request(&self, req: RpcRequest) -> Option<Value> {
        if req.is_notification() {
            match req.method.as_str() {
                "initialized" | "notifications/initialized" => self.mark_initialized(),
                "exit" => self.exited.store(true, Ordering::SeqCst),
                _ => {}
            }
            return None;
        }
        let id = req.id.clone().unwrap_or(Value::Null);

        match req.method.as_str() {
            "initialize" => {
                let params = req.params.unwrap_or_else(|| json!({}));
                let (result, _) = self.handler.initialize_result(&params).await;
                Some(success_response(id, result))
            }
            "shutdown" => Some(success_response(id, Value::Null)),
            method => {
                // Listing methods are allowed pre-initialize; some clients
                // list before sending the initialized notification.
                let allowed_uninitialized = matches!(
                    method,
                    "ping" | "tools/list" | "prompts/list" | "resources/list"
                );
                if !self.initialized.load(Ordering::SeqCst) && !allowed_uninitialized {
                    let err = ServerError::InvalidRequest("server not initialized".to_string());
                    return Some(error_response(id, &err));
                }
                match self.handler.dispatch(method, req.params).await {
                    Ok(result) => Some(success_response(id, result)),
                    Err(e) => Some(error_response(id, &e)),
                }
            }
        }
    }
}
