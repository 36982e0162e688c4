//! Shared test utilities: a wiremock-backed fake Odoo server and config
//! document helpers.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use odoo_mcp_bridge::cache::MetadataCache;
use odoo_mcp_bridge::odoo::descriptor::InstanceDescriptor;
use odoo_mcp_bridge::odoo::pool::ClientPool;
use odoo_mcp_bridge::odoo::store::{InstanceMap, InstanceStore};

pub const TEST_DB: &str = "test_db";

/// Fake Odoo speaking both wire surfaces.
pub struct MockOdoo {
    pub server: MockServer,
}

impl MockOdoo {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    fn json2_path(model: &str, method_name: &str) -> String {
        format!("/json/2/{TEST_DB}/{}/{}", model.replace('.', r"\."), method_name)
    }

    /// Mount a modern JSON-2 mock for one model method.
    pub async fn mock_json2(&self, model: &str, method_name: &str, response: Value) {
        Mock::given(method("POST"))
            .and(path_regex(Self::json2_path(model, method_name)))
            .respond_with(ResponseTemplate::new(200).set_body_json(response))
            .mount(&self.server)
            .await;
    }

    /// Mount a modern JSON-2 error with an arbitrary HTTP status.
    pub async fn mock_json2_error(&self, model: &str, method_name: &str, status: u16, msg: &str) {
        Mock::given(method("POST"))
            .and(path_regex(Self::json2_path(model, method_name)))
            .respond_with(
                ResponseTemplate::new(status)
                    .set_body_json(json!({ "error": { "message": msg } })),
            )
            .mount(&self.server)
            .await;
    }

    /// Mount the legacy authenticate answer (`common` service).
    pub async fn mock_legacy_auth(&self, uid: Value) {
        Mock::given(method("POST"))
            .and(path("/jsonrpc"))
            .and(body_partial_json(json!({"params": {"service": "common"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": uid
            })))
            .mount(&self.server)
            .await;
    }

    /// Mount a legacy `object.execute_kw` answer.
    pub async fn mock_legacy_execute(&self, result: Value) {
        Mock::given(method("POST"))
            .and(path("/jsonrpc"))
            .and(body_partial_json(json!({"params": {"service": "object"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": result
            })))
            .mount(&self.server)
            .await;
    }

    pub async fn received_request_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map(|r| r.len())
            .unwrap_or(0)
    }
}

pub fn modern_descriptor(url: &str) -> InstanceDescriptor {
    serde_json::from_value(json!({
        "url": url,
        "db": TEST_DB,
        "apiKey": "test_api_key",
        "timeout_ms": 5000,
        "max_retries": 2
    }))
    .unwrap()
}

pub fn legacy_descriptor(url: &str) -> InstanceDescriptor {
    serde_json::from_value(json!({
        "url": url,
        "db": TEST_DB,
        "username": "admin",
        "password": "admin",
        "version": "18",
        "timeout_ms": 5000,
        "max_retries": 2
    }))
    .unwrap()
}

/// Pool with a single instance named `default` (shared metadata cache).
pub fn pool_for(descriptor: InstanceDescriptor) -> ClientPool {
    pool_with_cache(descriptor, MetadataCache::default())
}

pub fn pool_with_cache(descriptor: InstanceDescriptor, cache: MetadataCache) -> ClientPool {
    let mut instances: InstanceMap = HashMap::new();
    instances.insert("default".to_string(), descriptor);
    ClientPool::new(Arc::new(InstanceStore::with_instances(instances)), cache)
}

pub fn minimal_tools_json() -> &'static str {
    r#"{
        "tools": [
            {
                "name": "odoo_search",
                "description": "Search Odoo records",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "instance": {"type": "string"},
                        "model": {"type": "string"},
                        "domain": {"type": "array"}
                    },
                    "required": ["instance", "model"]
                },
                "op": {
                    "type": "search",
                    "map": {
                        "instance": "/instance",
                        "model": "/model",
                        "domain": "/domain"
                    }
                }
            }
        ]
    }"#
}

pub fn minimal_prompts_json() -> &'static str {
    r#"{
        "prompts": [
            {
                "name": "test_prompt",
                "description": "A test prompt",
                "content": "This is test content"
            }
        ]
    }"#
}

pub fn minimal_server_json() -> &'static str {
    r#"{
        "serverName": "test-server",
        "instructions": "Test instructions",
        "protocolVersionDefault": "2025-11-05"
    }"#
}
