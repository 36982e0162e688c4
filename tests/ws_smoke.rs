//! WebSocket transport smoke test: initialize, list, call over one socket.

mod common;

use std::sync::Arc;

use common::{MockOdoo, minimal_prompts_json, minimal_server_json, minimal_tools_json, modern_descriptor, pool_for};
use futures::{SinkExt, StreamExt};
use odoo_mcp_bridge::mcp::{McpHandler, ws};
use odoo_mcp_bridge::registry::Registry;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

#[tokio::test]
async fn ws_round_trip_preserves_order() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("tools.json"), minimal_tools_json()).unwrap();
    std::fs::write(dir.path().join("prompts.json"), minimal_prompts_json()).unwrap();
    std::fs::write(dir.path().join("server.json"), minimal_server_json()).unwrap();

    let registry = Arc::new(Registry::with_paths(
        dir.path().join("tools.json"),
        dir.path().join("prompts.json"),
        dir.path().join("server.json"),
    ));
    registry.initial_load().await.unwrap();

    let mock = MockOdoo::start().await;
    mock.mock_json2("res.partner", "search", json!([1])).await;
    let pool = pool_for(modern_descriptor(&mock.uri()));
    let handler = Arc::new(McpHandler::new(pool, registry));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = ws::serve_listener(handler, listener).await;
    });

    let (mut socket, _) = connect_async(format!("ws://{addr}")).await.unwrap();

    socket
        .send(Message::Text(
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}})
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
    socket
        .send(Message::Text(
            json!({"jsonrpc": "2.0", "method": "initialized"}).to_string().into(),
        ))
        .await
        .unwrap();
    socket
        .send(Message::Text(
            json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}).to_string().into(),
        ))
        .await
        .unwrap();
    socket
        .send(Message::Text(
            json!({
                "jsonrpc": "2.0",
                "id": 3,
                "method": "tools/call",
                "params": {
                    "name": "odoo_search",
                    "arguments": {"instance": "default", "model": "res.partner"}
                }
            })
            .to_string()
            .into(),
        ))
        .await
        .unwrap();

    let mut responses: Vec<Value> = Vec::new();
    while responses.len() < 3 {
        match socket.next().await.expect("socket open").unwrap() {
            Message::Text(text) => {
                responses.push(serde_json::from_str(text.as_str()).unwrap());
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    // Responses arrive in request order; the notification got none.
    assert_eq!(responses[0]["id"], 1);
    assert!(responses[0]["result"]["serverInfo"].is_object());
    assert_eq!(responses[1]["id"], 2);
    assert_eq!(responses[1]["result"]["tools"][0]["name"], "odoo_search");
    assert_eq!(responses[2]["id"], 3);
    let text = responses[2]["result"]["content"][0]["text"].as_str().unwrap();
    let payload: Value = serde_json::from_str(text).unwrap();
    assert_eq!(payload["count"], 1);
}
