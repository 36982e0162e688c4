//! Dispatcher tests: JSON-pointer extraction into typed requests, handler
//! result shapes, the metadata cache, and the batch cap.

mod common;

use std::collections::HashMap;
use std::time::Duration;

use common::{MockOdoo, modern_descriptor, pool_with_cache};
use odoo_mcp_bridge::cache::MetadataCache;
use odoo_mcp_bridge::ops;
use odoo_mcp_bridge::registry::OpSpec;
use serde_json::{Value, json};

fn op(kind: &str, entries: &[(&str, &str)]) -> OpSpec {
    OpSpec {
        kind: kind.to_string(),
        map: entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

fn standard_map<'a>() -> Vec<(&'a str, &'a str)> {
    vec![
        ("instance", "/instance"),
        ("model", "/model"),
        ("domain", "/domain"),
        ("ids", "/ids"),
        ("values", "/values"),
        ("records", "/records"),
        ("limit", "/limit"),
    ]
}

/// Unpack the single text content block back into JSON.
fn result_payload(v: &Value) -> Value {
    let text = v["content"][0]["text"].as_str().expect("text block");
    serde_json::from_str(text).expect("payload is JSON")
}

#[tokio::test]
async fn count_result_shape() {
    let mock = MockOdoo::start().await;
    mock.mock_json2("res.partner", "search_count", json!(42)).await;
    let pool = pool_with_cache(modern_descriptor(&mock.uri()), MetadataCache::default());

    let result = ops::execute_op(
        &pool,
        &op("search_count", &standard_map()),
        json!({"instance": "default", "model": "res.partner", "domain": [["id", ">", 0]]}),
    )
    .await
    .unwrap();
    assert_eq!(result_payload(&result), json!({"count": 42}));
}

#[tokio::test]
async fn search_result_shape() {
    let mock = MockOdoo::start().await;
    mock.mock_json2("res.partner", "search", json!([4, 5])).await;
    let pool = pool_with_cache(modern_descriptor(&mock.uri()), MetadataCache::default());

    let result = ops::execute_op(
        &pool,
        &op("search", &standard_map()),
        json!({"instance": "default", "model": "res.partner"}),
    )
    .await
    .unwrap();
    assert_eq!(result_payload(&result), json!({"ids": [4, 5], "count": 2}));
}

#[tokio::test]
async fn create_result_shape() {
    let mock = MockOdoo::start().await;
    mock.mock_json2("res.partner", "create", json!([99])).await;
    let pool = pool_with_cache(modern_descriptor(&mock.uri()), MetadataCache::default());

    let result = ops::execute_op(
        &pool,
        &op("create", &standard_map()),
        json!({"instance": "default", "model": "res.partner", "values": {"name": "A"}}),
    )
    .await
    .unwrap();
    assert_eq!(result_payload(&result), json!({"id": 99, "success": true}));
}

#[tokio::test]
async fn missing_required_pointer_is_invalid_arguments() {
    let mock = MockOdoo::start().await;
    let pool = pool_with_cache(modern_descriptor(&mock.uri()), MetadataCache::default());

    let err = ops::execute_op(
        &pool,
        &op("search", &standard_map()),
        json!({"instance": "default"}),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), -32602);
    assert_eq!(mock.received_request_count().await, 0);
}

#[tokio::test]
async fn create_batch_caps_at_one_hundred() {
    let mock = MockOdoo::start().await;
    mock.mock_json2("res.partner", "create", json!([1])).await;
    let pool = pool_with_cache(modern_descriptor(&mock.uri()), MetadataCache::default());

    let records: Vec<Value> = (0..101).map(|i| json!({"name": format!("p{i}")})).collect();
    let err = ops::execute_op(
        &pool,
        &op("create_batch", &standard_map()),
        json!({"instance": "default", "model": "res.partner", "records": records}),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), -32602);
    assert_eq!(mock.received_request_count().await, 0);
}

#[tokio::test]
async fn create_batch_creates_each_record() {
    let mock = MockOdoo::start().await;
    mock.mock_json2("res.partner", "create", json!([7])).await;
    let pool = pool_with_cache(modern_descriptor(&mock.uri()), MetadataCache::default());

    let result = ops::execute_op(
        &pool,
        &op("create_batch", &standard_map()),
        json!({
            "instance": "default",
            "model": "res.partner",
            "records": [{"name": "a"}, {"name": "b"}, {"name": "c"}]
        }),
    )
    .await
    .unwrap();
    let payload = result_payload(&result);
    assert_eq!(payload["created_count"], 3);
    assert_eq!(mock.received_request_count().await, 3);
}

#[tokio::test]
async fn metadata_is_cached_within_ttl() {
    let mock = MockOdoo::start().await;
    mock.mock_json2("res.partner", "fields_get", json!({"name": {"type": "char"}}))
        .await;
    mock.mock_json2("ir.model", "search_read", json!([{"name": "Contact", "model": "res.partner"}]))
        .await;
    let pool = pool_with_cache(
        modern_descriptor(&mock.uri()),
        MetadataCache::with_ttl(Duration::from_secs(300)),
    );

    let op_spec = op(
        "get_model_metadata",
        &[("instance", "/instance"), ("model", "/model")],
    );
    let args = json!({"instance": "default", "model": "res.partner"});

    let first = ops::execute_op(&pool, &op_spec, args.clone()).await.unwrap();
    let calls_after_first = mock.received_request_count().await;
    let second = ops::execute_op(&pool, &op_spec, args).await.unwrap();

    assert_eq!(result_payload(&first), result_payload(&second));
    assert_eq!(
        result_payload(&first)["model"]["description"],
        json!("Contact")
    );
    // The second call is served from cache: no further upstream requests.
    assert_eq!(mock.received_request_count().await, calls_after_first);
}

#[tokio::test]
async fn metadata_refetched_after_ttl_expiry() {
    let mock = MockOdoo::start().await;
    mock.mock_json2("res.partner", "fields_get", json!({})).await;
    mock.mock_json2("ir.model", "search_read", json!([])).await;
    let pool = pool_with_cache(
        modern_descriptor(&mock.uri()),
        MetadataCache::with_ttl(Duration::from_millis(20)),
    );

    let op_spec = op(
        "get_model_metadata",
        &[("instance", "/instance"), ("model", "/model")],
    );
    let args = json!({"instance": "default", "model": "res.partner"});

    ops::execute_op(&pool, &op_spec, args.clone()).await.unwrap();
    let after_first = mock.received_request_count().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    ops::execute_op(&pool, &op_spec, args).await.unwrap();

    assert!(mock.received_request_count().await > after_first);
}

#[tokio::test]
async fn cleanup_is_disabled_without_the_guard_env() {
    let mock = MockOdoo::start().await;
    let pool = pool_with_cache(modern_descriptor(&mock.uri()), MetadataCache::default());

    // The guard env var is absent in this test binary.
    let err = ops::execute_op(
        &pool,
        &op("database_cleanup", &[("instance", "/instance")]),
        json!({"instance": "default"}),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), -32003);
    assert_eq!(mock.received_request_count().await, 0);
}

#[tokio::test]
async fn check_access_result_shape() {
    let mock = MockOdoo::start().await;
    mock.mock_json2("res.partner", "check_access_rights", json!(true))
        .await;
    let pool = pool_with_cache(modern_descriptor(&mock.uri()), MetadataCache::default());

    let result = ops::execute_op(
        &pool,
        &op(
            "check_access",
            &[
                ("instance", "/instance"),
                ("model", "/model"),
                ("operation", "/operation"),
            ],
        ),
        json!({"instance": "default", "model": "res.partner", "operation": "write"}),
    )
    .await
    .unwrap();
    assert_eq!(
        result_payload(&result),
        json!({"allowed": true, "operation": "write"})
    );
}

#[tokio::test]
async fn list_models_result_shape() {
    let mock = MockOdoo::start().await;
    mock.mock_json2(
        "ir.model",
        "search_read",
        json!([
            {"model": "res.partner", "name": "Contact"},
            {"model": "sale.order", "name": "Sales Order"}
        ]),
    )
    .await;
    let pool = pool_with_cache(modern_descriptor(&mock.uri()), MetadataCache::default());

    let result = ops::execute_op(
        &pool,
        &op("list_models", &[("instance", "/instance")]),
        json!({"instance": "default"}),
    )
    .await
    .unwrap();
    let payload = result_payload(&result);
    assert_eq!(payload["count"], 2);
    assert_eq!(payload["records"][0]["model"], "res.partner");
}

#[tokio::test]
async fn workflow_action_reports_executed_ids() {
    let mock = MockOdoo::start().await;
    mock.mock_json2("sale.order", "action_confirm", json!(true)).await;
    let pool = pool_with_cache(modern_descriptor(&mock.uri()), MetadataCache::default());

    let result = ops::execute_op(
        &pool,
        &op(
            "workflow_action",
            &[
                ("instance", "/instance"),
                ("model", "/model"),
                ("ids", "/ids"),
                ("action", "/action"),
            ],
        ),
        json!({"instance": "default", "model": "sale.order", "ids": [3, 4], "action": "action_confirm"}),
    )
    .await
    .unwrap();
    let payload = result_payload(&result);
    assert_eq!(payload["executed_on"], json!([3, 4]));
}

#[tokio::test]
async fn unknown_instance_is_reported_with_alternatives() {
    let mock = MockOdoo::start().await;
    let pool = pool_with_cache(modern_descriptor(&mock.uri()), MetadataCache::default());

    let err = ops::execute_op(
        &pool,
        &op("search", &standard_map()),
        json!({"instance": "missing", "model": "res.partner"}),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), -32602);
    assert!(err.to_string().contains("default"));
}

#[tokio::test]
async fn onchange_result_passes_value_and_warning_through() {
    let mock = MockOdoo::start().await;
    mock.mock_json2(
        "sale.order",
        "onchange",
        json!({"value": {"amount_total": 10}, "warning": {"title": "Careful"}}),
    )
    .await;
    let pool = pool_with_cache(modern_descriptor(&mock.uri()), MetadataCache::default());

    let map: HashMap<String, String> = [
        ("instance", "/instance"),
        ("model", "/model"),
        ("ids", "/ids"),
        ("values", "/values"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    let result = ops::execute_op(
        &pool,
        &OpSpec {
            kind: "onchange".to_string(),
            map,
        },
        json!({"instance": "default", "model": "sale.order", "ids": [], "values": {}}),
    )
    .await
    .unwrap();
    let payload = result_payload(&result);
    assert_eq!(payload["value"]["amount_total"], 10);
    assert_eq!(payload["warning"]["title"], "Careful");
}
