//! Integration tests for the modern JSON-2 client against a mock server.

mod common;

use common::{MockOdoo, modern_descriptor};
use odoo_mcp_bridge::odoo::client::OdooClient;
use odoo_mcp_bridge::odoo::types::OdooError;
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, ResponseTemplate};

async fn client_for(mock: &MockOdoo) -> OdooClient {
    OdooClient::connect(&modern_descriptor(&mock.uri())).unwrap()
}

#[tokio::test]
async fn search_returns_ids() {
    let mock = MockOdoo::start().await;
    mock.mock_json2("res.partner", "search", json!([1, 2, 3]))
        .await;

    let client = client_for(&mock).await;
    let ids = client
        .search("res.partner", Some(json!([["active", "=", true]])), Some(10), None, None, None)
        .await
        .unwrap();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[tokio::test]
async fn request_carries_bearer_and_positional_args() {
    let mock = MockOdoo::start().await;
    Mock::given(method("POST"))
        .and(path("/json/2/test_db/res.partner/search_count"))
        .and(header("Authorization", "Bearer test_api_key"))
        .and(wiremock::matchers::body_partial_json(json!({
            "args": [[["id", ">", 0]]]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(7)))
        .mount(&mock.server)
        .await;

    let client = client_for(&mock).await;
    let count = client
        .search_count("res.partner", Some(json!([["id", ">", 0]])), None)
        .await
        .unwrap();
    assert_eq!(count, 7);
}

#[tokio::test]
async fn create_accepts_wrapped_id_array() {
    let mock = MockOdoo::start().await;
    mock.mock_json2("res.partner", "create", json!([42])).await;

    let client = client_for(&mock).await;
    let id = client
        .create("res.partner", json!({"name": "New"}), None)
        .await
        .unwrap();
    assert_eq!(id, 42);
}

#[tokio::test]
async fn result_envelope_is_unwrapped() {
    let mock = MockOdoo::start().await;
    mock.mock_json2("res.partner", "search_count", json!({"result": 5}))
        .await;

    let client = client_for(&mock).await;
    let count = client.search_count("res.partner", None, None).await.unwrap();
    assert_eq!(count, 5);
}

#[tokio::test]
async fn write_and_unlink_return_booleans() {
    let mock = MockOdoo::start().await;
    mock.mock_json2("res.partner", "write", json!(true)).await;
    mock.mock_json2("res.partner", "unlink", json!(true)).await;

    let client = client_for(&mock).await;
    assert!(
        client
            .write("res.partner", vec![1], json!({"name": "x"}), None)
            .await
            .unwrap()
    );
    assert!(client.unlink("res.partner", vec![1], None).await.unwrap());
}

#[tokio::test]
async fn retry_budget_two_failures_then_success() {
    let mock = MockOdoo::start().await;
    // Two 500s, then a 200: exactly 3 attempts and a success.
    Mock::given(method("POST"))
        .and(path("/json/2/test_db/res.partner/search_count"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .up_to_n_times(2)
        .mount(&mock.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/json/2/test_db/res.partner/search_count"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(9)))
        .mount(&mock.server)
        .await;

    let client = client_for(&mock).await;
    let count = client.search_count("res.partner", None, None).await.unwrap();
    assert_eq!(count, 9);
    assert_eq!(mock.received_request_count().await, 3);
}

#[tokio::test]
async fn retry_budget_exhausted_surfaces_transport_error() {
    let mock = MockOdoo::start().await;
    Mock::given(method("POST"))
        .and(path("/json/2/test_db/res.partner/search_count"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&mock.server)
        .await;

    let client = client_for(&mock).await;
    let err = client
        .search_count("res.partner", None, None)
        .await
        .unwrap_err();
    // max_retries=2 means exactly 3 attempts.
    assert_eq!(mock.received_request_count().await, 3);
    assert!(matches!(err, OdooError::Transport(_)), "{err:?}");
}

#[tokio::test]
async fn http_401_maps_to_auth_error_without_retry() {
    let mock = MockOdoo::start().await;
    mock.mock_json2_error("res.partner", "search_count", 401, "Bad API key")
        .await;

    let client = client_for(&mock).await;
    let err = client
        .search_count("res.partner", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, OdooError::Auth(_)), "{err:?}");
    assert_eq!(mock.received_request_count().await, 1);
}

#[tokio::test]
async fn http_403_maps_to_access_denied() {
    let mock = MockOdoo::start().await;
    mock.mock_json2_error("res.partner", "unlink", 403, "nope").await;

    let client = client_for(&mock).await;
    let err = client
        .unlink("res.partner", vec![1], None)
        .await
        .unwrap_err();
    assert!(matches!(err, OdooError::AccessDenied(_)), "{err:?}");
}

#[tokio::test]
async fn http_400_is_not_retried() {
    let mock = MockOdoo::start().await;
    mock.mock_json2_error("res.partner", "search_count", 400, "bad domain")
        .await;

    let client = client_for(&mock).await;
    let err = client
        .search_count("res.partner", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, OdooError::Api { status: 400, .. }), "{err:?}");
    assert_eq!(mock.received_request_count().await, 1);
}

#[tokio::test]
async fn report_download_returns_bytes() {
    let mock = MockOdoo::start().await;
    Mock::given(method("GET"))
        .and(wiremock::matchers::path_regex(r"/report/pdf/.*"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/pdf")
                .set_body_bytes(b"%PDF-1.4 test".to_vec()),
        )
        .mount(&mock.server)
        .await;

    let client = client_for(&mock).await;
    let bytes = client
        .download_report_pdf("sale.report_saleorder", &[1, 2])
        .await
        .unwrap();
    assert!(bytes.starts_with(b"%PDF"));
}

#[tokio::test]
async fn check_access_combines_rights_and_rule() {
    let mock = MockOdoo::start().await;
    mock.mock_json2("res.partner", "check_access_rights", json!(true))
        .await;
    mock.mock_json2("res.partner", "check_access_rule", json!(null))
        .await;

    let client = client_for(&mock).await;
    assert!(
        client
            .check_access("res.partner", "read", Some(vec![1]), None)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn check_access_rule_denial_reads_as_not_allowed() {
    let mock = MockOdoo::start().await;
    mock.mock_json2("res.partner", "check_access_rights", json!(true))
        .await;
    mock.mock_json2_error("res.partner", "check_access_rule", 403, "denied")
        .await;

    let client = client_for(&mock).await;
    assert!(
        !client
            .check_access("res.partner", "unlink", Some(vec![1]), None)
            .await
            .unwrap()
    );
}
