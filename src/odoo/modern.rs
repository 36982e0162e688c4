use serde_json::{Map, Value, json};
use url::Url;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};

use super::descriptor::InstanceDescriptor;
use super::retry::RetryPolicy;
use super::types::{OdooError, OdooResult};

/// Client for the Odoo 19+ JSON-2 surface: one stateless POST per call to
/// `/json/2/{db}/{model}/{method}` with a bearer API key.
#[derive(Clone)]
pub struct ModernClient {
    base_url: Url,
    db: Option<String>,
    api_key: String,
    http: reqwest::Client,
    retry: RetryPolicy,
}

impl ModernClient {
    pub fn new(desc: &InstanceDescriptor) -> anyhow::Result<Self> {
        let mut base_url = Url::parse(&desc.url)
            .map_err(|e| anyhow::anyhow!("Invalid Odoo url '{}': {e}", desc.url))?;
        // Keep scheme/host/port only.
        base_url.set_path("");
        base_url.set_query(None);
        base_url.set_fragment(None);

        let api_key = desc
            .api_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Missing apiKey for instance url={}", desc.url))?;

        let http = reqwest::Client::builder()
            .timeout(desc.timeout())
            .cookie_store(true)
            .build()?;

        Ok(Self {
            base_url,
            db: desc.db.clone().filter(|d| !d.trim().is_empty()),
            api_key,
            http,
            retry: RetryPolicy::new(desc.max_retries()),
        })
    }

    fn headers(&self) -> OdooResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|e| OdooError::InvalidResponse(format!("Invalid Authorization header: {e}")))?,
        );
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("odoo-mcp-bridge/0.4"));
        Ok(headers)
    }

    fn endpoint(&self, model: &str, method: &str) -> Url {
        let mut url = self.base_url.clone();
        match &self.db {
            Some(db) => url.set_path(&format!("/json/2/{db}/{model}/{method}")),
            None => url.set_path(&format!("/json/2/{model}/{method}")),
        }
        url
    }

    /// One JSON-2 call: `{"args": […], "kwargs": {…}}`, retried on transient
    /// faults per the shared policy.
    pub async fn call(
        &self,
        model: &str,
        method: &str,
        args: Vec<Value>,
        mut kwargs: Map<String, Value>,
        context: Option<Value>,
    ) -> OdooResult<Value> {
        if let Some(ctx) = context {
            kwargs.insert("context".to_string(), ctx);
        }
        let body = json!({ "args": args, "kwargs": kwargs });
        let url = self.endpoint(model, method);
        let headers = self.headers()?;

        self.retry
            .run(|| {
                let url = url.clone();
                let headers = headers.clone();
                let body = body.clone();
                async move {
                    let resp = self
                        .http
                        .post(url)
                        .headers(headers)
                        .json(&body)
                        .send()
                        .await
                        .map_err(OdooError::from_reqwest)?;

                    let status = resp.status();
                    let text = resp.text().await.map_err(OdooError::from_reqwest)?;
                    if !status.is_success() {
                        return Err(OdooError::from_http_status(status.as_u16(), &text));
                    }

                    let v: Value = serde_json::from_str(&text).map_err(|e| {
                        OdooError::InvalidResponse(format!(
                            "Failed to parse JSON response: {e}. Body: {text}"
                        ))
                    })?;
                    unwrap_result_envelope(v)
                }
            })
            .await
    }

    /// Fetch a rendered PDF report from the web controller.
    pub async fn download_report_pdf(&self, report_name: &str, ids: &[i64]) -> OdooResult<Vec<u8>> {
        let ids_csv = ids
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let mut url = self.base_url.clone();
        url.set_path(&format!("/report/pdf/{report_name}/{ids_csv}"));
        let headers = self.headers()?;

        self.retry
            .run(|| {
                let url = url.clone();
                let headers = headers.clone();
                async move {
                    let resp = self
                        .http
                        .get(url)
                        .headers(headers)
                        .send()
                        .await
                        .map_err(OdooError::from_reqwest)?;
                    let status = resp.status();
                    if status.is_success() {
                        let bytes = resp.bytes().await.map_err(OdooError::from_reqwest)?;
                        return Ok(bytes.to_vec());
                    }
                    let text = resp.text().await.unwrap_or_default();
                    Err(OdooError::from_http_status(status.as_u16(), &text))
                }
            })
            .await
    }
}

/// The JSON-2 surface answers either the bare result or `{"result": …}`.
fn unwrap_result_envelope(v: Value) -> OdooResult<Value> {
    if let Some(obj) = v.as_object() {
        if let Some(error) = obj.get("error") {
            return Err(OdooError::from_jsonrpc_error(error));
        }
        if obj.len() == 1
            && let Some(result) = obj.get("result")
        {
            return Ok(result.clone());
        }
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn desc(url: &str, api_key: Option<&str>) -> InstanceDescriptor {
        InstanceDescriptor {
            url: url.to_string(),
            db: Some("test_db".to_string()),
            api_key: api_key.map(|s| s.to_string()),
            username: None,
            password: None,
            version: None,
            protocol: None,
            timeout_ms: Some(5000),
            max_retries: Some(2),
            extra: HashMap::new(),
        }
    }

    #[test]
    fn new_requires_api_key() {
        assert!(ModernClient::new(&desc("http://localhost:8069", None)).is_err());
        assert!(ModernClient::new(&desc("http://localhost:8069", Some("k"))).is_ok());
    }

    #[test]
    fn new_rejects_garbage_url() {
        assert!(ModernClient::new(&desc("not a url", Some("k"))).is_err());
    }

    #[test]
    fn endpoint_includes_database() {
        let client = ModernClient::new(&desc("http://localhost:8069", Some("k"))).unwrap();
        let url = client.endpoint("res.partner", "search_count");
        assert_eq!(url.path(), "/json/2/test_db/res.partner/search_count");
    }

    #[test]
    fn endpoint_without_database() {
        let mut d = desc("http://localhost:8069", Some("k"));
        d.db = None;
        let client = ModernClient::new(&d).unwrap();
        let url = client.endpoint("res.partner", "read");
        assert_eq!(url.path(), "/json/2/res.partner/read");
    }

    #[test]
    fn base_url_stripped_to_origin() {
        let client =
            ModernClient::new(&desc("http://localhost:8069/web/login?x=1", Some("k"))).unwrap();
        assert_eq!(client.base_url.path(), "/");
        assert!(client.base_url.query().is_none());
    }

    #[test]
    fn envelope_unwrap_variants() {
        assert_eq!(
            unwrap_result_envelope(json!({"result": 5})).unwrap(),
            json!(5)
        );
        assert_eq!(unwrap_result_envelope(json!([1, 2])).unwrap(), json!([1, 2]));
        assert!(unwrap_result_envelope(json!({"error": {"message": "x"}})).is_err());
        // An object that merely contains a "result" key among others is data.
        let v = json!({"result": 1, "other": 2});
        assert_eq!(unwrap_result_envelope(v.clone()).unwrap(), v);
    }
}
