use std::sync::Arc;

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{Map, Value, json};
use tokio::sync::RwLock;
use url::Url;

use super::descriptor::InstanceDescriptor;
use super::retry::RetryPolicy;
use super::types::{OdooError, OdooResult};

/// Client for the pre-19 JSON-RPC surface: `POST /jsonrpc` with
/// `common.authenticate` producing a uid, then
/// `object.execute_kw(db, uid, password, model, method, args, kwargs)`.
///
/// The uid is cached per handle under a lock; a server-declared
/// authentication error triggers at most one re-login and a single retry.
#[derive(Clone)]
pub struct LegacyClient {
    base_url: Url,
    db: String,
    username: String,
    password: String,
    http: reqwest::Client,
    retry: RetryPolicy,
    uid: Arc<RwLock<Option<i64>>>,
}

impl LegacyClient {
    pub fn new(desc: &InstanceDescriptor) -> anyhow::Result<Self> {
        let mut base_url = Url::parse(&desc.url)
            .map_err(|e| anyhow::anyhow!("Invalid Odoo url '{}': {e}", desc.url))?;
        base_url.set_path("");
        base_url.set_query(None);
        base_url.set_fragment(None);

        let db = desc
            .db
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Missing db for legacy instance url={}", desc.url))?;
        let username = desc.username.clone().ok_or_else(|| {
            anyhow::anyhow!("Missing username for legacy instance url={}", desc.url)
        })?;
        let password = desc.password.clone().ok_or_else(|| {
            anyhow::anyhow!("Missing password for legacy instance url={}", desc.url)
        })?;

        let http = reqwest::Client::builder()
            .timeout(desc.timeout())
            .cookie_store(true)
            .build()?;

        Ok(Self {
            base_url,
            db,
            username,
            password,
            http,
            retry: RetryPolicy::new(desc.max_retries()),
            uid: Arc::new(RwLock::new(None)),
        })
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("odoo-mcp-bridge/0.4"));
        headers
    }

    fn jsonrpc_endpoint(&self) -> Url {
        let mut url = self.base_url.clone();
        url.set_path("/jsonrpc");
        url
    }

    fn envelope(service: &str, method: &str, args: Value) -> Value {
        json!({
            "jsonrpc": "2.0",
            "method": "call",
            "params": {
                "service": service,
                "method": method,
                "args": args
            },
            "id": 1
        })
    }

    /// One JSON-RPC exchange, with the shared retry policy on transient faults.
    async fn rpc(&self, service: &str, method: &str, args: Value) -> OdooResult<Value> {
        let url = self.jsonrpc_endpoint();
        let headers = self.headers();
        let body = Self::envelope(service, method, args);

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
                            "Failed to parse JSON-RPC response: {e}. Body: {text}"
                        ))
                    })?;

                    if let Some(error) = v.get("error") {
                        return Err(OdooError::from_jsonrpc_error(error));
                    }
                    v.get("result").cloned().ok_or_else(|| {
                        OdooError::InvalidResponse(
                            "JSON-RPC response missing 'result' field".to_string(),
                        )
                    })
                }
            })
            .await
    }

    /// Authenticate and cache the uid. `common.authenticate` answers `false`
    /// (not an error) on bad credentials.
    pub async fn authenticate(&self) -> OdooResult<i64> {
        {
            let cached = self.uid.read().await;
            if let Some(uid) = *cached {
                return Ok(uid);
            }
        }

        let args = json!([self.db, self.username, self.password, {}]);
        let result = self.rpc("common", "authenticate", args).await?;

        let uid = result.as_i64().filter(|u| *u > 0).ok_or_else(|| {
            OdooError::Auth(format!(
                "Authentication failed for user '{}' on db '{}'",
                self.username, self.db
            ))
        })?;

        *self.uid.write().await = Some(uid);
        Ok(uid)
    }

    async fn execute_kw_once(
        &self,
        model: &str,
        method: &str,
        args: Value,
        kwargs: Value,
    ) -> OdooResult<Value> {
        let uid = self.authenticate().await?;
        let call_args = json!([
            self.db, uid, self.password, model, method, args, kwargs
        ]);
        self.rpc("object", "execute_kw", call_args).await
    }

    /// `execute_kw` with the single re-login retry on an auth error.
    pub async fn execute_kw(
        &self,
        model: &str,
        method: &str,
        args: Value,
        kwargs: Option<Value>,
    ) -> OdooResult<Value> {
        let kwargs = kwargs.unwrap_or_else(|| json!({}));
        match self
            .execute_kw_once(model, method, args.clone(), kwargs.clone())
            .await
        {
            Err(OdooError::Auth(_)) => {
                *self.uid.write().await = None;
                self.execute_kw_once(model, method, args, kwargs).await
            }
            other => other,
        }
    }

    /// Generic call shaping for the dispatcher: `kwargs` map plus optional
    /// leading ids argument, with context folded into kwargs.
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
        let kwargs = if kwargs.is_empty() {
            None
        } else {
            Some(Value::Object(kwargs))
        };
        self.execute_kw(model, method, Value::Array(args), kwargs)
            .await
    }

    /// Report download via the web controller; needs a session cookie first.
    pub async fn download_report_pdf(&self, report_name: &str, ids: &[i64]) -> OdooResult<Vec<u8>> {
        self.authenticate().await?;

        let session_url = {
            let mut u = self.base_url.clone();
            u.set_path("/web/session/authenticate");
            u
        };
        let session_body = json!({
            "jsonrpc": "2.0",
            "method": "call",
            "params": {
                "db": self.db,
                "login": self.username,
                "password": self.password
            },
            "id": 1
        });

        let ids_csv = ids
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let mut report_url = self.base_url.clone();
        report_url.set_path(&format!("/report/pdf/{report_name}/{ids_csv}"));

        self.retry
            .run(|| {
                let session_url = session_url.clone();
                let session_body = session_body.clone();
                let report_url = report_url.clone();
                let headers = self.headers();
                async move {
                    // Session cookie lands in the shared cookie store.
                    self.http
                        .post(session_url)
                        .headers(headers)
                        .json(&session_body)
                        .send()
                        .await
                        .map_err(OdooError::from_reqwest)?;

                    let resp = self
                        .http
                        .get(report_url)
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
