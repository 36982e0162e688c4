//! MCP Streamable HTTP transport plus the legacy SSE pair.
//!
//! - `POST /mcp` — client → server JSON-RPC; JSON response (202 for
//!   notifications); `Mcp-Session-Id` issued on initialize
//! - `GET /mcp` — server → client SSE stream for a session
//! - `DELETE /mcp` — explicit session termination
//! - `GET /sse` + `POST /messages` — legacy SSE transport
//! - `GET /health`, `GET /openapi.json` — public endpoints, never gated

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::response::sse::{Event, Sse};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio_stream::wrappers::{BroadcastStream, IntervalStream};
use tokio_stream::{StreamExt, iter};
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ServerError;

use super::protocol::{self, error_response_null_id, success_response};
use super::{McpHandler, McpSession};

static MCP_SESSION_ID: HeaderName = HeaderName::from_static("mcp-session-id");
static MCP_PROTOCOL_VERSION: HeaderName = HeaderName::from_static("mcp-protocol-version");

const KNOWN_PROTOCOL_VERSIONS: &[&str] =
    &["2024-11-05", "2025-03-26", "2025-06-18", "2025-11-05"];

const SSE_KEEPALIVE_SECS: u64 = 15;
const SSE_RETRY_MS: u64 = 3_000;

/// Bearer-token gate for the MCP endpoints, controlled by MCP_AUTH_ENABLED
/// and MCP_AUTH_TOKEN. Re-readable so the config surface can toggle it
/// without a restart. Public endpoints bypass the gate entirely.
#[derive(Clone)]
pub struct AuthGate {
    state: Arc<RwLock<AuthState>>,
}

struct AuthState {
    enabled: bool,
    token: Option<String>,
}

fn read_auth_env() -> AuthState {
    let enabled = std::env::var("MCP_AUTH_ENABLED")
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false);
    let token = std::env::var("MCP_AUTH_TOKEN")
        .ok()
        .filter(|s| !s.is_empty());
    AuthState { enabled, token }
}

impl AuthGate {
    pub fn from_env() -> Self {
        let state = read_auth_env();
        if state.enabled {
            if state.token.is_some() {
                info!("MCP HTTP authentication enabled (bearer token)");
            } else {
                warn!("MCP HTTP authentication enabled but MCP_AUTH_TOKEN not set");
            }
        }
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    pub fn disabled() -> Self {
        Self {
            state: Arc::new(RwLock::new(AuthState {
                enabled: false,
                token: None,
            })),
        }
    }

    pub fn with_token(token: &str) -> Self {
        Self {
            state: Arc::new(RwLock::new(AuthState {
                enabled: true,
                token: Some(token.to_string()),
            })),
        }
    }

    /// Re-read MCP_AUTH_ENABLED / MCP_AUTH_TOKEN from the environment.
    pub async fn reload(&self) {
        *self.state.write().await = read_auth_env();
        info!("MCP HTTP auth configuration reloaded");
    }

    async fn check(&self, headers: &HeaderMap) -> Result<(), (StatusCode, Json<Value>)> {
        let state = self.state.read().await;
        if !state.enabled {
            return Ok(());
        }
        let Some(expected) = &state.token else {
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "server_error",
                    "error_description": "Authentication enabled but no token configured"
                })),
            ));
        };

        let header = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        match header.and_then(|h| h.strip_prefix("Bearer ")) {
            Some(token) if token == expected => Ok(()),
            Some(_) => Err((
                StatusCode::UNAUTHORIZED,
                Json(json!({
                    "error": "invalid_token",
                    "error_description": "The access token is invalid"
                })),
            )),
            None => Err((
                StatusCode::UNAUTHORIZED,
                Json(json!({
                    "error": "invalid_request",
                    "error_description": "Missing or malformed Authorization header"
                })),
            )),
        }
    }
}

/// Origin validation (DNS-rebinding protection) from MCP_ALLOWED_ORIGINS:
/// unset = allow all, empty list = localhost only, otherwise an allowlist
/// (localhost always passes).
#[derive(Clone, Debug, Default)]
pub struct OriginPolicy {
    pub allowed_origins: Option<Vec<String>>,
}

impl OriginPolicy {
    pub fn from_env() -> Self {
        let allowed_origins = std::env::var("MCP_ALLOWED_ORIGINS").ok().map(|s| {
            s.split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect()
        });
        Self { allowed_origins }
    }

    fn check(&self, headers: &HeaderMap) -> Result<(), (StatusCode, Json<Value>)> {
        let Some(allowed) = &self.allowed_origins else {
            return Ok(());
        };
        let Some(origin) = headers
            .get(axum::http::header::ORIGIN)
            .and_then(|v| v.to_str().ok())
        else {
            // Only validate when the header is present (non-browser clients).
            return Ok(());
        };

        let is_localhost = origin.contains("localhost")
            || origin.contains("127.0.0.1")
            || origin.contains("[::1]");
        if is_localhost || allowed.iter().any(|a| a == origin) {
            Ok(())
        } else {
            Err((
                StatusCode::FORBIDDEN,
                Json(error_response_null_id(&ServerError::InvalidRequest(
                    format!("origin not allowed: {origin}"),
                ))),
            ))
        }
    }
}

struct HttpSession {
    session: Arc<McpSession>,
    protocol_version: String,
}

#[derive(Clone)]
struct AppState {
    handler: Arc<McpHandler>,
    sessions: Arc<Mutex<HashMap<String, Arc<HttpSession>>>>,
    sse_channels: Arc<Mutex<HashMap<String, broadcast::Sender<Value>>>>,
    auth: AuthGate,
    origins: OriginPolicy,
}

pub async fn serve(handler: Arc<McpHandler>, listen: &str) -> anyhow::Result<()> {
    serve_with_auth(handler, listen, AuthGate::from_env()).await
}

pub async fn serve_with_auth(
    handler: Arc<McpHandler>,
    listen: &str,
    auth: AuthGate,
) -> anyhow::Result<()> {
    let app = create_app(handler, auth, OriginPolicy::from_env());
    let addr: SocketAddr = listen.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "MCP server listening (http)");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Build the router; public so integration tests can drive it in-process.
pub fn create_app(handler: Arc<McpHandler>, auth: AuthGate, origins: OriginPolicy) -> Router {
    let state = AppState {
        handler,
        sessions: Arc::new(Mutex::new(HashMap::new())),
        sse_channels: Arc::new(Mutex::new(HashMap::new())),
        auth,
        origins,
    };

    Router::new()
        .route("/mcp", get(mcp_get).post(mcp_post).delete(mcp_delete))
        .route("/sse", get(legacy_sse))
        .route("/messages", axum::routing::post(legacy_messages))
        .route("/health", get(health))
        .route("/openapi.json", get(openapi_spec))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "service": "odoo-mcp-bridge", "status": "ok" }))
}

async fn openapi_spec() -> impl IntoResponse {
    const OPENAPI_JSON: &str = include_str!("../../openapi/openapi.json");
    let spec: Value = serde_json::from_str(OPENAPI_JSON)
        .unwrap_or_else(|_| json!({ "error": "failed to parse OpenAPI document" }));
    Json(spec)
}

fn session_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(&MCP_SESSION_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn protocol_version_ok(headers: &HeaderMap, negotiated: Option<&str>) -> bool {
    match headers
        .get(&MCP_PROTOCOL_VERSION)
        .and_then(|v| v.to_str().ok())
    {
        // Absent header is accepted for backwards compatibility.
        None => true,
        Some(v) => negotiated == Some(v) || KNOWN_PROTOCOL_VERSIONS.contains(&v),
    }
}

async fn channel_for(state: &AppState, session_id: &str) -> broadcast::Sender<Value> {
    state
        .sse_channels
        .lock()
        .await
        .entry(session_id.to_string())
        .or_insert_with(|| broadcast::channel(256).0)
        .clone()
}

/// Look up a session, or lazily create an initialized one for clients that
/// talk without an initialize round-trip (legacy transports, curl).
async fn session_for(state: &AppState, session_id: &str) -> Arc<HttpSession> {
    let mut sessions = state.sessions.lock().await;
    sessions
        .entry(session_id.to_string())
        .or_insert_with(|| {
            let session = McpSession::new(state.handler.clone());
            session.mark_initialized();
            Arc::new(HttpSession {
                session: Arc::new(session),
                protocol_version: "2025-03-26".to_string(),
            })
        })
        .clone()
}

async fn mcp_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> axum::response::Response {
    if let Err(e) = state.origins.check(&headers) {
        return e.into_response();
    }
    if let Err(e) = state.auth.check(&headers).await {
        return e.into_response();
    }

    let session_id = session_header(&headers);
    let is_initialize = body.get("method").and_then(|m| m.as_str()) == Some("initialize");

    if is_initialize {
        let Some(id) = body.get("id").cloned() else {
            return (
                StatusCode::BAD_REQUEST,
                Json(error_response_null_id(&ServerError::InvalidRequest(
                    "initialize requires an id".to_string(),
                ))),
            )
                .into_response();
        };
        let params = body.get("params").cloned().unwrap_or_else(|| json!({}));
        let (result, version) = state.handler.initialize_result(&params).await;

        let new_session = Uuid::new_v4().to_string();
        let session = McpSession::new(state.handler.clone());
        session.mark_initialized();
        state.sessions.lock().await.insert(
            new_session.clone(),
            Arc::new(HttpSession {
                session: Arc::new(session),
                protocol_version: version.clone(),
            }),
        );
        channel_for(&state, &new_session).await;
        debug!(session = %new_session, "streamable HTTP session created");

        let mut out = HeaderMap::new();
        if let Ok(v) = HeaderValue::from_str(&new_session) {
            out.insert(&MCP_SESSION_ID, v);
        }
        if let Ok(v) = HeaderValue::from_str(&version) {
            out.insert(&MCP_PROTOCOL_VERSION, v);
        }
        return (StatusCode::OK, out, Json(success_response(id, result))).into_response();
    }

    // Non-initialize: a supplied session id must exist.
    let http_session = match &session_id {
        Some(sid) => {
            let Some(existing) = state.sessions.lock().await.get(sid).cloned() else {
                return (
                    StatusCode::NOT_FOUND,
                    Json(error_response_null_id(&ServerError::InvalidRequest(
                        "session not found or expired".to_string(),
                    ))),
                )
                    .into_response();
            };
            if !protocol_version_ok(&headers, Some(&existing.protocol_version)) {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(error_response_null_id(&ServerError::InvalidRequest(
                        "unsupported protocol version".to_string(),
                    ))),
                )
                    .into_response();
            }
            existing
        }
        None => session_for(&state, "default").await,
    };

    let request = match protocol::parse_value(body) {
        Ok(r) => r,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, Json(error_response_null_id(&e))).into_response();
        }
    };

    match http_session.session.handle_request(request).await {
        Some(response) => (StatusCode::OK, Json(response)).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

async fn mcp_get(State(state): State<AppState>, headers: HeaderMap) -> axum::response::Response {
    if let Err(e) = state.origins.check(&headers) {
        return e.into_response();
    }
    if let Err(e) = state.auth.check(&headers).await {
        return e.into_response();
    }

    let session_id = session_header(&headers).unwrap_or_else(|| "default".to_string());
    let tx = channel_for(&state, &session_id).await;

    let connected = iter(vec![Ok::<Event, Infallible>(
        Event::default()
            .retry(Duration::from_millis(SSE_RETRY_MS))
            .comment("connected"),
    )]);
    let keepalive = IntervalStream::new(tokio::time::interval(Duration::from_secs(
        SSE_KEEPALIVE_SECS,
    )))
    .map(|_| Ok::<Event, Infallible>(Event::default().comment("keepalive")));
    let messages = BroadcastStream::new(tx.subscribe()).filter_map(|msg| match msg {
        Ok(v) => Some(Ok(Event::default().event("message").data(v.to_string()))),
        Err(_) => None, // lagged; drop
    });

    Sse::new(connected.chain(keepalive.merge(messages)))
        .keep_alive(axum::response::sse::KeepAlive::default())
        .into_response()
}

async fn mcp_delete(State(state): State<AppState>, headers: HeaderMap) -> axum::response::Response {
    if let Err(e) = state.origins.check(&headers) {
        return e.into_response();
    }
    if let Err(e) = state.auth.check(&headers).await {
        return e.into_response();
    }

    let Some(session_id) = session_header(&headers) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(error_response_null_id(&ServerError::InvalidRequest(
                "missing Mcp-Session-Id header".to_string(),
            ))),
        )
            .into_response();
    };

    let removed = state.sessions.lock().await.remove(&session_id).is_some();
    state.sse_channels.lock().await.remove(&session_id);

    if removed {
        info!(session = %session_id, "session terminated");
        StatusCode::OK.into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(error_response_null_id(&ServerError::InvalidRequest(
                "session not found".to_string(),
            ))),
        )
            .into_response()
    }
}

#[derive(Deserialize)]
struct LegacyQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

async fn legacy_sse(State(state): State<AppState>, headers: HeaderMap) -> axum::response::Response {
    if let Err(e) = state.origins.check(&headers) {
        return e.into_response();
    }
    if let Err(e) = state.auth.check(&headers).await {
        return e.into_response();
    }

    let session_id = Uuid::new_v4().to_string();
    let tx = channel_for(&state, &session_id).await;
    session_for(&state, &session_id).await;

    // First event tells the client where to POST (legacy contract).
    let endpoint = iter(vec![Ok::<Event, Infallible>(
        Event::default()
            .event("endpoint")
            .data(format!("/messages?sessionId={session_id}")),
    )]);
    let messages = BroadcastStream::new(tx.subscribe()).filter_map(|msg| match msg {
        Ok(v) => Some(Ok(Event::default().event("message").data(v.to_string()))),
        Err(_) => None,
    });

    Sse::new(endpoint.chain(messages))
        .keep_alive(axum::response::sse::KeepAlive::default())
        .into_response()
}

async fn legacy_messages(
    State(state): State<AppState>,
    Query(q): Query<LegacyQuery>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> axum::response::Response {
    if let Err(e) = state.origins.check(&headers) {
        return e.into_response();
    }
    if let Err(e) = state.auth.check(&headers).await {
        return e.into_response();
    }

    let Some(session_id) = q.session_id.or_else(|| session_header(&headers)) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let http_session = session_for(&state, &session_id).await;
    let response = match protocol::parse_value(body) {
        Ok(req) => http_session.session.handle_request(req).await,
        Err(e) => Some(error_response_null_id(&e)),
    };

    // Legacy transport answers on the SSE stream, not the HTTP response.
    if let Some(response) = response {
        let tx = channel_for(&state, &session_id).await;
        let _ = tx.send(response);
    }
    StatusCode::ACCEPTED.into_response()
}
