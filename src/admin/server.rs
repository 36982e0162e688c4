//! Config-manager HTTP surface (default port 3008). Shares the registry,
//! instance store, pool and cache with the MCP server; successful saves are
//! applied (snapshot swap / pool invalidation) before the response goes out.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rand::Rng;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{error, info, warn};

use crate::mcp::http::AuthGate;
use crate::odoo::pool::ClientPool;
use crate::odoo::store::parse_instances;
use crate::registry::{
    Registry, ToolSpec, prompts_from_document, tools_from_document,
};

use super::manager::{ConfigStore, SaveOutcome};

const SESSION_DURATION: Duration = Duration::from_secs(24 * 60 * 60);
const MIN_PASSWORD_LEN: usize = 4;

#[derive(Clone)]
struct SessionInfo {
    username: String,
    expires_at: Instant,
}

/// Config-UI credentials; auth is disabled when either var is unset.
#[derive(Clone)]
struct AdminAuth {
    state: Arc<RwLock<AdminAuthState>>,
}

struct AdminAuthState {
    username: String,
    password: String,
    enabled: bool,
}

impl AdminAuth {
    fn from_env() -> Self {
        let username = std::env::var("CONFIG_UI_USERNAME").unwrap_or_default();
        let password = std::env::var("CONFIG_UI_PASSWORD").unwrap_or_default();
        let enabled = !username.is_empty() && !password.is_empty();
        if enabled {
            info!(username, "config UI authentication enabled");
        } else {
            warn!("config UI authentication disabled (CONFIG_UI_USERNAME/PASSWORD not set)");
        }
        Self {
            state: Arc::new(RwLock::new(AdminAuthState {
                username,
                password,
                enabled,
            })),
        }
    }

    async fn enabled(&self) -> bool {
        self.state.read().await.enabled
    }

    async fn verify(&self, username: &str, password: &str) -> bool {
        let state = self.state.read().await;
        state.enabled && state.username == username && state.password == password
    }

    async fn set_password(&self, password: String) {
        self.state.write().await.password = password;
    }
}

#[derive(Clone)]
struct AdminState {
    store: ConfigStore,
    registry: Arc<Registry>,
    pool: ClientPool,
    sessions: Arc<RwLock<HashMap<String, SessionInfo>>>,
    auth: AdminAuth,
    env_file_path: PathBuf,
    mcp_auth: Option<AuthGate>,
}

fn random_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    hex::encode(bytes)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::to_string)
}

async fn auth_middleware(
    State(state): State<AdminState>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    if !state.auth.enabled().await {
        return next.run(request).await;
    }
    if let Some(token) = bearer_token(&headers) {
        let sessions = state.sessions.read().await;
        if let Some(session) = sessions.get(&token)
            && session.expires_at > Instant::now()
        {
            return next.run(request).await;
        }
    }
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "Unauthorized" })),
    )
        .into_response()
}

pub async fn start_config_server(
    port: u16,
    config_dir: PathBuf,
    registry: Arc<Registry>,
    pool: ClientPool,
    mcp_auth: Option<AuthGate>,
) -> anyhow::Result<()> {
    let env_file_path = dirs::home_dir()
        .map(|h| h.join(".config/odoo-mcp-bridge/env"))
        .unwrap_or_else(|| config_dir.join("env"));

    let state = AdminState {
        store: ConfigStore::new(config_dir),
        registry,
        pool,
        sessions: Arc::new(RwLock::new(HashMap::new())),
        auth: AdminAuth::from_env(),
        env_file_path,
        mcp_auth,
    };

    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    info!(port, "config server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Build the router; public so integration tests can drive it in-process.
pub fn create_admin_app(
    config_dir: PathBuf,
    registry: Arc<Registry>,
    pool: ClientPool,
) -> Router {
    let env_file_path = config_dir.join("env");
    create_app(AdminState {
        store: ConfigStore::new(config_dir),
        registry,
        pool,
        sessions: Arc::new(RwLock::new(HashMap::new())),
        auth: AdminAuth::from_env(),
        env_file_path,
        mcp_auth: None,
    })
}

fn create_app(state: AdminState) -> Router {
    let protected = Router::new()
        .route("/api/config/instances", get(get_instances).post(update_instances))
        .route("/api/config/tools", get(get_tools).post(update_tools))
        .route("/api/config/prompts", get(get_prompts).post(update_prompts))
        .route("/api/config/server", get(get_server).post(update_server))
        .route("/api/auth/change-password", post(change_password))
        .route("/api/auth/mcp-auth-status", get(mcp_auth_status))
        .route("/api/auth/mcp-auth-enabled", post(set_mcp_auth_enabled))
        .route("/api/auth/generate-mcp-token", post(generate_mcp_token))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let public = Router::new()
        .route("/health", get(health))
        .route("/api/auth/status", get(auth_status))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout));

    Router::new()
        .merge(public)
        .merge(protected)
        .fallback_service(ServeDir::new("static/dist"))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "service": "odoo-mcp-bridge-config", "status": "ok" }))
}

// ---------------------------------------------------------------------------
// Auth endpoints
// ---------------------------------------------------------------------------

async fn auth_status(State(state): State<AdminState>, headers: HeaderMap) -> impl IntoResponse {
    if !state.auth.enabled().await {
        return Json(json!({
            "auth_enabled": false,
            "authenticated": true,
            "username": Value::Null
        }));
    }
    if let Some(token) = bearer_token(&headers) {
        let sessions = state.sessions.read().await;
        if let Some(session) = sessions.get(&token)
            && session.expires_at > Instant::now()
        {
            return Json(json!({
                "auth_enabled": true,
                "authenticated": true,
                "username": session.username
            }));
        }
    }
    Json(json!({
        "auth_enabled": true,
        "authenticated": false,
        "username": Value::Null
    }))
}

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

async fn login(
    State(state): State<AdminState>,
    Json(payload): Json<LoginRequest>,
) -> Response {
    if !state.auth.enabled().await {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Authentication is not configured" })),
        )
            .into_response();
    }
    if !state.auth.verify(&payload.username, &payload.password).await {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Invalid username or password" })),
        )
            .into_response();
    }

    let token = random_token();
    state.sessions.write().await.insert(
        token.clone(),
        SessionInfo {
            username: payload.username.clone(),
            expires_at: Instant::now() + SESSION_DURATION,
        },
    );
    info!(username = %payload.username, "config UI login");
    Json(json!({ "token": token, "username": payload.username })).into_response()
}

async fn logout(State(state): State<AdminState>, headers: HeaderMap) -> impl IntoResponse {
    if let Some(token) = bearer_token(&headers) {
        state.sessions.write().await.remove(&token);
    }
    Json(json!({ "status": "logged_out" }))
}

#[derive(Deserialize)]
struct ChangePasswordRequest {
    new_password: String,
}

async fn change_password(
    State(state): State<AdminState>,
    Json(payload): Json<ChangePasswordRequest>,
) -> Response {
    if payload.new_password.len() < MIN_PASSWORD_LEN {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": format!("Password must be at least {MIN_PASSWORD_LEN} characters")
            })),
        )
            .into_response();
    }

    if let Err(e) = update_env_var(
        &state.env_file_path,
        "CONFIG_UI_PASSWORD",
        &payload.new_password,
    ) {
        error!(error = %e, "failed to persist new password");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("Failed to update password: {e}") })),
        )
            .into_response();
    }
    state.auth.set_password(payload.new_password).await;
    info!("config UI password changed");
    Json(json!({ "status": "password_changed" })).into_response()
}

async fn mcp_auth_status() -> impl IntoResponse {
    let enabled = std::env::var("MCP_AUTH_ENABLED")
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false);
    let token_configured = std::env::var("MCP_AUTH_TOKEN")
        .map(|v| !v.trim().is_empty())
        .unwrap_or(false);
    Json(json!({ "enabled": enabled, "token_configured": token_configured }))
}

#[derive(Deserialize)]
struct SetMcpAuthEnabledRequest {
    enabled: bool,
}

async fn set_mcp_auth_enabled(
    State(state): State<AdminState>,
    Json(payload): Json<SetMcpAuthEnabledRequest>,
) -> Response {
    let value = if payload.enabled { "true" } else { "false" };
    if let Err(e) = update_env_var(&state.env_file_path, "MCP_AUTH_ENABLED", value) {
        error!(error = %e, "failed to persist MCP_AUTH_ENABLED");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("Failed to update setting: {e}") })),
        )
            .into_response();
    }
    // SAFETY: single mutation point for this var; readers tolerate races.
    unsafe {
        std::env::set_var("MCP_AUTH_ENABLED", value);
    }
    if let Some(gate) = &state.mcp_auth {
        gate.reload().await;
    }
    info!(enabled = payload.enabled, "MCP HTTP auth toggled");
    Json(json!({ "status": "updated", "enabled": payload.enabled })).into_response()
}

async fn generate_mcp_token(State(state): State<AdminState>) -> Response {
    let token = random_token();
    if let Err(e) = update_env_var(&state.env_file_path, "MCP_AUTH_TOKEN", &token) {
        error!(error = %e, "failed to persist MCP_AUTH_TOKEN");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("Failed to update token: {e}") })),
        )
            .into_response();
    }
    // SAFETY: as above.
    unsafe {
        std::env::set_var("MCP_AUTH_TOKEN", &token);
    }
    if let Some(gate) = &state.mcp_auth {
        gate.reload().await;
    }
    info!("generated new MCP auth token");
    // The token is shown once; it is not retrievable later.
    Json(json!({ "token": token })).into_response()
}

/// Update or append `key=value` in the env file, keeping 0600 permissions.
fn update_env_var(env_file_path: &PathBuf, key: &str, value: &str) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(env_file_path).unwrap_or_default();
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
    let mut found = false;

    for line in &mut lines {
        let trimmed = line.trim_start();
        if trimmed.starts_with(&format!("{key}="))
            || trimmed.starts_with(&format!("# {key}="))
            || trimmed.starts_with(&format!("#{key}="))
        {
            *line = format!("{key}={value}");
            found = true;
            break;
        }
    }
    if !found {
        lines.push(format!("{key}={value}"));
    }

    if let Some(parent) = env_file_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(env_file_path, lines.join("\n") + "\n")?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(env_file_path, std::fs::Permissions::from_mode(0o600));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Config endpoints
// ---------------------------------------------------------------------------

fn load_response(result: anyhow::Result<Value>) -> Response {
    match result {
        Ok(doc) => Json(doc).into_response(),
        Err(e) => {
            error!(error = %e, "failed to load config document");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

fn outcome_response(outcome: SaveOutcome) -> Response {
    if outcome.saved {
        let mut body = json!({ "status": "saved", "message": outcome.message });
        if let Some(w) = outcome.warning {
            body["warning"] = json!(w);
        }
        Json(body).into_response()
    } else {
        let mut body = json!({ "error": outcome.message, "rollback": outcome.rollback });
        if let Some(w) = outcome.warning {
            body["warning"] = json!(w);
        }
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}

fn guard_warning(tools: &[ToolSpec]) -> Option<String> {
    let mut vars: Vec<&str> = tools
        .iter()
        .filter_map(|t| t.guards.as_ref())
        .flat_map(|g| g.undefined_vars())
        .collect();
    vars.sort();
    vars.dedup();
    if vars.is_empty() {
        None
    } else {
        Some(format!(
            "guard references undefined environment variable(s): {}",
            vars.join(", ")
        ))
    }
}

async fn get_instances(State(state): State<AdminState>) -> Response {
    load_response(state.store.load_instances())
}

async fn update_instances(
    State(state): State<AdminState>,
    Json(payload): Json<Value>,
) -> Response {
    let instances = match parse_instances(&payload) {
        Ok(map) => map,
        Err(e) => return outcome_response(SaveOutcome::rejected(e.to_string())),
    };

    if let Err(e) = state.store.write_document("instances.json", &payload) {
        return outcome_response(SaveOutcome::rejected(format!("failed to save: {e}")));
    }
    // Apply before responding: stale handles drop, caches clear.
    let stale = state.pool.apply_instances(instances).await;
    if !stale.is_empty() {
        info!(?stale, "instance descriptors replaced");
    }
    outcome_response(SaveOutcome::saved("Instances configuration saved"))
}

async fn get_tools(State(state): State<AdminState>) -> Response {
    load_response(state.store.load_tools())
}

async fn update_tools(State(state): State<AdminState>, Json(payload): Json<Value>) -> Response {
    // Validate first: a rejected save must leave prior bytes untouched.
    let tools = match tools_from_document(&payload) {
        Ok(t) => t,
        Err(e) => return outcome_response(SaveOutcome::rejected(e.to_string())),
    };
    let mut seen = HashSet::new();
    for t in &tools {
        if !seen.insert(t.name.clone()) {
            return outcome_response(SaveOutcome::rejected(format!(
                "Duplicate tool name: {}",
                t.name
            )));
        }
    }
    let warning = guard_warning(&tools);

    let normalized = if payload.is_array() {
        payload
    } else {
        payload.get("tools").cloned().unwrap_or(payload)
    };
    let backup = state.store.read_raw("tools.json");
    if let Err(e) = state
        .store
        .write_document("tools.json", &json!({ "tools": normalized }))
    {
        return outcome_response(SaveOutcome::rejected(format!("failed to save: {e}")));
    }

    // Publish the new snapshot before answering; a reload failure rolls the
    // file back to its previous bytes.
    if let Err(e) = state.registry.reload().await {
        if let Some(backup) = backup {
            state.store.restore("tools.json", &backup);
            let _ = state.registry.reload().await;
        }
        return outcome_response(SaveOutcome::rejected(format!("reload failed: {e}")));
    }

    let mut outcome = SaveOutcome::saved("Tools configuration saved");
    if let Some(w) = warning {
        outcome = outcome.with_warning(w);
    }
    outcome_response(outcome)
}

async fn get_prompts(State(state): State<AdminState>) -> Response {
    load_response(state.store.load_prompts())
}

async fn update_prompts(State(state): State<AdminState>, Json(payload): Json<Value>) -> Response {
    let prompts = match prompts_from_document(&payload) {
        Ok(p) => p,
        Err(e) => return outcome_response(SaveOutcome::rejected(e.to_string())),
    };
    let mut seen = HashSet::new();
    for p in &prompts {
        if !seen.insert(p.name.clone()) {
            return outcome_response(SaveOutcome::rejected(format!(
                "Duplicate prompt name: {}",
                p.name
            )));
        }
    }

    let normalized = if payload.is_array() {
        payload
    } else {
        payload.get("prompts").cloned().unwrap_or(payload)
    };
    let backup = state.store.read_raw("prompts.json");
    if let Err(e) = state
        .store
        .write_document("prompts.json", &json!({ "prompts": normalized }))
    {
        return outcome_response(SaveOutcome::rejected(format!("failed to save: {e}")));
    }
    if let Err(e) = state.registry.reload().await {
        if let Some(backup) = backup {
            state.store.restore("prompts.json", &backup);
            let _ = state.registry.reload().await;
        }
        return outcome_response(SaveOutcome::rejected(format!("reload failed: {e}")));
    }
    outcome_response(SaveOutcome::saved("Prompts configuration saved"))
}

async fn get_server(State(state): State<AdminState>) -> Response {
    load_response(state.store.load_server())
}

async fn update_server(State(state): State<AdminState>, Json(payload): Json<Value>) -> Response {
    if !payload.is_object() {
        return outcome_response(SaveOutcome::rejected("Server config must be a JSON object"));
    }
    if let Err(e) = serde_json::from_value::<crate::registry::ServerMeta>(payload.clone()) {
        return outcome_response(SaveOutcome::rejected(format!("Invalid server config: {e}")));
    }

    let backup = state.store.read_raw("server.json");
    if let Err(e) = state.store.write_document("server.json", &payload) {
        return outcome_response(SaveOutcome::rejected(format!("failed to save: {e}")));
    }
    if let Err(e) = state.registry.reload().await {
        if let Some(backup) = backup {
            state.store.restore("server.json", &backup);
            let _ = state.registry.reload().await;
        }
        return outcome_response(SaveOutcome::rejected(format!("reload failed: {e}")));
    }
    outcome_response(SaveOutcome::saved("Server configuration saved"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::GuardSpec;
    use serde_json::json;

    fn tool_with_guard(var: &str) -> ToolSpec {
        ToolSpec {
            name: "t".to_string(),
            description: "d".to_string(),
            input_schema: json!({"type": "object"}),
            op: crate::registry::OpSpec {
                kind: "search".to_string(),
                map: Default::default(),
            },
            guards: Some(GuardSpec {
                requires_env: None,
                requires_env_true: Some(var.to_string()),
            }),
        }
    }

    #[test]
    fn guard_warning_lists_undefined_vars() {
        unsafe {
            std::env::remove_var("ADMIN_TEST_UNSET_VAR");
        }
        let warning = guard_warning(&[tool_with_guard("ADMIN_TEST_UNSET_VAR")]).unwrap();
        assert!(warning.contains("ADMIN_TEST_UNSET_VAR"));

        unsafe {
            std::env::set_var("ADMIN_TEST_SET_VAR", "true");
        }
        assert!(guard_warning(&[tool_with_guard("ADMIN_TEST_SET_VAR")]).is_none());
        unsafe {
            std::env::remove_var("ADMIN_TEST_SET_VAR");
        }
    }

    #[test]
    fn update_env_var_updates_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("env");
        std::fs::write(&path, "A=1\n# B=old\n").unwrap();

        update_env_var(&path, "A", "2").unwrap();
        update_env_var(&path, "B", "new").unwrap();
        update_env_var(&path, "C", "3").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("A=2"));
        assert!(content.contains("B=new"));
        assert!(content.contains("C=3"));
        assert!(!content.contains("# B=old"));
    }
}
