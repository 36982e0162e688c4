pub mod watcher;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::info;

use crate::ops::OP_KINDS;

// Embedded seeds written out when a config file is missing at startup.
const DEFAULT_TOOLS_JSON: &str = include_str!("../../config-defaults/tools.json");
const DEFAULT_PROMPTS_JSON: &str = include_str!("../../config-defaults/prompts.json");
const DEFAULT_SERVER_JSON: &str = include_str!("../../config-defaults/server.json");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
    pub op: OpSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guards: Option<GuardSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpSpec {
    /// Discriminator from the closed set in [`OP_KINDS`].
    #[serde(rename = "type")]
    pub kind: String,
    /// Argument name → RFC-6901 pointer into the incoming arguments object.
    #[serde(default)]
    pub map: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardSpec {
    /// Tool is visible only when this env var is set and non-empty.
    #[serde(default, rename = "requiresEnv", skip_serializing_if = "Option::is_none")]
    pub requires_env: Option<String>,
    /// Tool is visible only when this env var equals "true" (case-insensitive).
    #[serde(
        default,
        rename = "requiresEnvTrue",
        skip_serializing_if = "Option::is_none"
    )]
    pub requires_env_true: Option<String>,
}

pub fn env_is_true(var: &str) -> bool {
    std::env::var(var)
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

impl GuardSpec {
    pub fn satisfied(&self) -> bool {
        if let Some(var) = &self.requires_env
            && std::env::var(var).map(|v| v.trim().is_empty()).unwrap_or(true)
        {
            return false;
        }
        if let Some(var) = &self.requires_env_true
            && !env_is_true(var)
        {
            return false;
        }
        true
    }

    /// Referenced env vars that are currently undefined (save-path warning).
    pub fn undefined_vars(&self) -> Vec<&str> {
        [&self.requires_env, &self.requires_env_true]
            .into_iter()
            .flatten()
            .filter(|var| std::env::var(var).is_err())
            .map(|s| s.as_str())
            .collect()
    }
}

fn guards_allow(guards: Option<&GuardSpec>) -> bool {
    guards.map(GuardSpec::satisfied).unwrap_or(true)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptSpec {
    pub name: String,
    pub description: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerMeta {
    #[serde(default, rename = "serverName")]
    pub server_name: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default, rename = "protocolVersionDefault")]
    pub protocol_version_default: Option<String>,
}

impl ServerMeta {
    pub fn server_name(&self) -> &str {
        self.server_name.as_deref().unwrap_or("odoo-mcp-bridge")
    }

    pub fn instructions(&self) -> &str {
        self.instructions
            .as_deref()
            .unwrap_or("MCP bridge to Odoo instances")
    }

    pub fn protocol_version_default(&self) -> &str {
        self.protocol_version_default
            .as_deref()
            .unwrap_or("2025-11-05")
    }
}

/// Immutable bundle of everything loaded from the three config documents.
/// Shared by many readers; replaced atomically on reload. A reader holding a
/// snapshot never observes a partial update.
#[derive(Debug)]
pub struct RegistrySnapshot {
    tools: Vec<ToolSpec>,
    tool_index: HashMap<String, usize>,
    prompts: Vec<PromptSpec>,
    prompt_index: HashMap<String, usize>,
    pub server: ServerMeta,
    pub loaded_at: DateTime<Utc>,
}

impl RegistrySnapshot {
    pub fn empty() -> Self {
        Self {
            tools: Vec::new(),
            tool_index: HashMap::new(),
            prompts: Vec::new(),
            prompt_index: HashMap::new(),
            server: ServerMeta::default(),
            loaded_at: Utc::now(),
        }
    }

    pub fn from_documents(
        tools_doc: &Value,
        prompts_doc: &Value,
        server_doc: &Value,
    ) -> anyhow::Result<Self> {
        let tools = tools_from_document(tools_doc)?;
        let prompts = prompts_from_document(prompts_doc)?;
        let server: ServerMeta = serde_json::from_value(server_doc.clone())
            .map_err(|e| anyhow::anyhow!("Invalid server.json: {e}"))?;

        let mut tool_index = HashMap::new();
        for (i, t) in tools.iter().enumerate() {
            if tool_index.insert(t.name.clone(), i).is_some() {
                anyhow::bail!("Duplicate tool name: {}", t.name);
            }
        }
        let mut prompt_index = HashMap::new();
        for (i, p) in prompts.iter().enumerate() {
            if prompt_index.insert(p.name.clone(), i).is_some() {
                anyhow::bail!("Duplicate prompt name: {}", p.name);
            }
        }

        Ok(Self {
            tools,
            tool_index,
            prompts,
            prompt_index,
            server,
            loaded_at: Utc::now(),
        })
    }

    /// Guard-filtered tool list in file order.
    pub fn visible_tools(&self) -> Vec<&ToolSpec> {
        self.tools
            .iter()
            .filter(|t| guards_allow(t.guards.as_ref()))
            .collect()
    }

    /// Resolve a tool by name; hidden-by-guard behaves like absent.
    pub fn tool(&self, name: &str) -> Option<&ToolSpec> {
        let t = self.tool_index.get(name).map(|i| &self.tools[*i])?;
        guards_allow(t.guards.as_ref()).then_some(t)
    }

    pub fn prompts(&self) -> &[PromptSpec] {
        &self.prompts
    }

    pub fn prompt(&self, name: &str) -> Option<&PromptSpec> {
        self.prompt_index.get(name).map(|i| &self.prompts[*i])
    }
}

/// Accept `Tool[]` or `{tools: Tool[]}`, then validate the set.
pub fn tools_from_document(doc: &Value) -> anyhow::Result<Vec<ToolSpec>> {
    let arr = if doc.is_array() {
        doc.clone()
    } else if let Some(tools) = doc.get("tools").filter(|v| v.is_array()) {
        tools.clone()
    } else {
        anyhow::bail!("tools document must be an array or an object with a 'tools' array");
    };
    let tools: Vec<ToolSpec> =
        serde_json::from_value(arr).map_err(|e| anyhow::anyhow!("Invalid tools document: {e}"))?;
    for t in &tools {
        validate_tool(t)?;
    }
    Ok(tools)
}

/// Accept `Prompt[]` or `{prompts: Prompt[]}`.
pub fn prompts_from_document(doc: &Value) -> anyhow::Result<Vec<PromptSpec>> {
    let arr = if doc.is_array() {
        doc.clone()
    } else if let Some(prompts) = doc.get("prompts").filter(|v| v.is_array()) {
        prompts.clone()
    } else {
        anyhow::bail!("prompts document must be an array or an object with a 'prompts' array");
    };
    serde_json::from_value(arr).map_err(|e| anyhow::anyhow!("Invalid prompts document: {e}"))
}

fn validate_tool(tool: &ToolSpec) -> anyhow::Result<()> {
    if !OP_KINDS.contains(&tool.op.kind.as_str()) {
        anyhow::bail!("tool '{}' has unknown op.type '{}'", tool.name, tool.op.kind);
    }
    for (key, pointer) in &tool.op.map {
        if !pointer_is_valid(pointer) {
            anyhow::bail!(
                "tool '{}' op.map entry '{key}' is not a valid JSON pointer: '{pointer}'",
                tool.name
            );
        }
    }
    validate_schema_fragment(&tool.input_schema)
        .map_err(|e| anyhow::anyhow!("tool '{}' has invalid inputSchema: {e}", tool.name))
}

/// RFC 6901 syntax: empty, or `/`-prefixed tokens where `~` is only ever
/// followed by `0` or `1`.
pub fn pointer_is_valid(pointer: &str) -> bool {
    if pointer.is_empty() {
        return true;
    }
    if !pointer.starts_with('/') {
        return false;
    }
    let mut chars = pointer.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '~' && !matches!(chars.peek(), Some('0') | Some('1')) {
            return false;
        }
    }
    true
}

/// Assistant clients choke on composition keywords; reject them outright so
/// a bad tool never reaches `tools/list`.
pub fn validate_schema_fragment(schema: &Value) -> anyhow::Result<()> {
    match schema {
        Value::Object(map) => {
            for (k, v) in map {
                if matches!(
                    k.as_str(),
                    "anyOf" | "oneOf" | "allOf" | "$ref" | "definitions"
                ) {
                    anyhow::bail!("schema contains forbidden key '{k}'");
                }
                if k == "type" && v.is_array() {
                    anyhow::bail!("schema contains array-typed 'type'");
                }
                validate_schema_fragment(v)?;
            }
            Ok(())
        }
        Value::Array(arr) => {
            for v in arr {
                validate_schema_fragment(v)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Loads the three JSON documents and publishes immutable snapshots.
pub struct Registry {
    tools_path: PathBuf,
    prompts_path: PathBuf,
    server_path: PathBuf,
    current: RwLock<Arc<RegistrySnapshot>>,
}

impl Registry {
    pub fn from_env() -> Self {
        let dir = std::env::var("ODOO_CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
        let path_for = |var: &str, file: &str| {
            std::env::var(var)
                .map(PathBuf::from)
                .unwrap_or_else(|_| Path::new(&dir).join(file))
        };
        Self::with_paths(
            path_for("MCP_TOOLS_JSON", "tools.json"),
            path_for("MCP_PROMPTS_JSON", "prompts.json"),
            path_for("MCP_SERVER_JSON", "server.json"),
        )
    }

    pub fn with_paths(tools_path: PathBuf, prompts_path: PathBuf, server_path: PathBuf) -> Self {
        Self {
            tools_path,
            prompts_path,
            server_path,
            current: RwLock::new(Arc::new(RegistrySnapshot::empty())),
        }
    }

    pub fn paths(&self) -> [&Path; 3] {
        [&self.tools_path, &self.prompts_path, &self.server_path]
    }

    /// Seed missing files from the embedded defaults, then load.
    pub async fn initial_load(&self) -> anyhow::Result<()> {
        self.seed_missing_files()?;
        self.reload().await
    }

    /// Re-read and re-validate all three documents; on success publish a new
    /// snapshot atomically. On failure the previous snapshot stays current.
    pub async fn reload(&self) -> anyhow::Result<()> {
        let tools_doc = read_json(&self.tools_path)?;
        let prompts_doc = read_json(&self.prompts_path)?;
        let server_doc = read_json(&self.server_path)?;
        let snapshot = RegistrySnapshot::from_documents(&tools_doc, &prompts_doc, &server_doc)?;

        *self.current.write().await = Arc::new(snapshot);
        info!(
            tools = %self.tools_path.display(),
            prompts = %self.prompts_path.display(),
            server = %self.server_path.display(),
            "registry snapshot published"
        );
        Ok(())
    }

    /// Current snapshot; the lock is released before the caller acts on it.
    pub async fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.read().await.clone()
    }

    fn seed_missing_files(&self) -> anyhow::Result<()> {
        seed_file(&self.tools_path, DEFAULT_TOOLS_JSON)?;
        seed_file(&self.prompts_path, DEFAULT_PROMPTS_JSON)?;
        seed_file(&self.server_path, DEFAULT_SERVER_JSON)?;
        Ok(())
    }
}

fn read_json(path: &Path) -> anyhow::Result<Value> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?;
    serde_json::from_str(&raw).map_err(|e| anyhow::anyhow!("Invalid JSON in {}: {e}", path.display()))
}

fn seed_file(path: &Path, contents: &str) -> anyhow::Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)?;
    info!(path = %path.display(), "seeded default config file");
    Ok(())
}
