use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_RETRIES: usize = 2;

/// Operator-supplied protocol hint for an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolHint {
    #[default]
    Auto,
    Modern,
    Legacy,
}

/// The protocol a handle will actually speak.
/// - `Modern`: `/json/2/{db}/{model}/{method}` with a bearer API key
/// - `Legacy`: `/jsonrpc` with `common.authenticate` + `object.execute_kw`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OdooProtocol {
    Modern,
    Legacy,
}

/// Connection descriptor for one named Odoo instance. Loaded from
/// `instances.json` / env and never mutated in place; descriptor changes
/// publish a whole new mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceDescriptor {
    pub url: String,
    #[serde(default)]
    pub db: Option<String>,
    #[serde(default, rename = "apiKey")]
    pub api_key: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Declared Odoo version, e.g. "18". Required for password auth.
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub protocol: Option<ProtocolHint>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<usize>,

    // Tolerate extra keys in operator-edited JSON.
    #[serde(flatten, default)]
    pub extra: HashMap<String, Value>,
}

fn non_empty(v: &Option<String>) -> bool {
    v.as_ref().is_some_and(|s| !s.trim().is_empty())
}

impl InstanceDescriptor {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS))
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES)
    }

    pub fn has_api_key(&self) -> bool {
        non_empty(&self.api_key)
    }

    pub fn has_login(&self) -> bool {
        non_empty(&self.username) && non_empty(&self.password)
    }

    /// Pick the client variant for this descriptor.
    ///
    /// An explicit hint wins. On `auto`, an API key selects the modern
    /// surface (also when both credential sets are present); otherwise a
    /// full login set (username/password/version) selects legacy. A
    /// descriptor with neither is invalid.
    pub fn select_protocol(&self) -> anyhow::Result<OdooProtocol> {
        match self.protocol.unwrap_or_default() {
            ProtocolHint::Modern => {
                if self.has_api_key() {
                    Ok(OdooProtocol::Modern)
                } else {
                    anyhow::bail!("protocol hint is 'modern' but no apiKey is set")
                }
            }
            ProtocolHint::Legacy => {
                if self.has_login() {
                    Ok(OdooProtocol::Legacy)
                } else {
                    anyhow::bail!("protocol hint is 'legacy' but username/password are not set")
                }
            }
            ProtocolHint::Auto => {
                if self.has_api_key() {
                    Ok(OdooProtocol::Modern)
                } else if self.has_login() && non_empty(&self.version) {
                    Ok(OdooProtocol::Legacy)
                } else {
                    anyhow::bail!(
                        "no usable credentials: set apiKey, or username + password + version"
                    )
                }
            }
        }
    }

    /// Validate the credential invariant, attributing errors to `name`.
    pub fn validate(&self, name: &str) -> anyhow::Result<()> {
        self.select_protocol()
            .map(|_| ())
            .map_err(|e| anyhow::anyhow!("instance '{name}': {e}"))?;
        if matches!(self.select_protocol(), Ok(OdooProtocol::Legacy))
            && !non_empty(&self.db)
        {
            anyhow::bail!("instance '{name}': db is required for username/password auth");
        }
        Ok(())
    }
}

/// Prefix `http://` when the URL carries no scheme.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}
