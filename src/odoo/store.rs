use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::info;

use super::descriptor::{InstanceDescriptor, normalize_url};

pub type InstanceMap = HashMap<String, InstanceDescriptor>;

/// Holds the name → descriptor mapping. Loaded once at startup from env;
/// replaced wholesale by the config-manager surface. Descriptors are never
/// mutated in place, so in-flight requests keep whatever clone they hold.
pub struct InstanceStore {
    instances: RwLock<InstanceMap>,
}

impl InstanceStore {
    pub fn from_env() -> anyhow::Result<Self> {
        let instances = load_from_env()?;
        Ok(Self {
            instances: RwLock::new(instances),
        })
    }

    pub fn with_instances(instances: InstanceMap) -> Self {
        Self {
            instances: RwLock::new(instances),
        }
    }

    pub async fn get(&self, name: &str) -> Option<InstanceDescriptor> {
        self.instances.read().await.get(name).cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.instances.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Publish a new mapping. Returns the names whose descriptor changed or
    /// vanished, so the pool can drop their handles and the cache their
    /// metadata. Content-equal replacement returns an empty list.
    pub async fn replace(&self, new: InstanceMap) -> Vec<String> {
        let mut guard = self.instances.write().await;
        let mut stale: Vec<String> = Vec::new();
        for (name, old_desc) in guard.iter() {
            match new.get(name) {
                Some(new_desc) if new_desc == old_desc => {}
                _ => stale.push(name.clone()),
            }
        }
        *guard = new;
        stale
    }
}

/// Parse an instances document (`{ name: descriptor }`) and normalize URLs,
/// deferring credential validation (env fallbacks may still apply).
fn parse_unvalidated(doc: &Value) -> anyhow::Result<InstanceMap> {
    let mut map: InstanceMap = serde_json::from_value(doc.clone())
        .map_err(|e| anyhow::anyhow!("Invalid instances document: {e}"))?;
    for desc in map.values_mut() {
        desc.url = normalize_url(&desc.url);
    }
    Ok(map)
}

/// Parse and fully validate an instances document. This is the config
/// surface's save-path check: every entry must satisfy the credential
/// invariant on its own.
pub fn parse_instances(doc: &Value) -> anyhow::Result<InstanceMap> {
    let map = parse_unvalidated(doc)?;
    for (name, desc) in &map {
        desc.validate(name)?;
    }
    Ok(map)
}

/// Source precedence: ODOO_INSTANCES (inline JSON) → ODOO_INSTANCES_JSON
/// (file path) → single-instance scalar vars.
fn load_from_env() -> anyhow::Result<InstanceMap> {
    if let Ok(raw) = std::env::var("ODOO_INSTANCES")
        && !raw.trim().is_empty()
    {
        let doc: Value = serde_json::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("Failed to parse ODOO_INSTANCES JSON: {e}"))?;
        let mut map = parse_unvalidated(&doc)?;
        apply_global_fallbacks(&mut map)?;
        info!(count = map.len(), "instances loaded from ODOO_INSTANCES");
        return Ok(map);
    }

    if let Ok(path) = std::env::var("ODOO_INSTANCES_JSON")
        && !path.trim().is_empty()
    {
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Failed to read {path}: {e}"))?;
        let doc: Value = serde_json::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("Invalid instances file {path}: {e}"))?;
        let mut map = parse_unvalidated(&doc)?;
        apply_global_fallbacks(&mut map)?;
        info!(path = %path, count = map.len(), "instances loaded from file");
        return Ok(map);
    }

    let map = single_instance_from_scalars()?;
    info!("single instance 'default' synthesized from env vars");
    Ok(map)
}

/// Instances that omit credentials inherit the global ODOO_* vars; a bare
/// version applies to all entries missing one.
fn apply_global_fallbacks(map: &mut InstanceMap) -> anyhow::Result<()> {
    let api_key = std::env::var("ODOO_API_KEY").ok();
    let username = std::env::var("ODOO_USERNAME").ok();
    let password = std::env::var("ODOO_PASSWORD").ok();
    let version = std::env::var("ODOO_VERSION").ok();

    for (name, desc) in map.iter_mut() {
        if desc.version.is_none() {
            desc.version = version.clone();
        }
        if !desc.has_api_key() && !desc.has_login() {
            if let Some(k) = &api_key {
                desc.api_key = Some(k.clone());
            } else if let (Some(u), Some(p)) = (&username, &password) {
                desc.username = Some(u.clone());
                desc.password = Some(p.clone());
            }
        }
        desc.validate(name)?;
    }
    Ok(())
}

fn single_instance_from_scalars() -> anyhow::Result<InstanceMap> {
    let url = std::env::var("ODOO_URL").ok().filter(|s| !s.trim().is_empty());
    let Some(url) = url else {
        anyhow::bail!(
            "No Odoo instances configured. Set ODOO_INSTANCES, ODOO_INSTANCES_JSON, \
             or ODOO_URL plus credentials (ODOO_API_KEY, or ODOO_USERNAME + \
             ODOO_PASSWORD + ODOO_VERSION)."
        );
    };

    let desc = InstanceDescriptor {
        url: normalize_url(&url),
        db: std::env::var("ODOO_DB").ok(),
        api_key: std::env::var("ODOO_API_KEY").ok(),
        username: std::env::var("ODOO_USERNAME").ok(),
        password: std::env::var("ODOO_PASSWORD").ok(),
        version: std::env::var("ODOO_VERSION").ok(),
        protocol: None,
        timeout_ms: std::env::var("ODOO_TIMEOUT_MS").ok().and_then(|v| v.parse().ok()),
        max_retries: std::env::var("ODOO_MAX_RETRIES").ok().and_then(|v| v.parse().ok()),
        extra: HashMap::new(),
    };
    desc.validate("default")?;

    let mut map = HashMap::new();
    map.insert("default".to_string(), desc);
    Ok(map)
}
