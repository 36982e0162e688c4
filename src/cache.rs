use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::RwLock;

pub const DEFAULT_TTL_SECS: u64 = 3_600;

type CacheKey = (String, String);
type CacheEntry = (Value, Instant);

/// TTL cache for per-(instance, model) `fields_get` payloads. Entries are
/// evicted lazily on read; duplicate concurrent misses are acceptable and
/// the last writer wins. Descriptor changes clear the instance's entries.
#[derive(Clone)]
pub struct MetadataCache {
    entries: Arc<RwLock<HashMap<CacheKey, CacheEntry>>>,
    ttl: Duration,
}

impl MetadataCache {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// TTL from `ODOO_METADATA_CACHE_TTL_SECS`, defaulting to one hour.
    pub fn from_env() -> Self {
        let secs = std::env::var("ODOO_METADATA_CACHE_TTL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TTL_SECS);
        Self::with_ttl(Duration::from_secs(secs))
    }

    pub async fn get(&self, instance: &str, model: &str) -> Option<Value> {
        let key = (instance.to_string(), model.to_string());
        let guard = self.entries.read().await;
        match guard.get(&key) {
            Some((value, expires)) if Instant::now() < *expires => Some(value.clone()),
            _ => None,
        }
    }

    pub async fn insert(&self, instance: &str, model: &str, value: Value) {
        let key = (instance.to_string(), model.to_string());
        let expires = Instant::now() + self.ttl;
        self.entries.write().await.insert(key, (value, expires));
    }

    pub async fn clear_instance(&self, instance: &str) {
        self.entries
            .write()
            .await
            .retain(|(inst, _), _| inst != instance);
    }

    pub async fn clear_all(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::with_ttl(Duration::from_secs(DEFAULT_TTL_SECS))
    }
}
