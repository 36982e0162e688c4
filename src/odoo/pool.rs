use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::cache::MetadataCache;
use crate::error::{ServerError, ServerResult};

use super::client::OdooClient;
use super::store::{InstanceMap, InstanceStore};

/// Lazily constructs and shares one client handle per instance name.
/// Construction is double-checked under the write lock; concurrent callers
/// share the same handle, and a descriptor swap drops the old handle while
/// in-flight calls finish on their clone.
#[derive(Clone)]
pub struct ClientPool {
    store: Arc<InstanceStore>,
    cache: MetadataCache,
    clients: Arc<RwLock<HashMap<String, OdooClient>>>,
}

impl ClientPool {
    pub fn new(store: Arc<InstanceStore>, cache: MetadataCache) -> Self {
        Self {
            store,
            cache,
            clients: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let store = Arc::new(InstanceStore::from_env()?);
        Ok(Self::new(store, MetadataCache::from_env()))
    }

    pub fn store(&self) -> &Arc<InstanceStore> {
        &self.store
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    pub async fn instance_names(&self) -> Vec<String> {
        self.store.names().await
    }

    pub async fn get(&self, instance: &str) -> ServerResult<OdooClient> {
        if let Some(c) = self.clients.read().await.get(instance) {
            return Ok(c.clone());
        }

        let mut guard = self.clients.write().await;
        if let Some(c) = guard.get(instance) {
            return Ok(c.clone());
        }

        let Some(desc) = self.store.get(instance).await else {
            let available = self.store.names().await.join(", ");
            return Err(ServerError::invalid_arguments(format!(
                "Unknown Odoo instance '{instance}'. Available: {available}"
            )));
        };

        if let Err(e) = desc.select_protocol() {
            return Err(ServerError::Authentication(format!(
                "instance '{instance}': {e}"
            )));
        }
        let client = OdooClient::connect(&desc)
            .map_err(|e| ServerError::internal(format!("instance '{instance}': {e}")))?;
        debug!(instance, legacy = client.is_legacy(), "constructed Odoo client");
        guard.insert(instance.to_string(), client.clone());
        Ok(client)
    }

    /// Publish a new instance mapping: stale handles are dropped and their
    /// cached metadata cleared. Returns the affected names.
    pub async fn apply_instances(&self, new: InstanceMap) -> Vec<String> {
        let stale = self.store.replace(new).await;
        if !stale.is_empty() {
            let mut guard = self.clients.write().await;
            for name in &stale {
                guard.remove(name);
                self.cache.clear_instance(name).await;
            }
            info!(count = stale.len(), "dropped client handles after config change");
        }
        stale
    }
}
