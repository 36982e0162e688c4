//! On-disk config document store for the config-manager surface. Writes go
//! through a temp file + rename so watchers never observe a half-written
//! document; the previous bytes are kept for rollback.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Value, json};
use tracing::{error, info, warn};

/// Outcome of a save attempt, shaped for the HTTP surface: a rejected save
/// leaves the prior on-disk contents in effect (`rollback: true`).
#[derive(Debug, Clone)]
pub struct SaveOutcome {
    pub saved: bool,
    pub message: String,
    pub warning: Option<String>,
    pub rollback: bool,
}

impl SaveOutcome {
    pub fn saved(message: impl Into<String>) -> Self {
        Self {
            saved: true,
            message: message.into(),
            warning: None,
            rollback: false,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            saved: false,
            message: message.into(),
            warning: None,
            rollback: true,
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }
}

#[derive(Clone)]
pub struct ConfigStore {
    config_dir: PathBuf,
}

impl ConfigStore {
    pub fn new(config_dir: PathBuf) -> Self {
        Self { config_dir }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.config_dir.join(file)
    }

    /// Current raw bytes of a document, if present.
    pub fn read_raw(&self, file: &str) -> Option<String> {
        fs::read_to_string(self.path(file)).ok()
    }

    pub fn load_instances(&self) -> anyhow::Result<Value> {
        self.load_object("instances.json")
    }

    pub fn load_server(&self) -> anyhow::Result<Value> {
        self.load_object("server.json")
    }

    pub fn load_tools(&self) -> anyhow::Result<Value> {
        self.load_list("tools.json", "tools")
    }

    pub fn load_prompts(&self) -> anyhow::Result<Value> {
        self.load_list("prompts.json", "prompts")
    }

    fn load_object(&self, file: &str) -> anyhow::Result<Value> {
        let path = self.path(file);
        if !path.exists() {
            warn!(path = %path.display(), "config file missing, returning empty object");
            return Ok(json!({}));
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Lists are stored wrapped (`{key: [...]}`) but both forms load.
    fn load_list(&self, file: &str, key: &str) -> anyhow::Result<Value> {
        let path = self.path(file);
        if !path.exists() {
            warn!(path = %path.display(), "config file missing, returning empty array");
            return Ok(json!([]));
        }
        let content = fs::read_to_string(&path)?;
        let doc: Value = serde_json::from_str(&content)?;
        if doc.is_array() {
            return Ok(doc);
        }
        doc.get(key)
            .filter(|v| v.is_array())
            .cloned()
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "invalid {file}: expected an array or an object with a '{key}' array"
                )
            })
    }

    /// Commit a document atomically: serialize, write a sibling temp file,
    /// rename over the target.
    pub fn write_document(&self, file: &str, doc: &Value) -> anyhow::Result<()> {
        let path = self.path(file);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let bytes = serde_json::to_string_pretty(doc)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &bytes)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        info!(path = %path.display(), "config document saved");
        Ok(())
    }

    /// Put previous bytes back after a failed apply.
    pub fn restore(&self, file: &str, backup: &str) {
        let path = self.path(file);
        match fs::write(&path, backup) {
            Ok(()) => info!(path = %path.display(), "restored previous config"),
            Err(e) => error!(path = %path.display(), error = %e, "failed to restore config"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().to_path_buf());

        let doc = json!({"tools": [{"name": "t", "description": "d",
            "inputSchema": {"type": "object"}, "op": {"type": "search", "map": {}}}]});
        store.write_document("tools.json", &doc).unwrap();
        let loaded = store.load_tools().unwrap();
        assert_eq!(loaded, doc["tools"]);
    }

    #[test]
    fn load_list_accepts_bare_arrays() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().to_path_buf());
        fs::write(store.path("prompts.json"), "[]").unwrap();
        assert_eq!(store.load_prompts().unwrap(), json!([]));
    }

    #[test]
    fn missing_files_load_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().to_path_buf());
        assert_eq!(store.load_instances().unwrap(), json!({}));
        assert_eq!(store.load_tools().unwrap(), json!([]));
    }

    #[test]
    fn restore_puts_bytes_back() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().to_path_buf());
        let original = r#"{"a": 1}"#;
        fs::write(store.path("server.json"), original).unwrap();
        store.write_document("server.json", &json!({"b": 2})).unwrap();
        store.restore("server.json", original);
        assert_eq!(store.read_raw("server.json").unwrap(), original);
    }

    #[test]
    fn write_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().to_path_buf());
        store.write_document("server.json", &json!({})).unwrap();
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
