use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use super::Registry;

const DEBOUNCE_MS: u64 = 150;

/// Keeps the notify watcher alive for the registry's lifetime.
pub struct RegistryWatcher {
    _watcher: RecommendedWatcher,
}

/// Watch the registry's config directories and reload on change. Multiple
/// filesystem events within the debounce window collapse into one reload;
/// a failed reload logs and keeps the last good snapshot.
pub fn start(registry: Arc<Registry>) -> Option<RegistryWatcher> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<()>();

    let reload_target = Arc::clone(&registry);
    tokio::spawn(async move {
        while rx.recv().await.is_some() {
            tokio::time::sleep(std::time::Duration::from_millis(DEBOUNCE_MS)).await;
            while rx.try_recv().is_ok() {}
            if let Err(e) = reload_target.reload().await {
                warn!(error = %e, "config reload failed; keeping last good snapshot");
            }
        }
    });

    let mut watcher = match notify::recommended_watcher(move |res| match res {
        Ok(event) => {
            debug!(?event, "config fs event");
            let _ = tx.send(());
        }
        Err(err) => warn!(error = %err, "config watcher error"),
    }) {
        Ok(w) => w,
        Err(e) => {
            warn!(error = %e, "failed to create config watcher; hot reload disabled");
            return None;
        }
    };

    let mut dirs: Vec<PathBuf> = registry
        .paths()
        .iter()
        .map(|p| parent_or_current(p))
        .collect();
    dirs.sort();
    dirs.dedup();

    for dir in dirs {
        match watcher.watch(&dir, RecursiveMode::NonRecursive) {
            Ok(()) => info!(dir = %dir.display(), "watching config directory"),
            Err(e) => warn!(dir = %dir.display(), error = %e, "failed to watch config directory"),
        }
    }

    Some(RegistryWatcher { _watcher: watcher })
}

fn parent_or_current(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_or_current_falls_back_to_dot() {
        assert_eq!(
            parent_or_current(Path::new("tools.json")),
            PathBuf::from(".")
        );
        assert_eq!(
            parent_or_current(Path::new("/etc/app/tools.json")),
            PathBuf::from("/etc/app")
        );
    }
}
