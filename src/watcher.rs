//! File-change driven refresh

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    sync::Arc,
};

use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, warn};

use crate::{ConfigError, FigmentSource, RefreshTrigger};

/// Watches the file behind a [`FigmentSource`].
///
/// Each change reloads the source; a successful reload signals the refresh
/// trigger, a failed one keeps the previous configuration and is logged.
/// Watching stops when the returned guard is dropped.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
    path: PathBuf,
}

impl ConfigWatcher {
    pub fn spawn(source: Arc<FigmentSource>, trigger: RefreshTrigger) -> Result<Self, ConfigError> {
        let path = source
            .path()
            .map(Path::to_path_buf)
            .ok_or(ConfigError::NotFileBacked)?;
        let file_name = path.file_name().map(OsString::from);

        let (tx, mut rx) = mpsc::channel::<()>(1);
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let touches_file = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(OsString::from) == file_name);
                    if touches_file && (event.kind.is_modify() || event.kind.is_create()) {
                        // A full channel already holds a pending reload
                        let _ = tx.try_send(());
                    }
                }
                Err(e) => warn!("Configuration watch event error: {}", e),
            },
            NotifyConfig::default(),
        )?;

        // Editors often replace the file, so watch its directory
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        debug!("Watching configuration file {}", path.display());

        let task = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                match source.reload() {
                    Ok(()) => {
                        if !trigger.signal() {
                            debug!("Refresh listener gone, stopping configuration watch");
                            break;
                        }
                    }
                    Err(e) => error!("Failed to reload configuration: {}", e),
                }
            }
        });

        Ok(Self {
            _watcher: watcher,
            task,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConfigSource, RefreshCoordinator, TtlRegistry};
    use figment::{Figment, providers::{Format, Toml}};
    use std::time::Duration;

    #[tokio::test]
    async fn test_in_memory_source_cannot_be_watched() {
        let source = Arc::new(FigmentSource::new(Figment::from(Toml::string(""))));
        let registry = Arc::new(TtlRegistry::new());
        let (trigger, _handle) =
            Arc::new(RefreshCoordinator::new(source.clone(), registry)).spawn();

        assert!(matches!(
            ConfigWatcher::spawn(source, trigger),
            Err(ConfigError::NotFileBacked)
        ));
    }

    #[tokio::test]
    async fn test_file_change_refreshes_registry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.toml");
        std::fs::write(&path, "[cache.users]\nttl = 30\ntimeUnit = \"s\"\n").unwrap();

        let source = Arc::new(FigmentSource::from_file(&path, None).unwrap());
        let registry = Arc::new(TtlRegistry::new());
        let coordinator = Arc::new(RefreshCoordinator::new(source.clone(), registry.clone()));
        coordinator.refresh();
        assert_eq!(registry.get("users").map(|p| p.amount), Some(30));

        let (trigger, _handle) = coordinator.spawn();
        let watcher = ConfigWatcher::spawn(source.clone(), trigger).unwrap();
        assert_eq!(watcher.path(), path.as_path());

        std::fs::write(&path, "[cache.users]\nttl = 90\ntimeUnit = \"s\"\n").unwrap();

        for _ in 0..200 {
            if registry.get("users").map(|p| p.amount) == Some(90) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert_eq!(source.get_property("cache.users.ttl").as_deref(), Some("90"));
        assert_eq!(registry.get("users").map(|p| p.amount), Some(90));
    }
}
