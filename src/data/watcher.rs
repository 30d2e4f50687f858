//! Data file watcher for hot reload.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// Why a reload was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadTrigger {
    FileChanged,
    Signal,
}

/// Monitors the primary node's data file and requests a reload when it changes.
pub struct DataWatcher {
    path: PathBuf,
    reload_tx: mpsc::UnboundedSender<ReloadTrigger>,
}

impl DataWatcher {
    pub fn new(path: &Path, reload_tx: mpsc::UnboundedSender<ReloadTrigger>) -> Self {
        Self {
            path: path.to_path_buf(),
            reload_tx,
        }
    }

    /// Start watching. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.reload_tx.clone();
        let file_name = self.path.file_name().map(|n| n.to_os_string());

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let ours = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if ours && (event.kind.is_modify() || event.kind.is_create()) {
                        tracing::info!("Data file change detected, requesting reload");
                        let _ = tx.send(ReloadTrigger::FileChanged);
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Data file watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        // the directory, so atomic replace-by-rename is still seen
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Data file watcher started");
        Ok(watcher)
    }
}
