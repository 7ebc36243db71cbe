//! Watch mode: batches of file changes that trigger a suite rerun

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::E2eResult;

/// Debounced stream of changed paths
pub struct ChangeStream {
    batches: mpsc::UnboundedReceiver<Vec<PathBuf>>,
    // Dropping the watcher ends the stream
    _watcher: Option<RecommendedWatcher>,
}

impl ChangeStream {
    /// Watch `paths` recursively. Events are grouped until `debounce` passes
    /// without a new one. Must be called inside a tokio runtime.
    pub fn watch(paths: &[PathBuf], debounce: Duration) -> E2eResult<Self> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let _ = event_tx.send(event);
                }
                Err(e) => warn!(error = %e, "File watch error"),
            },
            Config::default(),
        )?;

        for path in paths {
            watcher.watch(path, RecursiveMode::Recursive)?;
            info!("Watching for changes in {}", path.display());
        }

        let (batch_tx, batches) = mpsc::unbounded_channel();
        tokio::spawn(debounce_events(event_rx, batch_tx, debounce));

        Ok(Self {
            batches,
            _watcher: Some(watcher),
        })
    }

    /// Stream fed by an existing channel of batches
    pub fn from_receiver(batches: mpsc::UnboundedReceiver<Vec<PathBuf>>) -> Self {
        Self {
            batches,
            _watcher: None,
        }
    }

    /// Next batch of changed paths; `None` once watching has stopped
    pub async fn next_batch(&mut self) -> Option<Vec<PathBuf>> {
        self.batches.recv().await
    }
}

async fn debounce_events(
    mut events: mpsc::UnboundedReceiver<Event>,
    batches: mpsc::UnboundedSender<Vec<PathBuf>>,
    debounce: Duration,
) {
    while let Some(first) = events.recv().await {
        let mut changed = relevant_paths(&first);

        // Accumulate until `debounce` of silence
        while let Ok(Some(event)) = timeout(debounce, events.recv()).await {
            changed.extend(relevant_paths(&event));
        }

        if changed.is_empty() {
            continue;
        }
        changed.sort();
        changed.dedup();
        debug!(count = changed.len(), "Change batch");

        if batches.send(changed).is_err() {
            break;
        }
    }
}

/// Paths of an event worth rerunning for
fn relevant_paths(event: &Event) -> Vec<PathBuf> {
    if matches!(event.kind, EventKind::Access(_)) {
        return Vec::new();
    }
    event
        .paths
        .iter()
        .filter(|p| !is_ignored_path(p))
        .cloned()
        .collect()
}

/// Check if a path should be ignored
fn is_ignored_path(path: &Path) -> bool {
    let in_ignored_dir = path.components().any(|c| match c {
        Component::Normal(name) => {
            name == ".git" || name == "node_modules" || name == "target" || name == ".sass-cache"
        }
        _ => false,
    });
    if in_ignored_dir {
        return true;
    }

    // Editor swap and backup files
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    file_name.ends_with('~')
        || file_name.ends_with(".swp")
        || file_name.ends_with(".swx")
        || file_name.starts_with(".#")
}
