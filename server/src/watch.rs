//! Asset watcher: tells every live session that the scene or script changed

use anyhow::{Context, Result};
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

const DEBOUNCE: Duration = Duration::from_millis(200);

/// Parent directories to watch, deduplicated. Bare file names map to `.`.
pub fn watch_dirs(files: &[PathBuf]) -> Vec<PathBuf> {
    let dirs: BTreeSet<PathBuf> = files
        .iter()
        .map(|file| match file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        })
        .collect();
    dirs.into_iter().collect()
}

pub fn is_watched(files: &[PathBuf], changed: &Path) -> bool {
    files.iter().any(|file| {
        changed == file || (file.file_name().is_some() && changed.file_name() == file.file_name())
    })
}

/// Publish a unit event whenever one of `files` changes. Runs until the
/// watcher shuts down.
pub async fn watch_files(files: Vec<PathBuf>, changes: broadcast::Sender<()>) -> Result<()> {
    let (notify_tx, mut notify_rx) = mpsc::channel::<PathBuf>(10);

    let mut debouncer = new_debouncer(DEBOUNCE, move |res: DebounceEventResult| match res {
        Ok(events) => {
            for event in events {
                let _ = notify_tx.blocking_send(event.path);
            }
        }
        Err(e) => warn!("Watch error: {:?}", e),
    })
    .context("Failed to create file watcher")?;

    for dir in watch_dirs(&files) {
        debouncer
            .watcher()
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {:?}", dir))?;
        info!("Watching directory: {:?}", dir);
    }

    while let Some(changed) = notify_rx.recv().await {
        if is_watched(&files, &changed) {
            info!("{:?} changed, notifying sessions", changed);
            // Err only means no session is connected
            let _ = changes.send(());
        }
    }

    Ok(())
}
