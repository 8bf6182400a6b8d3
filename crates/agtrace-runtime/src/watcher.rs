//! Recursive file-system watch over the monitored log tree (spec.md §4.G).
//!
//! Create and Modify events on `.jsonl` files are debounced per path and
//! collapsed into a single incremental import pass; Delete/Rename events are
//! only logged, since rows already persisted are retained regardless.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::importer::Importer;
use crate::{Error, Result};

const POLL_TICK: Duration = Duration::from_millis(100);

/// Start the watcher task. Returns a handle the lifecycle joins on shutdown;
/// the watch is already active once this returns.
pub fn spawn(
    log_root: PathBuf,
    debounce_window: Duration,
    create_grace_period: Duration,
    importer: Arc<Importer>,
    cancel: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let (raw_tx, raw_rx) = mpsc::unbounded_channel::<notify::Event>();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                let _ = raw_tx.send(event);
            }
            Err(err) => warn!(error = %err, "watch error"),
        },
        notify::Config::default(),
    )
    .map_err(|err| Error::InvalidOperation(format!("failed to start file watcher: {err}")))?;

    watcher
        .watch(&log_root, RecursiveMode::Recursive)
        .map_err(|err| Error::InvalidOperation(format!("failed to watch {}: {err}", log_root.display())))?;

    info!(root = %log_root.display(), "file watcher started");

    let handle = tokio::spawn(async move {
        // Keep the watcher alive for the task's lifetime; it stops emitting
        // once dropped at the end of this function.
        let _watcher = watcher;
        run_loop(raw_rx, debounce_window, create_grace_period, importer, cancel).await;
    });

    Ok(handle)
}

async fn run_loop(
    mut raw_rx: mpsc::UnboundedReceiver<notify::Event>,
    debounce_window: Duration,
    create_grace_period: Duration,
    importer: Arc<Importer>,
    cancel: CancellationToken,
) {
    let mut pending: HashMap<PathBuf, Instant> = HashMap::new();
    let mut tick = tokio::time::interval(POLL_TICK);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("file watcher shutting down");
                flush_due(&mut pending, &importer, &cancel, true).await;
                break;
            }
            event = raw_rx.recv() => {
                match event {
                    Some(event) => handle_event(event, &mut pending, debounce_window, create_grace_period),
                    None => break,
                }
            }
            _ = tick.tick() => {
                flush_due(&mut pending, &importer, &cancel, false).await;
            }
        }
    }
}

fn handle_event(event: notify::Event, pending: &mut HashMap<PathBuf, Instant>, debounce_window: Duration, create_grace_period: Duration) {
    for path in &event.paths {
        if !is_log_file(path) {
            continue;
        }
        match event.kind {
            EventKind::Create(_) => {
                pending.insert(path.clone(), Instant::now() + create_grace_period);
            }
            EventKind::Modify(_) => {
                pending.insert(path.clone(), Instant::now() + debounce_window);
            }
            EventKind::Remove(_) => {
                info!(path = %path.display(), "log file removed, retaining imported rows");
                pending.remove(path);
            }
            _ => {}
        }
    }
}

/// Run an incremental import pass if any path's debounce deadline has
/// passed. `force` drains every still-pending path regardless of deadline,
/// used once on shutdown so a burst right before exit isn't dropped.
async fn flush_due(pending: &mut HashMap<PathBuf, Instant>, importer: &Arc<Importer>, cancel: &CancellationToken, force: bool) {
    if pending.is_empty() {
        return;
    }
    let now = Instant::now();
    let due = pending.iter().any(|(_, deadline)| force || *deadline <= now);
    if !due {
        return;
    }
    pending.retain(|_, deadline| !force && *deadline > now);

    let importer = importer.clone();
    let cancel = cancel.clone();
    let result = tokio::task::spawn_blocking(move || importer.run(agtrace_types::RunKind::Incremental, &cancel)).await;
    match result {
        Ok(Ok(summary)) => info!(files = summary.files_processed, "watcher-triggered import completed"),
        Ok(Err(err)) => warn!(error = %err, "watcher-triggered import failed"),
        Err(err) => warn!(error = %err, "watcher-triggered import task panicked"),
    }
}

fn is_log_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "jsonl")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_jsonl_paths_only() {
        assert!(is_log_file(Path::new("/a/b/session.jsonl")));
        assert!(!is_log_file(Path::new("/a/b/session.json")));
        assert!(!is_log_file(Path::new("/a/b/notes.txt")));
    }
}
