//! Startup and shutdown ordering for one workspace (spec.md §4.K).
//!
//! The caller opens the store (migrations and stuck-run cleanup happen
//! inside [`Store::open`]) and hands it in already wrapped in an `Arc`, since
//! the Hub needs the same handle. From there: run the catch-up scan, run the
//! initial import, then start the watcher only once that import has
//! completed. Shutdown reverses the order under one overall time budget,
//! forcing the store closed if the budget is exceeded.

use std::sync::Arc;

use agtrace_index::Store;
use agtrace_types::{ChangeEvent, RunKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::RuntimeConfig;
use crate::importer::{ImportRunSummary, Importer};
use crate::watcher;
use crate::{Error, Result};

/// A running workspace: the store, the importer, and (once the initial
/// import completes) the file watcher. The Hub and Subscription Endpoint are
/// a separate crate, wired in via `events` rather than owned here (spec.md
/// §9: no process-wide singletons beyond the store and hub handles, both
/// passed explicitly).
pub struct Runtime {
    pub store: Arc<Store>,
    pub config: RuntimeConfig,
    importer: Arc<Importer>,
    watcher_handle: Option<tokio::task::JoinHandle<()>>,
    cancel: CancellationToken,
}

impl Runtime {
    /// Run the startup sequence (spec.md §4.K steps 3, 6, 7) over an
    /// already-open store. Steps 1 (open the store; migrations and stuck-run
    /// cleanup happen inside `Store::open`) and 2 happen in the caller, since
    /// the Hub (step 4) needs the same store handle before the importer
    /// finishes its first pass (spec.md §5: the store and hub handles are
    /// the only process-wide state, both passed explicitly rather than
    /// opened redundantly).
    pub async fn start(config: RuntimeConfig, store: Arc<Store>, events: Option<mpsc::Sender<ChangeEvent>>) -> Result<Self> {
        let cancel = CancellationToken::new();
        let importer = Arc::new(Importer::new(store.clone(), config.clone(), events));

        // Step 3: mark anything modified since the last completed run as
        // pending, so the initial pass below picks it back up.
        let catchup_importer = importer.clone();
        let marked = tokio::task::spawn_blocking(move || catchup_importer.catch_up())
            .await
            .map_err(|err| Error::InvalidOperation(format!("catch-up task panicked: {err}")))??;
        if marked > 0 {
            info!(files = marked, "catch-up scan re-marked files modified since the last completed run");
        }

        // Steps 4-5 (Hub start, subscriber acceptance) happen in the caller.

        // Step 6: run the initial import synchronously before starting the
        // watcher, so step 7 never races a cold store.
        let initial_importer = importer.clone();
        let initial_cancel = cancel.clone();
        let summary: ImportRunSummary = tokio::task::spawn_blocking(move || initial_importer.run(RunKind::Initial, &initial_cancel))
            .await
            .map_err(|err| Error::InvalidOperation(format!("initial import task panicked: {err}")))??;
        info!(
            files_processed = summary.files_processed,
            sessions_imported = summary.sessions_imported,
            messages_imported = summary.messages_imported,
            "initial import completed"
        );

        // Step 7: start the watcher only now that the initial import is done.
        let watcher_handle = watcher::spawn(
            config.log_root.clone(),
            config.debounce_window(),
            config.create_grace_period(),
            importer.clone(),
            cancel.clone(),
        )?;

        Ok(Runtime { store, config, importer, watcher_handle: Some(watcher_handle), cancel })
    }

    pub fn importer(&self) -> &Arc<Importer> {
        &self.importer
    }

    /// Run the shutdown sequence under one overall budget (spec.md §4.K):
    /// cancel the root context, stop the watcher, then close the store.
    /// Exceeding the budget at any step logs a warning and proceeds to force
    /// the next step rather than hanging.
    pub async fn shutdown(mut self) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.config.shutdown_budget();

        self.cancel.cancel();

        if let Some(handle) = self.watcher_handle.take() {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, handle).await.is_err() {
                warn!("file watcher did not stop within the shutdown budget; abandoning it");
            }
        }

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let store = self.store;
        if tokio::time::timeout(remaining, tokio::task::spawn_blocking(move || drop(store))).await.is_err() {
            warn!("store did not close within the shutdown budget; forcing process-level close");
        }

        Ok(())
    }
}
