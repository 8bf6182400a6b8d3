//! Event Batcher and websocket Subscription Endpoint over the session store
//! (spec.md §4.I, §4.J).

mod batcher;
mod envelope;
mod error;
mod server;
mod ws;

pub use batcher::{HubConfig, DEFAULT_DEDUP_RETENTION, DEFAULT_FLUSH_INTERVAL, DEFAULT_MAP_CAP, DEFAULT_REQUEUE_WINDOW};
pub use envelope::Envelope;
pub use error::{Error, Result};
pub use server::{bind_with_fallback, serve, AppState};

use std::sync::Arc;

use agtrace_index::Store;
use agtrace_types::ChangeEvent;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Construct the Hub: spawns the batching task and returns the app state a
/// [`server::serve`] call needs plus the sender the Importer's events feed
/// into (spec.md §4.K steps 4-5, owned by the caller, not by
/// `agtrace_runtime::lifecycle::Runtime`).
pub fn spawn(store: Arc<Store>, config: HubConfig, cancel: CancellationToken) -> (mpsc::Sender<ChangeEvent>, AppState, tokio::task::JoinHandle<()>) {
    let (events_tx, events_rx) = mpsc::channel(1024);
    let (broadcast_tx, handle) = batcher::spawn(events_rx, config, cancel);
    (events_tx, AppState { store, broadcast_tx }, handle)
}
