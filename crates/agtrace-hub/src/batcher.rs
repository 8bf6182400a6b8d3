//! Event Batcher / Hub: coalesces `ChangeEvent`s into envelopes and
//! broadcasts them to subscribers (spec.md §4.I).

use std::collections::HashMap;
use std::time::Duration;

use agtrace_types::ChangeEvent;
use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::envelope::{self, BatchInfo, Envelope};

/// Clamp bounds and defaults named in spec.md §4.I.
pub const MIN_FLUSH_INTERVAL: Duration = Duration::from_secs(10);
pub const MAX_FLUSH_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_MAP_CAP: usize = 100;
pub const DEFAULT_REQUEUE_WINDOW: Duration = Duration::from_secs(5);
pub const DEFAULT_DEDUP_RETENTION: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_SUBSCRIBER_QUEUE: usize = 256;

pub fn clamp_flush_interval(requested: Duration) -> Duration {
    requested.clamp(MIN_FLUSH_INTERVAL, MAX_FLUSH_INTERVAL)
}

struct PendingEntry {
    event: ChangeEvent,
    count: u32,
    first_seen: Instant,
    last_seen: Instant,
}

/// Tunables for one Hub instance, already clamped/defaulted by the caller.
#[derive(Debug, Clone, Copy)]
pub struct HubConfig {
    pub flush_interval: Duration,
    pub map_cap: usize,
    pub requeue_window: Duration,
    pub dedup_retention: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        HubConfig {
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            map_cap: DEFAULT_MAP_CAP,
            requeue_window: DEFAULT_REQUEUE_WINDOW,
            dedup_retention: DEFAULT_DEDUP_RETENTION,
        }
    }
}

/// Construct the broadcast channel subscribers attach to, and spawn the Hub
/// task that feeds it from `events`. Returns the sender side for new
/// subscribers (cloneable) and the task's join handle.
pub fn spawn(
    events: mpsc::Receiver<ChangeEvent>,
    config: HubConfig,
    cancel: CancellationToken,
) -> (broadcast::Sender<Envelope>, tokio::task::JoinHandle<()>) {
    let (broadcast_tx, _) = broadcast::channel(DEFAULT_SUBSCRIBER_QUEUE.max(64));
    let tx_for_task = broadcast_tx.clone();
    let handle = tokio::spawn(run(events, tx_for_task, config, cancel));
    (broadcast_tx, handle)
}

async fn run(mut events: mpsc::Receiver<ChangeEvent>, broadcast_tx: broadcast::Sender<Envelope>, config: HubConfig, cancel: CancellationToken) {
    let mut pending: HashMap<String, PendingEntry> = HashMap::new();
    let mut dedup: HashMap<String, Instant> = HashMap::new();
    let mut flush_tick = tokio::time::interval(config.flush_interval);
    let mut sweep_tick = tokio::time::interval(config.dedup_retention.max(Duration::from_secs(1)));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                flush(&mut pending, &mut dedup, &broadcast_tx, config.flush_interval);
                info!("hub shutting down");
                break;
            }
            maybe_event = events.recv() => {
                match maybe_event {
                    Some(event) => handle_event(event, &mut pending, &mut dedup, &broadcast_tx, &config),
                    None => {
                        flush(&mut pending, &mut dedup, &broadcast_tx, config.flush_interval);
                        break;
                    }
                }
            }
            _ = flush_tick.tick() => {
                flush(&mut pending, &mut dedup, &broadcast_tx, config.flush_interval);
            }
            _ = sweep_tick.tick() => {
                let cutoff = Instant::now() - config.dedup_retention;
                dedup.retain(|_, seen_at| *seen_at > cutoff);
            }
        }
    }
}

fn handle_event(
    event: ChangeEvent,
    pending: &mut HashMap<String, PendingEntry>,
    dedup: &mut HashMap<String, Instant>,
    broadcast_tx: &broadcast::Sender<Envelope>,
    config: &HubConfig,
) {
    if event.is_always_immediate() {
        let _ = broadcast_tx.send(envelope::immediate_envelope(&event));
        return;
    }

    let key = event.dedup_key();
    if let Some(seen_at) = dedup.get(&key)
        && seen_at.elapsed() < config.requeue_window
    {
        debug!(key = %key, "dropping re-queued event within dedup window");
        return;
    }

    let now = Instant::now();
    pending
        .entry(key)
        .and_modify(|entry| {
            entry.event = event.clone();
            entry.count += 1;
            entry.last_seen = now;
        })
        .or_insert_with(|| PendingEntry { event, count: 1, first_seen: now, last_seen: now });

    if pending.len() >= config.map_cap {
        flush(pending, dedup, broadcast_tx, config.flush_interval);
    }
}

fn flush(
    pending: &mut HashMap<String, PendingEntry>,
    dedup: &mut HashMap<String, Instant>,
    broadcast_tx: &broadcast::Sender<Envelope>,
    flush_interval: Duration,
) {
    if pending.is_empty() {
        return;
    }

    let now = Utc::now().timestamp();
    let flushed_at = Instant::now();
    let total_occurrences: u32 = pending.values().map(|e| e.count).sum();
    let event_count = pending.len();

    let events: Vec<_> = pending
        .drain()
        .map(|(key, entry)| {
            dedup.insert(key, flushed_at);
            let elapsed = entry.last_seen.saturating_duration_since(entry.first_seen).as_secs() as i64;
            envelope::batched_event(&entry.event, entry.count, now - elapsed, now)
        })
        .collect();

    let envelope = Envelope::BatchedUpdates {
        events,
        batch_info: BatchInfo { event_count, total_occurrences, batch_interval_seconds: flush_interval.as_secs() },
        timestamp: now,
    };
    let _ = broadcast_tx.send(envelope);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn immediate_events_broadcast_without_batching() {
        let (events_tx, events_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let (broadcast_tx, _handle) = spawn(events_rx, HubConfig::default(), cancel.clone());
        let mut sub = broadcast_tx.subscribe();

        events_tx.send(ChangeEvent::SessionNew { session_id: "s1".into() }).await.unwrap();
        let envelope = sub.recv().await.unwrap();
        assert!(matches!(envelope, Envelope::SessionNew { .. }));
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn batched_events_wait_for_the_flush_timer() {
        let (events_tx, events_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let config = HubConfig { flush_interval: Duration::from_secs(10), ..Default::default() };
        let (broadcast_tx, _handle) = spawn(events_rx, config, cancel.clone());
        let mut sub = broadcast_tx.subscribe();

        events_tx.send(ChangeEvent::SessionUpdate { session_id: "s1".into() }).await.unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;
        let envelope = sub.recv().await.unwrap();
        assert!(matches!(envelope, Envelope::BatchedUpdates { .. }));
        cancel.cancel();
    }
}
