//! Wire shapes sent to subscribers (spec.md §6, §4.I).

use agtrace_types::ChangeEvent;
use chrono::Utc;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct SessionIdPayload {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityPayload {
    pub session_id: String,
    pub kind: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsPayload {
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchedEvent {
    pub kind: String,
    pub payload: serde_json::Value,
    pub count: u32,
    pub first_seen: i64,
    pub last_seen: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchInfo {
    pub event_count: usize,
    pub total_occurrences: u32,
    pub batch_interval_seconds: u64,
}

/// Every shape a subscriber can receive, tagged by `type` (spec.md §6).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Envelope {
    #[serde(rename = "sessions_updated")]
    SessionsUpdated { timestamp: i64 },
    #[serde(rename = "session_new")]
    SessionNew { data: SessionIdPayload, timestamp: i64 },
    #[serde(rename = "session_update")]
    SessionUpdate { data: SessionIdPayload, timestamp: i64 },
    #[serde(rename = "session_deleted")]
    SessionDeleted { data: SessionIdPayload, timestamp: i64 },
    #[serde(rename = "activity_update")]
    ActivityUpdate { data: ActivityPayload, timestamp: i64 },
    #[serde(rename = "metrics_update")]
    MetricsUpdate { data: MetricsPayload, timestamp: i64 },
    #[serde(rename = "batched_updates")]
    BatchedUpdates { events: Vec<BatchedEvent>, batch_info: BatchInfo, timestamp: i64 },
    #[serde(rename = "pong")]
    Pong { timestamp: i64 },
    #[serde(rename = "subscribed")]
    Subscribed { timestamp: i64 },
    #[serde(rename = "error")]
    Error { data: ErrorPayload, timestamp: i64 },
}

fn now_secs() -> i64 {
    Utc::now().timestamp()
}

/// Label used in a [`BatchedEvent`]'s `kind` field and (prefixed with the
/// session id) the Hub's dedup-map key (spec.md §4.I).
pub fn kind_label(event: &ChangeEvent) -> &'static str {
    match event {
        ChangeEvent::SessionNew { .. } => "session_new",
        ChangeEvent::SessionUpdate { .. } => "session_update",
        ChangeEvent::SessionDeleted { .. } => "session_deleted",
        ChangeEvent::SessionsUpdated => "sessions_updated",
        ChangeEvent::ActivityUpdate { .. } => "activity_update",
        ChangeEvent::MetricsUpdate { .. } => "metrics_update",
    }
}

fn payload_json(event: &ChangeEvent) -> serde_json::Value {
    match event {
        ChangeEvent::SessionNew { session_id } | ChangeEvent::SessionUpdate { session_id } | ChangeEvent::SessionDeleted { session_id } => {
            serde_json::to_value(SessionIdPayload { session_id: session_id.clone() }).unwrap_or(serde_json::Value::Null)
        }
        ChangeEvent::SessionsUpdated => serde_json::Value::Null,
        ChangeEvent::ActivityUpdate { session_id, kind } => {
            serde_json::to_value(ActivityPayload { session_id: session_id.clone(), kind: kind.as_str().to_string() })
                .unwrap_or(serde_json::Value::Null)
        }
        ChangeEvent::MetricsUpdate { session_id } => {
            serde_json::to_value(MetricsPayload { session_id: session_id.clone() }).unwrap_or(serde_json::Value::Null)
        }
    }
}

/// Build the singleton envelope for an always-immediate event (spec.md §4.I).
pub fn immediate_envelope(event: &ChangeEvent) -> Envelope {
    let timestamp = now_secs();
    match event {
        ChangeEvent::SessionNew { session_id } => {
            Envelope::SessionNew { data: SessionIdPayload { session_id: session_id.clone() }, timestamp }
        }
        ChangeEvent::SessionDeleted { session_id } => {
            Envelope::SessionDeleted { data: SessionIdPayload { session_id: session_id.clone() }, timestamp }
        }
        ChangeEvent::SessionsUpdated => Envelope::SessionsUpdated { timestamp },
        ChangeEvent::SessionUpdate { session_id } => {
            Envelope::SessionUpdate { data: SessionIdPayload { session_id: session_id.clone() }, timestamp }
        }
        ChangeEvent::ActivityUpdate { session_id, kind } => {
            Envelope::ActivityUpdate { data: ActivityPayload { session_id: session_id.clone(), kind: kind.as_str().to_string() }, timestamp }
        }
        ChangeEvent::MetricsUpdate { session_id } => {
            Envelope::MetricsUpdate { data: MetricsPayload { session_id: session_id.clone() }, timestamp }
        }
    }
}

/// Build one [`BatchedEvent`] entry from a dedup-map slot.
pub fn batched_event(event: &ChangeEvent, count: u32, first_seen: i64, last_seen: i64) -> BatchedEvent {
    BatchedEvent { kind: kind_label(event).to_string(), payload: payload_json(event), count, first_seen, last_seen }
}

pub fn pong() -> Envelope {
    Envelope::Pong { timestamp: now_secs() }
}

pub fn subscribed() -> Envelope {
    Envelope::Subscribed { timestamp: now_secs() }
}

pub fn error(message: impl Into<String>) -> Envelope {
    Envelope::Error { data: ErrorPayload { message: message.into() }, timestamp: now_secs() }
}
