use crate::ActivityKind;

/// A change notification emitted by the Batch Writer as it commits rows, fed
/// to the Hub for coalesced fan-out (spec.md §4.I). Carries just enough to
/// key the Hub's dedup map and to re-derive the envelope payload; it never
/// carries full row data, so the Hub stays a thin relay over the Store.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// A session id appeared in the store for the first time this process.
    SessionNew { session_id: String },
    /// An existing session's summary fields changed.
    SessionUpdate { session_id: String },
    /// A session was removed (not currently triggered by ingest, but kept as
    /// a distinct always-immediate kind per spec.md §4.I).
    SessionDeleted { session_id: String },
    /// The full session list should be considered stale (e.g. after a
    /// replace-mode import of many sessions at once).
    SessionsUpdated,
    /// A new activity-log-worthy occurrence for a session.
    ActivityUpdate { session_id: String, kind: ActivityKind },
    /// Aggregate metrics for a session (or, if `None`, the whole store) moved.
    MetricsUpdate { session_id: Option<String> },
}

impl ChangeEvent {
    /// Whether this kind is always-immediate or eligible for batching
    /// (spec.md §4.I).
    pub fn is_always_immediate(&self) -> bool {
        matches!(
            self,
            ChangeEvent::SessionNew { .. } | ChangeEvent::SessionDeleted { .. } | ChangeEvent::SessionsUpdated
        )
    }

    /// The Hub's dedup-map key for this event (spec.md §4.I mechanism).
    pub fn dedup_key(&self) -> String {
        match self {
            ChangeEvent::SessionNew { session_id } => format!("session_new:{session_id}"),
            ChangeEvent::SessionUpdate { session_id } => format!("session_update:{session_id}"),
            ChangeEvent::SessionDeleted { session_id } => format!("session_deleted:{session_id}"),
            ChangeEvent::SessionsUpdated => "sessions_updated".to_string(),
            ChangeEvent::ActivityUpdate { session_id, kind } => {
                format!("activity_update:{}:{session_id}", kind.as_str())
            }
            ChangeEvent::MetricsUpdate { session_id } => match session_id {
                Some(id) => format!("metrics_update:{id}"),
                None => "metrics_update".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_lifecycle_events_are_always_immediate() {
        assert!(ChangeEvent::SessionNew { session_id: "s1".into() }.is_always_immediate());
        assert!(ChangeEvent::SessionDeleted { session_id: "s1".into() }.is_always_immediate());
        assert!(ChangeEvent::SessionsUpdated.is_always_immediate());
    }

    #[test]
    fn update_events_are_batched() {
        assert!(!ChangeEvent::SessionUpdate { session_id: "s1".into() }.is_always_immediate());
        assert!(!ChangeEvent::MetricsUpdate { session_id: None }.is_always_immediate());
    }

    #[test]
    fn dedup_key_scopes_by_session_and_kind() {
        let a = ChangeEvent::ActivityUpdate { session_id: "s1".into(), kind: ActivityKind::FileModified };
        let b = ChangeEvent::ActivityUpdate { session_id: "s1".into(), kind: ActivityKind::ToolUsed };
        assert_ne!(a.dedup_key(), b.dedup_key());
    }
}
