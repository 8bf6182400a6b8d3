use agtrace_types::{ActivityEntry, Session};
use chrono::{DateTime, Utc};

/// A session row joined with its aggregated token and cost totals (the
/// `session_summary` view's columns), with `is_active` recomputed at query
/// time against the idleness window rather than trusting the persisted flag.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub session: Session,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cache_creation_tokens: u64,
    pub total_cache_read_tokens: u64,
    pub total_cost: f64,
}

impl SessionSummary {
    pub fn total_tokens(&self) -> u64 {
        self.total_input_tokens
            + self.total_output_tokens
            + self.total_cache_creation_tokens
            + self.total_cache_read_tokens
    }
}

/// `get-session`'s richer view: a summary plus the distinct set of file
/// paths touched by the session's persisted tool results.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionDetail {
    pub summary: SessionSummary,
    pub file_paths: Vec<String>,
}

/// One bucket of a token timeline, keyed by its bucket start.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBucket {
    pub bucket_start: DateTime<Utc>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    pub cost: f64,
    pub message_count: u64,
}

impl TokenBucket {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_creation_tokens + self.cache_read_tokens
    }
}

/// Timeline bucket granularity (spec.md §4.H); any other string is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Minute,
    Hour,
    Day,
}

impl Granularity {
    /// SQLite `strftime` format truncating a timestamp to this bucket's start.
    pub(crate) fn strftime_format(self) -> &'static str {
        match self {
            Granularity::Minute => "%Y-%m-%dT%H:%M:00Z",
            Granularity::Hour => "%Y-%m-%dT%H:00:00Z",
            Granularity::Day => "%Y-%m-%dT00:00:00Z",
        }
    }
}

impl std::str::FromStr for Granularity {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minute" => Ok(Granularity::Minute),
            "hour" => Ok(Granularity::Hour),
            "day" => Ok(Granularity::Day),
            _ => Err(()),
        }
    }
}

/// One distinct file path touched by a file-modifying tool result, with an
/// occurrence count and the most recent session that touched it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecentFile {
    pub file_path: String,
    pub session_id: String,
    pub tool_name: String,
    pub occurrence_count: u64,
    pub last_modified: DateTime<Utc>,
}

/// `summary-metrics()`'s fixed set of totals (spec.md §4.H).
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryMetrics {
    pub total_sessions: u64,
    pub active_sessions: u64,
    pub total_messages: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub average_session_duration_secs: f64,
    pub most_used_model: Option<String>,
}

/// One entry of `peak-hours()`: an hour of day and its average message count
/// per active day over the trailing window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakHour {
    pub hour: u32,
    pub average_messages_per_active_day: f64,
}

pub(crate) fn dedup_activity(mut entries: Vec<ActivityEntry>) -> Vec<ActivityEntry> {
    let mut seen = std::collections::HashSet::new();
    entries.retain(|entry| {
        let key = (entry.kind, entry.session_id.clone(), entry.timestamp);
        seen.insert(key)
    });
    entries
}
