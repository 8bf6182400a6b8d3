//! Cost model and read-only aggregation layer: pure functions over a
//! [`agtrace_index::Store`] snapshot, with no write access of their own.

mod cost;
mod error;
mod query;
mod types;

pub use cost::{estimate_cost, ModelRate};
pub use error::{Error, Result};
pub use query::{
    active_sessions, get_session, list_sessions, peak_hours, project_activity, project_recent_files,
    project_token_timeline, recent_activity, recent_files, search, session_activity, session_token_timeline,
    summary_metrics, token_timeline,
};
pub use types::{
    Granularity, PeakHour, RecentFile, SessionDetail, SessionSummary, SummaryMetrics, TokenBucket,
};
