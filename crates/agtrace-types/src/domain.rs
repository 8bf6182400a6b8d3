use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default idleness window: a session with no activity for this long is no
/// longer considered live (spec.md §3 Session invariants).
pub const IDLENESS_WINDOW_SECS: i64 = 120;

/// Message author (spec.md §3 Message).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            _ => Err(()),
        }
    }
}

/// Lifecycle status of a session, independent of the liveness flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Idle,
    Ended,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Idle => "idle",
            SessionStatus::Ended => "ended",
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "idle" => Ok(SessionStatus::Idle),
            "ended" => Ok(SessionStatus::Ended),
            _ => Err(()),
        }
    }
}

/// A single conversation, identified by a stable opaque identifier
/// (spec.md §3 Session).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub project_path: String,
    pub project_name: String,
    pub log_file_path: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub is_active: bool,
    pub status: SessionStatus,
    pub model: Option<String>,
    pub message_count: u64,
    pub duration_secs: i64,
}

impl Session {
    /// Recompute `is_active` from `last_seen` relative to `now`, per the
    /// idleness window invariant. Callers may recompute at read time (Open
    /// Question (a) resolved in DESIGN.md: this crate trusts the persisted
    /// flag but the aggregation layer always recomputes at query time).
    pub fn is_live(&self, now: DateTime<Utc>, idleness_window_secs: i64) -> bool {
        (now - self.last_seen).num_seconds() < idleness_window_secs
    }
}

/// One line of the log (spec.md §3 Message).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub parent_id: Option<String>,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub cwd: Option<String>,
    pub version: Option<String>,
    pub is_sidechain: bool,
    pub request_id: Option<String>,
    pub model: Option<String>,
    pub git_branch: Option<String>,
}

/// A per-message tuple of four non-negative counters, a derived total, a
/// service tier label, and an estimated cost (spec.md §3 Token Usage).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_input_tokens: u64,
    pub cache_read_input_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens
            + self.output_tokens
            + self.cache_creation_input_tokens
            + self.cache_read_input_tokens
    }

    pub fn is_empty(&self) -> bool {
        self.input_tokens == 0
            && self.output_tokens == 0
            && self.cache_creation_input_tokens == 0
            && self.cache_read_input_tokens == 0
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_creation_input_tokens += other.cache_creation_input_tokens;
        self.cache_read_input_tokens += other.cache_read_input_tokens;
    }
}

/// The fixed set of tool names whose results are persisted (spec.md §3 Tool
/// Result), matched case-insensitively against the tool name reported in
/// the log.
pub const FILE_MODIFYING_TOOLS: &[&str] = &["edit", "write", "multi-edit", "notebook-edit", "notebook-write"];

/// Whether `tool_name` is in the fixed file-modifying set, matched
/// case-insensitively (spec.md §3 Tool Result, §4.C).
pub fn is_file_modifying_tool(tool_name: &str) -> bool {
    let lower = tool_name.to_ascii_lowercase();
    FILE_MODIFYING_TOOLS.contains(&lower.as_str())
}

/// Zero or more records per assistant message (spec.md §3 Tool Result). Only
/// file-modifying tools are retained past the extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub message_id: String,
    pub session_id: String,
    pub tool_name: String,
    pub file_path: Option<String>,
    pub payload: String,
    pub timestamp: DateTime<Utc>,
}

/// Closed enum of activity kinds (spec.md §3 Activity Entry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    MessageSent,
    MessageReceived,
    FileModified,
    ToolUsed,
    SessionStarted,
    SessionEnded,
    ImportCompleted,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::MessageSent => "message_sent",
            ActivityKind::MessageReceived => "message_received",
            ActivityKind::FileModified => "file_modified",
            ActivityKind::ToolUsed => "tool_used",
            ActivityKind::SessionStarted => "session_started",
            ActivityKind::SessionEnded => "session_ended",
            ActivityKind::ImportCompleted => "import_completed",
        }
    }
}

/// A denormalized timeline event synthesized from messages, tool results,
/// and explicit lifecycle rows (spec.md §3 Activity Entry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: ActivityKind,
    pub session_id: Option<String>,
    pub project_path: Option<String>,
    pub description: String,
}

/// Import status of one watched file (spec.md §3 File Watch Record).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Skipped,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Pending => "pending",
            ImportStatus::Processing => "processing",
            ImportStatus::Completed => "completed",
            ImportStatus::Failed => "failed",
            ImportStatus::Skipped => "skipped",
        }
    }
}

impl std::str::FromStr for ImportStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ImportStatus::Pending),
            "processing" => Ok(ImportStatus::Processing),
            "completed" => Ok(ImportStatus::Completed),
            "failed" => Ok(ImportStatus::Failed),
            "skipped" => Ok(ImportStatus::Skipped),
            _ => Err(()),
        }
    }
}

/// One row per observed log file (spec.md §3 File Watch Record).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileWatchRecord {
    pub path: String,
    pub last_modified: DateTime<Utc>,
    pub size: i64,
    pub offset: i64,
    pub content_hash: Option<String>,
    pub status: ImportStatus,
    pub sessions_imported: u64,
    pub messages_imported: u64,
    pub last_error: Option<String>,
}

/// The write mode chosen for one planned file import (spec.md §4.E, §4.F).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    Incremental,
    Replace,
}

/// Kind of an import run invocation (spec.md §3 Import Run).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Initial,
    Incremental,
    Manual,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunKind::Initial => "initial",
            RunKind::Incremental => "incremental",
            RunKind::Manual => "manual",
        }
    }
}

/// Status of one import run (spec.md §3 Import Run).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            _ => Err(()),
        }
    }
}

/// One row per startup ingest or explicit re-scan (spec.md §3 Import Run).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRun {
    pub id: i64,
    pub kind: RunKind,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub files_processed: u64,
    pub files_skipped: u64,
    pub sessions_imported: u64,
    pub messages_imported: u64,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_usage_total_sums_all_four_counters() {
        let usage = TokenUsage {
            input_tokens: 10,
            output_tokens: 20,
            cache_creation_input_tokens: 3,
            cache_read_input_tokens: 7,
        };
        assert_eq!(usage.total(), 40);
    }

    #[test]
    fn file_modifying_tools_match_case_insensitively() {
        assert!(is_file_modifying_tool("Edit"));
        assert!(is_file_modifying_tool("MULTI-EDIT"));
        assert!(!is_file_modifying_tool("Bash"));
        assert!(!is_file_modifying_tool("Read"));
    }

    #[test]
    fn session_liveness_respects_idleness_window() {
        let now = Utc::now();
        let session = Session {
            id: "s1".into(),
            project_path: "/p".into(),
            project_name: "p".into(),
            log_file_path: "/p/s1.jsonl".into(),
            first_seen: now,
            last_seen: now - chrono::Duration::seconds(60),
            is_active: true,
            status: SessionStatus::Active,
            model: None,
            message_count: 1,
            duration_secs: 0,
        };
        assert!(session.is_live(now, 120));
        assert!(!session.is_live(now, 30));
    }
}
