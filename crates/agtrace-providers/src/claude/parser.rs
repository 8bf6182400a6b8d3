use std::path::Path;

use agtrace_types::{resolve_project_path, resolve_session_id, Message, Role, TokenUsage};
use chrono::{DateTime, Utc};

use crate::claude::extract::{extract_tool_calls, ExtractedToolCall};
use crate::claude::schema::{AssistantRecord, ClaudeRecord, UserRecord};
use crate::{Error, Result};

/// One decoded log line, ready for the batch writer: the message itself,
/// its token usage (if the line reported any), and any recovered
/// file-modifying tool calls.
#[derive(Debug, Clone)]
pub struct ParsedEvent {
    pub session_id: String,
    pub project_path: String,
    pub message: Message,
    pub usage: Option<TokenUsage>,
    pub service_tier: Option<String>,
    pub tool_calls: Vec<ExtractedToolCall>,
}

/// Decode one line into a [`ParsedEvent`]. Returns `Ok(None)` for a
/// structurally valid but semantically irrelevant line (an unrecognized
/// record `type`); returns `Err` for malformed JSON or a missing required
/// field — callers log and skip per spec.md §4.B, never aborting the batch.
pub fn parse_line(line: &str, file_path: &Path, containing_dir_name: &str) -> Result<Option<ParsedEvent>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let record: ClaudeRecord = serde_json::from_str(line)?;

    match record {
        ClaudeRecord::Unknown => Ok(None),
        ClaudeRecord::User(user) => Ok(Some(from_user_record(user, file_path, containing_dir_name)?)),
        ClaudeRecord::Assistant(assistant) => {
            Ok(Some(from_assistant_record(assistant, file_path, containing_dir_name)?))
        }
    }
}

fn from_user_record(record: UserRecord, file_path: &Path, containing_dir_name: &str) -> Result<ParsedEvent> {
    let session_id = resolve_session_id(record.session_id.as_deref(), file_path)
        .ok_or_else(|| Error::Parse("could not resolve a session id for line".into()))?;
    let project_path = resolve_project_path(record.cwd.as_deref(), containing_dir_name);

    let message = Message {
        id: record.uuid,
        session_id: session_id.clone(),
        parent_id: record.parent_uuid,
        role: parse_role(record.message.role.as_deref(), Role::User),
        content: record.message.content.to_string(),
        timestamp: parse_timestamp(&record.timestamp),
        cwd: record.cwd,
        version: record.version,
        is_sidechain: record.is_sidechain,
        request_id: None,
        model: None,
        git_branch: record.git_branch,
    };

    let tool_calls = extract_tool_calls(&record.message.content);

    Ok(ParsedEvent {
        session_id,
        project_path,
        message,
        usage: None,
        service_tier: None,
        tool_calls,
    })
}

fn from_assistant_record(record: AssistantRecord, file_path: &Path, containing_dir_name: &str) -> Result<ParsedEvent> {
    let session_id = resolve_session_id(record.session_id.as_deref(), file_path)
        .ok_or_else(|| Error::Parse("could not resolve a session id for line".into()))?;
    let project_path = resolve_project_path(record.cwd.as_deref(), containing_dir_name);

    let message_id = record
        .message
        .id
        .unwrap_or_else(|| record.uuid.clone());

    let message = Message {
        id: message_id,
        session_id: session_id.clone(),
        parent_id: record.parent_uuid,
        role: parse_role(record.message.role.as_deref(), Role::Assistant),
        content: record.message.content.to_string(),
        timestamp: parse_timestamp(&record.timestamp),
        cwd: record.cwd,
        version: record.version,
        is_sidechain: record.is_sidechain,
        request_id: record.request_id,
        model: record.message.model,
        git_branch: record.git_branch,
    };

    let (usage, service_tier) = match record.message.usage {
        Some(raw) => (
            Some(TokenUsage {
                input_tokens: raw.input_tokens,
                output_tokens: raw.output_tokens,
                cache_creation_input_tokens: raw.cache_creation_input_tokens,
                cache_read_input_tokens: raw.cache_read_input_tokens,
            }),
            raw.service_tier,
        ),
        None => (None, None),
    };

    let tool_calls = extract_tool_calls(&record.message.content);

    Ok(ParsedEvent {
        session_id,
        project_path,
        message,
        usage,
        service_tier,
        tool_calls,
    })
}

fn parse_role(role: Option<&str>, default: Role) -> Role {
    role.and_then(|r| r.parse().ok()).unwrap_or(default)
}

fn parse_timestamp(ts: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(ts)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn file_path() -> PathBuf {
        PathBuf::from("/logs/-Users-alice-code-agtrace/abc123.jsonl")
    }

    #[test]
    fn parses_user_line_with_explicit_session_id() {
        let line = r#"{"type":"user","uuid":"u1","parentUuid":null,"sessionId":"abc123","timestamp":"2024-01-01T00:00:00Z","cwd":"/Users/alice/code/agtrace","isSidechain":false,"message":{"role":"user","content":"hello"}}"#;
        let event = parse_line(line, &file_path(), "-Users-alice-code-agtrace")
            .unwrap()
            .unwrap();
        assert_eq!(event.session_id, "abc123");
        assert_eq!(event.project_path, "/Users/alice/code/agtrace");
        assert_eq!(event.message.role, Role::User);
        assert_eq!(event.message.content, "\"hello\"");
    }

    #[test]
    fn falls_back_to_file_stem_for_session_id() {
        let line = r#"{"type":"user","uuid":"u1","parentUuid":null,"timestamp":"2024-01-01T00:00:00Z","isSidechain":false,"message":{"role":"user","content":"hi"}}"#;
        let event = parse_line(line, &file_path(), "-Users-alice-code-agtrace")
            .unwrap()
            .unwrap();
        assert_eq!(event.session_id, "abc123");
        assert_eq!(event.project_path, "/Users/alice/code/agtrace");
    }

    #[test]
    fn parses_assistant_line_with_usage_and_tool_use() {
        let line = r#"{"type":"assistant","uuid":"a1","parentUuid":"u1","sessionId":"abc123","timestamp":"2024-01-01T00:00:05Z","cwd":"/proj","isSidechain":false,"message":{"id":"msg_1","role":"assistant","model":"claude-opus-4","content":[{"type":"tool_use","name":"Edit","input":{"file_path":"/proj/a.rs"}}],"usage":{"input_tokens":10,"output_tokens":5}}}"#;
        let event = parse_line(line, &file_path(), "-Users-alice-code-agtrace")
            .unwrap()
            .unwrap();
        assert_eq!(event.message.model.as_deref(), Some("claude-opus-4"));
        let usage = event.usage.unwrap();
        assert_eq!(usage.input_tokens, 10);
        assert_eq!(usage.output_tokens, 5);
        assert_eq!(event.tool_calls.len(), 1);
        assert_eq!(event.tool_calls[0].file_path.as_deref(), Some("/proj/a.rs"));
    }

    #[test]
    fn unknown_record_type_is_skipped_not_errored() {
        let line = r#"{"type":"file-history-snapshot","messageId":"m1","snapshot":{}}"#;
        assert!(parse_line(line, &file_path(), "-Users-alice-code-agtrace")
            .unwrap()
            .is_none());
    }

    #[test]
    fn malformed_json_is_an_error_not_a_panic() {
        let line = "{not json";
        assert!(parse_line(line, &file_path(), "-Users-alice-code-agtrace").is_err());
    }
}
