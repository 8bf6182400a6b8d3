//! Commits the `(sessions, messages, usages, tool-results)` produced by one
//! file-import unit in a single write transaction (spec.md §4.E).

use agtrace_index::{queries, Store};
use agtrace_types::{Session, ToolResult, WriteMode};
use rusqlite::Transaction;

use crate::Result;

/// One message's persisted usage row: its id, the four counters, the
/// service-tier label if reported, and the cost model's output for it.
#[derive(Debug, Clone)]
pub struct UsageRow {
    pub message_id: String,
    pub usage: agtrace_types::TokenUsage,
    pub service_tier: Option<String>,
    pub estimated_cost: f64,
}

/// Everything one importer pass produced for a set of files, ready to commit.
/// Sessions are already aggregated to one row per session id (spec.md §4.F
/// step 4); messages/usages/tool-results may repeat a session id freely.
#[derive(Debug, Clone, Default)]
pub struct ImportBatch {
    pub sessions: Vec<Session>,
    pub messages: Vec<agtrace_types::Message>,
    pub usages: Vec<UsageRow>,
    pub tool_results: Vec<ToolResult>,
}

impl ImportBatch {
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty() && self.messages.is_empty() && self.usages.is_empty() && self.tool_results.is_empty()
    }
}

/// Fields bound per row for each table, used to size chunks under
/// `chunk_param_limit` (spec.md §4.E implementation constraint).
const MESSAGE_FIELDS: usize = 12;
const USAGE_FIELDS: usize = 7;
const TOOL_RESULT_FIELDS: usize = 6;

fn chunk_rows(fields_per_row: usize, param_limit: usize) -> usize {
    (param_limit / fields_per_row).max(1)
}

/// Commit one [`ImportBatch`] inside a single write transaction. Sessions
/// merge per the write mode's row-level rule (`queries::session::upsert`);
/// messages, usages, and tool-results are chunked into fixed-size multi-row
/// statements so no single prepared statement's parameter count exceeds
/// `param_limit`. In `WriteMode::Replace`, the batch's session ids have their
/// existing messages (and cascading usage/tool-result rows) deleted first, so
/// a file that shrank on rewrite doesn't leave stale rows behind (spec.md
/// §4.F: a replace import reflects exactly what the file currently holds).
pub fn write_batch(store: &Store, batch: &ImportBatch, mode: WriteMode, param_limit: usize) -> Result<()> {
    store
        .do_write(|tx| {
            if mode == WriteMode::Replace {
                let session_ids: Vec<String> = batch.sessions.iter().map(|s| s.id.clone()).collect();
                queries::message::delete_for_sessions(tx, &session_ids)?;
            }
            for session in &batch.sessions {
                queries::session::upsert(tx, session, mode)?;
            }
            for chunk in batch.messages.chunks(chunk_rows(MESSAGE_FIELDS, param_limit)) {
                write_messages_chunk(tx, chunk, mode)?;
            }
            for chunk in batch.usages.chunks(chunk_rows(USAGE_FIELDS, param_limit)) {
                write_usages_chunk(tx, chunk, mode)?;
            }
            for chunk in batch.tool_results.chunks(chunk_rows(TOOL_RESULT_FIELDS, param_limit)) {
                write_tool_results_chunk(tx, chunk, mode)?;
            }
            Ok(())
        })
        .map_err(Into::into)
}

fn or_clause(mode: WriteMode) -> &'static str {
    match mode {
        WriteMode::Incremental => "OR IGNORE",
        WriteMode::Replace => "OR REPLACE",
    }
}

fn write_messages_chunk(tx: &Transaction<'_>, messages: &[agtrace_types::Message], mode: WriteMode) -> Result<()> {
    if messages.is_empty() {
        return Ok(());
    }
    let placeholders = row_placeholders(messages.len(), MESSAGE_FIELDS);
    let sql = format!(
        "INSERT {} INTO messages (id, session_id, parent_id, role, content, timestamp, cwd, version, is_sidechain, request_id, model, git_branch) VALUES {}",
        or_clause(mode),
        placeholders
    );
    let mut stmt = tx.prepare_cached(&sql)?;
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::with_capacity(messages.len() * MESSAGE_FIELDS);
    for message in messages {
        params.push(Box::new(message.id.clone()));
        params.push(Box::new(message.session_id.clone()));
        params.push(Box::new(message.parent_id.clone()));
        params.push(Box::new(message.role.as_str()));
        params.push(Box::new(message.content.clone()));
        params.push(Box::new(message.timestamp.to_rfc3339()));
        params.push(Box::new(message.cwd.clone()));
        params.push(Box::new(message.version.clone()));
        params.push(Box::new(message.is_sidechain));
        params.push(Box::new(message.request_id.clone()));
        params.push(Box::new(message.model.clone()));
        params.push(Box::new(message.git_branch.clone()));
    }
    let refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    stmt.execute(refs.as_slice())?;
    Ok(())
}

fn write_usages_chunk(tx: &Transaction<'_>, usages: &[UsageRow], mode: WriteMode) -> Result<()> {
    if usages.is_empty() {
        return Ok(());
    }
    let placeholders = row_placeholders(usages.len(), USAGE_FIELDS);
    let sql = format!(
        "INSERT {} INTO token_usage (message_id, input_tokens, output_tokens, cache_creation_input_tokens, cache_read_input_tokens, service_tier, estimated_cost) VALUES {}",
        or_clause(mode),
        placeholders
    );
    let mut stmt = tx.prepare_cached(&sql)?;
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::with_capacity(usages.len() * USAGE_FIELDS);
    for row in usages {
        params.push(Box::new(row.message_id.clone()));
        params.push(Box::new(row.usage.input_tokens as i64));
        params.push(Box::new(row.usage.output_tokens as i64));
        params.push(Box::new(row.usage.cache_creation_input_tokens as i64));
        params.push(Box::new(row.usage.cache_read_input_tokens as i64));
        params.push(Box::new(row.service_tier.clone()));
        params.push(Box::new(row.estimated_cost));
    }
    let refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    stmt.execute(refs.as_slice())?;
    Ok(())
}

fn write_tool_results_chunk(tx: &Transaction<'_>, results: &[ToolResult], mode: WriteMode) -> Result<()> {
    if results.is_empty() {
        return Ok(());
    }
    let placeholders = row_placeholders(results.len(), TOOL_RESULT_FIELDS);
    let sql = format!(
        "INSERT {} INTO tool_results (message_id, session_id, tool_name, file_path, payload, timestamp) VALUES {}",
        or_clause(mode),
        placeholders
    );
    let mut stmt = tx.prepare_cached(&sql)?;
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::with_capacity(results.len() * TOOL_RESULT_FIELDS);
    for result in results {
        params.push(Box::new(result.message_id.clone()));
        params.push(Box::new(result.session_id.clone()));
        params.push(Box::new(result.tool_name.clone()));
        params.push(Box::new(result.file_path.clone()));
        params.push(Box::new(result.payload.clone()));
        params.push(Box::new(result.timestamp.to_rfc3339()));
    }
    let refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    stmt.execute(refs.as_slice())?;
    Ok(())
}

/// Build `fields`-wide `(?, ?, ...), (?, ?, ...)` groups for `rows` rows.
/// Only the row/field counts (plain integers) drive this string; every bound
/// value still travels through `rusqlite::ToSql`, never interpolated.
fn row_placeholders(rows: usize, fields: usize) -> String {
    let one_row = format!("({})", vec!["?"; fields].join(", "));
    vec![one_row; rows].join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use agtrace_types::{Message, Role, SessionStatus};
    use chrono::Utc;

    fn sample_session() -> Session {
        Session {
            id: "s1".into(),
            project_path: "/p".into(),
            project_name: "p".into(),
            log_file_path: "/p/s1.jsonl".into(),
            first_seen: Utc::now(),
            last_seen: Utc::now(),
            is_active: true,
            status: SessionStatus::Active,
            model: Some("claude-opus-4".into()),
            message_count: 2,
            duration_secs: 0,
        }
    }

    fn sample_message(id: &str) -> Message {
        Message {
            id: id.into(),
            session_id: "s1".into(),
            parent_id: None,
            role: Role::User,
            content: "hi".into(),
            timestamp: Utc::now(),
            cwd: None,
            version: None,
            is_sidechain: false,
            request_id: None,
            model: None,
            git_branch: None,
        }
    }

    #[test]
    fn writes_a_full_batch_in_one_transaction() {
        let store = Store::open_in_memory().unwrap();
        let batch = ImportBatch {
            sessions: vec![sample_session()],
            messages: vec![sample_message("m1"), sample_message("m2")],
            usages: vec![UsageRow {
                message_id: "m1".into(),
                usage: agtrace_types::TokenUsage { input_tokens: 10, output_tokens: 5, ..Default::default() },
                service_tier: None,
                estimated_cost: 0.001,
            }],
            tool_results: vec![],
        };
        write_batch(&store, &batch, WriteMode::Replace, 900).unwrap();

        let count: i64 = store
            .do_read(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0)).unwrap()))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn chunk_rows_never_returns_zero() {
        assert_eq!(chunk_rows(MESSAGE_FIELDS, 5), 1);
        assert!(chunk_rows(MESSAGE_FIELDS, 900) >= 1);
    }

    #[test]
    fn replace_purges_messages_dropped_from_a_shrunk_file() {
        let store = Store::open_in_memory().unwrap();
        let mut session = sample_session();
        session.message_count = 3;
        let full_batch = ImportBatch {
            sessions: vec![session.clone()],
            messages: vec![sample_message("m1"), sample_message("m2"), sample_message("m3")],
            usages: vec![UsageRow {
                message_id: "m2".into(),
                usage: agtrace_types::TokenUsage { input_tokens: 1, ..Default::default() },
                service_tier: None,
                estimated_cost: 0.0,
            }],
            tool_results: vec![],
        };
        write_batch(&store, &full_batch, WriteMode::Replace, 900).unwrap();

        session.message_count = 1;
        let shrunk_batch = ImportBatch { sessions: vec![session], messages: vec![sample_message("m1")], usages: vec![], tool_results: vec![] };
        write_batch(&store, &shrunk_batch, WriteMode::Replace, 900).unwrap();

        let message_count: i64 = store
            .do_read(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0)).unwrap()))
            .unwrap();
        assert_eq!(message_count, 1);

        let usage_count: i64 = store
            .do_read(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM token_usage", [], |r| r.get(0)).unwrap()))
            .unwrap();
        assert_eq!(usage_count, 0);
    }

    #[test]
    fn incremental_reinsert_is_ignored_not_overwritten() {
        let store = Store::open_in_memory().unwrap();
        let mut batch = ImportBatch { messages: vec![sample_message("m1")], ..Default::default() };
        write_batch(&store, &batch, WriteMode::Incremental, 900).unwrap();
        batch.messages[0].content = "changed".into();
        write_batch(&store, &batch, WriteMode::Incremental, 900).unwrap();

        let content: String = store
            .do_read(|conn| Ok(conn.query_row("SELECT content FROM messages WHERE id='m1'", [], |r| r.get(0)).unwrap()))
            .unwrap();
        assert_eq!(content, "hi");
    }
}
