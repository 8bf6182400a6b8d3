use agtrace_types::{Message, Role, WriteMode};
use rusqlite::{params, Connection};

use crate::Result;

/// Insert one message row per the write mode's conflict rule: `Incremental`
/// ignores a message id that already exists (re-ingest of an identical
/// identifier is a no-op); `Replace` overwrites it.
pub fn insert(conn: &Connection, message: &Message, mode: WriteMode) -> Result<()> {
    let or_clause = match mode {
        WriteMode::Incremental => "OR IGNORE",
        WriteMode::Replace => "OR REPLACE",
    };
    conn.execute(
        &format!(
            r#"
            INSERT {} INTO messages
                (id, session_id, parent_id, role, content, timestamp, cwd, version, is_sidechain, request_id, model, git_branch)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            or_clause
        ),
        params![
            message.id,
            message.session_id,
            message.parent_id,
            role_str(message.role),
            message.content,
            message.timestamp.to_rfc3339(),
            message.cwd,
            message.version,
            message.is_sidechain,
            message.request_id,
            message.model,
            message.git_branch,
        ],
    )?;
    Ok(())
}

fn role_str(role: Role) -> &'static str {
    role.as_str()
}

/// Delete every message for the given session ids, cascading into
/// `token_usage` and `tool_results` (neither table declares a foreign key,
/// so both are cleared explicitly). Used by `WriteMode::Replace` to drop
/// whatever a previous version of a rewritten file imported before the new
/// contents are inserted, so a truncated file doesn't leave orphaned rows
/// behind.
pub fn delete_for_sessions(tx: &rusqlite::Transaction<'_>, session_ids: &[String]) -> Result<()> {
    if session_ids.is_empty() {
        return Ok(());
    }
    let placeholders = vec!["?"; session_ids.len()].join(", ");
    let refs: Vec<&dyn rusqlite::ToSql> = session_ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();

    tx.execute(
        &format!("DELETE FROM token_usage WHERE message_id IN (SELECT id FROM messages WHERE session_id IN ({placeholders}))"),
        refs.as_slice(),
    )?;
    tx.execute(&format!("DELETE FROM tool_results WHERE session_id IN ({placeholders})"), refs.as_slice())?;
    tx.execute(&format!("DELETE FROM messages WHERE session_id IN ({placeholders})"), refs.as_slice())?;
    Ok(())
}

pub fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let role: String = row.get("role")?;
    let timestamp: String = row.get("timestamp")?;
    Ok(Message {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        parent_id: row.get("parent_id")?,
        role: role.parse().unwrap_or(agtrace_types::Role::User),
        content: row.get("content")?,
        timestamp: chrono::DateTime::parse_from_rfc3339(&timestamp)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now()),
        cwd: row.get("cwd")?,
        version: row.get("version")?,
        is_sidechain: row.get("is_sidechain")?,
        request_id: row.get("request_id")?,
        model: row.get("model")?,
        git_branch: row.get("git_branch")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;
    use chrono::Utc;

    fn sample(id: &str) -> Message {
        Message {
            id: id.to_string(),
            session_id: "s1".into(),
            parent_id: None,
            role: Role::User,
            content: "hello".into(),
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
    fn incremental_reinsert_of_same_id_is_noop() {
        let store = Store::open_in_memory().unwrap();
        let mut first = sample("m1");
        first.content = "first".into();
        store.do_write(|tx| insert(tx, &first, WriteMode::Incremental)).unwrap();

        let mut second = sample("m1");
        second.content = "second".into();
        store.do_write(|tx| insert(tx, &second, WriteMode::Incremental)).unwrap();

        let content: String = store
            .do_read(|conn| {
                Ok(conn
                    .query_row("SELECT content FROM messages WHERE id = 'm1'", [], |r| r.get(0))
                    .unwrap())
            })
            .unwrap();
        assert_eq!(content, "first");
    }

    #[test]
    fn replace_reinsert_overwrites() {
        let store = Store::open_in_memory().unwrap();
        let mut first = sample("m1");
        first.content = "first".into();
        store.do_write(|tx| insert(tx, &first, WriteMode::Replace)).unwrap();

        let mut second = sample("m1");
        second.content = "second".into();
        store.do_write(|tx| insert(tx, &second, WriteMode::Replace)).unwrap();

        let content: String = store
            .do_read(|conn| {
                Ok(conn
                    .query_row("SELECT content FROM messages WHERE id = 'm1'", [], |r| r.get(0))
                    .unwrap())
            })
            .unwrap();
        assert_eq!(content, "second");
    }
}
