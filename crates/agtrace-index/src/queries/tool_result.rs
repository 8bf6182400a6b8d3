use agtrace_types::{ToolResult, WriteMode};
use rusqlite::{params, Connection};

use crate::Result;

/// Insert one tool-result row. The `(message_id, tool_name, file_path)`
/// unique constraint absorbs duplicate emissions from the extractor's two
/// recovery strategies (structured payload and free-text scan) regardless of
/// write mode.
pub fn insert(conn: &Connection, result: &ToolResult, mode: WriteMode) -> Result<()> {
    let or_clause = match mode {
        WriteMode::Incremental => "OR IGNORE",
        WriteMode::Replace => "OR REPLACE",
    };
    conn.execute(
        &format!(
            r#"
            INSERT {} INTO tool_results (message_id, session_id, tool_name, file_path, payload, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            or_clause
        ),
        params![
            result.message_id,
            result.session_id,
            result.tool_name,
            result.file_path,
            result.payload,
            result.timestamp.to_rfc3339(),
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;
    use chrono::Utc;

    #[test]
    fn duplicate_message_tool_file_tuple_is_suppressed() {
        let store = Store::open_in_memory().unwrap();
        let result = ToolResult {
            message_id: "m1".into(),
            session_id: "s1".into(),
            tool_name: "edit".into(),
            file_path: Some("/a.rs".into()),
            payload: "{}".into(),
            timestamp: Utc::now(),
        };
        store.do_write(|tx| insert(tx, &result, WriteMode::Incremental)).unwrap();
        store.do_write(|tx| insert(tx, &result, WriteMode::Incremental)).unwrap();

        let count: i64 = store
            .do_read(|conn| {
                Ok(conn
                    .query_row("SELECT COUNT(*) FROM tool_results", [], |r| r.get(0))
                    .unwrap())
            })
            .unwrap();
        assert_eq!(count, 1);
    }
}
