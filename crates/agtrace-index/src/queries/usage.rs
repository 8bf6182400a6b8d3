use agtrace_types::{TokenUsage, WriteMode};
use rusqlite::{params, Connection};

use crate::Result;

/// Insert a message's token-usage row, along with its pre-computed estimated
/// cost (the Cost Model is the single source of truth for that value; this
/// layer only persists it).
pub fn insert(
    conn: &Connection,
    message_id: &str,
    usage: &TokenUsage,
    service_tier: Option<&str>,
    estimated_cost: f64,
    mode: WriteMode,
) -> Result<()> {
    let or_clause = match mode {
        WriteMode::Incremental => "OR IGNORE",
        WriteMode::Replace => "OR REPLACE",
    };
    conn.execute(
        &format!(
            r#"
            INSERT {} INTO token_usage
                (message_id, input_tokens, output_tokens, cache_creation_input_tokens, cache_read_input_tokens, service_tier, estimated_cost)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            or_clause
        ),
        params![
            message_id,
            usage.input_tokens as i64,
            usage.output_tokens as i64,
            usage.cache_creation_input_tokens as i64,
            usage.cache_read_input_tokens as i64,
            service_tier,
            estimated_cost,
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, message_id: &str) -> Result<Option<(TokenUsage, f64)>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT input_tokens, output_tokens, cache_creation_input_tokens, cache_read_input_tokens, estimated_cost
        FROM token_usage WHERE message_id = ?1
        "#,
    )?;
    let mut rows = stmt.query([message_id])?;
    if let Some(row) = rows.next()? {
        let usage = TokenUsage {
            input_tokens: row.get::<_, i64>(0)? as u64,
            output_tokens: row.get::<_, i64>(1)? as u64,
            cache_creation_input_tokens: row.get::<_, i64>(2)? as u64,
            cache_read_input_tokens: row.get::<_, i64>(3)? as u64,
        };
        Ok(Some((usage, row.get(4)?)))
    } else {
        Ok(None)
    }
}
