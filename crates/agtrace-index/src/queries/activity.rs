use agtrace_types::ActivityEntry;
use rusqlite::{params, Connection};

use crate::Result;

/// Record an explicit lifecycle activity row (session started/ended, import
/// completed). Messages and file-modifying tool results synthesize their own
/// activity entries at query time (see agtrace-engine) rather than being
/// duplicated into this table.
pub fn insert(conn: &Connection, entry: &ActivityEntry) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO activity_log (timestamp, kind, session_id, project_path, description)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![
            entry.timestamp.to_rfc3339(),
            entry.kind.as_str(),
            entry.session_id,
            entry.project_path,
            entry.description,
        ],
    )?;
    Ok(())
}
