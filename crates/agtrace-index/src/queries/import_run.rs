use agtrace_types::{ImportRun, RunKind, RunStatus};
use rusqlite::{params, Connection};

use crate::Result;

/// Start a new `Import Run` row and return its id. Invariant: at most one run
/// is `running` at a time per process — enforced by callers serializing
/// import invocations, not by a database constraint.
pub fn begin(conn: &Connection, kind: RunKind, started_at: chrono::DateTime<chrono::Utc>) -> Result<i64> {
    conn.execute(
        "INSERT INTO import_runs (kind, started_at, status) VALUES (?1, ?2, 'running')",
        params![kind.as_str(), started_at.to_rfc3339()],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Finalize a run with its terminal status and aggregated counters.
#[allow(clippy::too_many_arguments)]
pub fn finalize(
    conn: &Connection,
    id: i64,
    status: RunStatus,
    ended_at: chrono::DateTime<chrono::Utc>,
    files_processed: u64,
    files_skipped: u64,
    sessions_imported: u64,
    messages_imported: u64,
    error: Option<&str>,
) -> Result<()> {
    conn.execute(
        r#"
        UPDATE import_runs SET
            status = ?1, ended_at = ?2, files_processed = ?3, files_skipped = ?4,
            sessions_imported = ?5, messages_imported = ?6, error = ?7
        WHERE id = ?8
        "#,
        params![
            status.as_str(),
            ended_at.to_rfc3339(),
            files_processed as i64,
            files_skipped as i64,
            sessions_imported as i64,
            messages_imported as i64,
            error,
            id,
        ],
    )?;
    Ok(())
}

/// The most recent run whose status is `completed`, used by the startup
/// catch-up scan to bound which files need a `pending` re-mark.
pub fn most_recent_completed(conn: &Connection) -> Result<Option<ImportRun>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, kind, started_at, ended_at, status, files_processed, files_skipped, sessions_imported, messages_imported, error
        FROM import_runs WHERE status = 'completed' ORDER BY ended_at DESC LIMIT 1
        "#,
    )?;
    let mut rows = stmt.query([])?;
    if let Some(row) = rows.next()? {
        Ok(Some(row_to_run(row)?))
    } else {
        Ok(None)
    }
}

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<ImportRun> {
    let kind: String = row.get(1)?;
    let started_at: String = row.get(2)?;
    let ended_at: Option<String> = row.get(3)?;
    let status: String = row.get(4)?;
    Ok(ImportRun {
        id: row.get(0)?,
        kind: parse_kind(&kind),
        started_at: parse_ts(&started_at),
        ended_at: ended_at.map(|s| parse_ts(&s)),
        status: status.parse().unwrap_or(RunStatus::Failed),
        files_processed: row.get::<_, i64>(5)? as u64,
        files_skipped: row.get::<_, i64>(6)? as u64,
        sessions_imported: row.get::<_, i64>(7)? as u64,
        messages_imported: row.get::<_, i64>(8)? as u64,
        error: row.get(9)?,
    })
}

fn parse_ts(s: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(|_| chrono::Utc::now())
}

fn parse_kind(s: &str) -> RunKind {
    match s {
        "initial" => RunKind::Initial,
        "incremental" => RunKind::Incremental,
        _ => RunKind::Manual,
    }
}
