use agtrace_types::{FileWatchRecord, ImportStatus};
use rusqlite::{params, Connection};

use crate::Result;

/// Insert or fully overwrite one file's watch record. Callers read the
/// existing record first (see [`get`]) to decide the write mode for the
/// corresponding import (spec §4.F); this function always writes the record
/// the caller computed.
pub fn upsert(conn: &Connection, record: &FileWatchRecord) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO file_watchers
            (path, last_modified, size, offset, content_hash, status, sessions_imported, messages_imported, last_error)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(path) DO UPDATE SET
            last_modified = ?2,
            size = ?3,
            offset = ?4,
            content_hash = ?5,
            status = ?6,
            sessions_imported = ?7,
            messages_imported = ?8,
            last_error = ?9
        "#,
        params![
            record.path,
            record.last_modified.to_rfc3339(),
            record.size,
            record.offset,
            record.content_hash,
            record.status.as_str(),
            record.sessions_imported as i64,
            record.messages_imported as i64,
            record.last_error,
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, path: &str) -> Result<Option<FileWatchRecord>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT path, last_modified, size, offset, content_hash, status, sessions_imported, messages_imported, last_error
        FROM file_watchers WHERE path = ?1
        "#,
    )?;
    let mut rows = stmt.query([path])?;
    if let Some(row) = rows.next()? {
        Ok(Some(row_to_record(row)?))
    } else {
        Ok(None)
    }
}

/// All watch records, for the importer's directory-walk plan and for the
/// watcher's startup catch-up scan.
pub fn list(conn: &Connection) -> Result<Vec<FileWatchRecord>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT path, last_modified, size, offset, content_hash, status, sessions_imported, messages_imported, last_error
        FROM file_watchers
        "#,
    )?;
    let rows = stmt
        .query_map([], row_to_record)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Mark every record whose `last_modified` is newer than `since` as
/// `pending`, for the startup catch-up scan (spec §4.F).
pub fn mark_pending_modified_since(conn: &Connection, since: chrono::DateTime<chrono::Utc>) -> Result<u64> {
    let count = conn.execute(
        "UPDATE file_watchers SET status = 'pending' WHERE last_modified > ?1",
        params![since.to_rfc3339()],
    )?;
    Ok(count as u64)
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileWatchRecord> {
    let last_modified: String = row.get(1)?;
    let status: String = row.get(5)?;
    Ok(FileWatchRecord {
        path: row.get(0)?,
        last_modified: chrono::DateTime::parse_from_rfc3339(&last_modified)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now()),
        size: row.get(2)?,
        offset: row.get(3)?,
        content_hash: row.get(4)?,
        status: status.parse().unwrap_or(ImportStatus::Pending),
        sessions_imported: row.get::<_, i64>(6)? as u64,
        messages_imported: row.get::<_, i64>(7)? as u64,
        last_error: row.get(8)?,
    })
}
