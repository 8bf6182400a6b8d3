use agtrace_types::{Session, SessionStatus, WriteMode};
use rusqlite::{params, Connection};

use crate::Result;

/// Upsert one session's metadata per the write mode's merge rules
/// (`WriteMode::Replace` overwrites; `WriteMode::Incremental` only advances
/// fields forward, per the Batch Writer contract).
pub fn upsert(conn: &Connection, session: &Session, mode: WriteMode) -> Result<()> {
    match mode {
        WriteMode::Replace => conn.execute(
            r#"
            INSERT INTO sessions (id, project_path, project_name, log_file_path, first_seen, last_seen, status, model, message_count)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                project_path = ?2,
                project_name = ?3,
                log_file_path = ?4,
                first_seen = ?5,
                last_seen = ?6,
                status = ?7,
                model = ?8,
                message_count = ?9
            "#,
            params![
                session.id,
                session.project_path,
                session.project_name,
                session.log_file_path,
                session.first_seen.to_rfc3339(),
                session.last_seen.to_rfc3339(),
                session.status.as_str(),
                session.model,
                session.message_count as i64,
            ],
        )?,
        WriteMode::Incremental => conn.execute(
            r#"
            INSERT INTO sessions (id, project_path, project_name, log_file_path, first_seen, last_seen, status, model, message_count)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                last_seen = MAX(last_seen, ?6),
                status = ?7,
                model = COALESCE(model, ?8),
                message_count = message_count + ?9
            "#,
            params![
                session.id,
                session.project_path,
                session.project_name,
                session.log_file_path,
                session.first_seen.to_rfc3339(),
                session.last_seen.to_rfc3339(),
                session.status.as_str(),
                session.model,
                session.message_count as i64,
            ],
        )?,
    };
    Ok(())
}

pub fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    let status: String = row.get("status")?;
    let first_seen: String = row.get("first_seen")?;
    let last_seen: String = row.get("last_seen")?;
    Ok(Session {
        id: row.get("id")?,
        project_path: row.get("project_path")?,
        project_name: row.get("project_name")?,
        log_file_path: row.get("log_file_path")?,
        first_seen: parse_timestamp(&first_seen),
        last_seen: parse_timestamp(&last_seen),
        is_active: false,
        status: status.parse().unwrap_or(SessionStatus::Active),
        model: row.get("model")?,
        message_count: row.get::<_, i64>("message_count")? as u64,
        duration_secs: row.get::<_, i64>("duration_secs").unwrap_or(0),
    })
}

fn parse_timestamp(s: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(|_| chrono::Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;
    use chrono::Utc;

    fn sample(id: &str) -> Session {
        Session {
            id: id.to_string(),
            project_path: "/p".into(),
            project_name: "p".into(),
            log_file_path: "/p/a.jsonl".into(),
            first_seen: Utc::now(),
            last_seen: Utc::now(),
            is_active: true,
            status: SessionStatus::Active,
            model: Some("claude-opus-4".into()),
            message_count: 1,
            duration_secs: 0,
        }
    }

    #[test]
    fn incremental_upsert_accumulates_message_count() {
        let store = Store::open_in_memory().unwrap();
        store
            .do_write(|tx| upsert(tx, &sample("s1"), WriteMode::Incremental))
            .unwrap();
        store
            .do_write(|tx| upsert(tx, &sample("s1"), WriteMode::Incremental))
            .unwrap();

        let count: i64 = store
            .do_read(|conn| {
                Ok(conn
                    .query_row("SELECT message_count FROM sessions WHERE id = 's1'", [], |r| r.get(0))
                    .unwrap())
            })
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn replace_upsert_overwrites_message_count() {
        let store = Store::open_in_memory().unwrap();
        store
            .do_write(|tx| upsert(tx, &sample("s1"), WriteMode::Incremental))
            .unwrap();
        store
            .do_write(|tx| upsert(tx, &sample("s1"), WriteMode::Incremental))
            .unwrap();
        store
            .do_write(|tx| upsert(tx, &sample("s1"), WriteMode::Replace))
            .unwrap();

        let count: i64 = store
            .do_read(|conn| {
                Ok(conn
                    .query_row("SELECT message_count FROM sessions WHERE id = 's1'", [], |r| r.get(0))
                    .unwrap())
            })
            .unwrap();
        assert_eq!(count, 1);
    }
}
