//! Integration tests for additive schema migration and corruption recovery.

use agtrace_index::{OpenOutcome, Store};
use rusqlite::Connection;
use std::path::Path;
use tempfile::TempDir;

/// Build a database holding an older `sessions` table that lacks the
/// `model` column added in a later release.
fn create_old_schema_db(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        r#"
        CREATE TABLE sessions (
            id TEXT PRIMARY KEY,
            project_path TEXT NOT NULL,
            project_name TEXT NOT NULL,
            log_file_path TEXT NOT NULL,
            first_seen TEXT NOT NULL,
            last_seen TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            message_count INTEGER NOT NULL DEFAULT 0
        );

        INSERT INTO sessions (id, project_path, project_name, log_file_path, first_seen, last_seen, message_count)
        VALUES ('old-session', '/p', 'p', '/p/a.jsonl', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z', 3);
        "#,
    )
    .unwrap();
}

#[test]
fn additive_migration_adds_missing_column_and_preserves_rows() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("index.db");
    create_old_schema_db(&path);

    let (store, outcome) = Store::open(&path).expect("open should auto-migrate additively");
    assert_eq!(outcome, OpenOutcome::Clean);

    let (model, message_count): (Option<String>, i64) = store
        .do_read(|conn| {
            Ok(conn
                .query_row(
                    "SELECT model, message_count FROM sessions WHERE id = 'old-session'",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .unwrap())
        })
        .unwrap();

    assert_eq!(model, None, "new column should default to NULL, not be destructive");
    assert_eq!(message_count, 3, "pre-existing row must survive migration");
}

#[test]
fn corrupted_file_is_quarantined_and_a_fresh_store_opens_in_its_place() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("index.db");
    std::fs::write(&path, b"not a sqlite file at all").unwrap();

    let (store, outcome) = Store::open(&path).expect("open should recover from corruption");
    assert_eq!(outcome, OpenOutcome::RecoveredFromCorruption);
    store.health().expect("freshly initialized store should be healthy");

    let quarantined: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains(".corrupt."))
        .collect();
    assert_eq!(quarantined.len(), 1, "exactly one quarantined file should remain");
}

#[test]
fn reopening_a_current_schema_store_preserves_data() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("index.db");

    {
        let (store, _) = Store::open(&path).unwrap();
        store
            .do_write(|tx| {
                tx.execute(
                    "INSERT INTO sessions (id, project_path, project_name, log_file_path, first_seen, last_seen) VALUES ('s1', '/p', 'p', '/p/a.jsonl', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
                    [],
                )?;
                Ok(())
            })
            .unwrap();
    }

    let (store, outcome) = Store::open(&path).unwrap();
    assert_eq!(outcome, OpenOutcome::Clean);
    let count: i64 = store
        .do_read(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get(0)).unwrap()))
        .unwrap();
    assert_eq!(count, 1);
}
