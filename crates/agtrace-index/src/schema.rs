use rusqlite::Connection;

use crate::Result;

/// Current set of columns per table, used both to create fresh tables and to
/// detect columns missing from an older database (see [`crate::migrations`]).
///
/// Additive only: a column is never removed from these lists once released,
/// and table definitions below must stay in sync with them.
pub(crate) struct TableSpec {
    pub name: &'static str,
    pub create_sql: &'static str,
    pub columns: &'static [&'static str],
}

pub(crate) const TABLES: &[TableSpec] = &[
    TableSpec {
        name: "sessions",
        create_sql: r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                project_path TEXT NOT NULL,
                project_name TEXT NOT NULL,
                log_file_path TEXT NOT NULL,
                first_seen TEXT NOT NULL,
                last_seen TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                model TEXT,
                message_count INTEGER NOT NULL DEFAULT 0
            )
        "#,
        columns: &[
            "id",
            "project_path",
            "project_name",
            "log_file_path",
            "first_seen",
            "last_seen",
            "status",
            "model",
            "message_count",
        ],
    },
    TableSpec {
        name: "messages",
        create_sql: r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                parent_id TEXT,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                cwd TEXT,
                version TEXT,
                is_sidechain INTEGER NOT NULL DEFAULT 0,
                request_id TEXT,
                model TEXT,
                git_branch TEXT
            )
        "#,
        columns: &[
            "id",
            "session_id",
            "parent_id",
            "role",
            "content",
            "timestamp",
            "cwd",
            "version",
            "is_sidechain",
            "request_id",
            "model",
            "git_branch",
        ],
    },
    TableSpec {
        name: "token_usage",
        create_sql: r#"
            CREATE TABLE IF NOT EXISTS token_usage (
                message_id TEXT PRIMARY KEY,
                input_tokens INTEGER NOT NULL DEFAULT 0,
                output_tokens INTEGER NOT NULL DEFAULT 0,
                cache_creation_input_tokens INTEGER NOT NULL DEFAULT 0,
                cache_read_input_tokens INTEGER NOT NULL DEFAULT 0,
                service_tier TEXT,
                estimated_cost REAL NOT NULL DEFAULT 0.0
            )
        "#,
        columns: &[
            "message_id",
            "input_tokens",
            "output_tokens",
            "cache_creation_input_tokens",
            "cache_read_input_tokens",
            "service_tier",
            "estimated_cost",
        ],
    },
    TableSpec {
        name: "tool_results",
        create_sql: r#"
            CREATE TABLE IF NOT EXISTS tool_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                tool_name TEXT NOT NULL,
                file_path TEXT,
                payload TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                UNIQUE(message_id, tool_name, file_path)
            )
        "#,
        columns: &[
            "id",
            "message_id",
            "session_id",
            "tool_name",
            "file_path",
            "payload",
            "timestamp",
        ],
    },
    TableSpec {
        name: "activity_log",
        create_sql: r#"
            CREATE TABLE IF NOT EXISTS activity_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                kind TEXT NOT NULL,
                session_id TEXT,
                project_path TEXT,
                description TEXT NOT NULL
            )
        "#,
        columns: &[
            "id",
            "timestamp",
            "kind",
            "session_id",
            "project_path",
            "description",
        ],
    },
    TableSpec {
        name: "file_watchers",
        create_sql: r#"
            CREATE TABLE IF NOT EXISTS file_watchers (
                path TEXT PRIMARY KEY,
                last_modified TEXT NOT NULL,
                size INTEGER NOT NULL,
                offset INTEGER NOT NULL DEFAULT 0,
                content_hash TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                sessions_imported INTEGER NOT NULL DEFAULT 0,
                messages_imported INTEGER NOT NULL DEFAULT 0,
                last_error TEXT
            )
        "#,
        columns: &[
            "path",
            "last_modified",
            "size",
            "offset",
            "content_hash",
            "status",
            "sessions_imported",
            "messages_imported",
            "last_error",
        ],
    },
    TableSpec {
        name: "import_runs",
        create_sql: r#"
            CREATE TABLE IF NOT EXISTS import_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                status TEXT NOT NULL DEFAULT 'running',
                files_processed INTEGER NOT NULL DEFAULT 0,
                files_skipped INTEGER NOT NULL DEFAULT 0,
                sessions_imported INTEGER NOT NULL DEFAULT 0,
                messages_imported INTEGER NOT NULL DEFAULT 0,
                error TEXT
            )
        "#,
        columns: &[
            "id",
            "kind",
            "started_at",
            "ended_at",
            "status",
            "files_processed",
            "files_skipped",
            "sessions_imported",
            "messages_imported",
            "error",
        ],
    },
];

const INDEXES: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_sessions_last_seen ON sessions(last_seen DESC);
    CREATE INDEX IF NOT EXISTS idx_sessions_project ON sessions(project_path);
    CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id);
    CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages(timestamp);
    CREATE INDEX IF NOT EXISTS idx_tool_results_session ON tool_results(session_id);
    CREATE INDEX IF NOT EXISTS idx_tool_results_file_path ON tool_results(file_path);
    CREATE INDEX IF NOT EXISTS idx_activity_log_timestamp ON activity_log(timestamp DESC);
    CREATE INDEX IF NOT EXISTS idx_activity_log_session ON activity_log(session_id);
"#;

const VIEWS: &str = r#"
    CREATE VIEW IF NOT EXISTS session_summary AS
    SELECT
        s.id,
        s.project_path,
        s.project_name,
        s.log_file_path,
        s.first_seen,
        s.last_seen,
        s.status,
        s.model,
        s.message_count,
        CAST((julianday(s.last_seen) - julianday(s.first_seen)) * 86400 AS INTEGER) AS duration_secs,
        COALESCE(SUM(u.input_tokens), 0) AS total_input_tokens,
        COALESCE(SUM(u.output_tokens), 0) AS total_output_tokens,
        COALESCE(SUM(u.cache_creation_input_tokens), 0) AS total_cache_creation_tokens,
        COALESCE(SUM(u.cache_read_input_tokens), 0) AS total_cache_read_tokens,
        COALESCE(SUM(u.estimated_cost), 0.0) AS total_cost
    FROM sessions s
    LEFT JOIN messages m ON m.session_id = s.id
    LEFT JOIN token_usage u ON u.message_id = m.id
    GROUP BY s.id;

    CREATE VIEW IF NOT EXISTS daily_metrics AS
    SELECT
        date(m.timestamp) AS day,
        COUNT(DISTINCT m.session_id) AS session_count,
        COUNT(m.id) AS message_count,
        COALESCE(SUM(u.input_tokens + u.output_tokens + u.cache_creation_input_tokens + u.cache_read_input_tokens), 0) AS total_tokens,
        COALESCE(SUM(u.estimated_cost), 0.0) AS total_cost
    FROM messages m
    LEFT JOIN token_usage u ON u.message_id = m.id
    GROUP BY date(m.timestamp);
"#;

/// Create any table, index, or view that doesn't already exist. Safe to call
/// on every open; existing data is untouched.
pub(crate) fn apply(conn: &Connection) -> Result<()> {
    for table in TABLES {
        conn.execute_batch(table.create_sql)?;
    }
    conn.execute_batch(INDEXES)?;
    conn.execute_batch(VIEWS)?;
    Ok(())
}
