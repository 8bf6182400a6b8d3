use rusqlite::Connection;
use tracing::info;

use crate::schema::TABLES;
use crate::Result;

/// Add any column present in [`TABLES`] but missing from the table's current
/// columns, one `ALTER TABLE ... ADD COLUMN` per gap. Tables that don't exist
/// yet are left to [`crate::schema::apply`], which creates them with every
/// column already in place.
///
/// Forward-only: a column already present is never altered or dropped, so a
/// rename or type change at the spec level must ship as a new column name.
pub(crate) fn run(conn: &Connection) -> Result<()> {
    for table in TABLES {
        if !table_exists(conn, table.name)? {
            continue;
        }

        let existing = existing_columns(conn, table.name)?;
        for column in table.columns {
            if existing.iter().any(|c| c == column) {
                continue;
            }
            info!(table = table.name, column = *column, "adding missing column");
            let sql = format!(
                "ALTER TABLE {} ADD COLUMN {}",
                table.name,
                column_definition(table.name, column)
            );
            conn.execute(&sql, [])?;
        }
    }
    Ok(())
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        [name],
        |row| row.get(0),
    )?;
    Ok(exists)
}

fn existing_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(names)
}

/// SQLite column type + default for a column added after a table's first
/// release. Kept separate from [`TABLES`]'s `create_sql` because `ALTER TABLE
/// ADD COLUMN` cannot add a `PRIMARY KEY` or reference another column.
fn column_definition(table: &str, column: &str) -> String {
    let integer_default_zero = matches!(
        column,
        "message_count"
            | "input_tokens"
            | "output_tokens"
            | "cache_creation_input_tokens"
            | "cache_read_input_tokens"
            | "size"
            | "offset"
            | "sessions_imported"
            | "messages_imported"
            | "files_processed"
            | "files_skipped"
    );
    let real_default_zero = column == "estimated_cost" || column == "total_cost";
    let bool_default_zero = column == "is_sidechain";

    if integer_default_zero {
        format!("{} INTEGER NOT NULL DEFAULT 0", column)
    } else if real_default_zero {
        format!("{} REAL NOT NULL DEFAULT 0.0", column)
    } else if bool_default_zero {
        format!("{} INTEGER NOT NULL DEFAULT 0", column)
    } else if column == "status" && table == "sessions" {
        format!("{} TEXT NOT NULL DEFAULT 'active'", column)
    } else if column == "status" && table == "file_watchers" {
        format!("{} TEXT NOT NULL DEFAULT 'pending'", column)
    } else if column == "status" && table == "import_runs" {
        format!("{} TEXT NOT NULL DEFAULT 'running'", column)
    } else {
        format!("{} TEXT", column)
    }
}
