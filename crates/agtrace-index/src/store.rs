use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use rusqlite::{Connection, OpenFlags};
use tracing::{info, warn};

use crate::{migrations, schema, Error, Result};

/// How long a reader retries against a busy writer before giving up.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// `Import Run` rows older than this, still `running`, are presumed to belong
/// to a process that crashed mid-import.
const STUCK_RUN_AGE: chrono::Duration = chrono::Duration::hours(1);

#[derive(Debug, Clone)]
enum Location {
    File(PathBuf),
    Memory,
}

/// Embedded relational store: one writer transaction in flight at a time,
/// any number of concurrent readers each observing a consistent snapshot.
///
/// The writer holds the sole read-write [`Connection`] behind a [`Mutex`].
/// Readers open their own short-lived read-only connection against the same
/// file, which WAL journal mode lets proceed without blocking on the writer.
/// An in-memory store has no separate file to reopen, so reads there fall
/// back to sharing the writer connection (acceptable: tests are
/// single-threaded against it).
pub struct Store {
    location: Location,
    writer: Mutex<Connection>,
}

/// Outcome of [`Store::open`]: whether the database file had to be
/// quarantined and recreated due to a failed integrity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    Clean,
    RecoveredFromCorruption,
}

impl Store {
    /// Open (creating if absent) the store at `path`, applying schema and
    /// additive migrations, and cleaning up any stuck `Import Run` row.
    pub fn open(path: impl AsRef<Path>) -> Result<(Self, OpenOutcome)> {
        let path = path.as_ref();
        let outcome = if path.exists() && !integrity_ok(path)? {
            quarantine(path)?;
            OpenOutcome::RecoveredFromCorruption
        } else {
            OpenOutcome::Clean
        };

        let conn = open_writer_connection(path)?;
        let store = Self {
            location: Location::File(path.to_path_buf()),
            writer: Mutex::new(conn),
        };
        store.init()?;
        Ok((store, outcome))
    }

    /// Open a process-local, non-persistent store. Used by tests and by
    /// tooling that never touches disk.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
        let store = Self {
            location: Location::Memory,
            writer: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<()> {
        let conn = self.writer.lock().expect("store writer mutex poisoned");
        schema::apply(&conn)?;
        migrations::run(&conn)?;
        drop(conn);
        self.clean_up_stuck_runs()?;
        Ok(())
    }

    fn clean_up_stuck_runs(&self) -> Result<()> {
        let cutoff = (Utc::now() - STUCK_RUN_AGE).to_rfc3339();
        self.do_write(|tx| {
            let updated = tx.execute(
                r#"
                UPDATE import_runs
                SET status = 'failed',
                    ended_at = ?1,
                    error = 'import run left running past process lifetime; marked failed on reopen'
                WHERE status = 'running' AND started_at < ?2
                "#,
                rusqlite::params![Utc::now().to_rfc3339(), cutoff],
            )?;
            if updated > 0 {
                warn!(count = updated, "reaped stuck import runs on open");
            }
            Ok(())
        })
    }

    /// Run `f` inside the single serialized write transaction. On `Err`, the
    /// transaction is rolled back; on `Ok`, it is committed.
    pub fn do_write<T>(&self, f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.writer.lock().expect("store writer mutex poisoned");
        retry_on_busy(|| {
            let tx = conn.transaction()?;
            let result = f(&tx)?;
            tx.commit()?;
            Ok(result)
        })
    }

    /// Run `f` against a connection with snapshot semantics. For a
    /// file-backed store this opens its own read-only connection so it never
    /// blocks behind an in-flight writer transaction.
    pub fn do_read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        match &self.location {
            Location::Memory => {
                let conn = self.writer.lock().expect("store writer mutex poisoned");
                f(&conn)
            }
            Location::File(path) => {
                let conn = open_reader_connection(path)?;
                retry_on_busy(|| f(&conn))
            }
        }
    }

    /// Cheap liveness probe: can we open a transaction and roll it back.
    pub fn health(&self) -> Result<()> {
        self.do_write(|_tx| Ok(()))
    }
}

fn retry_on_busy<T>(mut f: impl FnMut() -> Result<T>) -> Result<T> {
    let deadline = Instant::now() + DEFAULT_BUSY_TIMEOUT;
    let mut backoff = Duration::from_millis(10);
    loop {
        match f() {
            Ok(v) => return Ok(v),
            Err(Error::Database(rusqlite::Error::SqliteFailure(e, _)))
                if e.code == rusqlite::ErrorCode::DatabaseBusy && Instant::now() < deadline =>
            {
                thread::sleep(backoff);
                backoff = (backoff * 2).min(Duration::from_millis(500));
            }
            Err(other) => return Err(other),
        }
    }
}

fn open_writer_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(conn)
}

fn open_reader_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(conn)
}

fn integrity_ok(path: &Path) -> Result<bool> {
    let conn = match Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY) {
        Ok(conn) => conn,
        Err(_) => return Ok(false),
    };
    let result: std::result::Result<String, _> =
        conn.query_row("PRAGMA integrity_check", [], |row| row.get(0));
    Ok(matches!(result, Ok(v) if v == "ok"))
}

fn quarantine(path: &Path) -> Result<()> {
    let ts = Utc::now().format("%Y%m%dT%H%M%SZ");
    let quarantined = path.with_extension(format!("corrupt.{}", ts));
    warn!(
        from = %path.display(),
        to = %quarantined.display(),
        "store failed integrity check; quarantining and starting fresh"
    );
    std::fs::rename(path, &quarantined)?;
    for ext in ["-wal", "-shm"] {
        let side_file = path.with_extension(format!("corrupt.{}{}", ts, ext));
        let candidate = PathBuf::from(format!("{}{}", path.display(), ext));
        if candidate.exists() {
            let _ = std::fs::rename(&candidate, &side_file);
        }
    }
    info!("a fresh store will be initialized in its place");
    Ok(())
}
