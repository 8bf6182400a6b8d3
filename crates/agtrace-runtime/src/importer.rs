//! Decides what import work to do and executes it (spec.md §4.F).

use std::collections::{HashMap, HashSet};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use agtrace_engine::estimate_cost;
use agtrace_index::{queries, Store};
use agtrace_types::{
    project_display_name, ChangeEvent, FileWatchRecord, ImportStatus, RunKind, RunStatus, Session, SessionStatus,
    WriteMode,
};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::batch::{self, ImportBatch, UsageRow};
use crate::config::RuntimeConfig;
use crate::Result;

/// Outcome of one [`Importer::run`] invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportRunSummary {
    pub run_id: i64,
    pub status: RunStatus,
    pub files_processed: u64,
    pub files_skipped: u64,
    pub sessions_imported: u64,
    pub messages_imported: u64,
}

struct SessionAccum {
    project_path: String,
    log_file_path: String,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    message_count: u64,
    model_counts: HashMap<String, u64>,
}

/// Synchronous import engine, run on a blocking thread by the lifecycle
/// (spec.md §5: the importer is the sole writer during ingestion).
pub struct Importer {
    store: Arc<Store>,
    config: RuntimeConfig,
    events: Option<tokio::sync::mpsc::Sender<ChangeEvent>>,
}

impl Importer {
    pub fn new(store: Arc<Store>, config: RuntimeConfig, events: Option<tokio::sync::mpsc::Sender<ChangeEvent>>) -> Self {
        Importer { store, config, events }
    }

    /// Mark every file-watch record whose `last_modified` is newer than the
    /// most recent completed run's end time as `pending`, so the first
    /// import pass after startup picks it back up (spec.md §4.F catch-up).
    pub fn catch_up(&self) -> Result<u64> {
        let since = self.store.do_read(queries::import_run::most_recent_completed)?;
        let Some(run) = since.and_then(|r| r.ended_at) else {
            return Ok(0);
        };
        let count = self.store.do_write(|tx| queries::file_watch::mark_pending_modified_since(tx, run))?;
        Ok(count)
    }

    /// Execute one full import pass: walk, plan, process each planned file,
    /// finalize the run (spec.md §4.F steps 1-6).
    pub fn run(&self, kind: RunKind, cancel: &CancellationToken) -> Result<ImportRunSummary> {
        let run_id = self.store.do_write(|tx| queries::import_run::begin(tx, kind, Utc::now()))?;
        info!(run_id, kind = kind.as_str(), "import run starting");

        let mut files_processed = 0u64;
        let mut files_skipped = 0u64;
        let mut sessions_imported = 0u64;
        let mut messages_imported = 0u64;
        let mut run_error: Option<String> = None;
        let mut cancelled = false;

        for path in discover_log_files(&self.config.log_root) {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let Ok(metadata) = path.metadata() else {
                files_skipped += 1;
                continue;
            };
            let observed_size = metadata.len();
            let observed_modified: DateTime<Utc> = metadata.modified().map(DateTime::from).unwrap_or_else(|_| Utc::now());
            let path_str = path.to_string_lossy().into_owned();

            let existing = self.store.do_read(|conn| queries::file_watch::get(conn, &path_str))?;
            if !should_process(existing.as_ref(), observed_size, observed_modified) {
                files_skipped += 1;
                continue;
            }

            let mode = write_mode_for(existing.as_ref(), observed_size);
            let start_offset = match mode {
                WriteMode::Incremental => existing.as_ref().map(|r| r.offset).unwrap_or(0),
                WriteMode::Replace => 0,
            };

            self.store.do_write(|tx| {
                queries::file_watch::upsert(
                    tx,
                    &FileWatchRecord {
                        path: path_str.clone(),
                        last_modified: observed_modified,
                        size: observed_size as i64,
                        offset: existing.as_ref().map(|r| r.offset).unwrap_or(0),
                        content_hash: None,
                        status: ImportStatus::Processing,
                        sessions_imported: existing.as_ref().map(|r| r.sessions_imported).unwrap_or(0),
                        messages_imported: existing.as_ref().map(|r| r.messages_imported).unwrap_or(0),
                        last_error: None,
                    },
                )
            })?;

            match self.process_file(&path, &path_str, start_offset, mode) {
                Ok(outcome) => {
                    files_processed += 1;
                    sessions_imported += outcome.sessions;
                    messages_imported += outcome.messages;
                    self.store.do_write(|tx| {
                        queries::file_watch::upsert(
                            tx,
                            &FileWatchRecord {
                                path: path_str.clone(),
                                last_modified: observed_modified,
                                size: observed_size as i64,
                                offset: observed_size as i64,
                                content_hash: None,
                                status: ImportStatus::Completed,
                                sessions_imported: outcome.sessions,
                                messages_imported: outcome.messages,
                                last_error: None,
                            },
                        )
                    })?;
                    for session_id in outcome.touched_sessions {
                        self.notify(if outcome.new_sessions.contains(&session_id) {
                            ChangeEvent::SessionNew { session_id }
                        } else {
                            ChangeEvent::SessionUpdate { session_id }
                        });
                    }
                }
                Err(err) => {
                    warn!(path = %path_str, error = %err, "file import failed");
                    let kept_offset = existing.as_ref().map(|r| r.offset).unwrap_or(0);
                    self.store.do_write(|tx| {
                        queries::file_watch::upsert(
                            tx,
                            &FileWatchRecord {
                                path: path_str.clone(),
                                last_modified: observed_modified,
                                size: observed_size as i64,
                                offset: kept_offset,
                                content_hash: None,
                                status: ImportStatus::Failed,
                                sessions_imported: existing.as_ref().map(|r| r.sessions_imported).unwrap_or(0),
                                messages_imported: existing.as_ref().map(|r| r.messages_imported).unwrap_or(0),
                                last_error: Some(err.to_string()),
                            },
                        )
                    })?;
                    run_error = Some(err.to_string());
                }
            }
        }

        let status = if cancelled {
            RunStatus::Cancelled
        } else if run_error.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };

        self.store.do_write(|tx| {
            queries::import_run::finalize(
                tx,
                run_id,
                status,
                Utc::now(),
                files_processed,
                files_skipped,
                sessions_imported,
                messages_imported,
                run_error.as_deref(),
            )
        })?;

        if matches!(status, RunStatus::Completed) {
            self.notify(ChangeEvent::MetricsUpdate { session_id: None });
        }

        info!(run_id, ?status, files_processed, files_skipped, "import run finished");

        Ok(ImportRunSummary {
            run_id,
            status,
            files_processed,
            files_skipped,
            sessions_imported,
            messages_imported,
        })
    }

    fn notify(&self, event: ChangeEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.blocking_send(event);
        }
    }

    fn process_file(&self, path: &Path, path_str: &str, start_offset: i64, mode: WriteMode) -> Result<FileOutcome> {
        let containing_dir_name = path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut file = std::fs::File::open(path)?;
        file.seek(SeekFrom::Start(start_offset as u64))?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)?;

        let mut accum: HashMap<String, SessionAccum> = HashMap::new();
        let mut messages = Vec::new();
        let mut usages = Vec::new();
        let mut tool_results = Vec::new();

        for line in buf.lines() {
            let parsed = match agtrace_providers::parse_line(line, path, &containing_dir_name) {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(err) => {
                    warn!(path = path_str, error = %err, "skipping malformed log line");
                    continue;
                }
            };

            let entry = accum.entry(parsed.session_id.clone()).or_insert_with(|| SessionAccum {
                project_path: parsed.project_path.clone(),
                log_file_path: path_str.to_string(),
                first_seen: parsed.message.timestamp,
                last_seen: parsed.message.timestamp,
                message_count: 0,
                model_counts: HashMap::new(),
            });
            entry.first_seen = entry.first_seen.min(parsed.message.timestamp);
            entry.last_seen = entry.last_seen.max(parsed.message.timestamp);
            entry.message_count += 1;
            if let Some(model) = &parsed.message.model {
                *entry.model_counts.entry(model.clone()).or_insert(0) += 1;
            }

            for call in &parsed.tool_calls {
                tool_results.push(agtrace_types::ToolResult {
                    message_id: parsed.message.id.clone(),
                    session_id: parsed.session_id.clone(),
                    tool_name: call.tool_name.clone(),
                    file_path: call.file_path.clone(),
                    payload: call.payload.clone(),
                    timestamp: parsed.message.timestamp,
                });
            }

            if let Some(usage) = parsed.usage {
                let cost = estimate_cost(parsed.message.model.as_deref(), &usage);
                usages.push(UsageRow {
                    message_id: parsed.message.id.clone(),
                    usage,
                    service_tier: parsed.service_tier.clone(),
                    estimated_cost: cost,
                });
            }

            messages.push(parsed.message);
        }

        let mut new_sessions = HashSet::new();
        for session_id in accum.keys() {
            let exists = self
                .store
                .do_read(|conn| {
                    use rusqlite::OptionalExtension;
                    let found = conn
                        .query_row("SELECT 1 FROM sessions WHERE id = ?1", [session_id.as_str()], |_| Ok(()))
                        .optional()?;
                    Ok(found.is_some())
                })
                .unwrap_or(false);
            if !exists {
                new_sessions.insert(session_id.clone());
            }
        }

        let sessions: Vec<Session> = accum
            .iter()
            .map(|(id, acc)| Session {
                id: id.clone(),
                project_path: acc.project_path.clone(),
                project_name: project_display_name(&acc.project_path),
                log_file_path: acc.log_file_path.clone(),
                first_seen: acc.first_seen,
                last_seen: acc.last_seen,
                is_active: true,
                status: SessionStatus::Active,
                model: acc.model_counts.iter().max_by_key(|(_, count)| **count).map(|(model, _)| model.clone()),
                message_count: acc.message_count,
                duration_secs: 0,
            })
            .collect();

        let touched_sessions: Vec<String> = accum.keys().cloned().collect();
        let batch = ImportBatch { sessions, messages, usages, tool_results };
        let sessions_count = batch.sessions.len() as u64;
        let messages_count = batch.messages.len() as u64;

        if !batch.is_empty() {
            batch::write_batch(&self.store, &batch, mode, self.config.batch_chunk_param_limit)?;
        }

        Ok(FileOutcome { sessions: sessions_count, messages: messages_count, touched_sessions, new_sessions })
    }
}

struct FileOutcome {
    sessions: u64,
    messages: u64,
    touched_sessions: Vec<String>,
    new_sessions: HashSet<String>,
}

fn should_process(existing: Option<&FileWatchRecord>, observed_size: u64, observed_modified: DateTime<Utc>) -> bool {
    match existing {
        None => true,
        Some(record) => {
            record.last_modified < observed_modified
                || record.size as u64 != observed_size
                || record.status != ImportStatus::Completed
        }
    }
}

fn write_mode_for(existing: Option<&FileWatchRecord>, observed_size: u64) -> WriteMode {
    match existing {
        Some(record) if record.offset >= 0 && (record.offset as u64) <= observed_size && observed_size >= record.size as u64 => {
            WriteMode::Incremental
        }
        _ => WriteMode::Replace,
    }
}

fn discover_log_files(root: &Path) -> Vec<PathBuf> {
    if !root.exists() {
        return Vec::new();
    }
    walkdir::WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "jsonl"))
        .map(|entry| entry.into_path())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn fresh_ingest_counts_two_messages() {
        let tmp = TempDir::new().unwrap();
        let project_dir = tmp.path().join("-proj-a");
        std::fs::create_dir_all(&project_dir).unwrap();
        write_file(
            &project_dir,
            "s1.jsonl",
            "{\"type\":\"user\",\"uuid\":\"m1\",\"sessionId\":\"s1\",\"timestamp\":\"2024-01-01T10:00:00Z\",\"isSidechain\":false,\"message\":{\"role\":\"user\",\"content\":\"hi\"}}\n{\"type\":\"assistant\",\"uuid\":\"m2\",\"sessionId\":\"s1\",\"timestamp\":\"2024-01-01T10:00:05Z\",\"isSidechain\":false,\"message\":{\"id\":\"m2\",\"role\":\"assistant\",\"model\":\"claude-3-5-sonnet\",\"content\":\"ok\",\"usage\":{\"input_tokens\":10,\"output_tokens\":20}}}\n",
        );

        let store = Arc::new(Store::open_in_memory().unwrap());
        let mut config = RuntimeConfig::default();
        config.log_root = tmp.path().to_path_buf();
        let importer = Importer::new(store.clone(), config, None);

        let summary = importer.run(RunKind::Initial, &CancellationToken::new()).unwrap();
        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.files_processed, 1);
        assert_eq!(summary.messages_imported, 2);
    }

    #[test]
    fn second_pass_with_no_changes_skips_the_file() {
        let tmp = TempDir::new().unwrap();
        let project_dir = tmp.path().join("-proj-a");
        std::fs::create_dir_all(&project_dir).unwrap();
        write_file(
            &project_dir,
            "s1.jsonl",
            "{\"type\":\"user\",\"uuid\":\"m1\",\"sessionId\":\"s1\",\"timestamp\":\"2024-01-01T10:00:00Z\",\"isSidechain\":false,\"message\":{\"role\":\"user\",\"content\":\"hi\"}}\n",
        );

        let store = Arc::new(Store::open_in_memory().unwrap());
        let mut config = RuntimeConfig::default();
        config.log_root = tmp.path().to_path_buf();
        let importer = Importer::new(store.clone(), config, None);

        importer.run(RunKind::Initial, &CancellationToken::new()).unwrap();
        let second = importer.run(RunKind::Incremental, &CancellationToken::new()).unwrap();
        assert_eq!(second.files_processed, 0);
        assert_eq!(second.files_skipped, 1);
    }
}
