//! Read-only derivations over the store, each a pure function of its
//! current contents (spec.md §4.H). Every operation takes snapshot
//! semantics from [`Store::do_read`] — no operation here ever writes.

use agtrace_index::{queries, Store};
use agtrace_types::{ActivityEntry, ActivityKind, IDLENESS_WINDOW_SECS};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Row};

use crate::types::{
    dedup_activity, Granularity, PeakHour, RecentFile, SessionDetail, SessionSummary, SummaryMetrics, TokenBucket,
};
use crate::{Error, Result};

const MAX_SEARCH_QUERY_LEN: usize = 100;
const MAX_ACTIVITY_LIMIT: usize = 500;
const MAX_TIMELINE_HOURS: i64 = 720;
const PEAK_HOURS_WINDOW_DAYS: i64 = 30;
const PEAK_HOURS_MIN_MESSAGES: i64 = 10;
const PEAK_HOURS_TOP_N: usize = 4;

fn row_to_summary(row: &Row<'_>) -> rusqlite::Result<SessionSummary> {
    let session = queries::session::row_to_session(row)?;
    Ok(SessionSummary {
        session,
        total_input_tokens: row.get::<_, i64>("total_input_tokens")? as u64,
        total_output_tokens: row.get::<_, i64>("total_output_tokens")? as u64,
        total_cache_creation_tokens: row.get::<_, i64>("total_cache_creation_tokens")? as u64,
        total_cache_read_tokens: row.get::<_, i64>("total_cache_read_tokens")? as u64,
        total_cost: row.get("total_cost")?,
    })
}

/// Recompute `is_active` against the idleness window; the persisted flag is
/// never trusted at query time (spec.md §9 Open Question (a)).
fn finalize_summary(mut summary: SessionSummary) -> SessionSummary {
    let now = Utc::now();
    summary.session.is_active = summary.session.is_live(now, IDLENESS_WINDOW_SECS);
    summary
}

/// `list-sessions()`: every session with its rollups, most recent first.
pub fn list_sessions(store: &Store) -> Result<Vec<SessionSummary>> {
    let rows = store.do_read(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM session_summary ORDER BY last_seen DESC")?;
        let rows = stmt.query_map([], row_to_summary)?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    })?;
    Ok(rows.into_iter().map(finalize_summary).collect())
}

/// `get-session(id)`: a summary plus the distinct file paths touched by its
/// persisted tool results.
pub fn get_session(store: &Store, id: &str) -> Result<Option<SessionDetail>> {
    let result = store.do_read(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM session_summary WHERE id = ?1")?;
        let mut rows = stmt.query(params![id])?;
        let Some(summary) = rows.next()?.map(row_to_summary).transpose()? else {
            return Ok(None);
        };

        let mut file_stmt = conn.prepare(
            r#"
            SELECT DISTINCT file_path FROM tool_results
            WHERE session_id = ?1 AND file_path IS NOT NULL
            ORDER BY file_path
            "#,
        )?;
        let file_paths = file_stmt
            .query_map(params![id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Some((summary, file_paths)))
    })?;

    Ok(result.map(|(summary, file_paths)| SessionDetail {
        summary: finalize_summary(summary),
        file_paths,
    }))
}

/// `active-sessions()`: the subset whose `last-seen` is within the idleness
/// window, recomputed at query time.
pub fn active_sessions(store: &Store) -> Result<Vec<SessionSummary>> {
    Ok(list_sessions(store)?.into_iter().filter(|s| s.session.is_active).collect())
}

/// `search(query)`: sessions whose project name, any message body, or
/// modified-file set contains `query` (case-insensitive substring).
pub fn search(store: &Store, query: &str) -> Result<Vec<SessionSummary>> {
    if query.chars().count() > MAX_SEARCH_QUERY_LEN {
        return Err(Error::InvalidArgument(format!(
            "search query exceeds {MAX_SEARCH_QUERY_LEN} characters"
        )));
    }
    let pattern = format!("%{}%", query);

    let ids = store.do_read(|conn| {
        let mut stmt = conn.prepare(
            r#"
            SELECT DISTINCT s.id
            FROM sessions s
            LEFT JOIN messages m ON m.session_id = s.id
            LEFT JOIN tool_results t ON t.session_id = s.id
            WHERE s.project_name LIKE ?1 ESCAPE '\' COLLATE NOCASE
               OR m.content LIKE ?1 ESCAPE '\' COLLATE NOCASE
               OR t.file_path LIKE ?1 ESCAPE '\' COLLATE NOCASE
            ORDER BY s.id
            "#,
        )?;
        let ids = stmt
            .query_map(params![pattern], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    })?;

    let mut matches = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(detail) = get_session(store, &id)? {
            matches.push(detail.summary);
        }
    }
    matches.sort_by(|a, b| b.session.last_seen.cmp(&a.session.last_seen));
    Ok(matches)
}

fn clamp_activity_limit(limit: usize) -> Result<usize> {
    if limit == 0 || limit > MAX_ACTIVITY_LIMIT {
        return Err(Error::InvalidArgument(format!(
            "activity limit must be in [1, {MAX_ACTIVITY_LIMIT}]"
        )));
    }
    Ok(limit)
}

/// Build the union timeline (user messages → `message_sent`, file-modifying
/// tool results → `file_modified`, explicit `activity_log` rows), deduped by
/// `(kind, session, timestamp)`, newest first (spec.md §4.H).
fn activity_union(store: &Store, limit: usize, session_id: Option<&str>, project_path: Option<&str>) -> Result<Vec<ActivityEntry>> {
    let limit = clamp_activity_limit(limit)?;

    let entries = store.do_read(|conn| {
        let mut entries = Vec::new();

        let mut message_sql = String::from(
            r#"
            SELECT m.timestamp, m.role, m.session_id, s.project_path
            FROM messages m
            JOIN sessions s ON s.id = m.session_id
            WHERE m.role = 'user'
            "#,
        );
        if session_id.is_some() {
            message_sql.push_str(" AND m.session_id = ?1");
        }
        if project_path.is_some() {
            message_sql.push_str(" AND s.project_path = ?1");
        }
        let mut stmt = conn.prepare(&message_sql)?;
        let rows: Vec<(DateTime<Utc>, String, String, String)> = if let Some(scope) = session_id.or(project_path) {
            stmt.query_map(params![scope], read_message_activity_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            stmt.query_map([], read_message_activity_row)?.collect::<rusqlite::Result<Vec<_>>>()?
        };
        for (timestamp, role, sid, project) in rows {
            entries.push(ActivityEntry {
                timestamp,
                kind: ActivityKind::MessageSent,
                session_id: Some(sid),
                project_path: Some(project),
                description: format!("{} message", role),
            });
        }

        let mut tool_sql = String::from(
            r#"
            SELECT t.timestamp, t.tool_name, t.file_path, t.session_id, s.project_path
            FROM tool_results t
            JOIN sessions s ON s.id = t.session_id
            WHERE 1 = 1
            "#,
        );
        if session_id.is_some() {
            tool_sql.push_str(" AND t.session_id = ?1");
        }
        if project_path.is_some() {
            tool_sql.push_str(" AND s.project_path = ?1");
        }
        let mut stmt = conn.prepare(&tool_sql)?;
        let rows: Vec<(DateTime<Utc>, String, Option<String>, String, String)> = if let Some(scope) = session_id.or(project_path) {
            stmt.query_map(params![scope], read_tool_activity_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            stmt.query_map([], read_tool_activity_row)?.collect::<rusqlite::Result<Vec<_>>>()?
        };
        for (timestamp, tool_name, file_path, sid, project) in rows {
            entries.push(ActivityEntry {
                timestamp,
                kind: ActivityKind::FileModified,
                session_id: Some(sid),
                project_path: Some(project),
                description: match &file_path {
                    Some(path) => format!("{} modified {}", tool_name, path),
                    None => format!("{} ran", tool_name),
                },
            });
        }

        let mut log_sql = String::from(
            "SELECT timestamp, kind, session_id, project_path, description FROM activity_log WHERE 1 = 1",
        );
        if session_id.is_some() {
            log_sql.push_str(" AND session_id = ?1");
        }
        if project_path.is_some() {
            log_sql.push_str(" AND project_path = ?1");
        }
        let mut stmt = conn.prepare(&log_sql)?;
        let rows: Vec<ActivityEntry> = if let Some(scope) = session_id.or(project_path) {
            stmt.query_map(params![scope], read_log_activity_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            stmt.query_map([], read_log_activity_row)?.collect::<rusqlite::Result<Vec<_>>>()?
        };
        entries.extend(rows);

        Ok(entries)
    })?;

    let mut entries = dedup_activity(entries);
    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    entries.truncate(limit);
    Ok(entries)
}

fn read_message_activity_row(row: &Row<'_>) -> rusqlite::Result<(DateTime<Utc>, String, String, String)> {
    let ts: String = row.get(0)?;
    Ok((parse_ts(&ts), row.get(1)?, row.get(2)?, row.get(3)?))
}

fn read_tool_activity_row(row: &Row<'_>) -> rusqlite::Result<(DateTime<Utc>, String, Option<String>, String, String)> {
    let ts: String = row.get(0)?;
    Ok((parse_ts(&ts), row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn read_log_activity_row(row: &Row<'_>) -> rusqlite::Result<ActivityEntry> {
    let ts: String = row.get(0)?;
    let kind: String = row.get(1)?;
    Ok(ActivityEntry {
        timestamp: parse_ts(&ts),
        kind: parse_activity_kind(&kind),
        session_id: row.get(2)?,
        project_path: row.get(3)?,
        description: row.get(4)?,
    })
}

fn parse_activity_kind(s: &str) -> ActivityKind {
    match s {
        "message_sent" => ActivityKind::MessageSent,
        "message_received" => ActivityKind::MessageReceived,
        "file_modified" => ActivityKind::FileModified,
        "tool_used" => ActivityKind::ToolUsed,
        "session_started" => ActivityKind::SessionStarted,
        "session_ended" => ActivityKind::SessionEnded,
        _ => ActivityKind::ImportCompleted,
    }
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}

/// `recent-activity(limit)`: the unscoped union timeline.
pub fn recent_activity(store: &Store, limit: usize) -> Result<Vec<ActivityEntry>> {
    activity_union(store, limit, None, None)
}

/// `session-activity(session, limit)`: the timeline scoped to one session.
pub fn session_activity(store: &Store, session_id: &str, limit: usize) -> Result<Vec<ActivityEntry>> {
    activity_union(store, limit, Some(session_id), None)
}

/// `project-activity(project, limit)`: the timeline scoped to one project.
pub fn project_activity(store: &Store, project_path: &str, limit: usize) -> Result<Vec<ActivityEntry>> {
    activity_union(store, limit, None, Some(project_path))
}

fn validate_timeline_args(hours: i64, granularity: &str) -> Result<Granularity> {
    if hours <= 0 || hours > MAX_TIMELINE_HOURS {
        return Err(Error::InvalidArgument(format!(
            "timeline hours must be in (0, {MAX_TIMELINE_HOURS}]"
        )));
    }
    granularity
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("unknown granularity '{granularity}'")))
}

fn token_timeline_scoped(
    store: &Store,
    hours: i64,
    granularity: &str,
    session_id: Option<&str>,
    project_path: Option<&str>,
) -> Result<Vec<TokenBucket>> {
    let granularity = validate_timeline_args(hours, granularity)?;
    let since = (Utc::now() - Duration::hours(hours)).to_rfc3339();
    let fmt = granularity.strftime_format();

    let rows = store.do_read(|conn| {
        let mut sql = format!(
            r#"
            SELECT
                strftime('{fmt}', m.timestamp) AS bucket,
                COUNT(m.id) AS message_count,
                COALESCE(SUM(u.input_tokens), 0) AS input_tokens,
                COALESCE(SUM(u.output_tokens), 0) AS output_tokens,
                COALESCE(SUM(u.cache_creation_input_tokens), 0) AS cache_creation_tokens,
                COALESCE(SUM(u.cache_read_input_tokens), 0) AS cache_read_tokens,
                COALESCE(SUM(u.estimated_cost), 0.0) AS cost
            FROM messages m
            JOIN sessions s ON s.id = m.session_id
            LEFT JOIN token_usage u ON u.message_id = m.id
            WHERE m.timestamp >= ?1
            "#
        );
        if session_id.is_some() {
            sql.push_str(" AND m.session_id = ?2");
        }
        if project_path.is_some() {
            sql.push_str(" AND s.project_path = ?2");
        }
        sql.push_str(" GROUP BY bucket ORDER BY bucket ASC");

        let mut stmt = conn.prepare(&sql)?;
        let rows = if let Some(scope) = session_id.or(project_path) {
            stmt.query_map(params![since, scope], row_to_bucket)?.collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            stmt.query_map(params![since], row_to_bucket)?.collect::<rusqlite::Result<Vec<_>>>()?
        };
        Ok(rows)
    })?;
    Ok(rows)
}

fn row_to_bucket(row: &Row<'_>) -> rusqlite::Result<TokenBucket> {
    let bucket: String = row.get(0)?;
    Ok(TokenBucket {
        bucket_start: DateTime::parse_from_rfc3339(&bucket)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        message_count: row.get::<_, i64>(1)? as u64,
        input_tokens: row.get::<_, i64>(2)? as u64,
        output_tokens: row.get::<_, i64>(3)? as u64,
        cache_creation_tokens: row.get::<_, i64>(4)? as u64,
        cache_read_tokens: row.get::<_, i64>(5)? as u64,
        cost: row.get(6)?,
    })
}

/// `token-timeline(hours, granularity)`: the unscoped timeline.
pub fn token_timeline(store: &Store, hours: i64, granularity: &str) -> Result<Vec<TokenBucket>> {
    token_timeline_scoped(store, hours, granularity, None, None)
}

/// Session-scoped variant of `token-timeline`.
pub fn session_token_timeline(store: &Store, session_id: &str, hours: i64, granularity: &str) -> Result<Vec<TokenBucket>> {
    token_timeline_scoped(store, hours, granularity, Some(session_id), None)
}

/// Project-scoped variant of `token-timeline`.
pub fn project_token_timeline(store: &Store, project_path: &str, hours: i64, granularity: &str) -> Result<Vec<TokenBucket>> {
    token_timeline_scoped(store, hours, granularity, None, Some(project_path))
}

/// `recent-files(limit, offset)`: distinct tool-result file paths across all
/// sessions, most recently modified first, paginated.
pub fn recent_files(store: &Store, limit: usize, offset: usize) -> Result<Vec<RecentFile>> {
    store.do_read(|conn| {
        let mut stmt = conn.prepare(
            r#"
            SELECT file_path, session_id, tool_name, COUNT(*) AS occurrences, MAX(timestamp) AS last_modified
            FROM tool_results
            WHERE file_path IS NOT NULL
            GROUP BY file_path
            ORDER BY last_modified DESC
            LIMIT ?1 OFFSET ?2
            "#,
        )?;
        let rows = stmt
            .query_map(params![limit as i64, offset as i64], row_to_recent_file)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    })
    .map_err(Error::from)
}

/// `project-recent-files(project, limit, optional branch)`: one row per file
/// path for a project, aggregated across its sessions.
pub fn project_recent_files(store: &Store, project_path: &str, limit: usize, branch: Option<&str>) -> Result<Vec<RecentFile>> {
    store.do_read(|conn| {
        let rows = match branch {
            Some(branch) => {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT t.file_path, t.session_id, t.tool_name, COUNT(*) AS occurrences, MAX(t.timestamp) AS last_modified
                    FROM tool_results t
                    JOIN sessions s ON s.id = t.session_id
                    JOIN messages m ON m.id = t.message_id
                    WHERE s.project_path = ?1 AND t.file_path IS NOT NULL AND m.git_branch = ?2
                    GROUP BY t.file_path ORDER BY last_modified DESC LIMIT ?3
                    "#,
                )?;
                stmt.query_map(params![project_path, branch, limit as i64], row_to_recent_file)?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT t.file_path, t.session_id, t.tool_name, COUNT(*) AS occurrences, MAX(t.timestamp) AS last_modified
                    FROM tool_results t
                    JOIN sessions s ON s.id = t.session_id
                    WHERE s.project_path = ?1 AND t.file_path IS NOT NULL
                    GROUP BY t.file_path ORDER BY last_modified DESC LIMIT ?2
                    "#,
                )?;
                stmt.query_map(params![project_path, limit as i64], row_to_recent_file)?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(rows)
    })
    .map_err(Error::from)
}

fn row_to_recent_file(row: &Row<'_>) -> rusqlite::Result<RecentFile> {
    let last_modified: String = row.get(4)?;
    Ok(RecentFile {
        file_path: row.get(0)?,
        session_id: row.get(1)?,
        tool_name: row.get(2)?,
        occurrence_count: row.get::<_, i64>(3)? as u64,
        last_modified: parse_ts(&last_modified),
    })
}

/// `summary-metrics()`: the fixed set of headline totals across the store.
pub fn summary_metrics(store: &Store) -> Result<SummaryMetrics> {
    let summaries = list_sessions(store)?;

    let total_sessions = summaries.len() as u64;
    let active_sessions = summaries.iter().filter(|s| s.session.is_active).count() as u64;
    let total_messages: u64 = summaries.iter().map(|s| s.session.message_count).sum();
    let total_tokens: u64 = summaries.iter().map(SessionSummary::total_tokens).sum();
    let total_cost: f64 = summaries.iter().map(|s| s.total_cost).sum();
    let average_session_duration_secs = if total_sessions == 0 {
        0.0
    } else {
        summaries.iter().map(|s| s.session.duration_secs as f64).sum::<f64>() / total_sessions as f64
    };

    let mut model_counts: std::collections::BTreeMap<String, u64> = std::collections::BTreeMap::new();
    for summary in &summaries {
        if let Some(model) = &summary.session.model {
            *model_counts.entry(model.clone()).or_insert(0) += 1;
        }
    }
    // Reverse(label) makes the lexically smallest label win a count tie.
    let most_used_model = model_counts
        .into_iter()
        .max_by_key(|(label, count)| (*count, std::cmp::Reverse(label.clone())))
        .map(|(label, _)| label);

    Ok(SummaryMetrics {
        total_sessions,
        active_sessions,
        total_messages,
        total_tokens,
        total_cost,
        average_session_duration_secs,
        most_used_model,
    })
}

/// `peak-hours()`: the top-4 hours of day by message count over the last 30
/// days, requiring at least 10 messages, averaged per active day.
pub fn peak_hours(store: &Store) -> Result<Vec<PeakHour>> {
    let since = (Utc::now() - Duration::days(PEAK_HOURS_WINDOW_DAYS)).to_rfc3339();

    let rows = store.do_read(|conn| {
        let mut stmt = conn.prepare(
            r#"
            SELECT
                CAST(strftime('%H', timestamp) AS INTEGER) AS hour,
                COUNT(*) AS message_count,
                COUNT(DISTINCT date(timestamp)) AS active_days
            FROM messages
            WHERE timestamp >= ?1
            GROUP BY hour
            HAVING message_count >= ?2
            "#,
        )?;
        let rows = stmt
            .query_map(params![since, PEAK_HOURS_MIN_MESSAGES], |row| {
                let hour: i64 = row.get(0)?;
                let message_count: i64 = row.get(1)?;
                let active_days: i64 = row.get(2)?;
                Ok((hour as u32, message_count, active_days.max(1)))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    })?;

    let mut peaks: Vec<PeakHour> = rows
        .into_iter()
        .map(|(hour, message_count, active_days)| PeakHour {
            hour,
            average_messages_per_active_day: message_count as f64 / active_days as f64,
        })
        .collect();

    // Ties broken by ascending numeric hour.
    peaks.sort_by(|a, b| {
        b.average_messages_per_active_day
            .partial_cmp(&a.average_messages_per_active_day)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.hour.cmp(&b.hour))
    });
    peaks.truncate(PEAK_HOURS_TOP_N);
    peaks.sort_by_key(|p| p.hour);
    Ok(peaks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agtrace_types::{Role, Session, SessionStatus, WriteMode, Message};

    fn store_with_one_session() -> Store {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let session = Session {
            id: "s1".into(),
            project_path: "/proj".into(),
            project_name: "proj".into(),
            log_file_path: "/proj/s1.jsonl".into(),
            first_seen: now - Duration::seconds(30),
            last_seen: now,
            is_active: true,
            status: SessionStatus::Active,
            model: Some("claude-opus-4".into()),
            message_count: 1,
            duration_secs: 30,
        };
        store.do_write(|tx| queries::session::upsert(tx, &session, WriteMode::Replace)).unwrap();

        let message = Message {
            id: "m1".into(),
            session_id: "s1".into(),
            parent_id: None,
            role: Role::User,
            content: "hello world".into(),
            timestamp: now,
            cwd: None,
            version: None,
            is_sidechain: false,
            request_id: None,
            model: None,
            git_branch: Some("main".into()),
        };
        store.do_write(|tx| queries::message::insert(tx, &message, WriteMode::Replace)).unwrap();

        store
    }

    #[test]
    fn list_sessions_recomputes_is_active_from_idleness_window() {
        let store = store_with_one_session();
        let sessions = list_sessions(&store).unwrap();
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].session.is_active);
    }

    #[test]
    fn search_rejects_queries_over_the_length_cap() {
        let store = Store::open_in_memory().unwrap();
        let long = "a".repeat(101);
        assert!(search(&store, &long).is_err());
    }

    #[test]
    fn search_matches_message_body_substring() {
        let store = store_with_one_session();
        let found = search(&store, "hello").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].session.id, "s1");
    }

    #[test]
    fn token_timeline_rejects_unknown_granularity() {
        let store = Store::open_in_memory().unwrap();
        assert!(token_timeline(&store, 24, "fortnight").is_err());
    }

    #[test]
    fn token_timeline_rejects_hours_past_the_cap() {
        let store = Store::open_in_memory().unwrap();
        assert!(token_timeline(&store, 721, "hour").is_err());
    }

    #[test]
    fn recent_activity_rejects_limit_outside_allowed_range() {
        let store = Store::open_in_memory().unwrap();
        assert!(recent_activity(&store, 0).is_err());
        assert!(recent_activity(&store, 501).is_err());
    }

    #[test]
    fn summary_metrics_counts_the_one_seeded_session() {
        let store = store_with_one_session();
        let metrics = summary_metrics(&store).unwrap();
        assert_eq!(metrics.total_sessions, 1);
        assert_eq!(metrics.most_used_model.as_deref(), Some("claude-opus-4"));
    }
}
