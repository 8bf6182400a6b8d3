use std::path::Path;

/// Anchor directory segments that mark the start of a display-worthy project path.
///
/// When a project directory name decodes to something like
/// `/Users/alice/GitHub/worktrees/agtrace-feature`, the noisy prefix before
/// the last anchor is dropped so the dashboard shows `agtrace-feature`
/// instead of the full home-relative path.
const ANCHOR_SEGMENTS: &[&str] = &["GitHub", "worktrees"];

/// Decode a Claude Code project directory name back into a project path.
///
/// Claude Code stores session logs under a directory named by replacing
/// every `/` (and `.`) in the project root with `-`, e.g. the project
/// `/Users/alice/code/agtrace` becomes the directory `-Users-alice-code-agtrace`.
/// This reverses that encoding on a best-effort basis: since both `/` and `.`
/// collapse to the same `-`, the reversal cannot always recover the original
/// path exactly, but it recovers a path string that is stable and good enough
/// for display and substring search.
pub fn decode_claude_project_dir(dir_name: &str) -> String {
    let trimmed = dir_name.trim_start_matches('-');
    format!("/{}", trimmed.replace('-', "/"))
}

/// Derive the human-facing display name for a project path.
///
/// Strips any prefix up to and including the last occurrence of a known
/// anchor segment (`GitHub`, `worktrees`) and joins what remains. If no
/// anchor segment is present, falls back to the last path segment (per
/// spec.md §9 Open Question (c)).
pub fn project_display_name(project_path: &str) -> String {
    let segments: Vec<&str> = project_path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return project_path.to_string();
    }

    let anchor_idx = segments
        .iter()
        .rposition(|seg| ANCHOR_SEGMENTS.contains(seg));

    match anchor_idx {
        Some(idx) if idx + 1 < segments.len() => segments[idx + 1..].join("/"),
        _ => segments[segments.len() - 1].to_string(),
    }
}

/// Resolve a project path from a line's recorded working directory, falling
/// back to decoding the containing directory name (spec.md §4.B).
pub fn resolve_project_path(cwd: Option<&str>, containing_dir_name: &str) -> String {
    match cwd {
        Some(cwd) if !cwd.is_empty() => cwd.to_string(),
        _ => decode_claude_project_dir(containing_dir_name),
    }
}

/// Resolve the session identifier for a parsed line: the line's own
/// `sessionId` field, falling back to the basename of the containing file
/// with its `.jsonl` extension stripped (spec.md §4.B).
pub fn resolve_session_id(line_session_id: Option<&str>, file_path: &Path) -> Option<String> {
    if let Some(id) = line_session_id {
        if !id.is_empty() {
            return Some(id.to_string());
        }
    }
    file_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_simple_path() {
        assert_eq!(
            decode_claude_project_dir("-Users-alice-code-agtrace"),
            "/Users/alice/code/agtrace"
        );
    }

    #[test]
    fn display_name_strips_github_anchor() {
        assert_eq!(
            project_display_name("/Users/alice/GitHub/agtrace"),
            "agtrace"
        );
    }

    #[test]
    fn display_name_strips_worktrees_anchor() {
        assert_eq!(
            project_display_name("/Users/alice/worktrees/agtrace-feature"),
            "agtrace-feature"
        );
    }

    #[test]
    fn display_name_falls_back_to_last_segment_without_anchor() {
        assert_eq!(
            project_display_name("/var/data/projects/widget"),
            "widget"
        );
    }

    #[test]
    fn session_id_prefers_line_field() {
        let path = Path::new("/logs/proj/abc123.jsonl");
        assert_eq!(
            resolve_session_id(Some("explicit-id"), path),
            Some("explicit-id".to_string())
        );
    }

    #[test]
    fn session_id_falls_back_to_file_stem() {
        let path = Path::new("/logs/proj/abc123.jsonl");
        assert_eq!(resolve_session_id(None, path), Some("abc123".to_string()));
    }
}
