//! Synthetic Claude-format session log generation for integration tests.
//!
//! Writes directly to a `TempDir`-backed log root rather than depending on
//! fixture files on disk, so a test owns its entire input without needing a
//! samples directory to stay in sync with the schema.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Claude Code's directory encoding: every `/` in the project root becomes
/// `-`, and the result is prefixed with `-` (spec.md §4.B).
pub fn encode_project_dir(project_path: &str) -> String {
    format!("-{}", project_path.trim_start_matches('/').replace('/', "-"))
}

/// One line of a synthetic session transcript.
pub enum FixtureLine {
    User { uuid: String, content: String, timestamp: DateTime<Utc> },
    Assistant { uuid: String, model: String, content: String, input_tokens: u64, output_tokens: u64, timestamp: DateTime<Utc> },
}

/// Builds one `<session-id>.jsonl` file under a project directory inside a
/// temporary log root.
pub struct SessionFixture {
    session_id: String,
    project_path: String,
    cwd: String,
    lines: Vec<FixtureLine>,
}

impl SessionFixture {
    pub fn new(project_path: impl Into<String>) -> Self {
        let project_path = project_path.into();
        let session_id = deterministic_session_id(&project_path);
        SessionFixture { cwd: project_path.clone(), project_path, session_id, lines: Vec::new() }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn user_turn(mut self, uuid: impl Into<String>, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        self.lines.push(FixtureLine::User { uuid: uuid.into(), content: content.into(), timestamp });
        self
    }

    pub fn assistant_turn(
        mut self,
        uuid: impl Into<String>,
        model: impl Into<String>,
        content: impl Into<String>,
        input_tokens: u64,
        output_tokens: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        self.lines.push(FixtureLine::Assistant {
            uuid: uuid.into(),
            model: model.into(),
            content: content.into(),
            input_tokens,
            output_tokens,
            timestamp,
        });
        self
    }

    /// Render this fixture's lines as `.jsonl` content.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            let json = match line {
                FixtureLine::User { uuid, content, timestamp } => serde_json::json!({
                    "type": "user",
                    "uuid": uuid,
                    "parentUuid": serde_json::Value::Null,
                    "sessionId": self.session_id,
                    "timestamp": timestamp.to_rfc3339(),
                    "isSidechain": false,
                    "cwd": self.cwd,
                    "version": "1.0.0",
                    "message": { "role": "user", "content": content },
                }),
                FixtureLine::Assistant { uuid, model, content, input_tokens, output_tokens, timestamp } => serde_json::json!({
                    "type": "assistant",
                    "uuid": uuid,
                    "parentUuid": serde_json::Value::Null,
                    "sessionId": self.session_id,
                    "timestamp": timestamp.to_rfc3339(),
                    "isSidechain": false,
                    "cwd": self.cwd,
                    "version": "1.0.0",
                    "message": {
                        "id": uuid,
                        "role": "assistant",
                        "model": model,
                        "content": content,
                        "usage": { "input_tokens": input_tokens, "output_tokens": output_tokens },
                    },
                }),
            };
            out.push_str(&json.to_string());
            out.push('\n');
        }
        out
    }

    /// Write this fixture under `log_root`, encoding the project directory
    /// the way Claude Code does, and return the written file's path.
    pub fn write_under(&self, log_root: &Path) -> Result<PathBuf> {
        let project_dir = log_root.join(encode_project_dir(&self.project_path));
        std::fs::create_dir_all(&project_dir)?;
        let path = project_dir.join(format!("{}.jsonl", self.session_id));
        std::fs::write(&path, self.render())?;
        Ok(path)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

fn deterministic_session_id(project_path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(project_path.as_bytes());
    let hash = hasher.finalize();
    format!("test-session-{:016x}", u64::from_be_bytes(hash[..8].try_into().unwrap()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn encodes_project_dir_like_claude() {
        assert_eq!(encode_project_dir("/Users/alice/code/agtrace"), "-Users-alice-code-agtrace");
    }

    #[test]
    fn writes_a_readable_jsonl_file() {
        let tmp = TempDir::new().unwrap();
        let now = Utc::now();
        let fixture = SessionFixture::new("/Users/alice/code/agtrace")
            .user_turn("u1", "hi", now)
            .assistant_turn("a1", "claude-3-5-sonnet", "hello", 10, 20, now);
        let path = fixture.write_under(tmp.path()).unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
