use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Resolve the workspace data directory path based on priority:
/// 1. Explicit path (with tilde expansion)
/// 2. AGTRACE_PATH environment variable (with tilde expansion)
/// 3. XDG data directory (recommended default)
/// 4. ~/.agtrace (fallback for systems without XDG)
pub fn resolve_workspace_path(explicit_path: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = explicit_path {
        return Ok(expand_tilde(path));
    }

    if let Ok(env_path) = std::env::var("AGTRACE_PATH") {
        return Ok(expand_tilde(&env_path));
    }

    if let Some(data_dir) = dirs::data_dir() {
        return Ok(data_dir.join("agtrace"));
    }

    if let Some(home) = dirs::home_dir() {
        return Ok(home.join(".agtrace"));
    }

    Err(Error::Config(
        "Could not determine workspace path: no HOME directory or XDG data directory found".to_string(),
    ))
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(stripped);
    }
    PathBuf::from(path)
}

/// Default root under which Claude Code writes per-project session logs.
fn default_claude_log_root() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".claude").join("projects"))
}

/// Tunable timings and limits named throughout spec.md §4, threaded through
/// the importer, batch writer, and watcher as a single value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Root directory the importer walks and the watcher subscribes to.
    pub log_root: PathBuf,
    /// Session idle threshold (spec.md §3 Session invariants).
    #[serde(default = "defaults::idleness_window_secs")]
    pub idleness_window_secs: i64,
    /// Per-file debounce window for the watcher (spec.md §4.G).
    #[serde(default = "defaults::debounce_window_ms")]
    pub debounce_window_ms: u64,
    /// Grace period after a Create event before importing (spec.md §4.G).
    #[serde(default = "defaults::create_grace_period_ms")]
    pub create_grace_period_ms: u64,
    /// Grace period the watcher's OS handle is given before being forced
    /// closed on shutdown (spec.md §4.G).
    #[serde(default = "defaults::watcher_shutdown_grace_secs")]
    pub watcher_shutdown_grace_secs: u64,
    /// Upper bound on `chunk_rows * fields_per_row` for one batch-writer
    /// statement (spec.md §4.E).
    #[serde(default = "defaults::batch_chunk_param_limit")]
    pub batch_chunk_param_limit: usize,
    /// Total budget for the shutdown sequence (spec.md §4.K).
    #[serde(default = "defaults::shutdown_budget_secs")]
    pub shutdown_budget_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            log_root: default_claude_log_root().unwrap_or_else(|| PathBuf::from(".claude/projects")),
            idleness_window_secs: defaults::idleness_window_secs(),
            debounce_window_ms: defaults::debounce_window_ms(),
            create_grace_period_ms: defaults::create_grace_period_ms(),
            watcher_shutdown_grace_secs: defaults::watcher_shutdown_grace_secs(),
            batch_chunk_param_limit: defaults::batch_chunk_param_limit(),
            shutdown_budget_secs: defaults::shutdown_budget_secs(),
        }
    }
}

impl RuntimeConfig {
    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window_ms)
    }

    pub fn create_grace_period(&self) -> Duration {
        Duration::from_millis(self.create_grace_period_ms)
    }

    pub fn watcher_shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.watcher_shutdown_grace_secs)
    }

    pub fn shutdown_budget(&self) -> Duration {
        Duration::from_secs(self.shutdown_budget_secs)
    }
}

mod defaults {
    pub fn idleness_window_secs() -> i64 {
        agtrace_types::IDLENESS_WINDOW_SECS
    }
    pub fn debounce_window_ms() -> u64 {
        2_000
    }
    pub fn create_grace_period_ms() -> u64 {
        100
    }
    pub fn watcher_shutdown_grace_secs() -> u64 {
        5
    }
    pub fn batch_chunk_param_limit() -> usize {
        900
    }
    pub fn shutdown_budget_secs() -> u64 {
        30
    }
}

/// Every `RuntimeConfig` field as an optional override, the shape a TOML
/// config file populates. Precedence is CLI flag > config file > built-in
/// default (SPEC_FULL.md §4.A.3); [`PartialRuntimeConfig::apply`] is the
/// config-file layer, applied onto [`RuntimeConfig::default`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PartialRuntimeConfig {
    pub log_root: Option<PathBuf>,
    pub idleness_window_secs: Option<i64>,
    pub debounce_window_ms: Option<u64>,
    pub create_grace_period_ms: Option<u64>,
    pub watcher_shutdown_grace_secs: Option<u64>,
    pub batch_chunk_param_limit: Option<usize>,
    pub shutdown_budget_secs: Option<u64>,
}

impl PartialRuntimeConfig {
    pub fn apply(&self, mut base: RuntimeConfig) -> RuntimeConfig {
        if let Some(v) = &self.log_root {
            base.log_root = v.clone();
        }
        if let Some(v) = self.idleness_window_secs {
            base.idleness_window_secs = v;
        }
        if let Some(v) = self.debounce_window_ms {
            base.debounce_window_ms = v;
        }
        if let Some(v) = self.create_grace_period_ms {
            base.create_grace_period_ms = v;
        }
        if let Some(v) = self.watcher_shutdown_grace_secs {
            base.watcher_shutdown_grace_secs = v;
        }
        if let Some(v) = self.batch_chunk_param_limit {
            base.batch_chunk_param_limit = v;
        }
        if let Some(v) = self.shutdown_budget_secs {
            base.shutdown_budget_secs = v;
        }
        base
    }
}

/// On-disk configuration: the workspace path plus `RuntimeConfig` overrides.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub workspace_path: Option<PathBuf>,
    #[serde(default)]
    pub runtime: PartialRuntimeConfig,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path()?)
    }

    pub fn load_from(path: &PathBuf) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(resolve_workspace_path(None)?.join("config.toml"))
    }

    /// Built-in defaults layered with this file's overrides.
    pub fn runtime_config(&self) -> RuntimeConfig {
        self.runtime.apply(RuntimeConfig::default())
    }

    pub fn workspace_path(&self) -> Result<PathBuf> {
        resolve_workspace_path(self.workspace_path.as_deref().and_then(|p| p.to_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.workspace_path.is_none());
    }

    #[test]
    fn test_config_save_and_load() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("config.toml");

        let mut config = Config::default();
        config.runtime.debounce_window_ms = Some(5_000);
        config.save_to(&config_path)?;
        assert!(config_path.exists());

        let loaded = Config::load_from(&config_path)?;
        assert_eq!(loaded.runtime_config().debounce_window_ms, 5_000);
        Ok(())
    }

    #[test]
    fn test_load_nonexistent_returns_default() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("nonexistent.toml");
        let config = Config::load_from(&config_path)?;
        assert_eq!(config.runtime_config().debounce_window_ms, 2_000);
        Ok(())
    }

    #[test]
    fn partial_override_leaves_other_fields_at_default() {
        let mut partial = PartialRuntimeConfig::default();
        partial.batch_chunk_param_limit = Some(123);
        let merged = partial.apply(RuntimeConfig::default());
        assert_eq!(merged.batch_chunk_param_limit, 123);
        assert_eq!(merged.idleness_window_secs, agtrace_types::IDLENESS_WINDOW_SECS);
    }
}
