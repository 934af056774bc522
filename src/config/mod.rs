use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::error;

const DEFAULT_SLOW_QUERY_MS: u64 = 250;

/// `{data_dir}/config.toml` — all fields are optional overrides.
/// Priority: CLI / env var  >  TOML  >  built-in default.
#[derive(Deserialize, Default)]
struct TomlConfig {
    /// Log level filter string, e.g. "debug", "info,taskboard=trace" (default: "info").
    log: Option<String>,
    /// Log output format: "pretty" (default, human-readable) | "json" (structured).
    log_format: Option<String>,
    /// Default actor recorded on activities when none is given (default: "cli").
    actor: Option<String>,
    /// Statements slower than this are logged at WARN (default: 250 ms).
    slow_query_ms: Option<u64>,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("config.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml — using defaults");
            None
        }
    }
}

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct BoardConfig {
    /// Directory holding the SQLite database and config.toml.
    pub data_dir: PathBuf,
    /// Log level filter string.
    pub log: String,
    /// "pretty" or "json".
    pub log_format: String,
    /// Actor recorded on activities when the caller gives none.
    pub actor: String,
    /// Slow statement threshold in milliseconds.
    pub slow_query_ms: u64,
}

impl BoardConfig {
    /// Build config from CLI/env args + optional TOML file.
    ///
    /// Priority (highest to lowest):
    ///   1. CLI / env — passed as `Some(value)` from clap
    ///   2. TOML file at `{data_dir}/config.toml`
    ///   3. Built-in defaults
    pub fn new(data_dir: Option<PathBuf>, log: Option<String>, actor: Option<String>) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);
        let toml = load_toml(&data_dir).unwrap_or_default();

        let log = log.or(toml.log).unwrap_or_else(|| "info".to_string());

        let log_format = std::env::var("TASKBOARD_LOG_FORMAT")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.log_format)
            .unwrap_or_else(|| "pretty".to_string());

        let actor = actor
            .or(std::env::var("TASKBOARD_ACTOR").ok().filter(|s| !s.is_empty()))
            .or(toml.actor)
            .unwrap_or_else(|| "cli".to_string());

        let slow_query_ms = toml.slow_query_ms.unwrap_or(DEFAULT_SLOW_QUERY_MS);

        Self {
            data_dir,
            log,
            log_format,
            actor,
            slow_query_ms,
        }
    }

    /// Path of the SQLite database file.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("taskboard.db")
    }
}

fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("taskboard");
        }
    }
    #[cfg(target_os = "linux")]
    {
        // $XDG_DATA_HOME/taskboard or ~/.local/share/taskboard
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            if !xdg.is_empty() {
                return PathBuf::from(xdg).join("taskboard");
            }
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local").join("share").join("taskboard");
        }
    }
    PathBuf::from(".taskboard")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_no_file_exists() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = BoardConfig::new(Some(dir.path().to_path_buf()), None, None);
        assert_eq!(cfg.log, "info");
        assert_eq!(cfg.log_format, "pretty");
        assert_eq!(cfg.actor, "cli");
        assert_eq!(cfg.slow_query_ms, 250);
        assert!(cfg.db_path().ends_with("taskboard.db"));
    }

    #[test]
    fn cli_beats_toml_beats_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "log = \"debug\"\nactor = \"bot\"\nslow_query_ms = 50\n",
        )
        .unwrap();

        let cfg = BoardConfig::new(Some(dir.path().to_path_buf()), None, None);
        assert_eq!(cfg.log, "debug");
        assert_eq!(cfg.actor, "bot");
        assert_eq!(cfg.slow_query_ms, 50);

        let cfg = BoardConfig::new(
            Some(dir.path().to_path_buf()),
            Some("warn".to_string()),
            Some("alice".to_string()),
        );
        assert_eq!(cfg.log, "warn");
        assert_eq!(cfg.actor, "alice");
    }
}
