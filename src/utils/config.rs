use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

use crate::db::{ConnectionInfo, RunOptions};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

const APP_DIR: &str = "pgscript";
const HISTORY_LIMIT: usize = 500;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    /// Saved connection profile; `DATABASE_URL` and `PG*` variables win over it.
    pub connection: ConnectionInfo,
    /// Extra directories searched for script files.
    pub search_dirs: Vec<PathBuf>,
    pub ddl_file: String,
    pub demo_file: Option<String>,
    pub schema: String,
    pub log_level: String,
    pub log_to_file: bool,
    pub log_dir: Option<PathBuf>,
    pub log_sql_preview: bool,
    pub log_connections: bool,
    pub preview_chars: usize,
}

impl AppConfig {
    pub fn new() -> Self {
        Self {
            connection: ConnectionInfo::default(),
            search_dirs: Vec::new(),
            ddl_file: "ddl.sql".to_string(),
            demo_file: Some("demo_data.sql".to_string()),
            schema: "app".to_string(),
            log_level: "info".to_string(),
            log_to_file: false,
            log_dir: None,
            log_sql_preview: true,
            log_connections: false,
            preview_chars: 180,
        }
    }

    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut path| {
            path.push(APP_DIR);
            path.push("config.json");
            path
        })
    }

    pub fn try_load() -> Result<Self, ConfigError> {
        match Self::config_path() {
            Some(path) => Self::try_load_from(&path),
            None => Ok(Self::new()),
        }
    }

    /// A missing file yields defaults. Unreadable or malformed files are
    /// errors so the caller can report them once logging is up.
    pub fn try_load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(path) = Self::config_path() {
            self.save_to(&path)?;
        }
        Ok(())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        write_json(path, self)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// A set `DB_LOG_SQL_PREVIEW` or `DB_LOG_CONN` overrides the matching
    /// toggle; only `1` enables it.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("DB_LOG_SQL_PREVIEW") {
            self.log_sql_preview = value.trim() == "1";
        }
        if let Some(value) = lookup("DB_LOG_CONN") {
            self.log_connections = value.trim() == "1";
        }
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            log_sql_preview: self.log_sql_preview,
            preview_chars: self.preview_chars,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RunHistory {
    pub runs: Vec<RunHistoryEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunHistoryEntry {
    pub script: String,
    pub timestamp: String,
    pub statements_executed: usize,
    pub execution_time_ms: u64,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl RunHistoryEntry {
    pub fn new(script: &str, statements_executed: usize, execution_time_ms: u64) -> Self {
        Self {
            script: script.to_string(),
            timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            statements_executed,
            execution_time_ms,
            success: true,
            error: None,
        }
    }

    pub fn failed(script: &str, execution_time_ms: u64, error: &str) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            ..Self::new(script, 0, execution_time_ms)
        }
    }
}

impl RunHistory {
    pub fn history_path() -> Option<PathBuf> {
        dirs::data_dir().map(|mut path| {
            path.push(APP_DIR);
            path.push("history.json");
            path
        })
    }

    pub fn load() -> Self {
        Self::history_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Self {
        fs::read_to_string(path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default()
    }

    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(path) = Self::history_path() {
            self.save_to(&path)?;
        }
        Ok(())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        write_json(path, self)
    }

    pub fn add_entry(&mut self, entry: RunHistoryEntry) {
        self.runs.insert(0, entry);
        self.runs.truncate(HISTORY_LIMIT);
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = path.parent() {
        if let Err(err) = fs::create_dir_all(parent) {
            warn!(path = %parent.display(), error = %err, "config persistence error");
            return Err(Box::new(err));
        }
    }
    let content = serde_json::to_string_pretty(value)?;
    if let Err(err) = fs::write(path, content) {
        warn!(path = %path.display(), error = %err, "config persistence error");
        return Err(Box::new(err));
    }
    Ok(())
}
