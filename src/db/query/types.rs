use std::path::PathBuf;
use std::time::Duration;

/// Result of running one script file as a single transaction.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub path: PathBuf,
    /// Statements sent to the server; skipped ones are not counted.
    pub executed: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct SchemaInit {
    pub ddl: BatchOutcome,
    pub demo: Option<BatchOutcome>,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub log_sql_preview: bool,
    pub preview_chars: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            log_sql_preview: true,
            preview_chars: 180,
        }
    }
}
