use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScriptLoadError {
    #[error("SQL file not found: {name} (cwd={cwd}, searched {} locations)", .searched.len())]
    NotFound {
        name: String,
        cwd: String,
        searched: Vec<PathBuf>,
    },
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("SQL not in UTF-8. Bad byte 0x{byte:02x} at {offset}. Context: {context}")]
    Decode {
        offset: usize,
        byte: u8,
        context: String,
    },
}

#[derive(Debug, Error)]
pub enum ScriptExecError {
    #[error(transparent)]
    Load(#[from] ScriptLoadError),
    #[error("database connection failed: {0}")]
    Connect(String),
    #[error("transaction begin failed: {0}")]
    Begin(String),
    #[error("statement #{ordinal} failed: {message} ({preview})")]
    Statement {
        /// 1-based position among all statements of the batch.
        ordinal: usize,
        preview: String,
        message: String,
    },
    #[error("transaction commit failed: {0}")]
    Commit(String),
}
