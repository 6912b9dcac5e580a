use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use once_cell::sync::Lazy;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, error, info, warn};

use crate::db::error::{ScriptExecError, ScriptLoadError};
use crate::db::script_file::ScriptSource;

use super::{BatchOutcome, RunOptions, SchemaInit};

static SQLSTATE_MESSAGES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    [
        ("23505", "Unique constraint violated."),
        ("23502", "Required field is missing (NOT NULL violated)."),
        ("23514", "CHECK constraint violated."),
        ("23503", "Foreign key constraint violated."),
        ("22P02", "Invalid data format."),
    ]
    .into_iter()
    .collect()
});

/// Destination for statements of a batch, one at a time and in order.
#[allow(async_fn_in_trait)]
pub trait StatementSink {
    async fn execute(&mut self, statement: &str) -> Result<(), sqlx::Error>;
}

impl StatementSink for Transaction<'_, Postgres> {
    async fn execute(&mut self, statement: &str) -> Result<(), sqlx::Error> {
        sqlx::Executor::execute(&mut **self, statement)
            .await
            .map(|_| ())
    }
}

pub struct QueryExecutor;

impl QueryExecutor {
    /// Empty statements and psql meta-commands never reach the server.
    pub fn is_skippable(statement: &str) -> bool {
        let trimmed = statement.trim();
        trimmed.is_empty() || trimmed.starts_with('\\')
    }

    /// Whitespace-collapsed prefix of a statement for log lines.
    pub fn statement_preview(statement: &str, max_chars: usize) -> String {
        let collapsed = statement.split_whitespace().collect::<Vec<_>>().join(" ");
        collapsed.chars().take(max_chars).collect()
    }

    pub fn sqlstate_message(code: Option<&str>, raw: &str) -> String {
        code.and_then(|code| SQLSTATE_MESSAGES.get(code))
            .map(|message| (*message).to_string())
            .unwrap_or_else(|| raw.to_string())
    }

    pub fn translate_error(err: &sqlx::Error) -> String {
        match err {
            sqlx::Error::Database(db_err) => {
                Self::sqlstate_message(db_err.code().as_deref(), db_err.message())
            }
            other => other.to_string(),
        }
    }

    /// Runs `statements` through `sink` in order and returns how many were
    /// executed. Stops at the first failure.
    pub async fn run_statements<S: StatementSink>(
        sink: &mut S,
        statements: &[String],
        options: &RunOptions,
    ) -> Result<usize, ScriptExecError> {
        let mut executed = 0usize;

        for (index, raw) in statements.iter().enumerate() {
            let ordinal = index + 1;
            let statement = raw.trim();
            if Self::is_skippable(statement) {
                debug!(ordinal, "skipping empty statement or meta-command");
                continue;
            }

            let preview = Self::statement_preview(statement, options.preview_chars);
            if options.log_sql_preview {
                info!("DDL/DML: {}", preview);
            }

            if let Err(err) = sink.execute(statement).await {
                let message = Self::translate_error(&err);
                error!(ordinal, error = %err, "statement failed");
                return Err(ScriptExecError::Statement {
                    ordinal,
                    preview,
                    message,
                });
            }
            executed += 1;
        }

        Ok(executed)
    }

    pub fn quote_ident(ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }
}

/// Runs script files against a PostgreSQL pool, one transaction per file.
pub struct ScriptRunner {
    pool: PgPool,
    search_dirs: Vec<PathBuf>,
    options: RunOptions,
}

impl ScriptRunner {
    pub fn new(pool: PgPool, search_dirs: Vec<PathBuf>, options: RunOptions) -> Self {
        Self {
            pool,
            search_dirs,
            options,
        }
    }

    pub async fn server_version(&self) -> Result<String, ScriptExecError> {
        sqlx::query_scalar::<_, String>("SELECT version()")
            .fetch_one(&self.pool)
            .await
            .map_err(|err| ScriptExecError::Connect(QueryExecutor::translate_error(&err)))
    }

    pub async fn exec_script(&self, name: &str) -> Result<BatchOutcome, ScriptExecError> {
        let started = Instant::now();
        let source = ScriptSource::load(name, &self.search_dirs)?;
        let statements = QueryExecutor::split_statements(&source.text);
        debug!(
            path = %source.path.display(),
            statements = statements.len(),
            "split SQL script"
        );

        let executed = self.exec_in_transaction(&statements).await?;
        info!(
            "Executed {} statements from {}",
            executed,
            source.path.display()
        );

        Ok(BatchOutcome {
            path: source.path,
            executed,
            elapsed: started.elapsed(),
        })
    }

    /// Commits only if every statement succeeds.
    pub async fn exec_in_transaction(
        &self,
        statements: &[String],
    ) -> Result<usize, ScriptExecError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| ScriptExecError::Begin(QueryExecutor::translate_error(&err)))?;

        match QueryExecutor::run_statements(&mut tx, statements, &self.options).await {
            Ok(executed) => {
                tx.commit()
                    .await
                    .map_err(|err| ScriptExecError::Commit(QueryExecutor::translate_error(&err)))?;
                Ok(executed)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback failed");
                }
                error!(error = %err, "script batch rolled back");
                Err(err)
            }
        }
    }

    /// Runs the DDL script, then the optional demo data script. Demo data
    /// problems are logged and do not fail the call.
    pub async fn create_schema(
        &self,
        ddl: &str,
        demo: Option<&str>,
    ) -> Result<SchemaInit, ScriptExecError> {
        info!(ddl, demo = ?demo, "create schema start");
        let ddl_outcome = self.exec_script(ddl).await?;

        let demo_outcome = match demo {
            Some(demo) => Self::demo_outcome(demo, self.exec_script(demo).await),
            None => None,
        };

        info!(statements = ddl_outcome.executed, "create schema done");
        Ok(SchemaInit {
            ddl: ddl_outcome,
            demo: demo_outcome,
        })
    }

    /// Demo data is optional: a missing file or a failed batch is logged and
    /// the schema load still counts as done.
    pub fn demo_outcome(
        demo: &str,
        result: Result<BatchOutcome, ScriptExecError>,
    ) -> Option<BatchOutcome> {
        match result {
            Ok(outcome) => Some(outcome),
            Err(ScriptExecError::Load(ScriptLoadError::NotFound { .. })) => {
                warn!("demo data file not found: {}", demo);
                None
            }
            Err(err) => {
                warn!(error = %err, "demo data script failed: {}", demo);
                None
            }
        }
    }

    pub async fn drop_schema(&self, schema: &str) -> Result<(), ScriptExecError> {
        let statement = format!(
            "DROP SCHEMA IF EXISTS {} CASCADE",
            QueryExecutor::quote_ident(schema)
        );
        self.exec_in_transaction(&[statement]).await?;
        Ok(())
    }
}
