use std::time::Instant;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use crate::db::{
    BatchOutcome, ConnectionInfo, DatabaseConnection, QueryExecutor, SchemaInit, ScriptExecError,
    ScriptRunner, ScriptSource,
};
use crate::utils::{AppConfig, RunHistory, RunHistoryEntry};

#[derive(Parser)]
#[command(name = "pgscript", about = "Split and run PostgreSQL schema and seed scripts")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the statements of a script without touching the database.
    Split { file: String },
    /// Run a script as a single transaction.
    Run { file: String },
    /// Create the schema from the DDL script, then load demo data.
    Init {
        #[arg(long)]
        ddl: Option<String>,
        #[arg(long)]
        demo: Option<String>,
        #[arg(long)]
        no_demo: bool,
    },
    /// Drop a schema and everything in it.
    DropSchema { schema: Option<String> },
    /// Show recent script runs.
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Print the effective configuration; `--write` saves it to the config file.
    Config {
        #[arg(long)]
        write: bool,
    },
}

pub struct App {
    config: AppConfig,
}

impl App {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub async fn run(&self, command: Command) -> Result<(), ScriptExecError> {
        match command {
            Command::Split { file } => self.split(&file),
            Command::Run { file } => {
                let db = self.connect().await?;
                let runner = self.runner(&db);
                let result = self.run_recorded(&runner, &file).await;
                db.close().await;
                let outcome = result?;
                println!(
                    "Executed {} statements from {}",
                    outcome.executed,
                    outcome.path.display()
                );
                Ok(())
            }
            Command::Init { ddl, demo, no_demo } => {
                let ddl = ddl.unwrap_or_else(|| self.config.ddl_file.clone());
                let demo = if no_demo {
                    None
                } else {
                    demo.or_else(|| self.config.demo_file.clone())
                };
                self.init(&ddl, demo.as_deref()).await
            }
            Command::DropSchema { schema } => {
                let schema = schema.unwrap_or_else(|| self.config.schema.clone());
                let db = self.connect().await?;
                let result = self.runner(&db).drop_schema(&schema).await;
                db.close().await;
                result?;
                println!("Dropped schema {schema}");
                Ok(())
            }
            Command::History { limit } => {
                self.print_history(limit);
                Ok(())
            }
            Command::Config { write } => {
                self.show_config(write);
                Ok(())
            }
        }
    }

    fn split(&self, file: &str) -> Result<(), ScriptExecError> {
        let source = ScriptSource::load(file, &self.config.search_dirs)?;
        for statement in QueryExecutor::split_statements(&source.text) {
            println!("{statement};\n");
        }
        Ok(())
    }

    async fn init(&self, ddl: &str, demo: Option<&str>) -> Result<(), ScriptExecError> {
        let db = self.connect().await?;
        let runner = self.runner(&db);

        let result: Result<SchemaInit, ScriptExecError> = async {
            let version = runner.server_version().await?;
            println!("Connected: {}", version.chars().take(50).collect::<String>());

            let started = Instant::now();
            let init = runner.create_schema(ddl, demo).await;
            match &init {
                Ok(init) => {
                    self.record(RunHistoryEntry::new(
                        &init.ddl.path.display().to_string(),
                        init.ddl.executed,
                        init.ddl.elapsed.as_millis() as u64,
                    ));
                    if let Some(demo) = &init.demo {
                        self.record(RunHistoryEntry::new(
                            &demo.path.display().to_string(),
                            demo.executed,
                            demo.elapsed.as_millis() as u64,
                        ));
                    }
                }
                Err(err) => self.record(RunHistoryEntry::failed(
                    ddl,
                    started.elapsed().as_millis() as u64,
                    &err.to_string(),
                )),
            }
            init
        }
        .await;
        db.close().await;

        let init = result?;
        println!("Schema created. Statements executed: {}", init.ddl.executed);
        if let Some(demo) = init.demo {
            println!("Demo data loaded. Statements executed: {}", demo.executed);
        }
        Ok(())
    }

    async fn connect(&self) -> Result<DatabaseConnection, ScriptExecError> {
        let info = ConnectionInfo::from_env(self.config.connection.clone());
        let db = DatabaseConnection::connect(info, self.config.log_connections).await?;
        info!(db = %db.info().display_string(), "connected");
        Ok(db)
    }

    fn runner(&self, db: &DatabaseConnection) -> ScriptRunner {
        ScriptRunner::new(
            db.pool().clone(),
            self.config.search_dirs.clone(),
            self.config.run_options(),
        )
    }

    async fn run_recorded(
        &self,
        runner: &ScriptRunner,
        file: &str,
    ) -> Result<BatchOutcome, ScriptExecError> {
        let started = Instant::now();
        let result = runner.exec_script(file).await;
        let entry = match &result {
            Ok(outcome) => RunHistoryEntry::new(
                &outcome.path.display().to_string(),
                outcome.executed,
                outcome.elapsed.as_millis() as u64,
            ),
            Err(err) => RunHistoryEntry::failed(
                file,
                started.elapsed().as_millis() as u64,
                &err.to_string(),
            ),
        };
        self.record(entry);
        result
    }

    fn record(&self, entry: RunHistoryEntry) {
        let mut history = RunHistory::load();
        history.add_entry(entry);
        if let Err(err) = history.save() {
            warn!(error = %err, "run history save error");
        }
    }

    fn show_config(&self, write: bool) {
        let path = AppConfig::config_path()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "<no config directory>".to_string());
        match serde_json::to_string_pretty(&self.config) {
            Ok(json) => println!("# {path}\n{json}"),
            Err(err) => warn!(error = %err, "config serialization error"),
        }
        if write {
            match self.config.save() {
                Ok(()) => println!("Saved {path}"),
                Err(err) => warn!(error = %err, "config save error"),
            }
        }
    }

    fn print_history(&self, limit: usize) {
        let history = RunHistory::load();
        if history.runs.is_empty() {
            println!("No script runs recorded.");
            return;
        }
        for entry in history.runs.iter().take(limit) {
            let status = if entry.success { "ok" } else { "FAILED" };
            println!(
                "{}  {:<6}  {:>4} stmts  {:>6} ms  {}",
                entry.timestamp,
                status,
                entry.statements_executed,
                entry.execution_time_ms,
                entry.script
            );
            if let Some(error) = &entry.error {
                println!("    {error}");
            }
        }
    }
}
