mod app;
mod db;
mod utils;

use std::process::ExitCode;

use app::{App, Cli};
use clap::Parser;
use utils::AppConfig;

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let (mut config, load_error) = match AppConfig::try_load() {
        Ok(config) => (config, None),
        Err(err) => (AppConfig::new(), Some(err)),
    };
    config.apply_env_overrides();

    let _log_guard = utils::logging::init_tracing(&config);
    if let Some(err) = load_error {
        tracing::warn!(error = %err, "using default configuration");
    }

    let app = App::new(config);

    match app.run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "command failed");
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}
