use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::utils::AppConfig;

const LOG_FILE_NAME: &str = "pgscript.log";

/// Keeps the background log writer alive; drop it last.
pub struct FileLogGuard {
    _guard: WorkerGuard,
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// `ENABLE_FILE_LOGS` wins over `log_to_file` when set.
pub fn file_logging_enabled<F>(config: &AppConfig, lookup: F) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup("ENABLE_FILE_LOGS")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(config.log_to_file)
}

/// `RUST_LOG` as a full directive string, then a plain `LOG_LEVEL`, then the
/// configured level.
pub fn log_filter<F>(config: &AppConfig, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup("RUST_LOG")
        .or_else(|| lookup("LOG_LEVEL").map(|level| level.to_lowercase()))
        .unwrap_or_else(|| config.log_level.clone())
}

fn log_dir<F>(config: &AppConfig, lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    lookup("LOG_DIR")
        .map(PathBuf::from)
        .or_else(|| config.log_dir.clone())
        .unwrap_or_else(|| PathBuf::from("./logs"))
}

/// Console output goes to stderr so statement listings on stdout stay clean.
pub fn init_tracing(config: &AppConfig) -> Option<FileLogGuard> {
    let filter = log_filter(config, env_lookup);
    let env_filter = EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(true);

    if file_logging_enabled(config, env_lookup) {
        let log_dir = log_dir(config, env_lookup);
        if let Err(err) = std::fs::create_dir_all(&log_dir) {
            eprintln!("failed to create log directory {}: {err}", log_dir.display());
        } else {
            let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_NAME);
            let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
            let file_layer = fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(true);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();

            return Some(FileLogGuard { _guard: guard });
        }
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .init();

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn rust_log_wins_and_keeps_its_case() {
        let lookup = lookup_from(&[
            ("RUST_LOG", "pgscript=debug,sqlx[Query]=warn"),
            ("LOG_LEVEL", "error"),
        ]);
        assert_eq!(
            log_filter(&AppConfig::new(), lookup),
            "pgscript=debug,sqlx[Query]=warn"
        );
    }

    #[test]
    fn log_level_is_lowercased() {
        let lookup = lookup_from(&[("LOG_LEVEL", "DEBUG")]);
        assert_eq!(log_filter(&AppConfig::new(), lookup), "debug");
    }

    #[test]
    fn configured_level_is_the_fallback() {
        let mut config = AppConfig::new();
        config.log_level = "warn".to_string();
        assert_eq!(log_filter(&config, lookup_from(&[])), "warn");
    }

    #[test]
    fn enable_file_logs_overrides_config() {
        let mut config = AppConfig::new();
        config.log_to_file = false;
        assert!(file_logging_enabled(&config, lookup_from(&[("ENABLE_FILE_LOGS", "1")])));
        assert!(file_logging_enabled(&config, lookup_from(&[("ENABLE_FILE_LOGS", "true")])));

        config.log_to_file = true;
        assert!(!file_logging_enabled(&config, lookup_from(&[("ENABLE_FILE_LOGS", "0")])));
        assert!(file_logging_enabled(&config, lookup_from(&[])));
    }

    #[test]
    fn log_dir_prefers_env_then_config() {
        let mut config = AppConfig::new();
        assert_eq!(log_dir(&config, lookup_from(&[])), PathBuf::from("./logs"));

        config.log_dir = Some(PathBuf::from("/var/log/pgscript"));
        assert_eq!(
            log_dir(&config, lookup_from(&[])),
            PathBuf::from("/var/log/pgscript")
        );
        assert_eq!(
            log_dir(&config, lookup_from(&[("LOG_DIR", "/tmp/logs")])),
            PathBuf::from("/tmp/logs")
        );
    }
}
