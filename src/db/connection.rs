use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use tracing::{debug, error, info};

use crate::db::error::ScriptExecError;
use crate::db::query::QueryExecutor;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionInfo {
    /// Full connection URL; when set, the discrete fields are ignored.
    #[serde(skip_serializing)]
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub search_path: Option<String>,
}

impl ConnectionInfo {
    /// Environment variables override the saved profile `base`.
    pub fn from_env(base: Self) -> Self {
        Self::from_lookup(base, |key| std::env::var(key).ok())
    }

    /// Applies `DATABASE_URL` / `PG*` style variables on top of `base`.
    pub fn from_lookup<F>(base: Self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        Self {
            url: non_empty("DATABASE_URL").or(base.url),
            host: non_empty("PGHOST").unwrap_or(base.host),
            port: non_empty("PGPORT")
                .and_then(|value| value.trim().parse::<u16>().ok())
                .unwrap_or(base.port),
            database: non_empty("PGDATABASE").unwrap_or(base.database),
            username: non_empty("PGUSER").unwrap_or(base.username),
            password: lookup("PGPASSWORD").unwrap_or(base.password),
            search_path: non_empty("PGSEARCH_PATH").or(base.search_path),
        }
    }

    pub fn display_string(&self) -> String {
        if self.url.is_some() {
            return "DATABASE_URL".to_string();
        }
        format!(
            "{}@{}:{}/{}",
            self.username, self.host, self.port, self.database
        )
    }

    pub fn connect_options(&self) -> Result<PgConnectOptions, sqlx::Error> {
        let mut options = match &self.url {
            Some(url) => url.parse::<PgConnectOptions>()?,
            None => {
                let options = PgConnectOptions::new()
                    .host(&self.host)
                    .port(self.port)
                    .database(&self.database)
                    .username(&self.username);
                if self.password.is_empty() {
                    options
                } else {
                    options.password(&self.password)
                }
            }
        };
        if let Some(search_path) = &self.search_path {
            options = options.options([("search_path", search_path.as_str())]);
        }
        Ok(options)
    }
}

impl Default for ConnectionInfo {
    fn default() -> Self {
        Self {
            url: None,
            host: "127.0.0.1".to_string(),
            port: 5432,
            database: "postgres".to_string(),
            username: "postgres".to_string(),
            password: String::new(),
            search_path: None,
        }
    }
}

pub struct DatabaseConnection {
    pool: PgPool,
    info: ConnectionInfo,
}

impl DatabaseConnection {
    /// Scripts run sequentially, so a single pooled connection is enough.
    pub async fn connect(info: ConnectionInfo, log_connect: bool) -> Result<Self, ScriptExecError> {
        if log_connect {
            info!(db = %info.display_string(), "DB connect attempt");
        } else {
            debug!(db = %info.display_string(), "DB connect attempt");
        }

        let options = info.connect_options().map_err(|err| {
            error!(error = %err, "invalid connection settings");
            ScriptExecError::Connect(err.to_string())
        })?;

        let pool = match PgPoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
        {
            Ok(pool) => pool,
            Err(err) => {
                let message = QueryExecutor::translate_error(&err);
                error!(error = %message, "DB connect ERROR");
                return Err(ScriptExecError::Connect(message));
            }
        };

        if log_connect {
            info!("DB connect OK");
        }

        Ok(Self { pool, info })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    pub async fn close(self) {
        self.pool.close().await;
        debug!("DB connection closed");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_set() {
        let info = ConnectionInfo::from_lookup(ConnectionInfo::default(), lookup_from(&[]));
        assert_eq!(info.host, "127.0.0.1");
        assert_eq!(info.port, 5432);
        assert_eq!(info.database, "postgres");
        assert_eq!(info.username, "postgres");
        assert!(info.password.is_empty());
        assert!(info.url.is_none());
        assert_eq!(info.display_string(), "postgres@127.0.0.1:5432/postgres");
    }

    #[test]
    fn reads_pg_variables() {
        let info = ConnectionInfo::from_lookup(ConnectionInfo::default(), lookup_from(&[
            ("PGHOST", "db.internal"),
            ("PGPORT", "6543"),
            ("PGDATABASE", "ddos"),
            ("PGUSER", "admin"),
            ("PGPASSWORD", "secret"),
            ("PGSEARCH_PATH", "app, public"),
        ]));
        assert_eq!(info.display_string(), "admin@db.internal:6543/ddos");
        assert_eq!(info.password, "secret");
        assert_eq!(info.search_path.as_deref(), Some("app, public"));
    }

    #[test]
    fn saved_profile_used_when_env_is_silent() {
        let base = ConnectionInfo {
            host: "saved-host".to_string(),
            database: "app_db".to_string(),
            ..ConnectionInfo::default()
        };
        let info = ConnectionInfo::from_lookup(base, lookup_from(&[("PGDATABASE", "override")]));
        assert_eq!(info.host, "saved-host");
        assert_eq!(info.database, "override");
    }

    #[test]
    fn invalid_port_falls_back_to_default() {
        let lookup = lookup_from(&[("PGPORT", "not-a-port")]);
        let info = ConnectionInfo::from_lookup(ConnectionInfo::default(), lookup);
        assert_eq!(info.port, 5432);
    }

    #[test]
    fn password_is_not_serialized() {
        let lookup = lookup_from(&[
            ("PGPASSWORD", "secret"),
            ("DATABASE_URL", "postgres://u:secret@h/db"),
        ]);
        let info = ConnectionInfo::from_lookup(ConnectionInfo::default(), lookup);
        let json = serde_json::to_string(&info).unwrap();
        assert!(!json.contains("secret"));
    }

    #[test]
    fn url_takes_precedence() {
        let info = ConnectionInfo::from_lookup(ConnectionInfo::default(), lookup_from(&[
            ("DATABASE_URL", "postgres://u:p@example.com:5433/app"),
            ("PGHOST", "ignored"),
        ]));
        assert_eq!(info.display_string(), "DATABASE_URL");
        assert!(info.connect_options().is_ok());
    }
}
