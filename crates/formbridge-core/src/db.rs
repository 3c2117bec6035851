use std::{path::Path, sync::Arc, time::Duration};

use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Builder, Connection, Database as LibSqlDatabase};
use thiserror::Error;

/// How long a local connection waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct Database {
    inner: Arc<LibSqlDatabase>,
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("failed to build database: {0}")]
    Build(libsql::Error),
    #[error("failed to open connection: {0}")]
    Connect(libsql::Error),
    #[error("failed to execute statement: {0}")]
    Statement(libsql::Error),
    #[error("remote database {0} requires database.auth_token")]
    MissingAuthToken(String),
}

impl Database {
    /// Open a local SQLite file, or a remote libsql server when the path is a URL.
    pub async fn open(database_path: &Path, auth_token: Option<&str>) -> Result<Self, DbError> {
        let location = database_path.to_string_lossy().to_string();
        let inner = if is_remote(&location) {
            let token = auth_token
                .filter(|token| !token.is_empty())
                .ok_or_else(|| DbError::MissingAuthToken(location.clone()))?;
            Builder::new_remote(location, token.to_string())
                .build()
                .await
        } else {
            Builder::new_local(location).build().await
        }
        .map_err(DbError::Build)?;

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Open a local database file. Shorthand used by tests and tools.
    pub async fn new(database_path: &Path) -> Result<Self, DbError> {
        Self::open(database_path, None).await
    }

    pub async fn connection(&self) -> Result<Connection, DbError> {
        let conn = self.inner.connect().map_err(DbError::Connect)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(DbError::Connect)?;
        conn.execute("PRAGMA foreign_keys = ON", ())
            .await
            .map_err(DbError::Statement)?;
        Ok(conn)
    }

    pub async fn health_check(&self) -> Result<(), DbError> {
        let conn = self.connection().await?;
        let mut rows = conn
            .query("SELECT 1", ())
            .await
            .map_err(DbError::Statement)?;
        let _ = rows.next().await.map_err(DbError::Statement)?;
        Ok(())
    }
}

fn is_remote(path: &str) -> bool {
    path.starts_with("libsql://") || path.starts_with("http://") || path.starts_with("https://")
}

/// Timestamps are stored as RFC 3339 text with millisecond precision.
pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}
