use std::collections::HashSet;

use libsql::params;
use thiserror::Error;
use tracing::info;

use crate::db::{Database, DbError};

struct Migration {
    version: &'static str,
    sql: &'static str,
}

static MIGRATIONS: &[Migration] = &[Migration {
    version: "001_initial",
    sql: include_str!("../../../migrations/001_initial.sql"),
}];

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("migration failed: {0}")]
    LibSql(#[from] libsql::Error),
}

async fn applied_versions(conn: &libsql::Connection) -> Result<HashSet<String>, MigrationError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
        (),
    )
    .await?;

    let mut applied = HashSet::new();
    let mut rows = conn
        .query("SELECT version FROM schema_migrations", ())
        .await?;
    while let Some(row) = rows.next().await? {
        applied.insert(row.get::<String>(0)?);
    }
    Ok(applied)
}

async fn apply_migrations(
    conn: &libsql::Connection,
    migrations: &[Migration],
) -> Result<usize, MigrationError> {
    let applied = applied_versions(conn).await?;
    let mut count = 0;

    for migration in migrations
        .iter()
        .filter(|migration| !applied.contains(migration.version))
    {
        let tx = conn.transaction().await?;
        tx.execute_batch(migration.sql).await?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at)
             VALUES (?1, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))",
            params![migration.version],
        )
        .await?;
        tx.commit().await?;
        info!(version = migration.version, "applied migration");
        count += 1;
    }

    Ok(count)
}

/// Apply every embedded migration that has not been recorded yet.
pub async fn run_migrations(db: &Database) -> Result<(), MigrationError> {
    let conn = db.connection().await?;
    apply_migrations(&conn, MIGRATIONS).await?;
    Ok(())
}
