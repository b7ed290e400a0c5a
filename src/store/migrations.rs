//! Schema creation and versioned migrations for the SQLite run store.

use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tracing::{info, warn};

const SCHEMA_VERSION: i32 = 2;

pub(crate) async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    let current_version = current_version(pool).await?;
    info!(current_version, target_version = SCHEMA_VERSION, "checking run store migrations");

    for version in (current_version + 1)..=SCHEMA_VERSION {
        run_migration(pool, version).await?;
    }
    Ok(())
}

async fn current_version(pool: &SqlitePool) -> Result<i32, sqlx::Error> {
    let row = sqlx::query("SELECT MAX(version) AS version FROM _migrations")
        .fetch_optional(pool)
        .await?;
    Ok(row
        .and_then(|r| r.try_get::<Option<i32>, _>("version").ok().flatten())
        .unwrap_or(0))
}

async fn run_migration(pool: &SqlitePool, version: i32) -> Result<(), sqlx::Error> {
    let (name, sql) = match version {
        1 => ("owners_and_runs", MIGRATION_V1),
        2 => ("runs_owner_timestamp_index", MIGRATION_V2),
        _ => {
            warn!(version, "unknown migration version");
            return Ok(());
        }
    };
    info!(version, name, "applying migration");

    let mut tx = pool.begin().await?;
    for statement in sql.split(';').filter(|s| !s.trim().is_empty()) {
        sqlx::query(statement.trim()).execute(&mut *tx).await?;
    }
    sqlx::query("INSERT INTO _migrations (version, name) VALUES (?, ?)")
        .bind(version)
        .bind(name)
        .execute(&mut *tx)
        .await?;
    tx.commit().await
}

const MIGRATION_V1: &str = r#"
CREATE TABLE IF NOT EXISTS owners (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS runs (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL REFERENCES owners(id) ON DELETE CASCADE,
    timestamp INTEGER NOT NULL,
    class_name TEXT NOT NULL,
    build TEXT NOT NULL,
    challenges_json TEXT NOT NULL DEFAULT '[]',
    status TEXT NOT NULL CHECK (status IN ('active', 'completed', 'failed')),
    notes TEXT
)
"#;

const MIGRATION_V2: &str = r#"
CREATE INDEX IF NOT EXISTS idx_runs_owner_timestamp ON runs (owner_id, timestamp DESC)
"#;
