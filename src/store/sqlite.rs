//! Authenticated, multi-device run storage on SQLite.
//!
//! Runs hang off an `owners` row keyed by the owner's verified email. Every
//! mutation carries the owner predicate in its own `WHERE` clause, so a
//! concurrent delete can never slip between the ownership check and the write.

use super::migrations::run_migrations;
use super::{
    new_run_id, now_millis, prepare_import, validate_new_run, validate_notes, RunStore,
    StoreError, StoreResult,
};
use crate::identity::{Caller, OwnerIdentity};
use crate::model::{Challenge, NewRun, Run, RunImport, RunStatus};
use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{FromRow, Sqlite, Transaction};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Clone)]
pub struct SqliteRunStore {
    pool: SqlitePool,
    path: PathBuf,
}

#[derive(Debug, FromRow)]
struct RunRow {
    id: String,
    timestamp: i64,
    owner_email: String,
    class_name: String,
    build: String,
    challenges_json: String,
    status: String,
    notes: Option<String>,
}

impl TryFrom<RunRow> for Run {
    type Error = StoreError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<RunStatus>()
            .map_err(StoreError::InvalidInput)?;
        let challenges: Vec<Challenge> = serde_json::from_str(&row.challenges_json)?;
        Ok(Run {
            id: row.id,
            timestamp: row.timestamp,
            owner_id: row.owner_email,
            class_name: row.class_name,
            build: row.build,
            challenges,
            status,
            notes: row.notes,
        })
    }
}

const SELECT_RUNS: &str = r#"
    SELECT r.id, r.timestamp, o.email AS owner_email, r.class_name, r.build,
           r.challenges_json, r.status, r.notes
    FROM runs r
    JOIN owners o ON o.id = r.owner_id
    WHERE o.email = ?
    ORDER BY r.timestamp DESC, r.rowid DESC
"#;

impl SqliteRunStore {
    /// Open the database at `path`, creating it and applying migrations as needed.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .min_connections(1)
            .connect_with(options)
            .await?;

        run_migrations(&pool).await?;
        info!(path = %path.display(), "opened sqlite run store");

        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Idempotent upsert of the owner record. Returns the internal owner id.
    async fn resolve_owner(
        tx: &mut Transaction<'_, Sqlite>,
        owner: &OwnerIdentity,
    ) -> StoreResult<String> {
        sqlx::query(
            "INSERT INTO owners (id, email, created_at) VALUES (?, ?, ?) \
             ON CONFLICT(email) DO NOTHING",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(owner.as_str())
        .bind(now_millis())
        .execute(&mut **tx)
        .await?;

        let id: String = sqlx::query_scalar("SELECT id FROM owners WHERE email = ?")
            .bind(owner.as_str())
            .fetch_one(&mut **tx)
            .await?;
        Ok(id)
    }

    async fn insert_run(
        tx: &mut Transaction<'_, Sqlite>,
        owner_id: &str,
        owner: &OwnerIdentity,
        run: NewRun,
    ) -> StoreResult<Run> {
        let id = new_run_id();
        let timestamp = now_millis();
        let challenges_json = serde_json::to_string(&run.challenges)?;
        sqlx::query(
            r#"
            INSERT INTO runs (id, owner_id, timestamp, class_name, build, challenges_json, status, notes)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(owner_id)
        .bind(timestamp)
        .bind(&run.class_name)
        .bind(&run.build)
        .bind(&challenges_json)
        .bind(run.status.as_str())
        .bind(&run.notes)
        .execute(&mut **tx)
        .await?;

        Ok(Run {
            id,
            timestamp,
            owner_id: owner.as_str().to_string(),
            class_name: run.class_name,
            build: run.build,
            challenges: run.challenges,
            status: run.status,
            notes: run.notes,
        })
    }
}

fn require_owner(caller: &Caller) -> StoreResult<&OwnerIdentity> {
    caller.owner().ok_or(StoreError::Unauthenticated)
}

#[async_trait]
impl RunStore for SqliteRunStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn list(&self, caller: &Caller) -> StoreResult<Vec<Run>> {
        let Some(owner) = caller.owner() else {
            return Ok(Vec::new());
        };
        let rows = sqlx::query_as::<_, RunRow>(SELECT_RUNS)
            .bind(owner.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Run::try_from).collect()
    }

    async fn create(&self, caller: &Caller, run: NewRun) -> StoreResult<Run> {
        let owner = require_owner(caller)?;
        validate_new_run(&run)?;

        let mut tx = self.pool.begin().await?;
        let owner_id = Self::resolve_owner(&mut tx, owner).await?;
        let created = Self::insert_run(&mut tx, &owner_id, owner, run).await?;
        tx.commit().await?;

        debug!(id = %created.id, owner = %owner, "created run");
        Ok(created)
    }

    /// One transaction for the whole batch, so a failure part-way leaves
    /// nothing behind and a retry cannot duplicate runs.
    async fn import_snapshot(
        &self,
        caller: &Caller,
        records: Vec<RunImport>,
    ) -> StoreResult<Vec<Run>> {
        let owner = require_owner(caller)?;
        let runs = prepare_import(records)?;

        let mut tx = self.pool.begin().await?;
        let owner_id = Self::resolve_owner(&mut tx, owner).await?;
        let mut created = Vec::with_capacity(runs.len());
        // Oldest first so rowids and timestamps follow the original history.
        for run in runs.into_iter().rev() {
            created.push(Self::insert_run(&mut tx, &owner_id, owner, run).await?);
        }
        tx.commit().await?;
        created.reverse();

        info!(owner = %owner, count = created.len(), "imported runs");
        Ok(created)
    }

    async fn update_status(
        &self,
        caller: &Caller,
        run_id: &str,
        status: RunStatus,
        notes: Option<String>,
    ) -> StoreResult<()> {
        let owner = require_owner(caller)?;
        validate_notes(notes.as_deref())?;

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = ?, notes = COALESCE(?, notes)
            WHERE id = ?
              AND owner_id = (SELECT id FROM owners WHERE email = ?)
              AND (status = 'active' OR status = ?)
            "#,
        )
        .bind(status.as_str())
        .bind(&notes)
        .bind(run_id)
        .bind(owner.as_str())
        .bind(status.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            // Same transaction: tell a terminal run of ours apart from anything else.
            let current: Option<String> = sqlx::query_scalar(
                r#"
                SELECT r.status FROM runs r
                JOIN owners o ON o.id = r.owner_id
                WHERE r.id = ? AND o.email = ?
                "#,
            )
            .bind(run_id)
            .bind(owner.as_str())
            .fetch_optional(&mut *tx)
            .await?;
            tx.rollback().await?;

            return match current.map(|s| s.parse::<RunStatus>()) {
                Some(Ok(current)) => Err(StoreError::TerminalStatus { status: current }),
                Some(Err(e)) => Err(StoreError::InvalidInput(e)),
                None => Err(StoreError::NotFound),
            };
        }

        tx.commit().await?;
        debug!(id = run_id, %status, "updated run status");
        Ok(())
    }

    async fn delete(&self, caller: &Caller, run_id: &str) -> StoreResult<()> {
        let owner = require_owner(caller)?;
        let result = sqlx::query(
            "DELETE FROM runs WHERE id = ? AND owner_id = (SELECT id FROM owners WHERE email = ?)",
        )
        .bind(run_id)
        .bind(owner.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        debug!(id = run_id, "deleted run");
        Ok(())
    }
}
