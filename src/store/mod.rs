//! Run persistence.
//!
//! Every operation is scoped to a [`Caller`]. Two interchangeable backends
//! implement [`RunStore`]: a device-local JSON store that also serves
//! anonymous callers, and an SQLite store keyed by owner identity.
//! Callers hold an `Arc<dyn RunStore>` and never need to know which one is active.

mod local;
mod migrations;
mod sqlite;

pub use local::LocalRunStore;
pub use sqlite::SqliteRunStore;

use crate::identity::Caller;
use crate::model::{NewRun, Run, RunImport, RunStatus};
use async_trait::async_trait;
use std::collections::HashSet;
use thiserror::Error;

/// Longest accepted notes field, in characters.
pub const MAX_NOTES_LEN: usize = 2_000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("authentication required")]
    Unauthenticated,

    /// Missing runs and runs owned by someone else are reported identically.
    #[error("run not found")]
    NotFound,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("run is already {status} and cannot change status")]
    TerminalStatus { status: RunStatus },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Import failed after some records were already written.
    #[error("import stopped after {created} of {total} records: {source}")]
    PartialImport {
        created: usize,
        total: usize,
        source: Box<StoreError>,
    },
}

impl StoreError {
    /// Backend unavailability that a retry may fix.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(_) | StoreError::Io(_) => true,
            StoreError::PartialImport { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait RunStore: Send + Sync {
    /// Short backend name for logs and status lines.
    fn backend_name(&self) -> &'static str;

    /// Runs owned by `caller`, most recent first. Anonymous callers of an
    /// authenticated backend get an empty list.
    async fn list(&self, caller: &Caller) -> StoreResult<Vec<Run>>;

    async fn create(&self, caller: &Caller, run: NewRun) -> StoreResult<Run>;

    /// Change status and, when given, notes. The ownership check and the
    /// write happen atomically.
    async fn update_status(
        &self,
        caller: &Caller,
        run_id: &str,
        status: RunStatus,
        notes: Option<String>,
    ) -> StoreResult<()>;

    async fn delete(&self, caller: &Caller, run_id: &str) -> StoreResult<()>;

    async fn export_snapshot(&self, caller: &Caller) -> StoreResult<Vec<Run>> {
        self.list(caller).await
    }

    /// Additive merge: each record goes through `create` with fresh id and
    /// timestamp. Existing runs are untouched. All records are validated
    /// before anything is written.
    ///
    /// Records arrive newest first, as exported, and are created oldest
    /// first so a restored history lists in its original order. The result
    /// follows the input order. Backends that can write the batch atomically
    /// override this.
    async fn import_snapshot(
        &self,
        caller: &Caller,
        records: Vec<RunImport>,
    ) -> StoreResult<Vec<Run>> {
        let runs = prepare_import(records)?;
        let total = runs.len();

        let mut created = Vec::with_capacity(total);
        for run in runs.into_iter().rev() {
            match self.create(caller, run).await {
                Ok(run) => created.push(run),
                Err(e) if created.is_empty() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        backend = self.backend_name(),
                        created = created.len(),
                        total,
                        error = %e,
                        "import interrupted"
                    );
                    return Err(StoreError::PartialImport {
                        created: created.len(),
                        total,
                        source: Box::new(e),
                    });
                }
            }
        }
        created.reverse();
        tracing::info!(
            backend = self.backend_name(),
            count = created.len(),
            "imported runs"
        );
        Ok(created)
    }
}

/// Convert and validate an import batch. Nothing is written if any record is bad.
pub(crate) fn prepare_import(records: Vec<RunImport>) -> StoreResult<Vec<NewRun>> {
    let runs: Vec<NewRun> = records.into_iter().map(NewRun::from).collect();
    for (idx, run) in runs.iter().enumerate() {
        validate_new_run(run)
            .map_err(|e| StoreError::InvalidInput(format!("record {idx}: {e}")))?;
    }
    Ok(runs)
}

/// Reject malformed payloads before any persistence attempt.
pub fn validate_new_run(run: &NewRun) -> StoreResult<()> {
    if run.class_name.trim().is_empty() {
        return Err(StoreError::InvalidInput("className is empty".into()));
    }
    if run.build.trim().is_empty() {
        return Err(StoreError::InvalidInput("build is empty".into()));
    }
    let mut seen = HashSet::new();
    for c in &run.challenges {
        if c.id.trim().is_empty() {
            return Err(StoreError::InvalidInput("challenge id is empty".into()));
        }
        if c.weight == 0 {
            return Err(StoreError::InvalidInput(format!(
                "challenge {} has weight 0",
                c.id
            )));
        }
        if !seen.insert(c.id.as_str()) {
            return Err(StoreError::InvalidInput(format!(
                "duplicate challenge {}",
                c.id
            )));
        }
    }
    validate_notes(run.notes.as_deref())
}

pub(crate) fn validate_notes(notes: Option<&str>) -> StoreResult<()> {
    match notes {
        Some(n) if n.chars().count() > MAX_NOTES_LEN => Err(StoreError::InvalidInput(format!(
            "notes exceed {MAX_NOTES_LEN} characters"
        ))),
        _ => Ok(()),
    }
}

/// Terminal runs keep their status; re-sending the same status only edits notes.
pub(crate) fn check_transition(current: RunStatus, next: RunStatus) -> StoreResult<()> {
    if current.is_terminal() && current != next {
        return Err(StoreError::TerminalStatus { status: current });
    }
    Ok(())
}

pub(crate) fn now_millis() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

pub(crate) fn new_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::model::{Challenge, NewRun, RunStatus};

    pub(crate) fn new_run(class_name: &str, build: &str) -> NewRun {
        NewRun {
            class_name: class_name.into(),
            build: build.into(),
            challenges: vec![Challenge {
                id: "ssf".into(),
                text: "SSF".into(),
                description: "Solo self-found".into(),
                weight: 3,
            }],
            status: RunStatus::Active,
            notes: None,
        }
    }
}
