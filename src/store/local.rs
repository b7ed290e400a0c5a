//! Device-local run storage.
//!
//! Runs live in memory and, when a path is configured, are mirrored to a JSON
//! file in the user's data directory. Anonymous callers are treated as the
//! device owner.

use super::{
    check_transition, new_run_id, now_millis, prepare_import, validate_new_run, validate_notes,
    RunStore, StoreError, StoreResult,
};
use crate::identity::Caller;
use crate::model::{NewRun, Run, RunImport, RunStatus};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Owner key recorded for runs created without an authenticated identity.
/// [`OwnerIdentity`](crate::identity::OwnerIdentity) never accepts angle
/// brackets, so no authenticated caller maps onto it.
pub const DEVICE_OWNER: &str = "<device>";

pub struct LocalRunStore {
    path: Option<PathBuf>,
    // Newest first. The lock is held across check and write so mutations are atomic.
    runs: Mutex<Vec<Run>>,
}

impl LocalRunStore {
    /// Store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            runs: Mutex::new(Vec::new()),
        }
    }

    /// Open (or lazily create) the JSON file at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let runs = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Vec<Run>>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        info!(path = %path.display(), runs = runs.len(), "opened local run store");
        Ok(Self {
            path: Some(path),
            runs: Mutex::new(runs),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn persist(&self, runs: &[Run]) -> StoreResult<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write to a sibling file first so a crash never leaves a truncated store.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(runs)?).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

fn owner_key(caller: &Caller) -> &str {
    caller.owner().map_or(DEVICE_OWNER, |o| o.as_str())
}

fn mint(owner: &str, run: NewRun) -> Run {
    Run {
        id: new_run_id(),
        timestamp: now_millis(),
        owner_id: owner.to_string(),
        class_name: run.class_name,
        build: run.build,
        challenges: run.challenges,
        status: run.status,
        notes: run.notes,
    }
}

#[async_trait]
impl RunStore for LocalRunStore {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    async fn list(&self, caller: &Caller) -> StoreResult<Vec<Run>> {
        let owner = owner_key(caller);
        let runs = self.runs.lock().await;
        let mut out: Vec<Run> = runs.iter().filter(|r| r.owner_id == owner).cloned().collect();
        // Stable sort keeps later-created runs first within the same millisecond.
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(out)
    }

    async fn create(&self, caller: &Caller, run: NewRun) -> StoreResult<Run> {
        validate_new_run(&run)?;
        let created = mint(owner_key(caller), run);

        let mut runs = self.runs.lock().await;
        runs.insert(0, created.clone());
        if let Err(e) = self.persist(&runs).await {
            runs.remove(0);
            return Err(e);
        }
        debug!(id = %created.id, owner = %created.owner_id, "created run");
        Ok(created)
    }

    async fn update_status(
        &self,
        caller: &Caller,
        run_id: &str,
        status: RunStatus,
        notes: Option<String>,
    ) -> StoreResult<()> {
        validate_notes(notes.as_deref())?;
        let owner = owner_key(caller);

        let mut runs = self.runs.lock().await;
        let idx = runs
            .iter()
            .position(|r| r.id == run_id && r.owner_id == owner)
            .ok_or(StoreError::NotFound)?;
        check_transition(runs[idx].status, status)?;

        let previous = runs[idx].clone();
        runs[idx].status = status;
        if notes.is_some() {
            runs[idx].notes = notes;
        }
        if let Err(e) = self.persist(&runs).await {
            runs[idx] = previous;
            return Err(e);
        }
        debug!(id = run_id, %status, "updated run status");
        Ok(())
    }

    /// Whole batch under one lock and one file write. Either every record
    /// lands or none does.
    async fn import_snapshot(
        &self,
        caller: &Caller,
        records: Vec<RunImport>,
    ) -> StoreResult<Vec<Run>> {
        let owner = owner_key(caller);
        // Mint oldest first, then flip back to the newest-first input order.
        let mut created: Vec<Run> = prepare_import(records)?
            .into_iter()
            .rev()
            .map(|run| mint(owner, run))
            .collect();
        created.reverse();

        let mut runs = self.runs.lock().await;
        runs.splice(0..0, created.iter().cloned());
        if let Err(e) = self.persist(&runs).await {
            runs.drain(0..created.len());
            return Err(e);
        }
        info!(owner, count = created.len(), "imported runs");
        Ok(created)
    }

    async fn delete(&self, caller: &Caller, run_id: &str) -> StoreResult<()> {
        let owner = owner_key(caller);

        let mut runs = self.runs.lock().await;
        let idx = runs
            .iter()
            .position(|r| r.id == run_id && r.owner_id == owner)
            .ok_or(StoreError::NotFound)?;
        let removed = runs.remove(idx);
        if let Err(e) = self.persist(&runs).await {
            runs.insert(idx, removed);
            return Err(e);
        }
        debug!(id = run_id, "deleted run");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::new_run;

    fn alice() -> Caller {
        Caller::from_optional(Some("alice@example.com"))
    }

    fn bob() -> Caller {
        Caller::from_optional(Some("bob@example.com"))
    }

    #[tokio::test]
    async fn create_then_list_round_trips_newest_first() {
        let store = LocalRunStore::in_memory();
        let first = store.create(&alice(), new_run("Druid", "Tornado")).await.unwrap();
        let second = store
            .create(&alice(), new_run("Barbarian", "Whirlwind"))
            .await
            .unwrap();

        let runs = store.list(&alice()).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, second.id);
        assert_eq!(runs[1].id, first.id);
        assert_eq!(runs[0].class_name, "Barbarian");
        assert_eq!(runs[0].challenges[0].id, "ssf");
        assert_eq!(runs[0].status, RunStatus::Active);
        assert!(runs[0].timestamp >= runs[1].timestamp);
    }

    #[tokio::test]
    async fn anonymous_callers_use_the_device_owner() {
        let store = LocalRunStore::in_memory();
        let run = store
            .create(&Caller::Anonymous, new_run("Paladin", "Hammerdin"))
            .await
            .unwrap();
        assert_eq!(run.owner_id, DEVICE_OWNER);
        assert_eq!(store.list(&Caller::Anonymous).await.unwrap().len(), 1);
        assert!(store.list(&alice()).await.unwrap().is_empty());
        store
            .update_status(&Caller::Anonymous, &run.id, RunStatus::Completed, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn no_identity_reaches_the_device_owners_runs() {
        let store = LocalRunStore::in_memory();
        let run = store
            .create(&Caller::Anonymous, new_run("Paladin", "Smiter"))
            .await
            .unwrap();

        for raw in ["local", "device", DEVICE_OWNER] {
            let caller = Caller::from_optional(Some(raw));
            if !caller.is_authenticated() {
                continue;
            }
            assert!(store.list(&caller).await.unwrap().is_empty(), "{raw}");
            assert!(matches!(
                store.delete(&caller, &run.id).await,
                Err(StoreError::NotFound)
            ));
        }
        assert_eq!(store.list(&Caller::Anonymous).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn foreign_and_missing_runs_fail_identically() {
        let store = LocalRunStore::in_memory();
        let run = store.create(&alice(), new_run("Amazon", "Strafe")).await.unwrap();

        let foreign = store
            .update_status(&bob(), &run.id, RunStatus::Failed, None)
            .await
            .unwrap_err();
        let missing = store
            .update_status(&bob(), "no-such-run", RunStatus::Failed, None)
            .await
            .unwrap_err();
        assert!(matches!(foreign, StoreError::NotFound));
        assert!(matches!(missing, StoreError::NotFound));
        assert_eq!(foreign.to_string(), missing.to_string());

        assert!(matches!(
            store.delete(&bob(), &run.id).await,
            Err(StoreError::NotFound)
        ));
        // Alice's run survived both attempts untouched.
        let runs = store.list(&alice()).await.unwrap();
        assert_eq!(runs[0].status, RunStatus::Active);
    }

    #[tokio::test]
    async fn terminal_runs_reject_status_changes_but_accept_notes() {
        let store = LocalRunStore::in_memory();
        let run = store.create(&alice(), new_run("Sorceress", "Blizzard")).await.unwrap();
        store
            .update_status(&alice(), &run.id, RunStatus::Completed, Some("Baal down".into()))
            .await
            .unwrap();

        let err = store
            .update_status(&alice(), &run.id, RunStatus::Active, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::TerminalStatus { .. }));

        store
            .update_status(&alice(), &run.id, RunStatus::Completed, Some("Baal down, p8".into()))
            .await
            .unwrap();
        let runs = store.list(&alice()).await.unwrap();
        assert_eq!(runs[0].status, RunStatus::Completed);
        assert_eq!(runs[0].notes.as_deref(), Some("Baal down, p8"));
    }

    #[tokio::test]
    async fn delete_removes_only_the_target() {
        let store = LocalRunStore::in_memory();
        let a = store.create(&alice(), new_run("Necromancer", "Summoner")).await.unwrap();
        let b = store.create(&alice(), new_run("Necromancer", "Bone Spear")).await.unwrap();
        store.delete(&alice(), &a.id).await.unwrap();
        let runs = store.list(&alice()).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, b.id);
        assert!(matches!(store.delete(&alice(), &a.id).await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn file_backed_store_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("runs.json");

        let store = LocalRunStore::open(&path).await.unwrap();
        let run = store.create(&alice(), new_run("Assassin", "Trapsin")).await.unwrap();
        drop(store);

        let reopened = LocalRunStore::open(&path).await.unwrap();
        let runs = reopened.list(&alice()).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, run.id);
        assert_eq!(reopened.path(), Some(path.as_path()));
    }

    #[tokio::test]
    async fn import_is_an_additive_merge_with_fresh_ids() {
        let store = LocalRunStore::in_memory();
        let existing = store.create(&alice(), new_run("Druid", "Fury Werewolf")).await.unwrap();

        let exported = store.export_snapshot(&alice()).await.unwrap();
        let records: Vec<RunImport> =
            serde_json::from_str(&serde_json::to_string(&exported).unwrap()).unwrap();
        let created = store.import_snapshot(&alice(), records).await.unwrap();

        assert_eq!(created.len(), 1);
        assert_ne!(created[0].id, existing.id);
        assert_eq!(created[0].build, "Fury Werewolf");
        let runs = store.list(&alice()).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().any(|r| r.id == existing.id));
    }

    #[tokio::test]
    async fn export_then_import_keeps_history_order() {
        let source = LocalRunStore::in_memory();
        for build in ["First", "Second", "Third"] {
            source.create(&alice(), new_run("Druid", build)).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(3)).await;
        }
        let exported = source.export_snapshot(&alice()).await.unwrap();
        let records: Vec<RunImport> =
            serde_json::from_str(&serde_json::to_string(&exported).unwrap()).unwrap();

        let restored = LocalRunStore::in_memory();
        let created = restored.import_snapshot(&alice(), records).await.unwrap();
        let builds = |runs: &[Run]| runs.iter().map(|r| r.build.clone()).collect::<Vec<_>>();
        assert_eq!(builds(&created), vec!["Third", "Second", "First"]);
        assert_eq!(
            builds(&restored.list(&alice()).await.unwrap()),
            vec!["Third", "Second", "First"]
        );
    }

    #[tokio::test]
    async fn failed_import_write_leaves_store_untouched() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("runs.json");
        let store = LocalRunStore::open(&path).await.unwrap();
        store.create(&alice(), new_run("Amazon", "Javazon")).await.unwrap();

        // A directory where the temp file should go makes the write fail.
        std::fs::create_dir(path.with_extension("json.tmp")).unwrap();
        let records: Vec<RunImport> = serde_json::from_str(
            r#"[{"className":"Druid","build":"Tornado"},{"className":"Druid","build":"Wind"}]"#,
        )
        .unwrap();
        let err = store.import_snapshot(&alice(), records).await.unwrap_err();
        assert!(err.is_transient());
        let runs = store.list(&alice()).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].build, "Javazon");
    }

    #[tokio::test]
    async fn import_validates_every_record_before_writing() {
        let store = LocalRunStore::in_memory();
        let raw = r#"[
            {"className":"Druid","build":"Tornado"},
            {"className":"","build":"Nothing"}
        ]"#;
        let records: Vec<RunImport> = serde_json::from_str(raw).unwrap();
        let err = store.import_snapshot(&alice(), records).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
        assert!(store.list(&alice()).await.unwrap().is_empty());
    }
}
