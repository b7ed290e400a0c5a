//! Files the CLI reads and writes outside the run stores: export snapshots
//! and import payloads.

use anyhow::{Context, Result};
use challenge_roller::model::{Run, RunImport};
use std::path::{Path, PathBuf};
use time::macros::format_description;
use time::{Date, OffsetDateTime};

/// `challenge-runs-YYYY-MM-DD.json`
pub fn export_filename(date: Date) -> String {
    let fmt = format_description!("[year]-[month]-[day]");
    let stamp = date.format(fmt).unwrap_or_else(|_| date.to_string());
    format!("challenge-runs-{stamp}.json")
}

/// Default export target: today's dated file in the current directory.
pub fn default_export_path() -> Result<PathBuf> {
    let today = OffsetDateTime::now_local()
        .unwrap_or_else(|_| OffsetDateTime::now_utc())
        .date();
    let current_dir = std::env::current_dir().context("get current directory")?;
    Ok(current_dir.join(export_filename(today)))
}

pub fn write_export(path: &Path, runs: &[Run]) -> Result<()> {
    ensure_parent(path)?;
    let data = serde_json::to_vec_pretty(runs).context("serialize runs")?;
    std::fs::write(path, data).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// Read an export file back. Unknown fields (ids, timestamps, owners) are
/// accepted and ignored.
pub fn read_import(path: &Path) -> Result<Vec<RunImport>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let records: Vec<RunImport> = serde_json::from_str(&raw)
        .with_context(|| format!("parse {} as a JSON array of runs", path.display()))?;
    Ok(records)
}

/// Create the parent directory of a data file if needed.
pub fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    Ok(())
}
