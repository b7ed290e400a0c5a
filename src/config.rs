//! User settings, loaded from `<config_dir>/challenge-roller/config.json`.
//!
//! Every field is optional in the file; CLI flags override whatever is loaded.

use anyhow::{Context, Result};
use challenge_roller::model::SelectionConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "challenge-roller";

/// Environment variable consulted for the owner identity when neither the
/// command line nor the settings file provides one.
pub const OWNER_ENV: &str = "CHALLENGE_ROLLER_OWNER";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Device-local JSON file, no sign-in needed
    #[default]
    Local,
    /// SQLite database keyed by owner identity
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub rerolls: u32,
    pub challenge_count: u8,
    #[serde(with = "humantime_serde")]
    pub spin_duration: Duration,
    pub backend: BackendKind,
    pub database_path: Option<PathBuf>,
    pub local_path: Option<PathBuf>,
    pub owner_email: Option<String>,
    /// JSON file replacing the built-in challenge table.
    pub challenge_pool: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        let selection = SelectionConfig::default();
        Self {
            rerolls: selection.rerolls,
            challenge_count: selection.challenge_count,
            spin_duration: Duration::from_millis(1200),
            backend: BackendKind::Local,
            database_path: None,
            local_path: None,
            owner_email: None,
            challenge_pool: None,
        }
    }
}

impl Settings {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join(APP_DIR).join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    }

    /// Load settings. An explicit path must exist; the default location may
    /// be absent, in which case defaults apply.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let (path, required) = match explicit {
            Some(p) => (p.to_path_buf(), true),
            None => (Self::default_path(), false),
        };
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                tracing::debug!(path = %path.display(), "no settings file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("read settings {}", path.display()))
            }
        };
        let settings: Settings = serde_json::from_str(&raw)
            .with_context(|| format!("parse settings {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded settings");
        Ok(settings)
    }

    /// Roll parameters from the file, with command-line overrides applied.
    pub fn selection_config(
        &self,
        rerolls: Option<u32>,
        challenge_count: Option<u8>,
    ) -> Result<SelectionConfig> {
        SelectionConfig::new(
            rerolls.unwrap_or(self.rerolls),
            challenge_count.unwrap_or(self.challenge_count),
        )
        .context("invalid roll settings")
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| data_dir().join("runs.db"))
    }

    pub fn local_path(&self) -> PathBuf {
        self.local_path
            .clone()
            .unwrap_or_else(|| data_dir().join("runs.json"))
    }

    /// Owner identity by precedence: flag, settings file, environment.
    pub fn resolve_owner(&self, flag: Option<&str>, env: Option<String>) -> Option<String> {
        let given = |o: &String| !o.trim().is_empty();
        flag.map(str::to_string)
            .filter(given)
            .or_else(|| self.owner_email.clone().filter(given))
            .or_else(|| env.filter(given))
    }
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_selection_defaults() {
        let s = Settings::default();
        assert_eq!(s.rerolls, 1);
        assert_eq!(s.challenge_count, 2);
        assert_eq!(s.backend, BackendKind::Local);
        assert!(s.database_path().ends_with("runs.db"));
        assert!(s.local_path().ends_with("runs.json"));
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"rerolls": 3, "spin_duration": "2s", "backend": "sqlite"}"#,
        )
        .unwrap();

        let s = Settings::load(Some(&path)).unwrap();
        assert_eq!(s.rerolls, 3);
        assert_eq!(s.challenge_count, 2);
        assert_eq!(s.spin_duration, Duration::from_secs(2));
        assert_eq!(s.backend, BackendKind::Sqlite);
    }

    #[test]
    fn explicit_missing_or_malformed_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(Settings::load(Some(&dir.path().join("nope.json"))).is_err());

        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = Settings::load(Some(&path)).unwrap_err();
        assert!(format!("{err:#}").contains("parse settings"));
    }

    #[test]
    fn out_of_range_challenge_count_is_rejected() {
        let s = Settings {
            challenge_count: 9,
            ..Settings::default()
        };
        assert!(s.selection_config(None, None).is_err());
        // A valid override wins over the bad file value.
        assert!(s.selection_config(None, Some(3)).is_ok());
    }

    #[test]
    fn flag_overrides_apply_per_field() {
        let s = Settings {
            rerolls: 4,
            ..Settings::default()
        };
        let config = s.selection_config(None, Some(5)).unwrap();
        assert_eq!(config.rerolls, 4);
        assert_eq!(config.challenge_count, 5);
        let config = s.selection_config(Some(0), None).unwrap();
        assert_eq!(config.rerolls, 0);
        assert_eq!(config.challenge_count, 2);
    }

    #[test]
    fn owner_precedence() {
        let mut s = Settings::default();
        assert_eq!(s.resolve_owner(None, None), None);
        assert_eq!(
            s.resolve_owner(None, Some("env@example.com".into())).as_deref(),
            Some("env@example.com")
        );
        s.owner_email = Some("file@example.com".into());
        assert_eq!(
            s.resolve_owner(None, Some("env@example.com".into())).as_deref(),
            Some("file@example.com")
        );
        assert_eq!(
            s.resolve_owner(Some("flag@example.com"), None).as_deref(),
            Some("flag@example.com")
        );
        assert_eq!(
            s.resolve_owner(Some("  "), None).as_deref(),
            Some("file@example.com")
        );
    }
}
