use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Upper bound for the number of challenge modifiers a single roll may carry.
pub const MAX_CHALLENGES: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ClassName {
    Amazon,
    Assassin,
    Barbarian,
    Druid,
    Necromancer,
    Paladin,
    Sorceress,
}

impl ClassName {
    pub const ALL: [ClassName; 7] = [
        ClassName::Amazon,
        ClassName::Assassin,
        ClassName::Barbarian,
        ClassName::Druid,
        ClassName::Necromancer,
        ClassName::Paladin,
        ClassName::Sorceress,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ClassName::Amazon => "Amazon",
            ClassName::Assassin => "Assassin",
            ClassName::Barbarian => "Barbarian",
            ClassName::Druid => "Druid",
            ClassName::Necromancer => "Necromancer",
            ClassName::Paladin => "Paladin",
            ClassName::Sorceress => "Sorceress",
        }
    }
}

impl fmt::Display for ClassName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ClassName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        ClassName::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(needle))
            .ok_or_else(|| format!("unknown class: {needle}"))
    }
}

/// A weighted challenge modifier. `id` is stable across pool revisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub description: String,
    pub weight: u32,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("challenge count {0} is out of range 0..=5")]
    ChallengeCount(u8),
}

/// Per-session roll settings, fixed before the flow starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionConfig {
    pub rerolls: u32,
    pub challenge_count: u8,
}

impl SelectionConfig {
    pub fn new(rerolls: u32, challenge_count: u8) -> Result<Self, ConfigError> {
        if challenge_count > MAX_CHALLENGES {
            return Err(ConfigError::ChallengeCount(challenge_count));
        }
        Ok(Self {
            rerolls,
            challenge_count,
        })
    }
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            rerolls: 1,
            challenge_count: 2,
        }
    }
}

/// Confirmed outcome of the draw flow so far.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionState {
    pub class_name: Option<ClassName>,
    pub build: Option<String>,
    pub challenges: Vec<Challenge>,
}

impl SelectionState {
    pub fn has_challenge(&self, id: &str) -> bool {
        self.challenges.iter().any(|c| c.id == id)
    }

    /// Append a confirmed challenge. Returns false (and leaves the set unchanged)
    /// when the id is already present.
    pub fn push_challenge(&mut self, challenge: Challenge) -> bool {
        if self.has_challenge(&challenge.id) {
            return false;
        }
        self.challenges.push(challenge);
        true
    }

    pub fn challenge_ids(&self) -> Vec<&str> {
        self.challenges.iter().map(|c| c.id.as_str()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Active,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Active => "active",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    /// Completed and failed runs never change status again.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(RunStatus::Active),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("invalid run status: {other}")),
        }
    }
}

/// A tracked attempt at a committed selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: String,
    /// Epoch milliseconds, assigned by the store.
    pub timestamp: i64,
    #[serde(default)]
    pub owner_id: String,
    pub class_name: String,
    pub build: String,
    pub challenges: Vec<Challenge>,
    pub status: RunStatus,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Payload for creating a run. The store mints `id` and `timestamp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRun {
    pub class_name: String,
    pub build: String,
    pub challenges: Vec<Challenge>,
    pub status: RunStatus,
    #[serde(default)]
    pub notes: Option<String>,
}

/// A run as read from an export file. Incoming `id`, `timestamp` and `ownerId`
/// are ignored; the store assigns fresh ones on import.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunImport {
    pub class_name: String,
    pub build: String,
    #[serde(default)]
    pub challenges: Vec<Challenge>,
    #[serde(default)]
    pub status: Option<RunStatus>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl From<RunImport> for NewRun {
    fn from(r: RunImport) -> Self {
        NewRun {
            class_name: r.class_name,
            build: r.build,
            challenges: r.challenges,
            status: r.status.unwrap_or(RunStatus::Active),
            notes: r.notes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrawStep {
    Class,
    Build,
    Challenge { slot: usize },
}

impl fmt::Display for DrawStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrawStep::Class => f.write_str("Class"),
            DrawStep::Build => f.write_str("Build"),
            DrawStep::Challenge { slot } => write!(f, "Challenge {}", slot + 1),
        }
    }
}

/// Value produced by a single draw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Drawn {
    Class(ClassName),
    Build(String),
    Challenge(Challenge),
}

impl fmt::Display for Drawn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Drawn::Class(c) => write!(f, "{c}"),
            Drawn::Build(b) => f.write_str(b),
            Drawn::Challenge(c) => f.write_str(&c.text),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FlowEvent {
    DrawStarted {
        step: DrawStep,
    },
    DrawSettled {
        step: DrawStep,
        value: Drawn,
        can_reroll: bool,
    },
    Confirmed {
        step: DrawStep,
        value: Drawn,
    },
    Rerolled {
        budget_left: u32,
    },
    Ignored {
        reason: String,
    },
    Exhausted {
        requested: u8,
        drawn: usize,
    },
    Finished {
        selection: SelectionState,
    },
    CommitStarted,
    Committed {
        // Boxed to keep the event small.
        run: Box<Run>,
    },
    CommitFailed {
        message: String,
    },
    Reset,
    Info(String),
}
