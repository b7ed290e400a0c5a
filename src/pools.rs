//! Read-only candidate tables for the draw flow.

use crate::model::{Challenge, ClassName};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("challenge pool is empty")]
    EmptyChallenges,

    #[error("no builds defined for {0}")]
    NoBuilds(ClassName),

    #[error("duplicate challenge id: {0}")]
    DuplicateChallenge(String),

    #[error("challenge {0} has a non-positive weight")]
    ZeroWeight(String),

    #[error("failed to read challenge pool: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed challenge pool: {0}")]
    Json(#[from] serde_json::Error),
}

const BUILDS: &[(ClassName, &[&str])] = &[
    (
        ClassName::Amazon,
        &["Lightning Fury", "Multishot", "Strafe", "Fend", "Poison Javelin"],
    ),
    (
        ClassName::Assassin,
        &["Trapsin", "Martial Arts", "Blade Sentinel", "Mind Blast", "Dragon Claw"],
    ),
    (
        ClassName::Barbarian,
        &["Whirlwind", "Frenzy", "Berserk", "Leap Attack", "Throwing", "War Cry"],
    ),
    (
        ClassName::Druid,
        &["Fury Werewolf", "Tornado", "Summoner", "Fire Claws", "Rabies"],
    ),
    (
        ClassName::Necromancer,
        &["Summoner", "Bone Spear", "Poison Nova", "Bone Spirit", "Corpse Explosion"],
    ),
    (
        ClassName::Paladin,
        &["Hammerdin", "Smiter", "Zealot", "Foh", "Avenger", "Charger"],
    ),
    (
        ClassName::Sorceress,
        &["Blizzard", "Lightning", "Meteor", "Frozen Orb", "Nova", "Hydra"],
    ),
];

const CHALLENGES: &[(&str, &str, &str, u32)] = &[
    ("no-runewords", "No Runewords", "Runeword items may not be made or equipped.", 3),
    ("no-teleport", "No Teleport", "Teleport may not be used, from any source.", 3),
    ("ssf", "SSF", "Solo self-found: no trading, no muling, no outside help.", 3),
    ("hardcore", "Hardcore", "Play the run on a hardcore character.", 2),
    ("no-shopping", "No Shopping", "No buying or gambling from vendors.", 2),
    ("no-mercenary", "No Mercenary", "Never hire a mercenary.", 2),
    ("no-uniques", "No Uniques", "Unique items may not be equipped.", 2),
    ("no-sets", "No Sets", "Set items may not be equipped.", 2),
    ("players-8", "Players 8", "Play every area with /players 8.", 2),
    ("no-town-portal", "No Town Portal", "Town Portal scrolls and books are off limits.", 1),
    ("no-potions", "No Potions", "Healing and mana potions are forbidden.", 1),
    ("naked", "Naked", "No armor in any slot.", 1),
    ("no-skill-reset", "No Respec", "No skill or stat respecs for the whole run.", 1),
];

/// Candidate tables. Cloned cheaply through `Arc`; never mutated after load.
#[derive(Debug, Clone)]
pub struct Pools {
    classes: Vec<ClassName>,
    builds: HashMap<ClassName, Vec<String>>,
    challenges: Vec<Challenge>,
}

static BUILTIN: OnceLock<Arc<Pools>> = OnceLock::new();

impl Pools {
    /// Built-in tables, loaded once per process.
    pub fn builtin() -> Arc<Pools> {
        BUILTIN
            .get_or_init(|| {
                let builds = BUILDS
                    .iter()
                    .map(|(class, names)| (*class, names.iter().map(|b| b.to_string()).collect()))
                    .collect();
                let challenges = CHALLENGES
                    .iter()
                    .map(|(id, text, description, weight)| Challenge {
                        id: id.to_string(),
                        text: text.to_string(),
                        description: description.to_string(),
                        weight: *weight,
                    })
                    .collect();
                Arc::new(Pools {
                    classes: ClassName::ALL.to_vec(),
                    builds,
                    challenges,
                })
            })
            .clone()
    }

    /// Build tables from explicit parts, validating them.
    pub fn new(
        builds: HashMap<ClassName, Vec<String>>,
        challenges: Vec<Challenge>,
    ) -> Result<Self, PoolError> {
        for class in ClassName::ALL {
            if builds.get(&class).map_or(true, |b| b.is_empty()) {
                return Err(PoolError::NoBuilds(class));
            }
        }
        validate_challenges(&challenges)?;
        Ok(Self {
            classes: ClassName::ALL.to_vec(),
            builds,
            challenges,
        })
    }

    /// Built-in classes and builds with the challenge table replaced by the
    /// JSON array at `path`.
    pub fn with_challenges_from_file(path: &Path) -> Result<Self, PoolError> {
        let raw = std::fs::read_to_string(path)?;
        let challenges: Vec<Challenge> = serde_json::from_str(&raw)?;
        let pools = Self::builtin().with_challenges(challenges)?;
        tracing::info!(
            path = %path.display(),
            count = pools.challenges.len(),
            "loaded custom challenge pool"
        );
        Ok(pools)
    }

    /// Copy of these tables with a different challenge list.
    pub fn with_challenges(&self, challenges: Vec<Challenge>) -> Result<Self, PoolError> {
        Self::new(self.builds.clone(), challenges)
    }

    pub fn classes(&self) -> &[ClassName] {
        &self.classes
    }

    pub fn builds_for(&self, class: ClassName) -> &[String] {
        self.builds.get(&class).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn challenges(&self) -> &[Challenge] {
        &self.challenges
    }

    pub fn challenge(&self, id: &str) -> Option<&Challenge> {
        self.challenges.iter().find(|c| c.id == id)
    }
}

fn validate_challenges(challenges: &[Challenge]) -> Result<(), PoolError> {
    if challenges.is_empty() {
        return Err(PoolError::EmptyChallenges);
    }
    let mut seen = HashSet::new();
    for c in challenges {
        if c.weight == 0 {
            return Err(PoolError::ZeroWeight(c.id.clone()));
        }
        if !seen.insert(c.id.as_str()) {
            return Err(PoolError::DuplicateChallenge(c.id.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn builtin_tables_are_consistent() {
        let pools = Pools::builtin();
        assert_eq!(pools.classes().len(), 7);
        for class in ClassName::ALL {
            assert!(!pools.builds_for(class).is_empty(), "{class} has no builds");
        }
        validate_challenges(pools.challenges()).unwrap();
        assert!(pools.challenge("no-teleport").is_some());
        assert!(pools.builds_for(ClassName::Barbarian).contains(&"Whirlwind".to_string()));
    }

    #[test]
    fn custom_pool_rejects_duplicates_and_zero_weights() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("pool.json");

        let mut f = std::fs::File::create(&path).unwrap();
        write!(
            f,
            r#"[{{"id":"a","text":"A","weight":1}},{{"id":"a","text":"A2","weight":2}}]"#
        )
        .unwrap();
        assert!(matches!(
            Pools::with_challenges_from_file(&path),
            Err(PoolError::DuplicateChallenge(id)) if id == "a"
        ));

        std::fs::write(&path, r#"[{"id":"a","text":"A","weight":0}]"#).unwrap();
        assert!(matches!(
            Pools::with_challenges_from_file(&path),
            Err(PoolError::ZeroWeight(_))
        ));

        std::fs::write(&path, "[]").unwrap();
        assert!(matches!(
            Pools::with_challenges_from_file(&path),
            Err(PoolError::EmptyChallenges)
        ));
    }

    #[test]
    fn custom_pool_keeps_builtin_builds() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("pool.json");
        std::fs::write(
            &path,
            r#"[{"id":"x","text":"X","description":"only one","weight":4}]"#,
        )
        .unwrap();
        let pools = Pools::with_challenges_from_file(&path).unwrap();
        assert_eq!(pools.challenges().len(), 1);
        assert_eq!(pools.challenge("x").map(|c| c.weight), Some(4));
        assert!(!pools.builds_for(ClassName::Sorceress).is_empty());
    }
}
