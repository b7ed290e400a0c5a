//! Aggregate counts over an owner's runs.

use crate::model::{Run, RunStatus};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StatusCounts {
    fn add(&mut self, status: RunStatus) {
        self.total += 1;
        match status {
            RunStatus::Active => self.active += 1,
            RunStatus::Completed => self.completed += 1,
            RunStatus::Failed => self.failed += 1,
        }
    }

    /// Completed share of finished runs. `None` until something has finished.
    pub fn completion_rate(&self) -> Option<f64> {
        let finished = self.completed + self.failed;
        (finished > 0).then(|| self.completed as f64 / finished as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassStats {
    pub class_name: String,
    #[serde(flatten)]
    pub counts: StatusCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    #[serde(flatten)]
    pub counts: StatusCounts,
    pub completion_rate: Option<f64>,
    /// Sorted by class name.
    pub by_class: Vec<ClassStats>,
}

impl RunStats {
    pub fn from_runs(runs: &[Run]) -> Self {
        let mut counts = StatusCounts::default();
        let mut classes: BTreeMap<&str, StatusCounts> = BTreeMap::new();
        for run in runs {
            counts.add(run.status);
            classes.entry(run.class_name.as_str()).or_default().add(run.status);
        }
        Self {
            completion_rate: counts.completion_rate(),
            counts,
            by_class: classes
                .into_iter()
                .map(|(class_name, counts)| ClassStats {
                    class_name: class_name.to_string(),
                    counts,
                })
                .collect(),
        }
    }
}
