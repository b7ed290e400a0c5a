//! Text summary builder for CLI output.
//!
//! This module formats selections, run lists, statistics and session events
//! into human-readable lines for text mode.

use challenge_roller::model::{FlowEvent, Run, SelectionState};
use challenge_roller::stats::RunStats;
use time::macros::format_description;
use time::OffsetDateTime;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Summary of a finished roll.
pub(crate) fn build_selection_summary(selection: &SelectionState, requested: u8) -> TextSummary {
    let mut lines = Vec::new();
    let class = selection
        .class_name
        .map_or_else(|| "-".to_string(), |c| c.to_string());
    lines.push(format!("Class: {class}"));
    lines.push(format!("Build: {}", selection.build.as_deref().unwrap_or("-")));
    if selection.challenges.is_empty() {
        lines.push("Challenges: none".into());
    } else {
        lines.push("Challenges:".into());
        for c in &selection.challenges {
            if c.description.is_empty() {
                lines.push(format!("  - {}", c.text));
            } else {
                lines.push(format!("  - {}: {}", c.text, c.description));
            }
        }
    }
    if selection.challenges.len() < usize::from(requested) {
        lines.push(format!(
            "Only {} of {} challenges available",
            selection.challenges.len(),
            requested
        ));
    }
    TextSummary { lines }
}

/// One line per run, newest first as given.
pub(crate) fn build_run_list(runs: &[Run]) -> TextSummary {
    if runs.is_empty() {
        return TextSummary {
            lines: vec!["No runs yet".into()],
        };
    }
    let lines = runs
        .iter()
        .map(|r| {
            let challenges = if r.challenges.is_empty() {
                "-".to_string()
            } else {
                r.challenges
                    .iter()
                    .map(|c| c.text.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            let mut line = format!(
                "{}  {}  {:<9}  {} / {}  [{}]",
                r.id,
                format_timestamp(r.timestamp),
                r.status,
                r.class_name,
                r.build,
                challenges
            );
            if let Some(notes) = r.notes.as_deref().filter(|n| !n.trim().is_empty()) {
                line.push_str(&format!("  ({notes})"));
            }
            line
        })
        .collect();
    TextSummary { lines }
}

pub(crate) fn build_stats_summary(stats: &RunStats) -> TextSummary {
    let mut lines = vec![format!(
        "Runs: {} total, {} active, {} completed, {} failed",
        stats.counts.total, stats.counts.active, stats.counts.completed, stats.counts.failed
    )];
    lines.push(format!("Completion rate: {}", format_rate(stats.completion_rate)));
    for class in &stats.by_class {
        lines.push(format!(
            "  {:<12} {:>3} runs  {:>3} done  {:>3} failed  rate {}",
            class.class_name,
            class.counts.total,
            class.counts.completed,
            class.counts.failed,
            format_rate(class.counts.completion_rate())
        ));
    }
    TextSummary { lines }
}

/// Line for an interactive session event.
pub(crate) fn event_line(event: &FlowEvent) -> String {
    match event {
        FlowEvent::DrawStarted { step } => format!("Rolling {step}…"),
        FlowEvent::DrawSettled {
            step,
            value,
            can_reroll,
        } => {
            if *can_reroll {
                format!("{step}: {value}   [c]onfirm  [r]eroll")
            } else {
                format!("{step}: {value}   [c]onfirm")
            }
        }
        FlowEvent::Confirmed { step, value } => format!("✓ {step}: {value}"),
        FlowEvent::Rerolled { budget_left } => format!("Rerolled ({budget_left} left)"),
        FlowEvent::Ignored { reason } => format!("({reason})"),
        FlowEvent::Exhausted { requested, drawn } => {
            format!("Challenge pool exhausted after {drawn} of {requested}")
        }
        FlowEvent::Finished { .. } => "Roll complete   [s]ave  [n]ew roll  [q]uit".into(),
        FlowEvent::CommitStarted => "Saving…".into(),
        FlowEvent::Committed { run } => format!("Saved run {}", run.id),
        FlowEvent::CommitFailed { message } => format!("Save failed: {message} (press s to retry)"),
        FlowEvent::Reset => "New roll".into(),
        FlowEvent::Info(msg) => msg.clone(),
    }
}

fn format_timestamp(millis: i64) -> String {
    let fmt = format_description!("[year]-[month]-[day] [hour]:[minute]");
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .ok()
        .and_then(|t| t.format(fmt).ok())
        .unwrap_or_else(|| millis.to_string())
}

fn format_rate(rate: Option<f64>) -> String {
    rate.map_or_else(|| "-".to_string(), |r| format!("{:.0}%", r * 100.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use challenge_roller::model::{Challenge, ClassName, RunStatus};

    fn challenge(id: &str, text: &str) -> Challenge {
        Challenge {
            id: id.into(),
            text: text.into(),
            description: String::new(),
            weight: 1,
        }
    }

    #[test]
    fn selection_summary_flags_short_rolls() {
        let selection = SelectionState {
            class_name: Some(ClassName::Barbarian),
            build: Some("Whirlwind".into()),
            challenges: vec![challenge("no-teleport", "No Teleport")],
        };
        let summary = build_selection_summary(&selection, 2);
        assert_eq!(summary.lines[0], "Class: Barbarian");
        assert_eq!(summary.lines[1], "Build: Whirlwind");
        assert!(summary.lines.contains(&"  - No Teleport".to_string()));
        assert_eq!(
            summary.lines.last().map(String::as_str),
            Some("Only 1 of 2 challenges available")
        );
    }

    #[test]
    fn run_list_formats_timestamp_and_notes() {
        let run = Run {
            id: "r1".into(),
            timestamp: 0,
            owner_id: "local".into(),
            class_name: "Druid".into(),
            build: "Tornado".into(),
            challenges: vec![challenge("ssf", "SSF")],
            status: RunStatus::Completed,
            notes: Some("clean".into()),
        };
        let summary = build_run_list(&[run]);
        assert_eq!(summary.lines.len(), 1);
        let line = &summary.lines[0];
        assert!(line.contains("1970-01-01 00:00"));
        assert!(line.contains("Druid / Tornado  [SSF]"));
        assert!(line.ends_with("(clean)"));
        assert_eq!(build_run_list(&[]).lines, vec!["No runs yet".to_string()]);
    }

    #[test]
    fn stats_summary_without_finished_runs() {
        let summary = build_stats_summary(&RunStats::from_runs(&[]));
        assert_eq!(summary.lines[1], "Completion rate: -");
    }
}
