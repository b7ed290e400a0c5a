use crate::config::{BackendKind, Settings, OWNER_ENV};
use crate::storage;
use crate::text_summary::{self, TextSummary};
use anyhow::{Context, Result};
use challenge_roller::flow::Flow;
use challenge_roller::identity::Caller;
use challenge_roller::model::{FlowEvent, Run, RunStatus, SelectionConfig, SelectionState};
use challenge_roller::orchestrator::{run_session, SessionCommand, SessionOptions};
use challenge_roller::pools::Pools;
use challenge_roller::stats::RunStats;
use challenge_roller::store::{LocalRunStore, RunStore, SqliteRunStore};
use clap::{Args, Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

fn send_summary(tx: &mpsc::UnboundedSender<OutputLine>, summary: TextSummary) {
    for line in summary.lines {
        let _ = tx.send(OutputLine::Stdout(line));
    }
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "challenge-roller",
    version,
    about = "Roll random class/build/challenge combinations and track runs against them"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args, Clone)]
pub struct GlobalArgs {
    /// Run storage backend (overrides the settings file)
    #[arg(long, global = true, value_enum)]
    pub backend: Option<BackendKind>,

    /// Owner identity (verified email) used to scope stored runs
    #[arg(long, global = true)]
    pub owner: Option<String>,

    /// Path of the run store file for the selected backend
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Settings file to use instead of the default location
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging on stderr
    #[arg(long, short, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Roll a new class, build and challenge set
    Roll(RollArgs),
    /// Manage tracked runs
    Runs {
        #[command(subcommand)]
        command: RunsCommand,
    },
}

#[derive(Debug, Args, Clone)]
pub struct RollArgs {
    /// Rerolls available for the whole roll
    #[arg(long)]
    pub rerolls: Option<u32>,

    /// Number of challenge modifiers to draw (0-5)
    #[arg(long)]
    pub challenges: Option<u8>,

    /// Seed for a reproducible roll
    #[arg(long)]
    pub seed: Option<u64>,

    /// How long each draw spins before it can be confirmed
    #[arg(long)]
    pub spin_duration: Option<humantime::Duration>,

    /// Save the roll as an active run as soon as it is complete
    #[arg(long)]
    pub auto_commit: bool,

    /// Confirm every draw without prompting and print the result
    #[arg(long)]
    pub auto: bool,

    /// Print the result as JSON (with --auto)
    #[arg(long, requires = "auto")]
    pub json: bool,
}

#[derive(Debug, Subcommand, Clone)]
pub enum RunsCommand {
    /// List runs, newest first
    List {
        #[arg(long)]
        json: bool,
    },
    /// Change the status (active, completed, failed) and optionally the notes of a run
    Update {
        id: String,
        status: RunStatus,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Delete a run
    Delete { id: String },
    /// Write all runs to a JSON file (default: ./challenge-runs-YYYY-MM-DD.json)
    Export {
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Add the runs from an export file; existing runs are kept
    Import { path: PathBuf },
    /// Completion statistics per class
    Stats {
        #[arg(long)]
        json: bool,
    },
}

pub async fn run(args: Cli) -> Result<()> {
    let settings = Settings::load(args.global.config.as_deref())?;
    match args.command {
        Command::Roll(roll) => run_roll(&args.global, &settings, roll).await,
        Command::Runs { command } => run_runs(&args.global, &settings, command).await,
    }
}

/// Open the configured backend and resolve who is calling it.
async fn open_store(global: &GlobalArgs, settings: &Settings) -> Result<(Arc<dyn RunStore>, Caller)> {
    let owner = settings.resolve_owner(global.owner.as_deref(), std::env::var(OWNER_ENV).ok());
    let caller = Caller::from_optional(owner.as_deref());

    let store: Arc<dyn RunStore> = match global.backend.unwrap_or(settings.backend) {
        BackendKind::Local => {
            let path = global.db.clone().unwrap_or_else(|| settings.local_path());
            storage::ensure_parent(&path)?;
            let store = LocalRunStore::open(path.clone())
                .await
                .with_context(|| format!("open run store {}", path.display()))?;
            Arc::new(store)
        }
        BackendKind::Sqlite => {
            let path = global.db.clone().unwrap_or_else(|| settings.database_path());
            storage::ensure_parent(&path)?;
            let store = SqliteRunStore::open(&path)
                .await
                .with_context(|| format!("open run database {}", path.display()))?;
            Arc::new(store)
        }
    };
    tracing::debug!(
        backend = store.backend_name(),
        authenticated = caller.is_authenticated(),
        "run store ready"
    );
    Ok((store, caller))
}

/// JSON shape printed by `roll --auto --json`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RollOutput {
    selection: SelectionState,
    rerolls_left: u32,
    run: Option<Run>,
}

async fn run_roll(global: &GlobalArgs, settings: &Settings, roll: RollArgs) -> Result<()> {
    let config = settings.selection_config(roll.rerolls, roll.challenges)?;
    let pools = match settings.challenge_pool.as_deref() {
        Some(path) => Arc::new(
            Pools::with_challenges_from_file(path)
                .with_context(|| format!("load challenge pool {}", path.display()))?,
        ),
        None => Pools::builtin(),
    };
    let rng = match roll.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let (store, caller) = open_store(global, settings).await?;

    // Nobody watches the spin in auto mode.
    let spin_duration = match (roll.spin_duration, roll.auto) {
        (Some(d), _) => Duration::from(d),
        (None, true) => Duration::ZERO,
        (None, false) => settings.spin_duration,
    };
    let options = SessionOptions {
        spin_duration,
        auto_commit: roll.auto_commit,
    };

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<SessionCommand>();
    let (event_tx, event_rx) = mpsc::unbounded_channel::<FlowEvent>();
    let flow = Flow::new(pools, config, rng);
    let session = tokio::spawn(run_session(flow, store, caller, options, event_tx, cmd_rx));
    let _ = cmd_tx.send(SessionCommand::Start);

    let (out_tx, out_handle) = spawn_output_writer();
    let res = if roll.auto {
        drive_auto(&roll, config, cmd_tx, event_rx, &out_tx).await
    } else {
        drive_interactive(config, cmd_tx, event_rx, &out_tx).await
    };
    session.await.context("roll session task failed")??;

    drop(out_tx);
    let _ = out_handle.await;
    res
}

/// Confirm every draw as soon as it settles, then print the outcome.
async fn drive_auto(
    roll: &RollArgs,
    config: SelectionConfig,
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
    mut event_rx: mpsc::UnboundedReceiver<FlowEvent>,
    out_tx: &mpsc::UnboundedSender<OutputLine>,
) -> Result<()> {
    let mut selection = SelectionState::default();
    let mut rerolls_left = config.rerolls;
    let mut saved: Option<Run> = None;
    let mut save_error: Option<String> = None;

    while let Some(ev) = event_rx.recv().await {
        match ev {
            FlowEvent::DrawSettled { .. } => {
                let _ = cmd_tx.send(SessionCommand::Confirm);
            }
            FlowEvent::Rerolled { budget_left } => rerolls_left = budget_left,
            FlowEvent::Finished { selection: s } => {
                selection = s;
                if !roll.auto_commit {
                    let _ = cmd_tx.send(SessionCommand::Quit);
                }
            }
            FlowEvent::Committed { run } => {
                saved = Some(*run);
                let _ = cmd_tx.send(SessionCommand::Quit);
            }
            FlowEvent::CommitFailed { message } => {
                save_error = Some(message);
                let _ = cmd_tx.send(SessionCommand::Quit);
            }
            _ => {}
        }
    }

    if roll.json {
        let out = serde_json::to_string_pretty(&RollOutput {
            selection,
            rerolls_left,
            run: saved,
        })?;
        let _ = out_tx.send(OutputLine::Stdout(out));
    } else {
        send_summary(
            out_tx,
            text_summary::build_selection_summary(&selection, config.challenge_count),
        );
        if let Some(run) = saved.as_ref() {
            let _ = out_tx.send(OutputLine::Stderr(format!("Saved run {}", run.id)));
        }
    }

    match save_error {
        Some(message) => Err(anyhow::anyhow!("failed to save run: {message}")),
        None => Ok(()),
    }
}

/// Map one line of keyboard input to session commands.
fn parse_input(line: &str) -> Option<&'static [SessionCommand]> {
    match line.trim().to_ascii_lowercase().as_str() {
        "c" | "confirm" => Some(&[SessionCommand::Confirm]),
        "r" | "reroll" => Some(&[SessionCommand::Reroll]),
        "s" | "save" => Some(&[SessionCommand::Commit]),
        "n" | "new" => Some(&[SessionCommand::Reset, SessionCommand::Start]),
        "q" | "quit" => Some(&[SessionCommand::Quit]),
        _ => None,
    }
}

/// Line-driven session: keys on stdin, events on stdout.
async fn drive_interactive(
    config: SelectionConfig,
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
    mut event_rx: mpsc::UnboundedReceiver<FlowEvent>,
    out_tx: &mpsc::UnboundedSender<OutputLine>,
) -> Result<()> {
    let _ = out_tx.send(OutputLine::Stderr(format!(
        "{} rerolls, {} challenges. Keys: c confirm, r reroll, s save, n new roll, q quit",
        config.rerolls, config.challenge_count
    )));

    let input_out = out_tx.clone();
    let input = tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match parse_input(&line) {
                Some(cmds) => {
                    for cmd in cmds {
                        if cmd_tx.send(*cmd).is_err() {
                            return;
                        }
                    }
                }
                None => {
                    let _ = input_out.send(OutputLine::Stderr(format!(
                        "Unknown key {:?}: use c, r, s, n or q",
                        line.trim()
                    )));
                }
            }
        }
        // EOF quits; the session still waits for a pending save.
        let _ = cmd_tx.send(SessionCommand::Quit);
    });

    while let Some(ev) = event_rx.recv().await {
        if let FlowEvent::Finished { selection } = &ev {
            send_summary(
                out_tx,
                text_summary::build_selection_summary(selection, config.challenge_count),
            );
        }
        let _ = out_tx.send(OutputLine::Stdout(text_summary::event_line(&ev)));
    }

    input.abort();
    Ok(())
}

async fn run_runs(global: &GlobalArgs, settings: &Settings, command: RunsCommand) -> Result<()> {
    let (store, caller) = open_store(global, settings).await?;
    let (out_tx, out_handle) = spawn_output_writer();

    if !caller.is_authenticated() && store.backend_name() == "sqlite" {
        let _ = out_tx.send(OutputLine::Stderr(format!(
            "No owner identity set; pass --owner or set {OWNER_ENV}"
        )));
    }

    let res = run_runs_command(store.as_ref(), &caller, command, &out_tx).await;
    drop(out_tx);
    let _ = out_handle.await;
    res
}

async fn run_runs_command(
    store: &dyn RunStore,
    caller: &Caller,
    command: RunsCommand,
    out_tx: &mpsc::UnboundedSender<OutputLine>,
) -> Result<()> {
    match command {
        RunsCommand::List { json } => {
            let runs = store.list(caller).await.context("list runs")?;
            if json {
                let _ = out_tx.send(OutputLine::Stdout(serde_json::to_string_pretty(&runs)?));
            } else {
                send_summary(out_tx, text_summary::build_run_list(&runs));
            }
        }
        RunsCommand::Update { id, status, notes } => {
            store
                .update_status(caller, &id, status, notes)
                .await
                .with_context(|| format!("update run {id}"))?;
            let _ = out_tx.send(OutputLine::Stderr(format!("Run {id} is now {status}")));
        }
        RunsCommand::Delete { id } => {
            store
                .delete(caller, &id)
                .await
                .with_context(|| format!("delete run {id}"))?;
            let _ = out_tx.send(OutputLine::Stderr(format!("Deleted run {id}")));
        }
        RunsCommand::Export { output } => {
            let runs = store.export_snapshot(caller).await.context("export runs")?;
            let path = match output {
                Some(p) => p,
                None => storage::default_export_path()?,
            };
            storage::write_export(&path, &runs)?;
            let _ = out_tx.send(OutputLine::Stderr(format!(
                "Exported {} runs: {}",
                runs.len(),
                path.display()
            )));
        }
        RunsCommand::Import { path } => {
            let records = storage::read_import(&path)?;
            let created = store
                .import_snapshot(caller, records)
                .await
                .with_context(|| format!("import {}", path.display()))?;
            let _ = out_tx.send(OutputLine::Stderr(format!(
                "Imported {} runs",
                created.len()
            )));
        }
        RunsCommand::Stats { json } => {
            let runs = store.list(caller).await.context("list runs")?;
            let stats = RunStats::from_runs(&runs);
            if json {
                let _ = out_tx.send(OutputLine::Stdout(serde_json::to_string_pretty(&stats)?));
            } else {
                send_summary(out_tx, text_summary::build_stats_summary(&stats));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_roll_and_runs_commands() {
        let cli = Cli::try_parse_from([
            "challenge-roller",
            "roll",
            "--rerolls",
            "3",
            "--challenges",
            "4",
            "--seed",
            "7",
            "--auto",
            "--json",
        ])
        .unwrap();
        let Command::Roll(roll) = cli.command else {
            panic!("expected roll");
        };
        assert_eq!(roll.rerolls, Some(3));
        assert_eq!(roll.challenges, Some(4));
        assert!(roll.auto && roll.json);

        let cli = Cli::try_parse_from([
            "challenge-roller",
            "runs",
            "update",
            "abc",
            "Completed",
            "--notes",
            "done",
            "--backend",
            "sqlite",
            "--owner",
            "me@example.com",
        ])
        .unwrap();
        assert_eq!(cli.global.backend, Some(BackendKind::Sqlite));
        assert_eq!(cli.global.owner.as_deref(), Some("me@example.com"));
        match cli.command {
            Command::Runs {
                command: RunsCommand::Update { id, status, notes },
            } => {
                assert_eq!(id, "abc");
                assert_eq!(status, RunStatus::Completed);
                assert_eq!(notes.as_deref(), Some("done"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn cli_rejects_bad_status_and_json_without_auto() {
        assert!(Cli::try_parse_from(["challenge-roller", "runs", "update", "abc", "paused"]).is_err());
        assert!(Cli::try_parse_from(["challenge-roller", "roll", "--json"]).is_err());
    }

    #[test]
    fn input_keys_map_to_commands() {
        assert_eq!(parse_input(" C "), Some(&[SessionCommand::Confirm][..]));
        assert_eq!(
            parse_input("n"),
            Some(&[SessionCommand::Reset, SessionCommand::Start][..])
        );
        assert_eq!(parse_input("x"), None);
    }

    #[tokio::test]
    async fn runs_commands_against_local_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = LocalRunStore::open(dir.path().join("runs.json")).await.unwrap();
        let caller = Caller::Anonymous;
        let (out_tx, _out_rx) = mpsc::unbounded_channel();

        let export = dir.path().join("export.json");
        std::fs::write(
            &export,
            r#"[{"id":"old","timestamp":1,"className":"Amazon","build":"Strafe","challenges":[],"status":"completed"}]"#,
        )
        .unwrap();
        run_runs_command(&store, &caller, RunsCommand::Import { path: export.clone() }, &out_tx)
            .await
            .unwrap();

        let runs = store.list(&caller).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_ne!(runs[0].id, "old");

        let err = run_runs_command(
            &store,
            &caller,
            RunsCommand::Update {
                id: runs[0].id.clone(),
                status: RunStatus::Active,
                notes: None,
            },
            &out_tx,
        )
        .await
        .unwrap_err();
        assert!(format!("{err:#}").contains("cannot change status"));

        let out = dir.path().join("out.json");
        run_runs_command(&store, &caller, RunsCommand::Export { output: Some(out.clone()) }, &out_tx)
            .await
            .unwrap();
        assert_eq!(storage::read_import(&out).unwrap().len(), 1);

        run_runs_command(&store, &caller, RunsCommand::Delete { id: runs[0].id.clone() }, &out_tx)
            .await
            .unwrap();
        assert!(store.list(&caller).await.unwrap().is_empty());
    }
}
