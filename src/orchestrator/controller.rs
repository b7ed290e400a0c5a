//! Roll session controller.
//!
//! Owns the draw flow, the spin settle timer and in-flight commits, and emits
//! events for presentation layers.

use crate::flow::{ActionOutcome, CommitState, Flow, IgnoreReason};
use crate::identity::Caller;
use crate::model::{FlowEvent, Run};
use crate::selector::DrawSource;
use crate::store::{RunStore, StoreResult};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinSet;
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

/// Commands emitted by UI layers to drive the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Start,
    Confirm,
    Reroll,
    Commit,
    Reset,
    Quit,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// How long a draw spins before it can be acted on.
    pub spin_duration: Duration,
    /// Submit the selection as soon as the flow finishes.
    pub auto_commit: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            spin_duration: Duration::from_millis(1200),
            auto_commit: false,
        }
    }
}

/// Completion of a spawned commit, tagged with the session generation that
/// started it.
type CommitDone = (u64, StoreResult<Run>);

struct Session<S> {
    flow: Flow<S>,
    store: Arc<dyn RunStore>,
    caller: Caller,
    options: SessionOptions,
    event_tx: UnboundedSender<FlowEvent>,
    settle_at: Option<Instant>,
    // Bumped on reset so stale commit completions are dropped.
    generation: u64,
    commits: JoinSet<CommitDone>,
}

impl<S: DrawSource> Session<S> {
    fn emit(&self, event: FlowEvent) {
        let _ = self.event_tx.send(event);
    }

    fn ignored(&self, reason: IgnoreReason) {
        self.emit(FlowEvent::Ignored {
            reason: reason.to_string(),
        });
    }

    /// A new pending draw is spinning.
    fn draw_started(&mut self) {
        if let Some(step) = self.flow.step() {
            self.settle_at = Some(Instant::now() + self.options.spin_duration);
            self.emit(FlowEvent::DrawStarted { step });
        }
    }

    fn settle(&mut self) {
        self.settle_at = None;
        if !self.flow.spin_settled().is_applied() {
            return;
        }
        if let (Some(step), Some(value)) = (self.flow.step(), self.flow.pending()) {
            self.emit(FlowEvent::DrawSettled {
                step,
                value,
                can_reroll: self.flow.can_reroll(),
            });
        }
    }

    fn start(&mut self) {
        match self.flow.start() {
            ActionOutcome::Applied => self.draw_started(),
            ActionOutcome::Ignored(reason) => self.ignored(reason),
        }
    }

    fn confirm(&mut self) {
        // Confirm on a flow without a pending draw is a contract violation,
        // so the controller filters it out before it reaches the flow.
        let (Some(step), Some(value)) = (self.flow.step(), self.flow.pending()) else {
            self.ignored(IgnoreReason::NoPendingDraw);
            return;
        };
        match self.flow.confirm() {
            ActionOutcome::Applied => {
                self.emit(FlowEvent::Confirmed { step, value });
                if self.flow.is_finished() {
                    self.finished();
                } else {
                    self.draw_started();
                }
            }
            ActionOutcome::Ignored(reason) => self.ignored(reason),
        }
    }

    fn reroll(&mut self) {
        match self.flow.reroll() {
            ActionOutcome::Applied => {
                self.emit(FlowEvent::Rerolled {
                    budget_left: self.flow.budget(),
                });
                self.draw_started();
            }
            ActionOutcome::Ignored(reason) => self.ignored(reason),
        }
    }

    fn finished(&mut self) {
        self.settle_at = None;
        if self.flow.exhausted_early() {
            self.emit(FlowEvent::Exhausted {
                requested: self.flow.config().challenge_count,
                drawn: self.flow.selection().challenges.len(),
            });
        }
        self.emit(FlowEvent::Finished {
            selection: self.flow.selection().clone(),
        });
        if self.options.auto_commit {
            self.commit();
        }
    }

    fn commit(&mut self) {
        if !self.flow.is_finished() {
            self.ignored(IgnoreReason::NotFinished);
            return;
        }
        match self.flow.commit_state() {
            Some(CommitState::Submitting) => {
                self.ignored(IgnoreReason::SaveInProgress);
                return;
            }
            Some(CommitState::Committed { run_id }) => {
                self.emit(FlowEvent::Info(format!("Selection already saved as {run_id}")));
                return;
            }
            _ => {}
        }
        let Some(new_run) = self.flow.begin_commit() else {
            return;
        };
        let store = self.store.clone();
        let caller = self.caller.clone();
        let generation = self.generation;
        self.commits.spawn(async move {
            let res = store.create(&caller, new_run).await;
            (generation, res)
        });
        self.emit(FlowEvent::CommitStarted);
    }

    fn reset(&mut self) {
        match self.flow.reset() {
            ActionOutcome::Applied => {
                self.generation += 1;
                self.settle_at = None;
                self.emit(FlowEvent::Reset);
            }
            ActionOutcome::Ignored(reason) => self.ignored(reason),
        }
    }

    fn commit_done(&mut self, generation: u64, res: StoreResult<Run>) {
        if generation != self.generation {
            debug!(generation, current = self.generation, "dropping stale commit result");
            return;
        }
        match res {
            Ok(run) => {
                self.flow.commit_succeeded(run.id.clone());
                self.emit(FlowEvent::Committed { run: Box::new(run) });
            }
            Err(e) => {
                warn!(error = %e, transient = e.is_transient(), "commit failed");
                self.flow.commit_failed();
                self.emit(FlowEvent::CommitFailed {
                    message: e.to_string(),
                });
            }
        }
    }
}

/// Drive one roll session from UI commands and emit events back to
/// presentation layers. Returns once `Quit` is received (or the command
/// channel closes) and every in-flight commit has completed.
pub async fn run_session<S: DrawSource>(
    flow: Flow<S>,
    store: Arc<dyn RunStore>,
    caller: Caller,
    options: SessionOptions,
    event_tx: UnboundedSender<FlowEvent>,
    mut cmd_rx: UnboundedReceiver<SessionCommand>,
) -> Result<()> {
    let mut session = Session {
        flow,
        store,
        caller,
        options,
        event_tx,
        settle_at: None,
        generation: 0,
        commits: JoinSet::new(),
    };
    let mut quit_pending = false;

    loop {
        let settle_at = session.settle_at;
        tokio::select! {
            cmd = cmd_rx.recv(), if !quit_pending => {
                match cmd {
                    Some(SessionCommand::Start) => session.start(),
                    Some(SessionCommand::Confirm) => session.confirm(),
                    Some(SessionCommand::Reroll) => session.reroll(),
                    Some(SessionCommand::Commit) => session.commit(),
                    Some(SessionCommand::Reset) => session.reset(),
                    Some(SessionCommand::Quit) | None => {
                        // Quit waits for pending commits so no save is lost.
                        quit_pending = true;
                        if !session.commits.is_empty() {
                            session.emit(FlowEvent::Info("Waiting for save to finish…".into()));
                        }
                    }
                }
            }
            _ = async move {
                match settle_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => futures::future::pending().await,
                }
            } => {
                session.settle();
            }
            Some(joined) = session.commits.join_next() => {
                match joined {
                    Ok((generation, res)) => session.commit_done(generation, res),
                    Err(e) => {
                        session.flow.commit_failed();
                        session.emit(FlowEvent::CommitFailed {
                            message: format!("commit task failed: {e}"),
                        });
                    }
                }
            }
        }

        if quit_pending && session.commits.is_empty() {
            break;
        }
    }

    Ok(())
}
