//! Draw flow state machine.
//!
//! `Config -> Class -> Build -> Challenge(*) -> Result`, with `Result -> Config`
//! as the only way back. Every draw first lands as a pending value; only a
//! confirm moves it into the selection, so rerolls never touch confirmed state.

use crate::identity::Caller;
use crate::model::{
    Challenge, ClassName, DrawStep, Drawn, NewRun, Run, RunStatus, SelectionConfig,
    SelectionState,
};
use crate::pools::Pools;
use crate::selector::{pick, DrawSource};
use crate::store::{RunStore, StoreResult};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// A drawn value that is not yet part of the selection. Only actionable
/// once the spin has settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pending<T> {
    pub value: T,
    pub settled: bool,
}

impl<T> Pending<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            settled: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitState {
    NotSubmitted,
    Submitting,
    Committed { run_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowState {
    Config,
    Class {
        pending: Pending<ClassName>,
    },
    Build {
        class: ClassName,
        pending: Pending<String>,
    },
    Challenge {
        slot: usize,
        pending: Pending<Challenge>,
    },
    Result {
        commit: CommitState,
    },
}

impl FlowState {
    fn name(&self) -> &'static str {
        match self {
            FlowState::Config => "config",
            FlowState::Class { .. } => "class",
            FlowState::Build { .. } => "build",
            FlowState::Challenge { .. } => "challenge",
            FlowState::Result { .. } => "result",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    NotSettled,
    AlreadySettled,
    NoRerollsLeft,
    NoPendingDraw,
    AlreadyStarted,
    NotFinished,
    SaveInProgress,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            IgnoreReason::NotSettled => "wait for the spin to settle",
            IgnoreReason::AlreadySettled => "draw already settled",
            IgnoreReason::NoRerollsLeft => "no rerolls left",
            IgnoreReason::NoPendingDraw => "nothing to act on",
            IgnoreReason::AlreadyStarted => "a roll is already in progress",
            IgnoreReason::NotFinished => "finish the current roll first",
            IgnoreReason::SaveInProgress => "save in progress",
        };
        f.write_str(msg)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Applied,
    Ignored(IgnoreReason),
}

impl ActionOutcome {
    pub fn is_applied(self) -> bool {
        matches!(self, ActionOutcome::Applied)
    }
}

/// One roll session.
pub struct Flow<S> {
    pools: Arc<Pools>,
    config: SelectionConfig,
    budget: u32,
    selection: SelectionState,
    state: FlowState,
    source: S,
}

impl<S: DrawSource> Flow<S> {
    pub fn new(pools: Arc<Pools>, config: SelectionConfig, source: S) -> Self {
        Self {
            pools,
            config,
            budget: 0,
            selection: SelectionState::default(),
            state: FlowState::Config,
            source,
        }
    }

    pub fn state(&self) -> &FlowState {
        &self.state
    }

    pub fn config(&self) -> SelectionConfig {
        self.config
    }

    pub fn budget(&self) -> u32 {
        self.budget
    }

    pub fn selection(&self) -> &SelectionState {
        &self.selection
    }

    pub fn step(&self) -> Option<DrawStep> {
        match &self.state {
            FlowState::Class { .. } => Some(DrawStep::Class),
            FlowState::Build { .. } => Some(DrawStep::Build),
            FlowState::Challenge { slot, .. } => Some(DrawStep::Challenge { slot: *slot }),
            FlowState::Config | FlowState::Result { .. } => None,
        }
    }

    pub fn pending(&self) -> Option<Drawn> {
        match &self.state {
            FlowState::Class { pending } => Some(Drawn::Class(pending.value)),
            FlowState::Build { pending, .. } => Some(Drawn::Build(pending.value.clone())),
            FlowState::Challenge { pending, .. } => Some(Drawn::Challenge(pending.value.clone())),
            FlowState::Config | FlowState::Result { .. } => None,
        }
    }

    fn settled(&self) -> Option<bool> {
        match &self.state {
            FlowState::Class { pending } => Some(pending.settled),
            FlowState::Build { pending, .. } => Some(pending.settled),
            FlowState::Challenge { pending, .. } => Some(pending.settled),
            FlowState::Config | FlowState::Result { .. } => None,
        }
    }

    pub fn can_confirm(&self) -> bool {
        self.settled() == Some(true)
    }

    pub fn can_reroll(&self) -> bool {
        self.can_confirm() && self.budget > 0
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, FlowState::Result { .. })
    }

    /// Finished with fewer challenges than configured because the pool ran dry.
    pub fn exhausted_early(&self) -> bool {
        self.is_finished()
            && self.selection.challenges.len() < usize::from(self.config.challenge_count)
    }

    pub fn commit_state(&self) -> Option<&CommitState> {
        match &self.state {
            FlowState::Result { commit } => Some(commit),
            _ => None,
        }
    }

    /// Replace the configuration. Only allowed before the flow starts.
    pub fn configure(&mut self, config: SelectionConfig) -> ActionOutcome {
        if !matches!(self.state, FlowState::Config) {
            return ActionOutcome::Ignored(IgnoreReason::AlreadyStarted);
        }
        self.config = config;
        ActionOutcome::Applied
    }

    pub fn start(&mut self) -> ActionOutcome {
        if !matches!(self.state, FlowState::Config) {
            return ActionOutcome::Ignored(IgnoreReason::AlreadyStarted);
        }
        self.budget = self.config.rerolls;
        self.selection = SelectionState::default();
        let class = self.draw_class();
        self.state = FlowState::Class {
            pending: Pending::new(class),
        };
        debug!(rerolls = self.budget, challenges = self.config.challenge_count, "flow started");
        ActionOutcome::Applied
    }

    /// The spin animation for the current draw has come to rest.
    pub fn spin_settled(&mut self) -> ActionOutcome {
        let settled = match &mut self.state {
            FlowState::Class { pending } => &mut pending.settled,
            FlowState::Build { pending, .. } => &mut pending.settled,
            FlowState::Challenge { pending, .. } => &mut pending.settled,
            FlowState::Config | FlowState::Result { .. } => {
                return ActionOutcome::Ignored(IgnoreReason::NoPendingDraw)
            }
        };
        if *settled {
            return ActionOutcome::Ignored(IgnoreReason::AlreadySettled);
        }
        *settled = true;
        ActionOutcome::Applied
    }

    /// Promote the pending draw into the selection and advance.
    ///
    /// # Panics
    ///
    /// When there is no pending draw. Callers must only offer confirm while a
    /// draw is in flight.
    pub fn confirm(&mut self) -> ActionOutcome {
        match self.settled() {
            None => panic!("confirm called with no pending draw (state: {})", self.state.name()),
            Some(false) => return ActionOutcome::Ignored(IgnoreReason::NotSettled),
            Some(true) => {}
        }

        self.state = match std::mem::replace(&mut self.state, FlowState::Config) {
            FlowState::Class { pending } => {
                let class = pending.value;
                self.selection.class_name = Some(class);
                debug!(%class, "class confirmed");
                let build = self.draw_build(class);
                FlowState::Build {
                    class,
                    pending: Pending::new(build),
                }
            }
            FlowState::Build { pending, .. } => {
                debug!(build = %pending.value, "build confirmed");
                self.selection.build = Some(pending.value);
                self.next_challenge_or_result()
            }
            FlowState::Challenge { pending, .. } => {
                debug!(challenge = %pending.value.id, "challenge confirmed");
                self.selection.push_challenge(pending.value);
                self.next_challenge_or_result()
            }
            FlowState::Config | FlowState::Result { .. } => {
                unreachable!("pending draw checked above")
            }
        };
        ActionOutcome::Applied
    }

    /// Spend one reroll and redraw the current slot from the same pool.
    /// Rejected values are not excluded from the redraw.
    pub fn reroll(&mut self) -> ActionOutcome {
        match self.settled() {
            None => return ActionOutcome::Ignored(IgnoreReason::NoPendingDraw),
            Some(_) if self.budget == 0 => {
                return ActionOutcome::Ignored(IgnoreReason::NoRerollsLeft)
            }
            Some(false) => return ActionOutcome::Ignored(IgnoreReason::NotSettled),
            Some(true) => {}
        }

        self.budget -= 1;
        self.state = match std::mem::replace(&mut self.state, FlowState::Config) {
            FlowState::Class { .. } => FlowState::Class {
                pending: Pending::new(self.draw_class()),
            },
            FlowState::Build { class, .. } => FlowState::Build {
                class,
                pending: Pending::new(self.draw_build(class)),
            },
            FlowState::Challenge { slot, pending } => match self.draw_challenge() {
                Some(challenge) => FlowState::Challenge {
                    slot,
                    pending: Pending::new(challenge),
                },
                // The pending value itself is always eligible, so this never fires.
                None => FlowState::Challenge { slot, pending },
            },
            other => other,
        };
        debug!(budget_left = self.budget, "rerolled");
        ActionOutcome::Applied
    }

    /// Drop the finished roll and return to configuration.
    pub fn reset(&mut self) -> ActionOutcome {
        if !self.is_finished() {
            return ActionOutcome::Ignored(IgnoreReason::NotFinished);
        }
        self.selection = SelectionState::default();
        self.budget = 0;
        self.state = FlowState::Config;
        debug!("flow reset");
        ActionOutcome::Applied
    }

    /// Snapshot the finished selection for submission. Returns `None` unless
    /// the result is finished and not yet submitted or committed.
    pub fn begin_commit(&mut self) -> Option<NewRun> {
        if !matches!(
            self.state,
            FlowState::Result {
                commit: CommitState::NotSubmitted
            }
        ) {
            return None;
        }
        let (Some(class), Some(build)) = (self.selection.class_name, self.selection.build.clone())
        else {
            return None;
        };
        self.state = FlowState::Result {
            commit: CommitState::Submitting,
        };
        Some(NewRun {
            class_name: class.to_string(),
            build,
            challenges: self.selection.challenges.clone(),
            status: RunStatus::Active,
            notes: None,
        })
    }

    pub fn commit_succeeded(&mut self, run_id: String) {
        if let FlowState::Result { commit } = &mut self.state {
            if *commit == CommitState::Submitting {
                *commit = CommitState::Committed { run_id };
            }
        }
    }

    /// Allow another attempt. The selection is left as it was.
    pub fn commit_failed(&mut self) {
        if let FlowState::Result { commit } = &mut self.state {
            if *commit == CommitState::Submitting {
                *commit = CommitState::NotSubmitted;
            }
        }
    }

    /// Submit the finished selection as a new active run. A second call for
    /// the same selection is a no-op returning `Ok(None)`.
    pub async fn commit_run(
        &mut self,
        store: &dyn RunStore,
        caller: &Caller,
    ) -> StoreResult<Option<Run>> {
        let Some(new_run) = self.begin_commit() else {
            return Ok(None);
        };
        match store.create(caller, new_run).await {
            Ok(run) => {
                self.commit_succeeded(run.id.clone());
                Ok(Some(run))
            }
            Err(e) => {
                self.commit_failed();
                Err(e)
            }
        }
    }

    fn draw_class(&mut self) -> ClassName {
        *pick(self.pools.classes(), &HashSet::new(), &mut self.source)
            .expect("class pool is never empty")
    }

    fn draw_build(&mut self, class: ClassName) -> String {
        pick(self.pools.builds_for(class), &HashSet::new(), &mut self.source)
            .cloned()
            .expect("every class has at least one build")
    }

    fn draw_challenge(&mut self) -> Option<Challenge> {
        let excluded: HashSet<&str> = self
            .selection
            .challenges
            .iter()
            .map(|c| c.id.as_str())
            .collect();
        pick(self.pools.challenges(), &excluded, &mut self.source).cloned()
    }

    fn next_challenge_or_result(&mut self) -> FlowState {
        let confirmed = self.selection.challenges.len();
        let requested = self.config.challenge_count;
        if confirmed >= usize::from(requested) {
            return FlowState::Result {
                commit: CommitState::NotSubmitted,
            };
        }
        match self.draw_challenge() {
            Some(challenge) => FlowState::Challenge {
                slot: confirmed,
                pending: Pending::new(challenge),
            },
            None => {
                info!(requested, drawn = confirmed, "challenge pool exhausted");
                FlowState::Result {
                    commit: CommitState::NotSubmitted,
                }
            }
        }
    }
}
