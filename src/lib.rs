//! Weighted random roller for class/build/challenge combinations, plus
//! owner-scoped tracking of runs attempted against a rolled combination.
//!
//! [`selector`] does weighted sampling without replacement, [`flow`] drives
//! the draw/confirm/reroll state machine over it, and [`store`] persists the
//! finished selections as runs.

pub mod flow;
pub mod identity;
pub mod model;
pub mod orchestrator;
pub mod pools;
pub mod selector;
pub mod stats;
pub mod store;
