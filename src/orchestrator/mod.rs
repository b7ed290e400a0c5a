//! Application-level orchestration.
//!
//! This module owns the roll session lifecycle (draw timing, confirm/reroll
//! routing, background saves). UI/CLI layers send commands in and render the
//! events that come back out.

mod controller;

pub use controller::{run_session, SessionCommand, SessionOptions};
