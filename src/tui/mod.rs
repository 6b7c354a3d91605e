//! Interactive TUI for Identity Center groups
//!
//! ## State machine
//! The `app` module owns all session state. It turns key actions and
//! background completions into state changes plus at most one command.
//!
//! ## Async Task Management
//! The `tasks` module runs gateway calls on a background tokio runtime:
//! - commands go in over an unbounded channel
//! - each command runs as its own task
//! - results come back over crossbeam and are drained once per frame
//!
//! `input` maps keys to actions and `render` draws a frame from the state.

pub mod app;
pub mod input;
pub mod render;
pub mod tasks;

pub use app::{TuiOptions, run_tui};
