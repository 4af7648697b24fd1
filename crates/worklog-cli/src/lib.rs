//! # worklog-cli
//!
//! Command-line interface for the shared agent worklog.
//!
//! ## Commands
//!
//! - `worklog log` / `knowledge` / `memory` / `error` / `research`: record things
//! - `worklog query` / `search` / `recall` / `recent` / `tables`: read them back
//! - `worklog handoff`: inspect and replay deferred writes
//! - `worklog curate`: maintenance passes and candidate review
//! - `worklog hook session-start`: context for a new agent session
//! - `worklog init` / `config` / `doctor`: setup and diagnostics

pub mod commands;

pub use commands::{Cli, LazyStore};
