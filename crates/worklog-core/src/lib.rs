//! # worklog-core
//!
//! Shared vocabulary for the worklog workspace: the error type, the closed sets of
//! values stored as TEXT (tables, task types, memory statuses, ...), and small
//! helpers for the tag and timestamp conventions every table follows.

pub mod error;
pub mod tags;
pub mod time;
pub mod types;

pub use error::{Result, WorklogError};
pub use tags::{join_tags, parse_tags};
pub use time::{format_timestamp, now_timestamp, parse_timestamp};
pub use types::*;
