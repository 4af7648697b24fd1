//! # worklog-config
//!
//! Configuration for the worklog store. Reads `worklog.toml`, then applies
//! `WORKLOG_*` environment overrides, then validates. The one hard external
//! constraint enforced here: a database on a network share must not use WAL.

pub mod loader;
pub mod schema;

pub use loader::{ConfigLoader, expand_home};
pub use schema::WorklogConfig;
pub use schema::{
    ConfigWarning, CurationConfig, DatabaseConfig, HandoffConfig, HooksConfig, LoggingConfig,
    RetryConfig, WarningSeverity,
};
