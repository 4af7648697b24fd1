use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for the worklog workspace.
#[derive(Error, Debug)]
pub enum WorklogError {
    // ── Storage errors ─────────────────────────────────────────
    /// Another process holds the SQLite file lock (`database is locked`).
    #[error("database is locked: {0}")]
    Locked(String),

    /// The database file could not be reached (`unable to open database file`,
    /// `disk I/O error`). Usually a network mount that went away.
    #[error("database unreachable: {0}")]
    Connectivity(String),

    #[error("database is read-only: {path}: {hint}")]
    ReadOnly { path: String, hint: String },

    #[error("database error: {0}")]
    Database(String),

    // ── Data errors ────────────────────────────────────────────
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("invalid memory status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("candidate is claimed by {holder} until {until}")]
    LeaseHeld { holder: String, until: String },

    // ── Handoff errors ─────────────────────────────────────────
    /// Not a failure: the write was persisted to a handoff file for later replay.
    #[error("write deferred to handoff {}", path.display())]
    Deferred { path: PathBuf },

    /// The write could not be applied and the handoff could not be written either.
    #[error("handoff creation failed, write lost: {reason}")]
    HandoffFailed { reason: String },

    // ── Config / parse errors ──────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    #[error("parse error in {}:{line}: {reason}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl WorklogError {
    /// Whether a write that failed with this error may succeed if tried again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Locked(_) | Self::Connectivity(_))
    }

    pub fn validation(field: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, WorklogError>;
