use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use worklog_core::HookMode;

/// Root configuration, mapped from `worklog.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorklogConfig {
    pub database: DatabaseConfig,
    pub retry: RetryConfig,
    pub handoff: HandoffConfig,
    pub hooks: HooksConfig,
    pub curation: CurationConfig,
    pub logging: LoggingConfig,
}

/// `~/.claude/worklog`, the directory every default path lives under.
pub fn default_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".claude")
        .join("worklog")
}

// ── Database ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the shared SQLite file.
    pub path: PathBuf,
    /// SQLite journal mode: "delete", "truncate", "persist", or "wal".
    /// WAL needs shared memory and is not usable on network mounts.
    pub journal_mode: String,
    /// Set when `path` lives on an NFS/SMB share.
    pub network_share: bool,
    /// How long SQLite itself waits on a lock before reporting `database is locked`.
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_home().join("worklog.db"),
            journal_mode: "delete".into(),
            network_share: false,
            busy_timeout_ms: 1000,
        }
    }
}

// ── Retry ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per write before falling back to a handoff file.
    pub max_attempts: u32,
    /// Lower bound of the randomized delay between attempts.
    pub backoff_min_secs: f64,
    /// Upper bound of the randomized delay between attempts.
    pub backoff_max_secs: f64,
    /// Total time budget for one write across all attempts (None = attempts only).
    pub deadline_secs: Option<f64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_min_secs: 5.0,
            backoff_max_secs: 10.0,
            deadline_secs: None,
        }
    }
}

/// Upper bound for any retry delay or deadline, in seconds.
pub const MAX_RETRY_SECS: f64 = 3600.0;

/// Seconds to a `Duration`, clamped to `[0, MAX_RETRY_SECS]`. Non-finite
/// values are refused by `validate`; here they clamp to the bound.
fn bounded_secs(secs: f64) -> Duration {
    let secs = if secs.is_nan() { 0.0 } else { secs.clamp(0.0, MAX_RETRY_SECS) };
    Duration::from_secs_f64(secs)
}

impl RetryConfig {
    pub fn backoff_min(&self) -> Duration {
        bounded_secs(self.backoff_min_secs)
    }

    pub fn backoff_max(&self) -> Duration {
        bounded_secs(self.backoff_max_secs)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.filter(|s| *s > 0.0).map(bounded_secs)
    }
}

// ── Handoff ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoffConfig {
    /// Shared directory where deferred writes are dropped for replay.
    pub dir: PathBuf,
    /// Name of this system in handoff files (defaults to the hostname).
    pub origin: Option<String>,
    /// Claims older than this are assumed abandoned and released.
    pub stale_claim_secs: u64,
    /// Poll interval for `worklog handoff watch`, on top of filesystem events.
    pub poll_interval_secs: u64,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            dir: default_home().join("handoffs"),
            origin: None,
            stale_claim_secs: 600,
            poll_interval_secs: 60,
        }
    }
}

// ── Hooks ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HooksConfig {
    /// "light", "remind", "full", or "aggressive".
    pub mode: String,
    /// Agent name recorded on writes made by hooks and the CLI.
    pub agent: String,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            mode: "remind".into(),
            agent: "claude".into(),
        }
    }
}

impl HooksConfig {
    /// Parsed hook mode; unknown values fall back to `remind`.
    pub fn hook_mode(&self) -> HookMode {
        self.mode.parse().unwrap_or(HookMode::Remind)
    }
}

// ── Curation ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CurationConfig {
    /// Agent name recorded in curation history.
    pub agent: String,
    /// Minimum similarity (0.0-1.0) for a pair to become a duplicate candidate.
    pub duplicate_threshold: f64,
    /// Memories at or above this importance must be linked somewhere.
    pub orphan_min_importance: u8,
    /// Staging memories at or above this importance are promotion candidates.
    pub promotion_min_importance: u8,
    /// Minimum age of a staging memory before it is considered for promotion.
    pub promotion_min_age_hours: u64,
    /// How long a claimed candidate stays reserved for one agent.
    pub lease_secs: u64,
}

impl Default for CurationConfig {
    fn default() -> Self {
        Self {
            agent: "curator".into(),
            duplicate_threshold: 0.8,
            orphan_min_importance: 5,
            promotion_min_importance: 6,
            promotion_min_age_hours: 24,
            lease_secs: 900,
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".into(),
            format: "pretty".into(),
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

/// A single config validation issue.
#[derive(Debug)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
            WarningSeverity::Info => "info",
        };
        write!(f, "[{}] {}: {}", label, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, "\n   hint: {}", h)?;
        }
        Ok(())
    }
}

impl WorklogConfig {
    /// Validate the config and return a list of warnings/errors.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        // ── Journal mode ───
        let mode = self.database.journal_mode.to_lowercase();
        let valid_modes = ["delete", "truncate", "persist", "memory", "wal", "off"];
        if !valid_modes.contains(&mode.as_str()) {
            warnings.push(ConfigWarning {
                field: "database.journal_mode".into(),
                message: format!("unknown journal mode '{}'", self.database.journal_mode),
                severity: WarningSeverity::Error,
                hint: Some(format!("Valid values: {}", valid_modes.join(", "))),
            });
        } else if mode == "wal" && self.database.network_share {
            warnings.push(ConfigWarning {
                field: "database.journal_mode".into(),
                message: "WAL journal mode cannot be used on a network share".into(),
                severity: WarningSeverity::Error,
                hint: Some("WAL needs shared memory; use 'delete' for NFS/SMB mounts".into()),
            });
        } else if mode == "off" || mode == "memory" {
            warnings.push(ConfigWarning {
                field: "database.journal_mode".into(),
                message: format!("journal mode '{}' gives up crash safety", mode),
                severity: WarningSeverity::Warning,
                hint: Some("Use 'delete' unless the database is disposable".into()),
            });
        }

        if self.database.path.as_os_str().is_empty() {
            warnings.push(ConfigWarning {
                field: "database.path".into(),
                message: "database path is empty".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. '~/.claude/worklog/worklog.db'".into()),
            });
        }

        // ── Retry ───
        if self.retry.max_attempts == 0 {
            warnings.push(ConfigWarning {
                field: "retry.max_attempts".into(),
                message: "max_attempts is 0, so no write would ever be attempted".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 3".into()),
            });
        }
        let retry_secs = [
            ("retry.backoff_min_secs", Some(self.retry.backoff_min_secs)),
            ("retry.backoff_max_secs", Some(self.retry.backoff_max_secs)),
            ("retry.deadline_secs", self.retry.deadline_secs),
        ];
        let mut out_of_range = false;
        for (field, value) in retry_secs {
            let Some(value) = value else { continue };
            if !value.is_finite() || value > MAX_RETRY_SECS {
                out_of_range = true;
                warnings.push(ConfigWarning {
                    field: field.into(),
                    message: format!("{value} is not a finite number of seconds up to {MAX_RETRY_SECS}"),
                    severity: WarningSeverity::Error,
                    hint: Some("Retry delays and deadlines are capped at one hour".into()),
                });
            }
        }
        if !out_of_range
            && (self.retry.backoff_min_secs < 0.0 || self.retry.backoff_max_secs < 0.0)
        {
            warnings.push(ConfigWarning {
                field: "retry.backoff_min_secs".into(),
                message: "backoff bounds must not be negative".into(),
                severity: WarningSeverity::Error,
                hint: None,
            });
        } else if !out_of_range && self.retry.backoff_min_secs > self.retry.backoff_max_secs {
            warnings.push(ConfigWarning {
                field: "retry.backoff_min_secs".into(),
                message: format!(
                    "backoff_min_secs {} is greater than backoff_max_secs {}",
                    self.retry.backoff_min_secs, self.retry.backoff_max_secs
                ),
                severity: WarningSeverity::Error,
                hint: Some("Defaults are 5.0 and 10.0".into()),
            });
        }

        // ── Hooks ───
        if self.hooks.mode.parse::<HookMode>().is_err() {
            warnings.push(ConfigWarning {
                field: "hooks.mode".into(),
                message: format!("unknown hook mode '{}'", self.hooks.mode),
                severity: WarningSeverity::Error,
                hint: Some("Valid values: light, remind, full, aggressive".into()),
            });
        }
        if self.hooks.agent.trim().is_empty() {
            warnings.push(ConfigWarning {
                field: "hooks.agent".into(),
                message: "agent name is empty".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 'claude'".into()),
            });
        }

        // ── Curation ───
        if !(0.0..=1.0).contains(&self.curation.duplicate_threshold) {
            warnings.push(ConfigWarning {
                field: "curation.duplicate_threshold".into(),
                message: format!(
                    "threshold {} is out of range",
                    self.curation.duplicate_threshold
                ),
                severity: WarningSeverity::Error,
                hint: Some("Similarity scores range 0.0-1.0; 0.8 is typical".into()),
            });
        } else if self.curation.duplicate_threshold < 0.5 {
            warnings.push(ConfigWarning {
                field: "curation.duplicate_threshold".into(),
                message: "a low threshold will flood the duplicate queue".into(),
                severity: WarningSeverity::Warning,
                hint: None,
            });
        }
        for (field, value) in [
            ("curation.orphan_min_importance", self.curation.orphan_min_importance),
            ("curation.promotion_min_importance", self.curation.promotion_min_importance),
        ] {
            if !(1..=10).contains(&value) {
                warnings.push(ConfigWarning {
                    field: field.into(),
                    message: format!("importance {} is out of range", value),
                    severity: WarningSeverity::Error,
                    hint: Some("Importance ranges 1-10".into()),
                });
            }
        }
        if self.curation.lease_secs == 0 {
            warnings.push(ConfigWarning {
                field: "curation.lease_secs".into(),
                message: "leases expire immediately; concurrent curators will collide".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Set to e.g. 900".into()),
            });
        }

        // ── Logging ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_levels.join(", "))),
            });
        }

        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }
}
