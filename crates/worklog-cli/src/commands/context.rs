use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use console::style;
use parking_lot::Mutex;
use serde::Serialize;
use worklog_config::{DatabaseConfig, WorklogConfig};
use worklog_core::RowId;
use worklog_curation::{CurationSettings, Curator};
use worklog_handoff::{
    HandoffQueue, RetryPolicy, RetryingWriter, StatementExecutor, WriteOutcome, hostname,
};
use worklog_store::{DatabaseOptions, Statement, WorklogStore};

/// A store that is opened on first use.
///
/// Opening the database can itself fail on a flaky mount, so writes go through
/// this executor: a failed open surfaces as a retryable error on the first
/// attempt and the next attempt tries again.
pub struct LazyStore {
    path: PathBuf,
    options: DatabaseOptions,
    store: Mutex<Option<WorklogStore>>,
}

impl LazyStore {
    pub fn new(path: impl Into<PathBuf>, options: DatabaseOptions) -> Self {
        Self {
            path: path.into(),
            options,
            store: Mutex::new(None),
        }
    }

    pub fn from_config(config: &DatabaseConfig) -> Self {
        Self::new(
            &config.path,
            DatabaseOptions {
                journal_mode: config.journal_mode.clone(),
                busy_timeout: Duration::from_millis(config.busy_timeout_ms),
                network_share: config.network_share,
            },
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.store.lock().is_some()
    }

    /// The open store, opening it now if needed.
    pub fn store(&self) -> worklog_core::Result<WorklogStore> {
        let mut slot = self.store.lock();
        if let Some(store) = slot.as_ref() {
            return Ok(store.clone());
        }
        let store = WorklogStore::open(&self.path, &self.options)?;
        *slot = Some(store.clone());
        Ok(store)
    }
}

impl StatementExecutor for LazyStore {
    fn execute(&self, statement: &Statement) -> worklog_core::Result<Option<RowId>> {
        self.store()?.execute(statement)
    }
}

/// Everything a command needs: the resolved config and the database.
pub(super) struct Context {
    pub config: WorklogConfig,
    pub json: bool,
    database: Arc<LazyStore>,
}

impl Context {
    pub fn new(config: WorklogConfig, json: bool) -> Self {
        let database = Arc::new(LazyStore::from_config(&config.database));
        Self {
            config,
            json,
            database,
        }
    }

    pub fn store(&self) -> worklog_core::Result<WorklogStore> {
        self.database.store()
    }

    pub fn database(&self) -> &Arc<LazyStore> {
        &self.database
    }

    pub fn agent(&self, explicit: Option<String>) -> String {
        explicit.unwrap_or_else(|| self.config.hooks.agent.clone())
    }

    pub fn origin(&self) -> String {
        self.config.handoff.origin.clone().unwrap_or_else(hostname)
    }

    pub fn queue(&self) -> HandoffQueue {
        HandoffQueue::new(&self.config.handoff.dir)
    }

    pub fn writer(&self) -> RetryingWriter<Arc<LazyStore>> {
        RetryingWriter::new(
            Arc::clone(&self.database),
            self.queue(),
            RetryPolicy::from(&self.config.retry),
            self.origin(),
        )
    }

    pub fn curator(&self) -> worklog_core::Result<Curator> {
        Ok(Curator::new(
            self.store()?,
            CurationSettings::from(&self.config.curation),
        ))
    }

    /// Print `value` as JSON in `--json` mode, otherwise run `human`.
    pub fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce(&T)) -> worklog_core::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            human(value);
        }
        Ok(())
    }

    /// Report the result of a write. A deferred write is not a failure.
    pub fn report_write(&self, what: &str, outcome: &WriteOutcome) -> worklog_core::Result<()> {
        self.emit(outcome, |outcome| match outcome {
            WriteOutcome::Applied { rowid: Some(id) } => {
                println!("{} {what} #{id}", style("✓").green().bold())
            }
            WriteOutcome::Applied { rowid: None } => println!("{} {what}", style("✓").green().bold()),
            WriteOutcome::Deferred { path } => {
                eprintln!(
                    "{} database unavailable, {what} deferred to {}",
                    style("⏳").yellow(),
                    path.display()
                );
                eprintln!("   It will be applied by 'worklog handoff process'.");
            }
        })
    }
}

/// Shorten to `max` characters on one line, appending "..." when cut.
pub(super) fn truncate(s: &str, max: usize) -> String {
    let flat = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        flat
    } else {
        let cut: String = flat.chars().take(max).collect();
        format!("{cut}...")
    }
}
