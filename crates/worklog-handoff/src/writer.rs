use std::path::PathBuf;

use serde::Serialize;
use tracing::{error, warn};
use worklog_core::{RowId, WorklogError};
use worklog_store::{
    ConflictPolicy, NewEntry, NewErrorPattern, NewKnowledge, NewMemory, NewResearch, Statement,
    memories::key_conflict,
};

use crate::document::HandoffDocument;
use crate::queue::HandoffQueue;
use crate::retry::{AttemptError, RetryPolicy, StatementExecutor, write_with_retry};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WriteOutcome {
    Applied { rowid: Option<RowId> },
    /// Persisted to a handoff file for later replay.
    Deferred { path: PathBuf },
}

impl WriteOutcome {
    pub fn is_deferred(&self) -> bool {
        matches!(self, WriteOutcome::Deferred { .. })
    }

    /// The written row id, treating a deferral as an error for callers that
    /// need the row now.
    pub fn rowid(self) -> worklog_core::Result<Option<RowId>> {
        match self {
            WriteOutcome::Applied { rowid } => Ok(rowid),
            WriteOutcome::Deferred { path } => Err(WorklogError::Deferred { path }),
        }
    }
}

/// Writes through an executor with bounded retries, falling back to a
/// handoff file when the database stays unavailable.
pub struct RetryingWriter<E> {
    executor: E,
    queue: HandoffQueue,
    policy: RetryPolicy,
    origin: String,
}

impl<E: StatementExecutor> RetryingWriter<E> {
    pub fn new(executor: E, queue: HandoffQueue, policy: RetryPolicy, origin: impl Into<String>) -> Self {
        Self {
            executor,
            queue,
            policy,
            origin: origin.into(),
        }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn queue(&self) -> &HandoffQueue {
        &self.queue
    }

    pub async fn write(&self, title: &str, statement: Statement) -> worklog_core::Result<WriteOutcome> {
        match write_with_retry(&self.executor, &statement, &self.policy).await {
            Ok(rowid) => Ok(WriteOutcome::Applied { rowid }),
            Err(AttemptError { attempts, error }) if error.is_retryable() => {
                let document = HandoffDocument::new(title, statement, self.origin.as_str())
                    .with_failure(attempts, error.to_string());
                match self.queue.create(&document) {
                    Ok(path) => {
                        warn!(?path, attempts, error = %error, "database unavailable, write deferred");
                        Ok(WriteOutcome::Deferred { path })
                    }
                    Err(handoff_err) => {
                        error!(error = %error, handoff_error = %handoff_err, "write lost");
                        Err(WorklogError::HandoffFailed {
                            reason: format!("{error}; handoff: {handoff_err}"),
                        })
                    }
                }
            }
            Err(AttemptError { error, .. }) => Err(error),
        }
    }

    pub async fn log_entry(&self, entry: &NewEntry) -> worklog_core::Result<WriteOutcome> {
        self.write(&format!("entry: {}", entry.title.trim()), entry.statement()?)
            .await
    }

    pub async fn store_knowledge(&self, item: &NewKnowledge) -> worklog_core::Result<WriteOutcome> {
        self.write(
            &format!("knowledge: {}/{}", item.category, item.title.trim()),
            item.statement()?,
        )
        .await
    }

    pub async fn upsert_memory(
        &self,
        memory: &NewMemory,
        policy: ConflictPolicy,
    ) -> worklog_core::Result<WriteOutcome> {
        self.write(
            &format!("memory: {}", memory.key.trim()),
            memory.statement(policy)?,
        )
        .await
        .map_err(|e| key_conflict(&memory.key, e))
    }

    pub async fn record_error_pattern(
        &self,
        pattern: &NewErrorPattern,
    ) -> worklog_core::Result<WriteOutcome> {
        self.write(
            &format!("error pattern: {}", pattern.error_signature.trim()),
            pattern.statement()?,
        )
        .await
    }

    pub async fn store_research(&self, item: &NewResearch) -> worklog_core::Result<WriteOutcome> {
        self.write(&format!("research: {}", item.title.trim()), item.statement()?)
            .await
    }
}
