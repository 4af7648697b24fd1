use serde::{Deserialize, Serialize};
use worklog_core::{RowId, TaskType, WorklogError, join_tags, now_timestamp, parse_tags};

use crate::statement::Statement;
use crate::store::WorklogStore;

/// A work-log entry to append. Entries are insert-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEntry {
    pub agent: String,
    pub task_type: TaskType,
    pub title: String,
    pub details: Option<String>,
    pub decision_rationale: Option<String>,
    pub outcome: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub related_files: Vec<String>,
}

impl NewEntry {
    pub fn new(agent: impl Into<String>, task_type: TaskType, title: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            task_type,
            title: title.into(),
            details: None,
            decision_rationale: None,
            outcome: None,
            tags: Vec::new(),
            related_files: Vec::new(),
        }
    }

    /// Build the insert. The timestamp is bound here so a replayed handoff
    /// reproduces the row as it would have been written.
    pub fn statement(&self) -> worklog_core::Result<Statement> {
        if self.agent.trim().is_empty() {
            return Err(WorklogError::validation("agent", "must not be empty"));
        }
        if self.title.trim().is_empty() {
            return Err(WorklogError::validation("title", "must not be empty"));
        }
        Ok(Statement::new(
            "INSERT INTO entries (timestamp, agent, task_type, title, details, \
             decision_rationale, outcome, tags, related_files) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) RETURNING id",
        )
        .bind(now_timestamp())
        .bind(self.agent.trim())
        .bind(self.task_type.as_str())
        .bind(self.title.trim())
        .bind(self.details.as_deref())
        .bind(self.decision_rationale.as_deref())
        .bind(self.outcome.as_deref())
        .bind(join_tags(&self.tags))
        .bind(join_tags(&self.related_files)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryRecord {
    pub id: RowId,
    pub timestamp: String,
    pub agent: String,
    pub task_type: String,
    pub title: String,
    pub details: Option<String>,
    pub decision_rationale: Option<String>,
    pub outcome: Option<String>,
    pub tags: Vec<String>,
    pub related_files: Vec<String>,
}

const ENTRY_COLUMNS: &str = "id, timestamp, agent, task_type, title, details, \
                             decision_rationale, outcome, tags, related_files";

impl EntryRecord {
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            agent: row.get(2)?,
            task_type: row.get(3)?,
            title: row.get(4)?,
            details: row.get(5)?,
            decision_rationale: row.get(6)?,
            outcome: row.get(7)?,
            tags: parse_tags(&row.get::<_, Option<String>>(8)?.unwrap_or_default()),
            related_files: parse_tags(&row.get::<_, Option<String>>(9)?.unwrap_or_default()),
        })
    }
}

impl WorklogStore {
    /// Append an entry to the work log.
    pub fn log_entry(&self, entry: &NewEntry) -> worklog_core::Result<RowId> {
        let id = self.insert(&entry.statement()?)?;
        tracing::debug!(id, title = %entry.title, "logged entry");
        Ok(id)
    }

    pub fn get_entry(&self, id: RowId) -> worklog_core::Result<EntryRecord> {
        let db = self.db();
        db.query_row(
            &format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE id = ?1"),
            rusqlite::params![id],
            EntryRecord::from_row,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                WorklogError::NotFound(format!("no entry with id {id}"))
            }
            other => self.sql_err(other),
        })
    }

    /// Entries from the last `days` days, newest first.
    pub fn recent_entries(
        &self,
        agent: Option<&str>,
        days: u32,
        limit: usize,
    ) -> worklog_core::Result<Vec<EntryRecord>> {
        let cutoff = worklog_core::format_timestamp(
            chrono::Utc::now() - chrono::Duration::days(days as i64),
        );
        let db = self.db();
        let mut stmt = db
            .prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM entries \
                 WHERE timestamp > ?1 AND (?2 IS NULL OR agent = ?2) \
                 ORDER BY timestamp DESC, id DESC LIMIT ?3"
            ))
            .map_err(|e| self.sql_err(e))?;
        let rows = stmt
            .query_map(
                rusqlite::params![cutoff, agent, limit as i64],
                EntryRecord::from_row,
            )
            .map_err(|e| self.sql_err(e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| self.sql_err(e))?;
        Ok(rows)
    }
}
