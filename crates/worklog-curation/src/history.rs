use std::time::Instant;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, warn};
use worklog_core::{CurationOperation, RowId, WorklogError, now_timestamp};
use worklog_store::WorklogStore;

/// One row of `curation_history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: RowId,
    pub operation: String,
    pub agent: String,
    pub stats: JsonValue,
    pub duration_ms: i64,
    pub success: bool,
    pub error_message: Option<String>,
    pub created_at: String,
}

pub(crate) fn record(
    conn: &Connection,
    operation: CurationOperation,
    agent: &str,
    stats: &JsonValue,
    duration_ms: i64,
    error: Option<&str>,
) -> rusqlite::Result<RowId> {
    conn.query_row(
        "INSERT INTO curation_history \
         (operation, agent, stats, duration_ms, success, error_message, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) RETURNING id",
        rusqlite::params![
            operation.as_str(),
            agent,
            stats.to_string(),
            duration_ms,
            error.is_none(),
            error,
            now_timestamp(),
        ],
        |row| row.get(0),
    )
}

pub(crate) fn recent(conn: &Connection, limit: usize) -> rusqlite::Result<Vec<HistoryRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, operation, agent, stats, duration_ms, success, error_message, created_at \
         FROM curation_history ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![limit as i64], |row| {
            let stats: Option<String> = row.get(3)?;
            Ok(HistoryRecord {
                id: row.get(0)?,
                operation: row.get(1)?,
                agent: row.get(2)?,
                stats: stats
                    .and_then(|s| serde_json::from_str(&s).ok())
                    .unwrap_or(JsonValue::Null),
                duration_ms: row.get(4)?,
                success: row.get(5)?,
                error_message: row.get(6)?,
                created_at: row.get(7)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Run a curation pass and write its history row whether it succeeds or
/// fails. The pass's own error wins over a failure to record it.
pub fn run_pass<T, F>(
    store: &WorklogStore,
    operation: CurationOperation,
    agent: &str,
    f: F,
) -> worklog_core::Result<T>
where
    T: Serialize,
    F: FnOnce() -> worklog_core::Result<T>,
{
    let started = Instant::now();
    let result = f();
    let duration_ms = started.elapsed().as_millis() as i64;

    let (stats, error) = match &result {
        Ok(value) => (serde_json::to_value(value)?, None),
        Err(e) => (JsonValue::Null, Some(e.to_string())),
    };
    let recorded = {
        let db = store.db();
        record(&db, operation, agent, &stats, duration_ms, error.as_deref())
    };

    match (&result, recorded) {
        (Ok(_), Ok(_)) => info!(%operation, agent, duration_ms, %stats, "curation pass finished"),
        (Ok(_), Err(e)) => return Err(store.sql_err(e)),
        (Err(pass_err), Ok(_)) => {
            warn!(%operation, agent, error = %pass_err, "curation pass failed")
        }
        (Err(pass_err), Err(e)) => {
            warn!(%operation, error = %pass_err, history_error = %e, "curation pass failed and was not recorded")
        }
    }
    result
}

impl crate::curator::Curator {
    /// Most recent history rows, newest first.
    pub fn history(&self, limit: usize) -> worklog_core::Result<Vec<HistoryRecord>> {
        let db = self.store().db();
        recent(&db, limit.max(1)).map_err(|e| self.store().sql_err(e))
    }

    /// Record a single resolution made outside a pass.
    pub(crate) fn record_resolution(
        &self,
        conn: &Connection,
        agent: &str,
        stats: JsonValue,
    ) -> worklog_core::Result<()> {
        record(conn, CurationOperation::CandidateResolution, agent, &stats, 0, None)
            .map_err(|e| self.store().sql_err(e))?;
        Ok(())
    }

    /// Record a direct change to topics, relationships or the taxonomy.
    pub(crate) fn record_edit(
        &self,
        conn: &Connection,
        agent: &str,
        stats: JsonValue,
    ) -> worklog_core::Result<()> {
        record(conn, CurationOperation::ManualEdit, agent, &stats, 0, None)
            .map_err(|e| self.store().sql_err(e))?;
        Ok(())
    }
}

pub(crate) fn not_found(what: impl std::fmt::Display) -> WorklogError {
    WorklogError::NotFound(what.to_string())
}
