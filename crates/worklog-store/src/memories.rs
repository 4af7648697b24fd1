use serde::{Deserialize, Serialize};
use worklog_core::{
    MemoryStatus, MemoryType, RowId, WorklogError, join_tags, now_timestamp, parse_tags,
};

use crate::statement::Statement;
use crate::store::WorklogStore;

/// What to do when a memory with the same key already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Fail with a conflict; use `update_memory` to change an existing memory.
    #[default]
    Reject,
    /// Replace the content fields, keeping status, access count and creation time.
    Overwrite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMemory {
    pub key: String,
    pub content: String,
    pub summary: Option<String>,
    pub memory_type: MemoryType,
    pub importance: i64,
    pub source_agent: Option<String>,
    pub system: Option<String>,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl NewMemory {
    pub fn new(key: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            content: content.into(),
            summary: None,
            memory_type: MemoryType::Fact,
            importance: 5,
            source_agent: None,
            system: None,
            entities: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn statement(&self, policy: ConflictPolicy) -> worklog_core::Result<Statement> {
        if self.key.trim().is_empty() {
            return Err(WorklogError::validation("key", "must not be empty"));
        }
        if self.content.trim().is_empty() {
            return Err(WorklogError::validation("content", "must not be empty"));
        }
        let mut sql = String::from(
            "INSERT INTO memories (key, content, summary, memory_type, status, importance, \
             source_agent, system, entities, tags, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, 'staging', ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
        );
        if policy == ConflictPolicy::Overwrite {
            sql.push_str(
                " ON CONFLICT(key) DO UPDATE SET \
                 content = excluded.content, summary = excluded.summary, \
                 memory_type = excluded.memory_type, importance = excluded.importance, \
                 entities = excluded.entities, tags = excluded.tags, \
                 updated_at = excluded.updated_at, version = memories.version + 1",
            );
        }
        sql.push_str(" RETURNING id");

        Ok(Statement::new(sql)
            .bind(self.key.trim())
            .bind(self.content.as_str())
            .bind(self.summary.as_deref())
            .bind(self.memory_type.as_str())
            .bind(clamp_importance(self.importance))
            .bind(self.source_agent.as_deref())
            .bind(self.system.as_deref())
            .bind(join_tags(&self.entities))
            .bind(join_tags(&self.tags))
            .bind(now_timestamp()))
    }
}

pub fn clamp_importance(importance: i64) -> i64 {
    importance.clamp(1, 10)
}

/// Fields a memory update may change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryPatch {
    pub content: Option<String>,
    pub summary: Option<String>,
    pub importance: Option<i64>,
    pub tags: Option<Vec<String>>,
    pub status: Option<MemoryStatus>,
}

impl MemoryPatch {
    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.summary.is_none()
            && self.importance.is_none()
            && self.tags.is_none()
            && self.status.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: RowId,
    pub key: String,
    pub content: String,
    pub summary: Option<String>,
    pub memory_type: String,
    pub status: MemoryStatus,
    pub importance: i64,
    pub access_count: i64,
    pub source_agent: Option<String>,
    pub system: Option<String>,
    pub entities: Vec<String>,
    pub tags: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
    pub last_accessed: Option<String>,
    pub promoted_at: Option<String>,
    pub version: i64,
}

pub const MEMORY_COLUMNS: &str = "id, key, content, summary, memory_type, status, importance, \
     access_count, source_agent, system, entities, tags, created_at, updated_at, \
     last_accessed, promoted_at, version";

impl MemoryRecord {
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let status: String = row.get(5)?;
        let status = status.parse::<MemoryStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(Self {
            id: row.get(0)?,
            key: row.get(1)?,
            content: row.get(2)?,
            summary: row.get(3)?,
            memory_type: row.get(4)?,
            status,
            importance: row.get(6)?,
            access_count: row.get(7)?,
            source_agent: row.get(8)?,
            system: row.get(9)?,
            entities: parse_tags(&row.get::<_, Option<String>>(10)?.unwrap_or_default()),
            tags: parse_tags(&row.get::<_, Option<String>>(11)?.unwrap_or_default()),
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
            last_accessed: row.get(14)?,
            promoted_at: row.get(15)?,
            version: row.get(16)?,
        })
    }
}

/// Select a memory by a single-column predicate, e.g. `"key = ?1"`.
pub fn load_memory(
    conn: &rusqlite::Connection,
    predicate: &str,
    param: impl rusqlite::ToSql,
) -> rusqlite::Result<Option<MemoryRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MEMORY_COLUMNS} FROM memories WHERE {predicate}"
    ))?;
    let mut rows = stmt.query(rusqlite::params![param])?;
    let record = match rows.next()? {
        Some(row) => Some(MemoryRecord::from_row(row)?),
        None => None,
    };
    Ok(record)
}

impl WorklogStore {
    /// Store a memory. Keys are unique; see [`ConflictPolicy`].
    pub fn upsert_memory(
        &self,
        memory: &NewMemory,
        policy: ConflictPolicy,
    ) -> worklog_core::Result<RowId> {
        self.insert(&memory.statement(policy)?)
            .map_err(|e| key_conflict(&memory.key, e))
    }

    /// Fetch a memory by key, counting the access.
    pub fn get_memory(&self, key: &str) -> worklog_core::Result<MemoryRecord> {
        let db = self.db();
        db.execute(
            "UPDATE memories SET access_count = access_count + 1, last_accessed = ?1 \
             WHERE key = ?2",
            rusqlite::params![now_timestamp(), key],
        )
        .map_err(|e| self.sql_err(e))?;
        load_memory(&db, "key = ?1", key)
            .map_err(|e| self.sql_err(e))?
            .ok_or_else(|| WorklogError::NotFound(format!("no memory with key '{key}'")))
    }

    /// Fetch a memory by id without touching its access statistics.
    pub fn memory_by_id(&self, id: RowId) -> worklog_core::Result<MemoryRecord> {
        let db = self.db();
        load_memory(&db, "id = ?1", id)
            .map_err(|e| self.sql_err(e))?
            .ok_or_else(|| WorklogError::NotFound(format!("no memory with id {id}")))
    }

    /// Update an existing memory. A status change must be a legal transition
    /// and is written to promotion history. With `expected_version`, the
    /// update fails with a conflict if the memory changed in between.
    pub fn update_memory(
        &self,
        key: &str,
        patch: &MemoryPatch,
        expected_version: Option<i64>,
        agent: Option<&str>,
    ) -> worklog_core::Result<MemoryRecord> {
        if patch.is_empty() {
            return Err(WorklogError::validation("patch", "nothing to update"));
        }
        self.transaction(|tx| {
            let current = load_memory(tx, "key = ?1", key)
                .map_err(|e| self.sql_err(e))?
                .ok_or_else(|| WorklogError::NotFound(format!("no memory with key '{key}'")))?;

            if let Some(expected) = expected_version {
                if expected != current.version {
                    return Err(WorklogError::Conflict(format!(
                        "memory '{key}' is at version {}, expected {expected}",
                        current.version
                    )));
                }
            }

            let new_status = patch.status.filter(|s| *s != current.status);
            if let Some(to) = new_status {
                if !current.status.can_transition_to(to) {
                    return Err(WorklogError::InvalidTransition {
                        from: current.status.to_string(),
                        to: to.to_string(),
                    });
                }
            }

            let now = now_timestamp();
            let updated = Statement::new(
                "UPDATE memories SET \
                 content = COALESCE(?1, content), summary = COALESCE(?2, summary), \
                 importance = COALESCE(?3, importance), tags = COALESCE(?4, tags), \
                 status = COALESCE(?5, status), \
                 promoted_at = CASE WHEN ?5 = 'promoted' THEN ?6 ELSE promoted_at END, \
                 updated_at = ?6, version = version + 1 \
                 WHERE id = ?7 AND version = ?8 RETURNING id",
            )
            .bind(patch.content.as_deref())
            .bind(patch.summary.as_deref())
            .bind(patch.importance.map(clamp_importance))
            .bind(patch.tags.as_ref().map(|t| join_tags(t)))
            .bind(new_status.map(|s| s.as_str()))
            .bind(now.as_str())
            .bind(current.id)
            .bind(current.version)
            .execute(tx)
            .map_err(|e| self.sql_err(e))?;

            if updated.is_none() {
                return Err(WorklogError::Conflict(format!(
                    "memory '{key}' changed during update"
                )));
            }

            if let Some(to) = new_status {
                tx.execute(
                    "INSERT INTO promotion_history (memory_id, from_status, to_status, reason, agent, created_at) \
                     VALUES (?1, ?2, ?3, 'manual update', ?4, ?5)",
                    rusqlite::params![current.id, current.status.as_str(), to.as_str(), agent, now],
                )
                .map_err(|e| self.sql_err(e))?;
            }

            load_memory(tx, "id = ?1", current.id)
                .map_err(|e| self.sql_err(e))?
                .ok_or_else(|| WorklogError::NotFound(format!("no memory with key '{key}'")))
        })
    }
}

/// Give a unique-key violation on memories an actionable message.
pub fn key_conflict(key: &str, e: WorklogError) -> WorklogError {
    match e {
        WorklogError::Conflict(_) => WorklogError::Conflict(format!(
            "memory key '{key}' already exists; use update_memory or the overwrite policy"
        )),
        other => other,
    }
}
