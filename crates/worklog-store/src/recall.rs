use serde::{Deserialize, Serialize};
use worklog_core::{MemoryType, format_timestamp};

use crate::entries::EntryRecord;
use crate::knowledge::{KNOWLEDGE_COLUMNS, KnowledgeRecord};
use crate::memories::{MEMORY_COLUMNS, MemoryRecord};
use crate::statement::SqlValue;
use crate::store::WorklogStore;

/// Days of work-log history considered recent.
pub const RECENT_DAYS: i64 = 7;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallRequest {
    pub topic: String,
    pub memory_types: Vec<MemoryType>,
    pub min_importance: i64,
    pub include_recent: bool,
    pub limit: usize,
}

impl RecallRequest {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            memory_types: vec![MemoryType::Fact, MemoryType::Context],
            min_importance: 5,
            include_recent: true,
            limit: 15,
        }
    }
}

/// Context loaded at the start of a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecallContext {
    pub topic: String,
    pub memories: Vec<MemoryRecord>,
    pub knowledge: Vec<KnowledgeRecord>,
    pub recent_work: Vec<EntryRecord>,
}

impl RecallContext {
    pub fn is_empty(&self) -> bool {
        self.memories.is_empty() && self.knowledge.is_empty() && self.recent_work.is_empty()
    }
}

impl WorklogStore {
    /// Memories, knowledge and recent entries relevant to a topic. Knowledge and
    /// recent work each get half the limit. An empty topic matches everything.
    pub fn recall(&self, request: &RecallRequest) -> worklog_core::Result<RecallContext> {
        let pattern = format!("%{}%", request.topic.trim());
        let types = if request.memory_types.is_empty() {
            MemoryType::ALL.to_vec()
        } else {
            request.memory_types.clone()
        };
        let half = (request.limit / 2).max(1) as i64;
        let db = self.db();

        let placeholders = (0..types.len())
            .map(|i| format!("?{}", i + 4))
            .collect::<Vec<_>>()
            .join(", ");
        let memory_sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memories \
             WHERE importance >= ?1 AND status != 'archived' \
             AND (content LIKE ?2 OR summary LIKE ?2 OR key LIKE ?2 OR tags LIKE ?2) \
             AND memory_type IN ({placeholders}) \
             ORDER BY importance DESC, last_accessed DESC LIMIT ?3"
        );
        let mut params: Vec<SqlValue> = vec![
            request.min_importance.into(),
            pattern.as_str().into(),
            (request.limit as i64).into(),
        ];
        params.extend(types.iter().map(|t| SqlValue::from(t.as_str())));
        let memories = {
            let mut stmt = db.prepare(&memory_sql).map_err(|e| self.sql_err(e))?;
            stmt.query_map(
                rusqlite::params_from_iter(params.iter()),
                MemoryRecord::from_row,
            )
            .map_err(|e| self.sql_err(e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| self.sql_err(e))?
        };

        let knowledge = {
            let mut stmt = db
                .prepare(&format!(
                    "SELECT {KNOWLEDGE_COLUMNS} FROM knowledge_base \
                     WHERE title LIKE ?1 OR content LIKE ?1 OR tags LIKE ?1 \
                     ORDER BY updated_at DESC LIMIT ?2"
                ))
                .map_err(|e| self.sql_err(e))?;
            stmt.query_map(rusqlite::params![pattern, half], KnowledgeRecord::from_row)
                .map_err(|e| self.sql_err(e))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| self.sql_err(e))?
        };

        let recent_work = if request.include_recent {
            let cutoff = format_timestamp(chrono::Utc::now() - chrono::Duration::days(RECENT_DAYS));
            let mut stmt = db
                .prepare(
                    "SELECT id, timestamp, agent, task_type, title, details, decision_rationale, \
                     outcome, tags, related_files FROM entries \
                     WHERE timestamp > ?1 AND (title LIKE ?2 OR tags LIKE ?2) \
                     ORDER BY timestamp DESC LIMIT ?3",
                )
                .map_err(|e| self.sql_err(e))?;
            stmt.query_map(rusqlite::params![cutoff, pattern, half], EntryRecord::from_row)
                .map_err(|e| self.sql_err(e))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| self.sql_err(e))?
        } else {
            Vec::new()
        };

        Ok(RecallContext {
            topic: request.topic.clone(),
            memories,
            knowledge,
            recent_work,
        })
    }
}
