use serde::{Deserialize, Serialize};
use worklog_core::{KnowledgeCategory, RowId, WorklogError, join_tags, now_timestamp, parse_tags};

use crate::statement::Statement;
use crate::store::WorklogStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewKnowledge {
    pub category: KnowledgeCategory,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub source_agent: Option<String>,
    #[serde(default)]
    pub is_protocol: bool,
    pub system: Option<String>,
    pub source_url: Option<String>,
}

impl NewKnowledge {
    pub fn new(
        category: KnowledgeCategory,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            category,
            title: title.into(),
            content: content.into(),
            tags: Vec::new(),
            source_agent: None,
            is_protocol: false,
            system: None,
            source_url: None,
        }
    }

    pub fn statement(&self) -> worklog_core::Result<Statement> {
        if self.title.trim().is_empty() {
            return Err(WorklogError::validation("title", "must not be empty"));
        }
        if self.content.trim().is_empty() {
            return Err(WorklogError::validation("content", "must not be empty"));
        }
        let now = now_timestamp();
        Ok(Statement::new(
            "INSERT INTO knowledge_base (created_at, updated_at, category, title, content, \
             tags, source_agent, is_protocol, system, source_url) \
             VALUES (?1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, COALESCE(?8, 'shared'), ?9) RETURNING id",
        )
        .bind(now)
        .bind(self.category.as_str())
        .bind(self.title.trim())
        .bind(self.content.as_str())
        .bind(join_tags(&self.tags))
        .bind(self.source_agent.as_deref())
        .bind(self.is_protocol)
        .bind(self.system.as_deref())
        .bind(self.source_url.as_deref()))
    }
}

/// Fields a knowledge update may change. `None` leaves the column as is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgePatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub is_protocol: Option<bool>,
    pub source_url: Option<String>,
}

impl KnowledgePatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.content.is_none()
            && self.tags.is_none()
            && self.is_protocol.is_none()
            && self.source_url.is_none()
    }

    /// Guarded update: matches nothing once `expected_version` is stale.
    pub fn statement(&self, id: RowId, expected_version: i64) -> Statement {
        Statement::new(
            "UPDATE knowledge_base SET \
             title = COALESCE(?1, title), content = COALESCE(?2, content), \
             tags = COALESCE(?3, tags), is_protocol = COALESCE(?4, is_protocol), \
             source_url = COALESCE(?5, source_url), \
             updated_at = ?6, version = version + 1 \
             WHERE id = ?7 AND version = ?8 RETURNING id",
        )
        .bind(self.title.as_deref().map(str::trim))
        .bind(self.content.as_deref())
        .bind(self.tags.as_ref().map(|t| join_tags(t)))
        .bind(self.is_protocol)
        .bind(self.source_url.as_deref())
        .bind(now_timestamp())
        .bind(id)
        .bind(expected_version)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeRecord {
    pub id: RowId,
    pub created_at: String,
    pub updated_at: String,
    pub category: String,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub source_agent: Option<String>,
    pub is_protocol: bool,
    pub version: i64,
    pub system: Option<String>,
    pub source_url: Option<String>,
}

pub(crate) const KNOWLEDGE_COLUMNS: &str = "id, created_at, updated_at, category, title, content, \
                                            tags, source_agent, is_protocol, version, system, source_url";

impl KnowledgeRecord {
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            created_at: row.get(1)?,
            updated_at: row.get(2)?,
            category: row.get(3)?,
            title: row.get(4)?,
            content: row.get(5)?,
            tags: parse_tags(&row.get::<_, Option<String>>(6)?.unwrap_or_default()),
            source_agent: row.get(7)?,
            is_protocol: row.get::<_, i64>(8)? != 0,
            version: row.get(9)?,
            system: row.get(10)?,
            source_url: row.get(11)?,
        })
    }
}

impl WorklogStore {
    /// Store a knowledge item. A second item with the same category and title
    /// is a conflict.
    pub fn store_knowledge(&self, item: &NewKnowledge) -> worklog_core::Result<RowId> {
        self.insert(&item.statement()?).map_err(|e| match e {
            WorklogError::Conflict(_) => WorklogError::Conflict(format!(
                "knowledge '{}' already exists in {}",
                item.title.trim(),
                item.category
            )),
            other => other,
        })
    }

    pub fn get_knowledge(&self, id: RowId) -> worklog_core::Result<KnowledgeRecord> {
        let db = self.db();
        db.query_row(
            &format!("SELECT {KNOWLEDGE_COLUMNS} FROM knowledge_base WHERE id = ?1"),
            rusqlite::params![id],
            KnowledgeRecord::from_row,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                WorklogError::NotFound(format!("no knowledge item with id {id}"))
            }
            other => self.sql_err(other),
        })
    }

    /// Apply a patch if the item is still at `expected_version`.
    pub fn update_knowledge(
        &self,
        id: RowId,
        patch: &KnowledgePatch,
        expected_version: i64,
    ) -> worklog_core::Result<KnowledgeRecord> {
        if patch.is_empty() {
            return Err(WorklogError::validation("patch", "nothing to update"));
        }
        if self.execute(&patch.statement(id, expected_version))?.is_none() {
            let current = self.get_knowledge(id)?;
            return Err(WorklogError::Conflict(format!(
                "knowledge {id} is at version {}, expected {expected_version}",
                current.version
            )));
        }
        self.get_knowledge(id)
    }
}
