use serde::{Deserialize, Serialize};
use worklog_core::{ResearchStatus, RowId, WorklogError, join_tags, now_timestamp, parse_tags};

use crate::statement::Statement;
use crate::store::WorklogStore;

/// A processed external source (article, video, paper, ...).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewResearch {
    pub source_type: String,
    pub source_url: Option<String>,
    pub title: String,
    pub source_id: Option<String>,
    pub author: Option<String>,
    pub raw_content: Option<String>,
    pub summary: Option<String>,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub actionable_items: Vec<String>,
    pub relevance_score: Option<i64>,
    pub relevance_notes: Option<String>,
    #[serde(default)]
    pub applicable_to: Vec<String>,
    pub duration_seconds: Option<i64>,
    pub word_count: Option<i64>,
    pub processed_by: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl NewResearch {
    pub fn statement(&self) -> worklog_core::Result<Statement> {
        if self.source_type.trim().is_empty() {
            return Err(WorklogError::validation("source_type", "must not be empty"));
        }
        if self.title.trim().is_empty() {
            return Err(WorklogError::validation("title", "must not be empty"));
        }
        let list = |items: &[String]| -> worklog_core::Result<Option<String>> {
            if items.is_empty() {
                Ok(None)
            } else {
                Ok(Some(serde_json::to_string(items)?))
            }
        };
        Ok(Statement::new(
            "INSERT INTO research (source_type, source_url, title, created_at, updated_at, \
             source_id, author, raw_content, summary, key_points, actionable_items, \
             relevance_score, relevance_notes, applicable_to, duration_seconds, word_count, \
             processed_by, tags, status) \
             VALUES (?1, ?2, ?3, ?4, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, \
             ?16, ?17, 'new') RETURNING id",
        )
        .bind(self.source_type.trim())
        .bind(self.source_url.as_deref())
        .bind(self.title.trim())
        .bind(now_timestamp())
        .bind(self.source_id.as_deref())
        .bind(self.author.as_deref())
        .bind(self.raw_content.as_deref())
        .bind(self.summary.as_deref())
        .bind(list(&self.key_points)?)
        .bind(list(&self.actionable_items)?)
        .bind(self.relevance_score.unwrap_or(5).clamp(1, 10))
        .bind(self.relevance_notes.as_deref())
        .bind(join_tags(&self.applicable_to))
        .bind(self.duration_seconds)
        .bind(self.word_count)
        .bind(self.processed_by.as_deref())
        .bind(join_tags(&self.tags)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchRecord {
    pub id: RowId,
    pub source_type: String,
    pub source_url: Option<String>,
    pub title: String,
    pub summary: Option<String>,
    pub key_points: Vec<String>,
    pub actionable_items: Vec<String>,
    pub relevance_score: i64,
    pub tags: Vec<String>,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
    pub version: i64,
}

const RESEARCH_COLUMNS: &str = "id, source_type, source_url, title, summary, key_points, \
     actionable_items, relevance_score, tags, status, created_at, updated_at, version";

/// Stored lists are JSON arrays; older rows may hold a plain string.
fn json_list(raw: Option<String>) -> Vec<String> {
    match raw {
        None => Vec::new(),
        Some(s) => serde_json::from_str(&s).unwrap_or_else(|_| vec![s]),
    }
}

impl ResearchRecord {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            source_type: row.get(1)?,
            source_url: row.get(2)?,
            title: row.get(3)?,
            summary: row.get(4)?,
            key_points: json_list(row.get(5)?),
            actionable_items: json_list(row.get(6)?),
            relevance_score: row.get(7)?,
            tags: parse_tags(&row.get::<_, Option<String>>(8)?.unwrap_or_default()),
            status: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
            version: row.get(12)?,
        })
    }
}

impl WorklogStore {
    /// Store a research item. A repeated `source_url` is a conflict.
    pub fn store_research(&self, item: &NewResearch) -> worklog_core::Result<RowId> {
        self.insert(&item.statement()?).map_err(|e| match e {
            WorklogError::Conflict(_) => WorklogError::Conflict(format!(
                "research source '{}' already stored",
                item.source_url.as_deref().unwrap_or(&item.title)
            )),
            other => other,
        })
    }

    pub fn get_research(&self, id: RowId) -> worklog_core::Result<ResearchRecord> {
        let db = self.db();
        db.query_row(
            &format!("SELECT {RESEARCH_COLUMNS} FROM research WHERE id = ?1"),
            rusqlite::params![id],
            ResearchRecord::from_row,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                WorklogError::NotFound(format!("no research item with id {id}"))
            }
            other => self.sql_err(other),
        })
    }

    pub fn set_research_status(
        &self,
        id: RowId,
        status: ResearchStatus,
        expected_version: i64,
    ) -> worklog_core::Result<ResearchRecord> {
        let updated = Statement::new(
            "UPDATE research SET status = ?1, updated_at = ?2, version = version + 1 \
             WHERE id = ?3 AND version = ?4 RETURNING id",
        )
        .bind(status.as_str())
        .bind(now_timestamp())
        .bind(id)
        .bind(expected_version);
        if self.execute(&updated)?.is_none() {
            let current = self.get_research(id)?;
            return Err(WorklogError::Conflict(format!(
                "research {id} is at version {}, expected {expected_version}",
                current.version
            )));
        }
        self.get_research(id)
    }
}
