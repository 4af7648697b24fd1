use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use worklog_core::{
    CurationOperation, EntryTable, ItemRef, RowId, WorklogError, join_tags, now_timestamp,
    parse_tags,
};

use crate::curator::Curator;
use crate::history::{not_found, run_pass};
use crate::items::{Item, item_title, load_all};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub id: RowId,
    pub name: String,
    pub summary: Option<String>,
    pub key_terms: Vec<String>,
    pub entry_count: i64,
    pub created_at: String,
    pub updated_at: String,
    pub version: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelevanceTier {
    Low,
    Medium,
    High,
}

impl RelevanceTier {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.67 {
            RelevanceTier::High
        } else if score >= 0.34 {
            RelevanceTier::Medium
        } else {
            RelevanceTier::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RelevanceTier::Low => "low",
            RelevanceTier::Medium => "medium",
            RelevanceTier::High => "high",
        }
    }
}

impl fmt::Display for RelevanceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelevanceTier {
    type Err = WorklogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(RelevanceTier::Low),
            "medium" => Ok(RelevanceTier::Medium),
            "high" => Ok(RelevanceTier::High),
            other => Err(WorklogError::validation(
                "tier",
                format!("unknown tier '{other}' (expected high, medium or low)"),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicCandidate {
    pub item: ItemRef,
    pub title: String,
    pub score: f64,
    pub tier: RelevanceTier,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopicIndexStats {
    pub topic: String,
    pub candidates: usize,
    pub linked: usize,
    pub entry_count: i64,
}

const TITLE_BONUS: f64 = 0.25;
const SUMMARY_TITLES: usize = 5;
const SUMMARY_TAGS: usize = 5;

const TOPIC_COLUMNS: &str =
    "id, name, summary, key_terms, entry_count, created_at, updated_at, version";

fn topic_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Topic> {
    Ok(Topic {
        id: row.get(0)?,
        name: row.get(1)?,
        summary: row.get(2)?,
        key_terms: parse_tags(&row.get::<_, Option<String>>(3)?.unwrap_or_default()),
        entry_count: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        version: row.get(7)?,
    })
}

fn load_topic(conn: &Connection, id: RowId) -> rusqlite::Result<Option<Topic>> {
    conn.query_row(
        &format!("SELECT {TOPIC_COLUMNS} FROM topic_index WHERE id = ?1"),
        rusqlite::params![id],
        topic_from_row,
    )
    .optional()
}

/// The lowercased name and key terms, deduplicated.
fn search_terms(topic: &Topic) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for term in std::iter::once(&topic.name).chain(&topic.key_terms) {
        let term = term.trim().to_lowercase();
        if !term.is_empty() && !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}

/// Fraction of terms found anywhere in the item, plus a bonus for the share
/// found in the title.
fn score(item: &Item, terms: &[String]) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    let haystack = item.haystack();
    let title = item.title.to_lowercase();
    let matched = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
    let in_title = terms.iter().filter(|t| title.contains(t.as_str())).count();
    let n = terms.len() as f64;
    (matched as f64 / n + TITLE_BONUS * in_title as f64 / n).min(1.0)
}

impl Curator {
    pub fn create_topic(&self, name: &str, key_terms: &[String]) -> worklog_core::Result<Topic> {
        let name = name.trim();
        if name.is_empty() {
            return Err(WorklogError::validation("name", "must not be empty"));
        }
        self.store().transaction(|tx| {
            let now = now_timestamp();
            let id: RowId = tx
                .query_row(
                    "INSERT INTO topic_index (name, key_terms, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?3) RETURNING id",
                    rusqlite::params![name, join_tags(key_terms), now],
                    |row| row.get(0),
                )
                .map_err(|e| match self.store().sql_err(e) {
                    WorklogError::Conflict(_) => {
                        WorklogError::Conflict(format!("topic '{name}' already exists"))
                    }
                    other => other,
                })?;
            self.topic_in(tx, id)
        })
    }

    fn topic_in(&self, conn: &Connection, id: RowId) -> worklog_core::Result<Topic> {
        load_topic(conn, id)
            .map_err(|e| self.store().sql_err(e))?
            .ok_or_else(|| not_found(format!("no topic {id}")))
    }

    pub fn topic(&self, id: RowId) -> worklog_core::Result<Topic> {
        let db = self.store().db();
        self.topic_in(&db, id)
    }

    pub fn topic_by_name(&self, name: &str) -> worklog_core::Result<Topic> {
        let db = self.store().db();
        db.query_row(
            &format!("SELECT {TOPIC_COLUMNS} FROM topic_index WHERE name = ?1"),
            rusqlite::params![name.trim()],
            topic_from_row,
        )
        .optional()
        .map_err(|e| self.store().sql_err(e))?
        .ok_or_else(|| not_found(format!("no topic named '{name}'")))
    }

    pub fn topics(&self) -> worklog_core::Result<Vec<Topic>> {
        let db = self.store().db();
        let mut stmt = db
            .prepare(&format!("SELECT {TOPIC_COLUMNS} FROM topic_index ORDER BY name"))
            .map_err(|e| self.store().sql_err(e))?;
        let rows = stmt
            .query_map([], topic_from_row)
            .map_err(|e| self.store().sql_err(e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| self.store().sql_err(e))?;
        Ok(rows)
    }

    fn topic_candidates_in(
        &self,
        conn: &Connection,
        topic: &Topic,
        limit: usize,
    ) -> worklog_core::Result<Vec<TopicCandidate>> {
        let err = |e| self.store().sql_err(e);
        let terms = search_terms(topic);
        let linked: Vec<(String, RowId)> = {
            let mut stmt = conn
                .prepare("SELECT table_name, entry_id FROM topic_entries WHERE topic_id = ?1")
                .map_err(err)?;
            stmt.query_map(rusqlite::params![topic.id], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(err)?
        };

        let mut candidates: Vec<TopicCandidate> = load_all(conn)
            .map_err(err)?
            .into_iter()
            .filter(|item| {
                !linked
                    .iter()
                    .any(|(t, id)| t == item.item.table.as_str() && *id == item.item.id)
            })
            .filter_map(|item| {
                let score = score(&item, &terms);
                (score > 0.0).then(|| TopicCandidate {
                    item: item.item,
                    title: item.title,
                    score,
                    tier: RelevanceTier::from_score(score),
                })
            })
            .collect();
        candidates.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.item.table.as_str().cmp(b.item.table.as_str()))
                .then_with(|| a.item.id.cmp(&b.item.id))
        });
        candidates.truncate(limit);
        Ok(candidates)
    }

    /// Unlinked rows mentioning the topic's name or key terms, best first.
    pub fn topic_candidates(
        &self,
        topic_id: RowId,
        limit: usize,
    ) -> worklog_core::Result<Vec<TopicCandidate>> {
        let db = self.store().db();
        let topic = self.topic_in(&db, topic_id)?;
        self.topic_candidates_in(&db, &topic, limit)
    }

    pub(crate) fn link_in(
        &self,
        conn: &Connection,
        topic_id: RowId,
        item: ItemRef,
        relevance: f64,
        agent: &str,
    ) -> worklog_core::Result<()> {
        let err = |e| self.store().sql_err(e);
        self.topic_in(conn, topic_id)?;
        if item_title(conn, item).map_err(err)?.is_none() {
            return Err(not_found(format!("no row {item}")));
        }
        conn.execute(
            "INSERT INTO topic_entries (topic_id, table_name, entry_id, relevance_score, added_by, added_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT(topic_id, table_name, entry_id) \
             DO UPDATE SET relevance_score = excluded.relevance_score",
            rusqlite::params![
                topic_id,
                item.table.as_str(),
                item.id,
                relevance.clamp(0.0, 1.0),
                agent,
                now_timestamp()
            ],
        )
        .map_err(err)?;
        conn.execute(
            "UPDATE topic_index SET \
             entry_count = (SELECT COUNT(*) FROM topic_entries WHERE topic_id = ?1), \
             updated_at = ?2, version = version + 1 WHERE id = ?1",
            rusqlite::params![topic_id, now_timestamp()],
        )
        .map_err(err)?;
        Ok(())
    }

    /// Link a row to a topic. Linking again only updates the relevance.
    pub fn link_entry(
        &self,
        topic_id: RowId,
        item: ItemRef,
        relevance: f64,
        agent: &str,
    ) -> worklog_core::Result<()> {
        self.store().transaction(|tx| {
            self.link_in(tx, topic_id, item, relevance, agent)?;
            self.record_edit(
                tx,
                agent,
                json!({
                    "kind": "topic_link",
                    "topic_id": topic_id,
                    "item": item.to_string(),
                    "relevance": relevance,
                }),
            )
        })
    }

    fn regenerate_in(&self, conn: &Connection, topic_id: RowId) -> worklog_core::Result<Topic> {
        let err = |e| self.store().sql_err(e);
        self.topic_in(conn, topic_id)?;
        let links: Vec<(String, RowId)> = {
            let mut stmt = conn
                .prepare(
                    "SELECT table_name, entry_id FROM topic_entries WHERE topic_id = ?1 \
                     ORDER BY relevance_score DESC, id",
                )
                .map_err(err)?;
            stmt.query_map(rusqlite::params![topic_id], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(err)?
        };

        let mut titles = Vec::new();
        let mut tag_counts: HashMap<String, usize> = HashMap::new();
        for (table, id) in &links {
            let table: EntryTable = table.parse()?;
            let item = ItemRef::new(table, *id);
            if let Some(title) = item_title(conn, item).map_err(err)? {
                if titles.len() < SUMMARY_TITLES {
                    titles.push(title);
                }
            }
            let tags: Option<String> = conn
                .query_row(
                    &format!("SELECT tags FROM {} WHERE id = ?1", table.as_str()),
                    rusqlite::params![id],
                    |row| row.get::<_, Option<String>>(0),
                )
                .optional()
                .map_err(err)?
                .flatten();
            for tag in parse_tags(&tags.unwrap_or_default()) {
                *tag_counts.entry(tag).or_default() += 1;
            }
        }
        let mut tags: Vec<(String, usize)> = tag_counts.into_iter().collect();
        tags.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let mut summary = format!("{} linked item(s).", links.len());
        if !tags.is_empty() {
            let top: Vec<&str> = tags.iter().take(SUMMARY_TAGS).map(|(t, _)| t.as_str()).collect();
            summary.push_str(&format!(" Top tags: {}.", top.join(", ")));
        }
        if !titles.is_empty() {
            summary.push_str(&format!(" Includes: {}.", titles.join("; ")));
        }

        conn.execute(
            "UPDATE topic_index SET summary = ?1, entry_count = ?2, updated_at = ?3, \
             version = version + 1 WHERE id = ?4",
            rusqlite::params![summary, links.len() as i64, now_timestamp(), topic_id],
        )
        .map_err(err)?;
        self.topic_in(conn, topic_id)
    }

    /// Rebuild the summary from the linked rows. The same links always give
    /// the same summary.
    pub fn regenerate_summary(&self, topic_id: RowId) -> worklog_core::Result<Topic> {
        self.store().transaction(|tx| self.regenerate_in(tx, topic_id))
    }

    /// Link every candidate at or above `min_tier`, then refresh the summary.
    pub fn run_topic_indexing(
        &self,
        agent: &str,
        topic_id: RowId,
        min_tier: RelevanceTier,
    ) -> worklog_core::Result<TopicIndexStats> {
        run_pass(self.store(), CurationOperation::TopicIndexing, agent, || {
            self.store().transaction(|tx| {
                let topic = self.topic_in(tx, topic_id)?;
                let candidates = self.topic_candidates_in(tx, &topic, usize::MAX)?;
                let mut stats = TopicIndexStats {
                    topic: topic.name.clone(),
                    candidates: candidates.len(),
                    ..Default::default()
                };
                for candidate in candidates.iter().filter(|c| c.tier >= min_tier) {
                    self.link_in(tx, topic_id, candidate.item, candidate.score, agent)?;
                    debug!(topic = %topic.name, item = %candidate.item, score = candidate.score, "linked");
                    stats.linked += 1;
                }
                stats.entry_count = self.regenerate_in(tx, topic_id)?.entry_count;
                Ok(stats)
            })
        })
    }
}
