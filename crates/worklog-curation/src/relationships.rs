use std::collections::HashSet;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use worklog_core::{
    CurationOperation, EntryTable, ItemRef, RelationshipType, RowId, WorklogError, now_timestamp,
};

use crate::curator::Curator;
use crate::history::{not_found, run_pass};
use crate::items::{item_title, load_items};

/// A typed edge between two rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub id: RowId,
    pub source: ItemRef,
    pub target: ItemRef,
    pub relationship_type: RelationshipType,
    pub confidence: f64,
    pub created_by: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryStats {
    pub items: usize,
    pub related: usize,
}

/// Pairs sharing at least this many tags are linked by discovery.
const MIN_SHARED_TAGS: usize = 2;

pub(crate) fn insert_relationship(
    conn: &Connection,
    source: ItemRef,
    target: ItemRef,
    kind: RelationshipType,
    confidence: f64,
    agent: &str,
) -> rusqlite::Result<RowId> {
    conn.query_row(
        "INSERT INTO relationships \
         (source_table, source_id, target_table, target_id, relationship_type, confidence, created_by, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
         ON CONFLICT(source_table, source_id, target_table, target_id, relationship_type) \
         DO UPDATE SET confidence = MAX(relationships.confidence, excluded.confidence) \
         RETURNING id",
        rusqlite::params![
            source.table.as_str(),
            source.id,
            target.table.as_str(),
            target.id,
            kind.as_str(),
            confidence.clamp(0.0, 1.0),
            agent,
            now_timestamp(),
        ],
        |row| row.get(0),
    )
}

/// Parse a TEXT column into one of the closed enums.
pub(crate) fn text_col<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = WorklogError>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn load_for(conn: &Connection, item: ItemRef) -> rusqlite::Result<Vec<Relationship>> {
    let mut stmt = conn.prepare(
        "SELECT id, source_table, source_id, target_table, target_id, relationship_type, \
         confidence, created_by, created_at FROM relationships \
         WHERE (source_table = ?1 AND source_id = ?2) OR (target_table = ?1 AND target_id = ?2) \
         ORDER BY id",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![item.table.as_str(), item.id], |row| {
            Ok(Relationship {
                id: row.get(0)?,
                source: ItemRef::new(text_col(row, 1)?, row.get(2)?),
                target: ItemRef::new(text_col(row, 3)?, row.get(4)?),
                relationship_type: text_col(row, 5)?,
                confidence: row.get(6)?,
                created_by: row.get(7)?,
                created_at: row.get(8)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

impl Curator {
    pub(crate) fn relate_in(
        &self,
        conn: &Connection,
        source: ItemRef,
        target: ItemRef,
        kind: RelationshipType,
        confidence: f64,
        agent: &str,
    ) -> worklog_core::Result<RowId> {
        if source == target {
            return Err(WorklogError::validation("target", "an item cannot relate to itself"));
        }
        for item in [source, target] {
            if item_title(conn, item).map_err(|e| self.store().sql_err(e))?.is_none() {
                return Err(not_found(format!("no row {item}")));
            }
        }
        insert_relationship(conn, source, target, kind, confidence, agent)
            .map_err(|e| self.store().sql_err(e))
    }

    /// Link two rows. Relating the same pair with the same type again returns
    /// the existing edge.
    pub fn relate(
        &self,
        source: ItemRef,
        target: ItemRef,
        kind: RelationshipType,
        confidence: f64,
        agent: &str,
    ) -> worklog_core::Result<RowId> {
        self.store().transaction(|tx| {
            let id = self.relate_in(tx, source, target, kind, confidence, agent)?;
            self.record_edit(
                tx,
                agent,
                json!({
                    "kind": "relationship",
                    "id": id,
                    "source": source.to_string(),
                    "target": target.to_string(),
                    "type": kind,
                    "confidence": confidence,
                }),
            )?;
            Ok(id)
        })
    }

    /// Every edge touching `item`, in either direction.
    pub fn relationships_for(&self, item: ItemRef) -> worklog_core::Result<Vec<Relationship>> {
        let db = self.store().db();
        load_for(&db, item).map_err(|e| self.store().sql_err(e))
    }

    /// Link memories and knowledge items that share tags with `relates_to`,
    /// weighted by tag overlap. Pairs already linked in any way are left alone.
    pub fn run_relationship_discovery(&self, agent: &str) -> worklog_core::Result<DiscoveryStats> {
        run_pass(self.store(), CurationOperation::RelationshipDiscovery, agent, || {
            self.store().transaction(|tx| {
                let err = |e| self.store().sql_err(e);
                let mut items = load_items(tx, EntryTable::Memories).map_err(err)?;
                items.extend(load_items(tx, EntryTable::KnowledgeBase).map_err(err)?);

                let linked: HashSet<(String, RowId, String, RowId)> = {
                    let mut stmt = tx
                        .prepare("SELECT source_table, source_id, target_table, target_id FROM relationships")
                        .map_err(err)?;
                    stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))
                        .map_err(err)?
                        .collect::<rusqlite::Result<HashSet<_>>>()
                        .map_err(err)?
                };
                let is_linked = |a: ItemRef, b: ItemRef| {
                    let key = |x: ItemRef, y: ItemRef| {
                        (x.table.as_str().to_string(), x.id, y.table.as_str().to_string(), y.id)
                    };
                    linked.contains(&key(a, b)) || linked.contains(&key(b, a))
                };

                let tag_sets: Vec<HashSet<String>> = items
                    .iter()
                    .map(|i| i.tags.iter().map(|t| t.to_lowercase()).collect())
                    .collect();
                let mut stats = DiscoveryStats {
                    items: items.len(),
                    related: 0,
                };
                for i in 0..items.len() {
                    for j in i + 1..items.len() {
                        let shared = tag_sets[i].intersection(&tag_sets[j]).count();
                        if shared < MIN_SHARED_TAGS {
                            continue;
                        }
                        let (a, b) = (items[i].item, items[j].item);
                        if is_linked(a, b) {
                            continue;
                        }
                        let union = tag_sets[i].len() + tag_sets[j].len() - shared;
                        let confidence = shared as f64 / union as f64;
                        insert_relationship(tx, a, b, RelationshipType::RelatesTo, confidence, agent)
                            .map_err(err)?;
                        debug!(%a, %b, confidence, "related by shared tags");
                        stats.related += 1;
                    }
                }
                Ok(stats)
            })
        })
    }
}
