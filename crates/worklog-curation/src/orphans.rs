use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use worklog_core::{
    CurationOperation, EntryTable, ItemRef, MemoryStatus, RelationshipType, RowId, WorklogError,
};
use worklog_store::memories::load_memory;

use crate::curator::Curator;
use crate::history::{not_found, run_pass};
use crate::lease::{self, LeaseKind};

/// An important row with no topic link and no relationship edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrphanItem {
    pub item: ItemRef,
    pub title: String,
    pub importance: Option<i64>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrphanReport {
    pub memories: Vec<OrphanItem>,
    pub knowledge: Vec<OrphanItem>,
}

impl OrphanReport {
    pub fn len(&self) -> usize {
        self.memories.len() + self.knowledge.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, item: ItemRef) -> bool {
        self.memories
            .iter()
            .chain(&self.knowledge)
            .any(|o| o.item == item)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanDecision {
    LinkTopic { topic_id: RowId, relevance: f64 },
    Relate { target: ItemRef, kind: RelationshipType },
    /// Staging memories only.
    Archive,
    Skip,
}

fn unlinked(table: &str) -> String {
    format!(
        "NOT EXISTS (SELECT 1 FROM topic_entries te \
             WHERE te.table_name = '{table}' AND te.entry_id = t.id) \
         AND NOT EXISTS (SELECT 1 FROM relationships r \
             WHERE (r.source_table = '{table}' AND r.source_id = t.id) \
                OR (r.target_table = '{table}' AND r.target_id = t.id))"
    )
}

fn find(conn: &Connection, min_importance: i64) -> rusqlite::Result<OrphanReport> {
    let mut report = OrphanReport::default();

    let mut stmt = conn.prepare(&format!(
        "SELECT t.id, COALESCE(t.summary, t.key), t.importance, t.status FROM memories t \
         WHERE t.status != 'archived' AND t.importance >= ?1 AND {} \
         ORDER BY t.importance DESC, t.id",
        unlinked("memories")
    ))?;
    report.memories = stmt
        .query_map(rusqlite::params![min_importance], |row| {
            Ok(OrphanItem {
                item: ItemRef::new(EntryTable::Memories, row.get(0)?),
                title: row.get(1)?,
                importance: row.get(2)?,
                status: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare(&format!(
        "SELECT t.id, t.title FROM knowledge_base t WHERE {} ORDER BY t.id",
        unlinked("knowledge_base")
    ))?;
    report.knowledge = stmt
        .query_map([], |row| {
            Ok(OrphanItem {
                item: ItemRef::new(EntryTable::KnowledgeBase, row.get(0)?),
                title: row.get(1)?,
                importance: None,
                status: None,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(report)
}

impl Curator {
    pub fn find_orphans(&self, min_importance: i64) -> worklog_core::Result<OrphanReport> {
        let db = self.store().db();
        find(&db, min_importance).map_err(|e| self.store().sql_err(e))
    }

    /// Find orphans at the configured importance and record the report.
    pub fn run_orphan_detection(&self, agent: &str) -> worklog_core::Result<OrphanReport> {
        run_pass(self.store(), CurationOperation::OrphanDetection, agent, || {
            self.find_orphans(self.settings().orphan_min_importance)
        })
    }

    pub fn resolve_orphan(
        &self,
        item: ItemRef,
        holder: &str,
        decision: &OrphanDecision,
    ) -> worklog_core::Result<()> {
        if item.table == EntryTable::Entries {
            return Err(WorklogError::validation(
                "item",
                "entries are never reported as orphans",
            ));
        }
        let lease_id = item.to_string();
        self.store().transaction(|tx| {
            self.ensure_lease_free(tx, LeaseKind::Orphan, &lease_id, holder)?;
            match decision {
                OrphanDecision::LinkTopic { topic_id, relevance } => {
                    self.link_in(tx, *topic_id, item, *relevance, holder)?;
                }
                OrphanDecision::Relate { target, kind } => {
                    self.relate_in(tx, item, *target, *kind, 1.0, holder)?;
                }
                OrphanDecision::Archive => {
                    if item.table != EntryTable::Memories {
                        return Err(WorklogError::validation(
                            "decision",
                            "only memories can be archived",
                        ));
                    }
                    let memory = load_memory(tx, "id = ?1", item.id)
                        .map_err(|e| self.store().sql_err(e))?
                        .ok_or_else(|| not_found(format!("no row {item}")))?;
                    self.set_memory_status(
                        tx,
                        &memory,
                        MemoryStatus::Archived,
                        None,
                        "orphan archived",
                        holder,
                    )?;
                }
                OrphanDecision::Skip => {}
            }
            lease::clear(tx, LeaseKind::Orphan, &lease_id).map_err(|e| self.store().sql_err(e))?;
            self.record_resolution(
                tx,
                holder,
                json!({ "kind": "orphan", "item": item.to_string(), "decision": decision }),
            )
        })
    }
}
