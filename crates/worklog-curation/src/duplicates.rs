use std::collections::HashSet;

use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use worklog_core::{
    CurationOperation, EntryTable, ItemRef, MemoryStatus, RelationshipType, RowId, WorklogError,
    now_timestamp,
};
use worklog_store::memories::load_memory;

use crate::curator::Curator;
use crate::history::{not_found, run_pass};
use crate::items::load_all;
use crate::lease::{self, LeaseKind};
use crate::relationships::{insert_relationship, text_col};
use crate::similarity::similarity;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateCandidate {
    pub id: RowId,
    pub a: ItemRef,
    pub b: ItemRef,
    pub similarity: f64,
    pub reason: Option<String>,
    pub status: String,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<String>,
    pub created_at: String,
    pub version: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateDecision {
    /// Keep one side; the other is marked `duplicate_of` it.
    Merge { keep: ItemRef },
    Dismiss,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DuplicateStats {
    pub items: usize,
    pub pairs_compared: usize,
    pub new_candidates: usize,
    pub already_known: usize,
}

const CANDIDATE_COLUMNS: &str = "id, table_a, id_a, table_b, id_b, similarity, reason, status, \
     resolved_by, resolved_at, created_at, version";

fn candidate_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DuplicateCandidate> {
    Ok(DuplicateCandidate {
        id: row.get(0)?,
        a: ItemRef::new(text_col::<EntryTable>(row, 1)?, row.get(2)?),
        b: ItemRef::new(text_col::<EntryTable>(row, 3)?, row.get(4)?),
        similarity: row.get(5)?,
        reason: row.get(6)?,
        status: row.get(7)?,
        resolved_by: row.get(8)?,
        resolved_at: row.get(9)?,
        created_at: row.get(10)?,
        version: row.get(11)?,
    })
}

fn load_candidate(conn: &Connection, id: RowId) -> rusqlite::Result<Option<DuplicateCandidate>> {
    conn.query_row(
        &format!("SELECT {CANDIDATE_COLUMNS} FROM duplicate_candidates WHERE id = ?1"),
        rusqlite::params![id],
        candidate_from_row,
    )
    .optional()
}

/// Pairs are stored with the lower `(table, id)` first so each pair has one row.
fn ordered(a: ItemRef, b: ItemRef) -> (ItemRef, ItemRef) {
    if (a.table.as_str(), a.id) <= (b.table.as_str(), b.id) {
        (a, b)
    } else {
        (b, a)
    }
}

impl Curator {
    /// Compare every live memory, knowledge item and entry pairwise and queue
    /// new pairs scoring at least `threshold`.
    pub fn run_duplicate_detection(
        &self,
        agent: &str,
        threshold: f64,
    ) -> worklog_core::Result<DuplicateStats> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(WorklogError::validation("threshold", "must be between 0 and 1"));
        }
        run_pass(self.store(), CurationOperation::DuplicateDetection, agent, || {
            self.store().transaction(|tx| {
                let err = |e| self.store().sql_err(e);
                let items = load_all(tx).map_err(err)?;
                let comparables: Vec<_> = items.iter().map(|i| i.comparable()).collect();
                let known: HashSet<(String, RowId, String, RowId)> = {
                    let mut stmt = tx
                        .prepare("SELECT table_a, id_a, table_b, id_b FROM duplicate_candidates")
                        .map_err(err)?;
                    stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))
                        .map_err(err)?
                        .collect::<rusqlite::Result<HashSet<_>>>()
                        .map_err(err)?
                };

                let mut stats = DuplicateStats {
                    items: items.len(),
                    ..Default::default()
                };
                let now = now_timestamp();
                for i in 0..items.len() {
                    for j in i + 1..items.len() {
                        stats.pairs_compared += 1;
                        let score = similarity(&comparables[i], &comparables[j]);
                        if score < threshold {
                            continue;
                        }
                        let (a, b) = ordered(items[i].item, items[j].item);
                        let key = (a.table.as_str().to_string(), a.id, b.table.as_str().to_string(), b.id);
                        if known.contains(&key) {
                            stats.already_known += 1;
                            continue;
                        }
                        let reason = if items[i].title.trim().eq_ignore_ascii_case(items[j].title.trim()) {
                            format!("identical titles, similarity {score:.2}")
                        } else {
                            format!("similarity {score:.2}")
                        };
                        tx.execute(
                            "INSERT INTO duplicate_candidates \
                             (table_a, id_a, table_b, id_b, similarity, reason, created_at) \
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) ON CONFLICT DO NOTHING",
                            rusqlite::params![
                                a.table.as_str(),
                                a.id,
                                b.table.as_str(),
                                b.id,
                                score,
                                reason,
                                now
                            ],
                        )
                        .map_err(err)?;
                        debug!(%a, %b, score, "duplicate candidate");
                        stats.new_candidates += 1;
                    }
                }
                Ok(stats)
            })
        })
    }

    pub fn pending_duplicates(&self) -> worklog_core::Result<Vec<DuplicateCandidate>> {
        let db = self.store().db();
        let mut stmt = db
            .prepare(&format!(
                "SELECT {CANDIDATE_COLUMNS} FROM duplicate_candidates \
                 WHERE status = 'pending' ORDER BY similarity DESC, id"
            ))
            .map_err(|e| self.store().sql_err(e))?;
        let rows = stmt
            .query_map([], candidate_from_row)
            .map_err(|e| self.store().sql_err(e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| self.store().sql_err(e))?;
        Ok(rows)
    }

    pub fn duplicate(&self, id: RowId) -> worklog_core::Result<DuplicateCandidate> {
        let db = self.store().db();
        load_candidate(&db, id)
            .map_err(|e| self.store().sql_err(e))?
            .ok_or_else(|| not_found(format!("no duplicate candidate {id}")))
    }

    /// Settle a pending pair. Merging never deletes: the dropped side gets a
    /// `duplicate_of` edge, and a dropped staging memory is archived.
    pub fn resolve_duplicate(
        &self,
        id: RowId,
        holder: &str,
        expected_version: i64,
        decision: &DuplicateDecision,
    ) -> worklog_core::Result<DuplicateCandidate> {
        let lease_id = id.to_string();
        self.store().transaction(|tx| {
            let err = |e| self.store().sql_err(e);
            self.ensure_lease_free(tx, LeaseKind::Duplicate, &lease_id, holder)?;
            let candidate = load_candidate(tx, id)
                .map_err(err)?
                .ok_or_else(|| not_found(format!("no duplicate candidate {id}")))?;
            if candidate.status != "pending" {
                return Err(WorklogError::Conflict(format!(
                    "duplicate candidate {id} is already {}",
                    candidate.status
                )));
            }
            if candidate.version != expected_version {
                return Err(WorklogError::Conflict(format!(
                    "duplicate candidate {id} is at version {}, expected {expected_version}",
                    candidate.version
                )));
            }

            let now = now_timestamp();
            let status = match decision {
                DuplicateDecision::Merge { keep } => {
                    let dropped = if *keep == candidate.a {
                        candidate.b
                    } else if *keep == candidate.b {
                        candidate.a
                    } else {
                        return Err(WorklogError::validation(
                            "keep",
                            format!("{keep} is not part of candidate {id}"),
                        ));
                    };
                    insert_relationship(
                        tx,
                        dropped,
                        *keep,
                        RelationshipType::DuplicateOf,
                        candidate.similarity,
                        holder,
                    )
                    .map_err(err)?;
                    if dropped.table == EntryTable::Memories {
                        self.archive_if_staging(tx, dropped.id, &format!("duplicate of {keep}"), holder)?;
                    }
                    "merged"
                }
                DuplicateDecision::Dismiss => "dismissed",
            };

            let changed = tx
                .execute(
                    "UPDATE duplicate_candidates SET status = ?1, resolved_by = ?2, resolved_at = ?3, \
                     version = version + 1 WHERE id = ?4 AND version = ?5",
                    rusqlite::params![status, holder, now, id, expected_version],
                )
                .map_err(err)?;
            if changed == 0 {
                return Err(WorklogError::Conflict(format!(
                    "duplicate candidate {id} changed during resolution"
                )));
            }
            lease::clear(tx, LeaseKind::Duplicate, &lease_id).map_err(err)?;
            self.record_resolution(
                tx,
                holder,
                json!({ "kind": "duplicate", "candidate": id, "status": status }),
            )?;
            load_candidate(tx, id)
                .map_err(err)?
                .ok_or_else(|| not_found(format!("no duplicate candidate {id}")))
        })
    }

    /// Archive a memory if it is still in staging, writing promotion history.
    /// Promoted memories are left as they are.
    pub(crate) fn archive_if_staging(
        &self,
        conn: &Connection,
        memory_id: RowId,
        reason: &str,
        agent: &str,
    ) -> worklog_core::Result<bool> {
        let err = |e| self.store().sql_err(e);
        let Some(memory) = load_memory(conn, "id = ?1", memory_id).map_err(err)? else {
            return Err(not_found(format!("no memory with id {memory_id}")));
        };
        if memory.status != MemoryStatus::Staging {
            return Ok(false);
        }
        self.set_memory_status(conn, &memory, MemoryStatus::Archived, None, reason, agent)?;
        Ok(true)
    }
}
