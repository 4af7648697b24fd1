use std::time::Duration;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};
use worklog_core::{
    CurationOperation, MemoryStatus, RowId, WorklogError, format_timestamp, now_timestamp,
};
use worklog_store::MemoryRecord;
use worklog_store::memories::load_memory;

use crate::curator::Curator;
use crate::history::{not_found, run_pass};
use crate::lease::{self, LeaseKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionDecision {
    /// Promote, optionally raising importance (capped at 10).
    Promote { boost: i64 },
    Archive,
    /// Leave in staging; the decision is still recorded.
    Skip,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromotionStats {
    pub candidates: usize,
    pub promoted: usize,
    pub pending: usize,
}

impl Curator {
    /// Staging memories old and important enough to review.
    pub fn promotion_candidates(&self) -> worklog_core::Result<Vec<MemoryRecord>> {
        let db = self.store().db();
        self.promotion_candidates_in(&db)
    }

    fn promotion_candidates_in(&self, conn: &Connection) -> worklog_core::Result<Vec<MemoryRecord>> {
        let cutoff = format_timestamp(chrono::Utc::now() - self.settings().promotion_min_age);
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM memories WHERE status = 'staging' AND importance >= ?1 \
                 AND created_at < ?2 ORDER BY importance DESC, created_at",
                worklog_store::memories::MEMORY_COLUMNS
            ))
            .map_err(|e| self.store().sql_err(e))?;
        let rows = stmt
            .query_map(
                rusqlite::params![self.settings().promotion_min_importance, cutoff],
                MemoryRecord::from_row,
            )
            .map_err(|e| self.store().sql_err(e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| self.store().sql_err(e))?;
        Ok(rows)
    }

    /// Candidates `holder` now holds a lease on. Candidates leased by someone
    /// else are left out.
    pub fn claim_promotion_candidates(
        &self,
        holder: &str,
        ttl: Duration,
    ) -> worklog_core::Result<Vec<MemoryRecord>> {
        self.store().transaction(|tx| {
            let mut claimed = Vec::new();
            for memory in self.promotion_candidates_in(tx)? {
                if lease::claim(tx, LeaseKind::Promotion, &memory.id.to_string(), holder, ttl)
                    .map_err(|e| self.store().sql_err(e))?
                {
                    claimed.push(memory);
                }
            }
            Ok(claimed)
        })
    }

    /// Move a memory to `to`, bump its version and append promotion history.
    /// `to` equal to the current status with no boost records a skip. Runs on
    /// the caller's connection so it joins the caller's transaction.
    pub(crate) fn set_memory_status(
        &self,
        conn: &Connection,
        memory: &MemoryRecord,
        to: MemoryStatus,
        boost: Option<i64>,
        reason: &str,
        agent: &str,
    ) -> worklog_core::Result<MemoryRecord> {
        let unchanged = to == memory.status && boost.is_none();
        if !unchanged && !memory.status.can_transition_to(to) {
            return Err(WorklogError::InvalidTransition {
                from: memory.status.to_string(),
                to: to.to_string(),
            });
        }
        let err = |e| self.store().sql_err(e);
        let now = now_timestamp();
        if !unchanged {
            let importance = (memory.importance + boost.unwrap_or(0)).clamp(1, 10);
            let changed = conn
                .execute(
                    "UPDATE memories SET status = ?1, importance = ?2, \
                     promoted_at = CASE WHEN ?1 = 'promoted' THEN ?3 ELSE promoted_at END, \
                     updated_at = ?3, version = version + 1 WHERE id = ?4 AND version = ?5",
                    rusqlite::params![to.as_str(), importance, now, memory.id, memory.version],
                )
                .map_err(err)?;
            if changed == 0 {
                return Err(WorklogError::Conflict(format!(
                    "memory '{}' changed during curation",
                    memory.key
                )));
            }
        }
        conn.execute(
            "INSERT INTO promotion_history (memory_id, from_status, to_status, reason, agent, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![memory.id, memory.status.as_str(), to.as_str(), reason, agent, now],
        )
        .map_err(err)?;
        load_memory(conn, "id = ?1", memory.id)
            .map_err(err)?
            .ok_or_else(|| not_found(format!("no memory with id {}", memory.id)))
    }

    /// Record a decision on one candidate. Skips are written to history too.
    pub fn decide_promotion(
        &self,
        memory_id: RowId,
        holder: &str,
        expected_version: i64,
        decision: &PromotionDecision,
        reason: &str,
    ) -> worklog_core::Result<MemoryRecord> {
        let lease_id = memory_id.to_string();
        self.store().transaction(|tx| {
            self.ensure_lease_free(tx, LeaseKind::Promotion, &lease_id, holder)?;
            let memory = load_memory(tx, "id = ?1", memory_id)
                .map_err(|e| self.store().sql_err(e))?
                .ok_or_else(|| not_found(format!("no memory with id {memory_id}")))?;
            if memory.version != expected_version {
                return Err(WorklogError::Conflict(format!(
                    "memory '{}' is at version {}, expected {expected_version}",
                    memory.key, memory.version
                )));
            }
            let (to, boost) = match decision {
                PromotionDecision::Promote { boost } => (MemoryStatus::Promoted, Some(*boost)),
                PromotionDecision::Archive => (MemoryStatus::Archived, None),
                PromotionDecision::Skip => (memory.status, None),
            };
            let updated = self.set_memory_status(tx, &memory, to, boost, reason, holder)?;
            lease::clear(tx, LeaseKind::Promotion, &lease_id)
                .map_err(|e| self.store().sql_err(e))?;
            self.record_resolution(
                tx,
                holder,
                json!({
                    "kind": "promotion",
                    "memory": memory_id,
                    "from": memory.status,
                    "to": to,
                    "reason": reason,
                }),
            )?;
            debug!(memory = %memory.key, from = %memory.status, %to, "promotion decided");
            Ok(updated)
        })
    }

    /// List the candidates. With `auto`, candidates at or above the
    /// auto-promote importance are promoted and the rest stay pending.
    pub fn run_memory_promotion(&self, agent: &str, auto: bool) -> worklog_core::Result<PromotionStats> {
        run_pass(self.store(), CurationOperation::MemoryPromotion, agent, || {
            let candidates = self.promotion_candidates()?;
            let mut stats = PromotionStats {
                candidates: candidates.len(),
                ..Default::default()
            };
            for memory in candidates {
                if !auto || memory.importance < self.settings().auto_promote_importance {
                    stats.pending += 1;
                    continue;
                }
                let lease_id = memory.id.to_string();
                if !self.claim_lease(LeaseKind::Promotion, &lease_id, agent)? {
                    stats.pending += 1;
                    continue;
                }
                let reason = format!(
                    "auto: importance {} >= {}",
                    memory.importance,
                    self.settings().auto_promote_importance
                );
                match self.decide_promotion(
                    memory.id,
                    agent,
                    memory.version,
                    &PromotionDecision::Promote { boost: 0 },
                    &reason,
                ) {
                    Ok(_) => stats.promoted += 1,
                    Err(WorklogError::Conflict(msg)) => {
                        info!(memory = %memory.key, %msg, "skipped, changed concurrently");
                        self.release_lease(LeaseKind::Promotion, &lease_id, agent)?;
                        stats.pending += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok(stats)
        })
    }
}
