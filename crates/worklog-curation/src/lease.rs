//! Time-bounded claims on curation candidates.
//!
//! Two agents reviewing the same duplicate pair or promotion candidate would
//! otherwise both act on it. A lease is a row in `curation_leases`; an expired
//! lease is as good as none.

use std::time::Duration;

use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use worklog_core::{WorklogError, format_timestamp, now_timestamp};

use crate::curator::Curator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseKind {
    Duplicate,
    Orphan,
    Promotion,
}

impl LeaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseKind::Duplicate => "duplicate",
            LeaseKind::Orphan => "orphan",
            LeaseKind::Promotion => "promotion",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub kind: LeaseKind,
    pub item_id: String,
    pub holder: String,
    pub expires_at: String,
}

fn expiry(ttl: Duration) -> String {
    let now = chrono::Utc::now();
    let at = chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(now);
    format_timestamp(at)
}

/// Take or renew a lease. Succeeds when nobody holds one, the current one has
/// expired, or `holder` already owns it.
pub(crate) fn claim(
    conn: &Connection,
    kind: LeaseKind,
    item_id: &str,
    holder: &str,
    ttl: Duration,
) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "INSERT INTO curation_leases (kind, item_id, holder, expires_at) VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT(kind, item_id) DO UPDATE SET \
         holder = excluded.holder, expires_at = excluded.expires_at \
         WHERE curation_leases.expires_at <= ?5 OR curation_leases.holder = excluded.holder",
        rusqlite::params![kind.as_str(), item_id, holder, expiry(ttl), now_timestamp()],
    )?;
    Ok(changed == 1)
}

pub(crate) fn release(
    conn: &Connection,
    kind: LeaseKind,
    item_id: &str,
    holder: &str,
) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "DELETE FROM curation_leases WHERE kind = ?1 AND item_id = ?2 AND holder = ?3",
        rusqlite::params![kind.as_str(), item_id, holder],
    )?;
    Ok(changed == 1)
}

/// The live lease on an item, if any.
pub(crate) fn current(
    conn: &Connection,
    kind: LeaseKind,
    item_id: &str,
) -> rusqlite::Result<Option<Lease>> {
    conn.query_row(
        "SELECT holder, expires_at FROM curation_leases \
         WHERE kind = ?1 AND item_id = ?2 AND expires_at > ?3",
        rusqlite::params![kind.as_str(), item_id, now_timestamp()],
        |row| {
            Ok(Lease {
                kind,
                item_id: item_id.to_string(),
                holder: row.get(0)?,
                expires_at: row.get(1)?,
            })
        },
    )
    .optional()
}

/// Drop whatever lease remains once an item has been resolved.
pub(crate) fn clear(conn: &Connection, kind: LeaseKind, item_id: &str) -> rusqlite::Result<()> {
    conn.execute(
        "DELETE FROM curation_leases WHERE kind = ?1 AND item_id = ?2",
        rusqlite::params![kind.as_str(), item_id],
    )?;
    Ok(())
}

impl Curator {
    /// Fail with `LeaseHeld` if someone other than `holder` has a live lease.
    pub(crate) fn ensure_lease_free(
        &self,
        conn: &Connection,
        kind: LeaseKind,
        item_id: &str,
        holder: &str,
    ) -> worklog_core::Result<()> {
        match current(conn, kind, item_id).map_err(|e| self.store().sql_err(e))? {
            Some(lease) if lease.holder != holder => Err(WorklogError::LeaseHeld {
                holder: lease.holder,
                until: lease.expires_at,
            }),
            _ => Ok(()),
        }
    }

    /// Claim `item_id` for `holder` for the configured lease time.
    pub fn claim_lease(
        &self,
        kind: LeaseKind,
        item_id: &str,
        holder: &str,
    ) -> worklog_core::Result<bool> {
        self.claim_lease_for(kind, item_id, holder, self.settings().lease_ttl)
    }

    pub fn claim_lease_for(
        &self,
        kind: LeaseKind,
        item_id: &str,
        holder: &str,
        ttl: Duration,
    ) -> worklog_core::Result<bool> {
        let db = self.store().db();
        claim(&db, kind, item_id, holder, ttl).map_err(|e| self.store().sql_err(e))
    }

    pub fn release_lease(
        &self,
        kind: LeaseKind,
        item_id: &str,
        holder: &str,
    ) -> worklog_core::Result<bool> {
        let db = self.store().db();
        release(&db, kind, item_id, holder).map_err(|e| self.store().sql_err(e))
    }

    pub fn lease(&self, kind: LeaseKind, item_id: &str) -> worklog_core::Result<Option<Lease>> {
        let db = self.store().db();
        current(&db, kind, item_id).map_err(|e| self.store().sql_err(e))
    }
}
