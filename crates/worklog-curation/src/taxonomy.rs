//! Tag taxonomy: canonical tags, their aliases, and the queue of tags nobody
//! has classified yet.

use std::collections::{BTreeMap, HashMap};

use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use worklog_core::{
    CurationOperation, RowId, WorklogError, join_tags, now_timestamp, parse_tags,
};

use crate::curator::Curator;
use crate::history::{not_found, run_pass};

/// Trim, lowercase, and collapse runs of whitespace, `_` and `-` into a single
/// `-`. Idempotent.
pub fn clean_tag(tag: &str) -> String {
    let mut out = String::with_capacity(tag.len());
    let mut pending_dash = false;
    for c in tag.trim().chars().flat_map(char::to_lowercase) {
        if c.is_whitespace() || c == '_' || c == '-' {
            pending_dash = true;
            continue;
        }
        if pending_dash && !out.is_empty() {
            out.push('-');
        }
        pending_dash = false;
        out.push(c);
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "tag", rename_all = "snake_case")]
pub enum TagResolution {
    Canonical(String),
    /// Not in the taxonomy; carries the cleaned form.
    Unknown(String),
}

impl TagResolution {
    pub fn as_str(&self) -> &str {
        match self {
            TagResolution::Canonical(t) | TagResolution::Unknown(t) => t,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, TagResolution::Canonical(_))
    }
}

/// In-memory alias index built from `tag_taxonomy`.
#[derive(Debug, Clone, Default)]
pub struct Taxonomy {
    /// Cleaned alias or canonical tag to canonical tag.
    index: HashMap<String, String>,
    canonical: Vec<String>,
}

impl Taxonomy {
    pub fn load(conn: &Connection) -> rusqlite::Result<Self> {
        let mut stmt = conn.prepare("SELECT canonical_tag, aliases FROM tag_taxonomy ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut taxonomy = Taxonomy::default();
        for (canonical, aliases) in rows {
            taxonomy.insert(&canonical, &parse_tags(&aliases.unwrap_or_default()));
        }
        Ok(taxonomy)
    }

    fn insert(&mut self, canonical: &str, aliases: &[String]) {
        self.index.insert(clean_tag(canonical), canonical.to_string());
        for alias in aliases {
            self.index
                .entry(clean_tag(alias))
                .or_insert_with(|| canonical.to_string());
        }
        self.canonical.push(canonical.to_string());
    }

    pub fn canonical_tags(&self) -> &[String] {
        &self.canonical
    }

    /// Resolve one tag. Resolving the output again yields the same output.
    pub fn normalize_tag(&self, tag: &str) -> TagResolution {
        let cleaned = clean_tag(tag);
        match self.index.get(&cleaned) {
            Some(canonical) => TagResolution::Canonical(canonical.clone()),
            None => TagResolution::Unknown(cleaned),
        }
    }

    /// Normalize a tag list, dropping empties and duplicates.
    pub fn normalize_all<S: AsRef<str>>(&self, tags: &[S]) -> Vec<TagResolution> {
        let mut out: Vec<TagResolution> = Vec::with_capacity(tags.len());
        for tag in tags {
            let resolved = self.normalize_tag(tag.as_ref());
            if !resolved.as_str().is_empty() && !out.contains(&resolved) {
                out.push(resolved);
            }
        }
        out
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagNormalizationStats {
    pub rows_scanned: usize,
    pub rows_rewritten: usize,
    pub unknown_tags: usize,
    pub canonical_tags: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnknownTag {
    pub tag: String,
    pub occurrences: i64,
    pub first_seen: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagDecision {
    AddCanonical { category: Option<String> },
    AliasTo(String),
    Ignore,
}

/// Tables whose tags are rewritten in place. Entries are insert-only and are
/// only counted.
const REWRITTEN: [&str; 2] = ["memories", "knowledge_base"];

impl Curator {
    pub fn taxonomy(&self) -> worklog_core::Result<Taxonomy> {
        let db = self.store().db();
        Taxonomy::load(&db).map_err(|e| self.store().sql_err(e))
    }

    pub fn normalize_tag(&self, tag: &str) -> worklog_core::Result<TagResolution> {
        Ok(self.taxonomy()?.normalize_tag(tag))
    }

    pub fn add_canonical(
        &self,
        tag: &str,
        aliases: &[String],
        category: Option<&str>,
        agent: &str,
    ) -> worklog_core::Result<RowId> {
        self.store().transaction(|tx| {
            let id = self.insert_canonical(tx, tag, aliases, category)?;
            self.record_edit(
                tx,
                agent,
                json!({ "kind": "canonical_tag", "id": id, "tag": clean_tag(tag), "category": category }),
            )?;
            Ok(id)
        })
    }

    fn insert_canonical(
        &self,
        conn: &Connection,
        tag: &str,
        aliases: &[String],
        category: Option<&str>,
    ) -> worklog_core::Result<RowId> {
        let canonical = clean_tag(tag);
        if canonical.is_empty() {
            return Err(WorklogError::validation("tag", "must not be empty"));
        }
        let taxonomy = Taxonomy::load(conn).map_err(|e| self.store().sql_err(e))?;
        let mut cleaned_aliases = Vec::new();
        for alias in aliases.iter().map(|a| clean_tag(a)) {
            if alias.is_empty() || alias == canonical {
                continue;
            }
            if let TagResolution::Canonical(owner) = taxonomy.normalize_tag(&alias) {
                return Err(WorklogError::Conflict(format!(
                    "'{alias}' already resolves to '{owner}'"
                )));
            }
            cleaned_aliases.push(alias);
        }
        if let TagResolution::Canonical(owner) = taxonomy.normalize_tag(&canonical) {
            return Err(WorklogError::Conflict(format!(
                "'{canonical}' already resolves to '{owner}'"
            )));
        }
        let now = now_timestamp();
        conn.query_row(
            "INSERT INTO tag_taxonomy (canonical_tag, aliases, category, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?4) RETURNING id",
            rusqlite::params![canonical, join_tags(&cleaned_aliases), category, now],
            |row| row.get(0),
        )
        .map_err(|e| self.store().sql_err(e))
    }

    /// Make `alias` resolve to the existing canonical tag. Adding an alias the
    /// tag already has changes nothing and records nothing.
    pub fn add_alias(&self, canonical: &str, alias: &str, agent: &str) -> worklog_core::Result<()> {
        self.store().transaction(|tx| {
            if self.insert_alias(tx, canonical, alias)? {
                self.record_edit(
                    tx,
                    agent,
                    json!({ "kind": "tag_alias", "tag": clean_tag(canonical), "alias": clean_tag(alias) }),
                )?;
            }
            Ok(())
        })
    }

    /// Returns whether the alias list changed.
    fn insert_alias(&self, conn: &Connection, canonical: &str, alias: &str) -> worklog_core::Result<bool> {
        let canonical = clean_tag(canonical);
        let alias = clean_tag(alias);
        if alias.is_empty() {
            return Err(WorklogError::validation("alias", "must not be empty"));
        }
        let row: Option<(RowId, Option<String>)> = conn
            .query_row(
                "SELECT id, aliases FROM tag_taxonomy WHERE canonical_tag = ?1",
                rusqlite::params![canonical],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| self.store().sql_err(e))?;
        let Some((id, aliases)) = row else {
            return Err(not_found(format!("no canonical tag '{canonical}'")));
        };
        let taxonomy = Taxonomy::load(conn).map_err(|e| self.store().sql_err(e))?;
        match taxonomy.normalize_tag(&alias) {
            TagResolution::Canonical(owner) if owner == canonical => return Ok(false),
            TagResolution::Canonical(owner) => {
                return Err(WorklogError::Conflict(format!(
                    "'{alias}' already resolves to '{owner}'"
                )));
            }
            TagResolution::Unknown(_) => {}
        }
        let mut list = parse_tags(&aliases.unwrap_or_default());
        list.push(alias);
        conn.execute(
            "UPDATE tag_taxonomy SET aliases = ?1, updated_at = ?2, version = version + 1 \
             WHERE id = ?3",
            rusqlite::params![join_tags(&list), now_timestamp(), id],
        )
        .map_err(|e| self.store().sql_err(e))?;
        Ok(true)
    }

    /// Rewrite stored tags to their canonical forms, refresh usage counts and
    /// queue tags the taxonomy does not know. Running it twice changes nothing
    /// the second time.
    pub fn run_tag_normalization(&self, agent: &str) -> worklog_core::Result<TagNormalizationStats> {
        run_pass(self.store(), CurationOperation::TagNormalization, agent, || {
            self.store().transaction(|tx| self.normalize_tags_in(tx))
        })
    }

    fn normalize_tags_in(&self, conn: &Connection) -> worklog_core::Result<TagNormalizationStats> {
        let err = |e| self.store().sql_err(e);
        let taxonomy = Taxonomy::load(conn).map_err(err)?;
        let mut stats = TagNormalizationStats {
            canonical_tags: taxonomy.canonical_tags().len(),
            ..Default::default()
        };
        let mut usage: HashMap<String, i64> = HashMap::new();
        let mut unknown: BTreeMap<String, i64> = BTreeMap::new();
        let now = now_timestamp();

        let mut tally = |resolved: &[TagResolution]| {
            for r in resolved {
                match r {
                    TagResolution::Canonical(t) => *usage.entry(t.clone()).or_default() += 1,
                    TagResolution::Unknown(t) => *unknown.entry(t.clone()).or_default() += 1,
                }
            }
        };

        for table in REWRITTEN {
            let rows: Vec<(RowId, Option<String>, i64)> = {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT id, tags, version FROM {table} WHERE tags IS NOT NULL AND tags != ''"
                    ))
                    .map_err(err)?;
                stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
                    .map_err(err)?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(err)?
            };
            for (id, raw, version) in rows {
                stats.rows_scanned += 1;
                let raw = raw.unwrap_or_default();
                let resolved = taxonomy.normalize_all(&parse_tags(&raw));
                tally(&resolved);
                let rewritten = join_tags(&resolved.iter().map(TagResolution::as_str).collect::<Vec<_>>());
                if rewritten == raw {
                    continue;
                }
                let changed = conn
                    .execute(
                        &format!(
                            "UPDATE {table} SET tags = ?1, updated_at = ?2, version = version + 1 \
                             WHERE id = ?3 AND version = ?4"
                        ),
                        rusqlite::params![rewritten, now, id, version],
                    )
                    .map_err(err)?;
                if changed == 1 {
                    debug!(table, id, from = %raw, to = %rewritten, "tags normalized");
                    stats.rows_rewritten += 1;
                }
            }
        }

        let entry_tags: Vec<Option<String>> = {
            let mut stmt = conn
                .prepare("SELECT tags FROM entries WHERE tags IS NOT NULL AND tags != ''")
                .map_err(err)?;
            stmt.query_map([], |row| row.get(0))
                .map_err(err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(err)?
        };
        for raw in entry_tags {
            stats.rows_scanned += 1;
            tally(&taxonomy.normalize_all(&parse_tags(&raw.unwrap_or_default())));
        }

        for canonical in taxonomy.canonical_tags() {
            let count = usage.get(canonical).copied().unwrap_or(0);
            conn.execute(
                "UPDATE tag_taxonomy SET usage_count = ?1, updated_at = ?2, version = version + 1 \
                 WHERE canonical_tag = ?3 AND usage_count != ?1",
                rusqlite::params![count, now, canonical],
            )
            .map_err(err)?;
        }

        for (tag, occurrences) in &unknown {
            conn.execute(
                "INSERT INTO unknown_tags (tag, occurrences, first_seen, status) \
                 VALUES (?1, ?2, ?3, 'pending') \
                 ON CONFLICT(tag) DO UPDATE SET occurrences = excluded.occurrences \
                 WHERE unknown_tags.status = 'pending'",
                rusqlite::params![tag, occurrences, now],
            )
            .map_err(err)?;
        }
        stats.unknown_tags = unknown.len();
        Ok(stats)
    }

    /// Tags waiting for a decision, most used first.
    pub fn pending_tags(&self) -> worklog_core::Result<Vec<UnknownTag>> {
        let db = self.store().db();
        let mut stmt = db
            .prepare(
                "SELECT tag, occurrences, first_seen, status FROM unknown_tags \
                 WHERE status = 'pending' ORDER BY occurrences DESC, tag",
            )
            .map_err(|e| self.store().sql_err(e))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(UnknownTag {
                    tag: row.get(0)?,
                    occurrences: row.get(1)?,
                    first_seen: row.get(2)?,
                    status: row.get(3)?,
                })
            })
            .map_err(|e| self.store().sql_err(e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| self.store().sql_err(e))?;
        Ok(rows)
    }

    /// Settle a pending unknown tag. Stored rows pick up the result on the next
    /// normalization pass.
    pub fn resolve_tag(
        &self,
        tag: &str,
        decision: &TagDecision,
        agent: &str,
    ) -> worklog_core::Result<()> {
        let tag = clean_tag(tag);
        self.store().transaction(|tx| {
            let status: Option<String> = tx
                .query_row(
                    "SELECT status FROM unknown_tags WHERE tag = ?1",
                    rusqlite::params![tag],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| self.store().sql_err(e))?;
            match status.as_deref() {
                None => return Err(not_found(format!("no unknown tag '{tag}'"))),
                Some("pending") => {}
                Some(other) => {
                    return Err(WorklogError::Conflict(format!(
                        "tag '{tag}' is already {other}"
                    )));
                }
            }

            let (status, resolution) = match decision {
                TagDecision::AddCanonical { category } => {
                    self.insert_canonical(tx, &tag, &[], category.as_deref())?;
                    ("resolved", "canonical".to_string())
                }
                TagDecision::AliasTo(canonical) => {
                    self.insert_alias(tx, canonical, &tag)?;
                    ("resolved", format!("alias:{}", clean_tag(canonical)))
                }
                TagDecision::Ignore => ("ignored", "ignored".to_string()),
            };
            tx.execute(
                "UPDATE unknown_tags SET status = ?1, resolution = ?2 WHERE tag = ?3",
                rusqlite::params![status, resolution, tag],
            )
            .map_err(|e| self.store().sql_err(e))?;
            self.record_resolution(
                tx,
                agent,
                json!({ "kind": "tag", "tag": tag, "resolution": resolution }),
            )
        })
    }
}
