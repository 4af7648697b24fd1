//! DDL for the worklog database.
//!
//! The core tables keep the column names of the shared `worklog.db`. Files
//! created before the `version` columns and the error-pattern and research
//! extensions existed are upgraded in place by [`migrate_core`].

use std::collections::HashSet;

use rusqlite::Connection;
use tracing::info;
use worklog_core::Table;

use crate::error_patterns::pattern_key;
use crate::query::table_columns;

/// The five core tables.
pub const CORE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    agent TEXT NOT NULL DEFAULT 'claude',
    task_type TEXT NOT NULL,
    title TEXT NOT NULL,
    details TEXT,
    decision_rationale TEXT,
    outcome TEXT,
    tags TEXT,
    related_files TEXT
);

CREATE TABLE IF NOT EXISTS knowledge_base (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    category TEXT NOT NULL,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    tags TEXT,
    source_agent TEXT,
    is_protocol INTEGER NOT NULL DEFAULT 0,
    version INTEGER NOT NULL DEFAULT 1,
    system TEXT DEFAULT 'shared',
    source_url TEXT,
    UNIQUE(category, title)
);

CREATE TABLE IF NOT EXISTS memories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT UNIQUE NOT NULL,
    content TEXT NOT NULL,
    summary TEXT,
    memory_type TEXT NOT NULL DEFAULT 'fact',
    status TEXT NOT NULL DEFAULT 'staging',
    importance INTEGER NOT NULL DEFAULT 5,
    access_count INTEGER NOT NULL DEFAULT 0,
    source_agent TEXT,
    system TEXT,
    entities TEXT,
    tags TEXT,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    last_accessed TIMESTAMP,
    promoted_at TIMESTAMP,
    version INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS error_patterns (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pattern_key TEXT UNIQUE NOT NULL,
    error_signature TEXT NOT NULL,
    error_message TEXT,
    platform TEXT,
    language TEXT,
    project TEXT,
    root_cause TEXT,
    resolution TEXT,
    prevention_tip TEXT,
    occurrence_count INTEGER NOT NULL DEFAULT 1,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    last_seen TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    tags TEXT,
    version INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS research (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_type TEXT NOT NULL,
    source_url TEXT UNIQUE,
    title TEXT NOT NULL,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    source_id TEXT,
    author TEXT,
    raw_content TEXT,
    summary TEXT,
    key_points TEXT,
    actionable_items TEXT,
    relevance_score INTEGER NOT NULL DEFAULT 5,
    relevance_notes TEXT,
    applicable_to TEXT,
    duration_seconds INTEGER,
    word_count INTEGER,
    processed_by TEXT,
    tags TEXT,
    status TEXT NOT NULL DEFAULT 'new',
    version INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_entries_timestamp ON entries(timestamp);
CREATE INDEX IF NOT EXISTS idx_entries_agent ON entries(agent);
CREATE INDEX IF NOT EXISTS idx_entries_task_type ON entries(task_type);
CREATE INDEX IF NOT EXISTS idx_kb_category ON knowledge_base(category);
CREATE INDEX IF NOT EXISTS idx_memories_type ON memories(memory_type);
CREATE INDEX IF NOT EXISTS idx_memories_status ON memories(status);
CREATE INDEX IF NOT EXISTS idx_error_patterns_signature ON error_patterns(error_signature);
CREATE INDEX IF NOT EXISTS idx_research_status ON research(status);
";

/// Curation extension tables.
pub const CURATION_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS topic_index (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT UNIQUE NOT NULL,
    summary TEXT,
    key_terms TEXT,
    entry_count INTEGER NOT NULL DEFAULT 0,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    version INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS topic_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    topic_id INTEGER NOT NULL REFERENCES topic_index(id),
    table_name TEXT NOT NULL,
    entry_id INTEGER NOT NULL,
    relevance_score REAL NOT NULL DEFAULT 0.5,
    added_by TEXT,
    added_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(topic_id, table_name, entry_id)
);

CREATE TABLE IF NOT EXISTS relationships (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_table TEXT NOT NULL,
    source_id INTEGER NOT NULL,
    target_table TEXT NOT NULL,
    target_id INTEGER NOT NULL,
    relationship_type TEXT NOT NULL,
    confidence REAL NOT NULL DEFAULT 1.0,
    created_by TEXT,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(source_table, source_id, target_table, target_id, relationship_type)
);

CREATE TABLE IF NOT EXISTS tag_taxonomy (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    canonical_tag TEXT UNIQUE NOT NULL,
    aliases TEXT,
    category TEXT,
    usage_count INTEGER NOT NULL DEFAULT 0,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    version INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS unknown_tags (
    tag TEXT PRIMARY KEY,
    occurrences INTEGER NOT NULL DEFAULT 1,
    first_seen TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    status TEXT NOT NULL DEFAULT 'pending',
    resolution TEXT
);

CREATE TABLE IF NOT EXISTS duplicate_candidates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    table_a TEXT NOT NULL,
    id_a INTEGER NOT NULL,
    table_b TEXT NOT NULL,
    id_b INTEGER NOT NULL,
    similarity REAL NOT NULL,
    reason TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    resolved_by TEXT,
    resolved_at TIMESTAMP,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    version INTEGER NOT NULL DEFAULT 1,
    UNIQUE(table_a, id_a, table_b, id_b)
);

CREATE TABLE IF NOT EXISTS promotion_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    memory_id INTEGER NOT NULL,
    from_status TEXT NOT NULL,
    to_status TEXT NOT NULL,
    reason TEXT,
    agent TEXT,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS curation_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    operation TEXT NOT NULL,
    agent TEXT NOT NULL,
    stats TEXT,
    duration_ms INTEGER NOT NULL DEFAULT 0,
    success INTEGER NOT NULL DEFAULT 1,
    error_message TEXT,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS curation_leases (
    kind TEXT NOT NULL,
    item_id TEXT NOT NULL,
    holder TEXT NOT NULL,
    expires_at TIMESTAMP NOT NULL,
    PRIMARY KEY(kind, item_id)
);

CREATE INDEX IF NOT EXISTS idx_topic_entries_item ON topic_entries(table_name, entry_id);
CREATE INDEX IF NOT EXISTS idx_relationships_source ON relationships(source_table, source_id);
CREATE INDEX IF NOT EXISTS idx_relationships_target ON relationships(target_table, target_id);
CREATE INDEX IF NOT EXISTS idx_duplicates_status ON duplicate_candidates(status);
CREATE INDEX IF NOT EXISTS idx_promotion_memory ON promotion_history(memory_id);
CREATE INDEX IF NOT EXISTS idx_curation_created ON curation_history(created_at);
";

pub fn apply_core(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(CORE_SCHEMA)?;
    migrate_core(conn)
}

/// Columns added to the core tables after the first shared schema. `ALTER
/// TABLE` cannot add UNIQUE columns or non-constant defaults, so those get a
/// plain declaration here and are completed in [`migrate_core`].
const ADDED_COLUMNS: &[(Table, &str, &str)] = &[
    (Table::KnowledgeBase, "updated_at", "TIMESTAMP"),
    (Table::KnowledgeBase, "version", "INTEGER NOT NULL DEFAULT 1"),
    (Table::KnowledgeBase, "source_url", "TEXT"),
    (Table::Memories, "entities", "TEXT"),
    (Table::Memories, "updated_at", "TIMESTAMP"),
    (Table::Memories, "version", "INTEGER NOT NULL DEFAULT 1"),
    (Table::ErrorPatterns, "pattern_key", "TEXT"),
    (Table::ErrorPatterns, "project", "TEXT"),
    (Table::ErrorPatterns, "occurrence_count", "INTEGER NOT NULL DEFAULT 1"),
    (Table::ErrorPatterns, "last_seen", "TIMESTAMP"),
    (Table::ErrorPatterns, "version", "INTEGER NOT NULL DEFAULT 1"),
    (Table::Research, "source_url", "TEXT"),
    (Table::Research, "updated_at", "TIMESTAMP"),
    (Table::Research, "source_id", "TEXT"),
    (Table::Research, "author", "TEXT"),
    (Table::Research, "raw_content", "TEXT"),
    (Table::Research, "actionable_items", "TEXT"),
    (Table::Research, "relevance_notes", "TEXT"),
    (Table::Research, "applicable_to", "TEXT"),
    (Table::Research, "duration_seconds", "INTEGER"),
    (Table::Research, "word_count", "INTEGER"),
    (Table::Research, "processed_by", "TEXT"),
    (Table::Research, "version", "INTEGER NOT NULL DEFAULT 1"),
];

/// Bring an older core schema up to date. A no-op on a current database.
pub fn migrate_core(conn: &Connection) -> rusqlite::Result<()> {
    let mut added: Vec<(Table, &str)> = Vec::new();
    let tx = conn.unchecked_transaction()?;
    let mut current: Option<(Table, Vec<String>)> = None;
    for &(table, column, decl) in ADDED_COLUMNS {
        if current.as_ref().is_none_or(|(t, _)| *t != table) {
            current = Some((table, table_columns(&tx, table)?));
        }
        if current.as_ref().is_some_and(|(_, cols)| cols.iter().any(|c| c == column)) {
            continue;
        }
        tx.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"))?;
        added.push((table, column));
    }
    if added.is_empty() {
        return Ok(());
    }
    let was_added = |table: Table, column: &str| {
        added.iter().any(|&(t, c)| t == table && c == column)
    };

    for table in [Table::KnowledgeBase, Table::Memories, Table::Research] {
        if was_added(table, "updated_at") {
            tx.execute(
                &format!("UPDATE {table} SET updated_at = created_at WHERE updated_at IS NULL"),
                [],
            )?;
        }
    }
    if was_added(Table::ErrorPatterns, "last_seen") {
        tx.execute(
            "UPDATE error_patterns SET last_seen = created_at WHERE last_seen IS NULL",
            [],
        )?;
    }
    if was_added(Table::ErrorPatterns, "pattern_key") {
        backfill_pattern_keys(&tx)?;
        tx.execute_batch(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_error_patterns_key ON error_patterns(pattern_key)",
        )?;
    }
    if was_added(Table::Research, "source_url") {
        tx.execute_batch(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_research_source_url ON research(source_url)",
        )?;
    }
    tx.commit()?;
    info!(columns = added.len(), "upgraded worklog schema");
    Ok(())
}

/// Give every existing error pattern its dedup key. Rows that already share a
/// key keep the oldest as the canonical one; the others get a suffixed key so
/// the unique index can be built without merging anything.
fn backfill_pattern_keys(conn: &Connection) -> rusqlite::Result<()> {
    let rows: Vec<(i64, Option<String>, Option<String>, Option<String>, Option<String>)> = conn
        .prepare(
            "SELECT id, error_signature, platform, language, project FROM error_patterns \
             WHERE pattern_key IS NULL ORDER BY id",
        )?
        .query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
        })?
        .collect::<rusqlite::Result<_>>()?;

    let mut seen = HashSet::new();
    for (id, signature, platform, language, project) in rows {
        let mut key = pattern_key(
            signature.as_deref().unwrap_or_default(),
            platform.as_deref(),
            language.as_deref(),
            project.as_deref(),
        );
        if !seen.insert(key.clone()) {
            key.push_str(&format!("\u{1f}#{id}"));
        }
        conn.execute(
            "UPDATE error_patterns SET pattern_key = ?1 WHERE id = ?2",
            rusqlite::params![key, id],
        )?;
    }
    Ok(())
}

pub fn apply_curation(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(CURATION_SCHEMA)
}
