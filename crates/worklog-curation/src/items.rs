//! Uniform view over the tables curation links together.

use rusqlite::{Connection, OptionalExtension};
use worklog_core::{EntryTable, ItemRef, parse_tags};

use crate::similarity::Comparable;

#[derive(Debug, Clone)]
pub(crate) struct Item {
    pub item: ItemRef,
    pub title: String,
    pub body: String,
    pub tags: Vec<String>,
}

impl Item {
    pub fn comparable(&self) -> Comparable {
        Comparable::new(self.title.clone(), self.body.clone(), self.tags.clone())
    }

    /// Lowercased title, body and tags for substring matching.
    pub fn haystack(&self) -> String {
        format!("{} {} {}", self.title, self.body, self.tags.join(" ")).to_lowercase()
    }
}

/// `(title, body, tags)` expressions per table. Archived memories are left out
/// of every pass.
fn projection(table: EntryTable) -> (&'static str, &'static str, &'static str) {
    match table {
        EntryTable::Memories => (
            "COALESCE(summary, key)",
            "content",
            "status != 'archived'",
        ),
        EntryTable::KnowledgeBase => ("title", "content", "1 = 1"),
        EntryTable::Entries => (
            "title",
            "TRIM(COALESCE(details, '') || ' ' || COALESCE(outcome, ''))",
            "1 = 1",
        ),
    }
}

pub(crate) fn load_items(conn: &Connection, table: EntryTable) -> rusqlite::Result<Vec<Item>> {
    let (title, body, live) = projection(table);
    let mut stmt = conn.prepare(&format!(
        "SELECT id, {title}, {body}, tags FROM {} WHERE {live} ORDER BY id",
        table.as_str()
    ))?;
    let items = stmt
        .query_map([], |row| {
            Ok(Item {
                item: ItemRef::new(table, row.get(0)?),
                title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                body: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                tags: parse_tags(&row.get::<_, Option<String>>(3)?.unwrap_or_default()),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(items)
}

pub(crate) fn load_all(conn: &Connection) -> rusqlite::Result<Vec<Item>> {
    let mut all = Vec::new();
    for table in EntryTable::ALL {
        all.extend(load_items(conn, *table)?);
    }
    Ok(all)
}

/// Title of a row, or `None` if it does not exist.
pub(crate) fn item_title(conn: &Connection, item: ItemRef) -> rusqlite::Result<Option<String>> {
    let (title, _, _) = projection(item.table);
    conn.query_row(
        &format!(
            "SELECT COALESCE({title}, '') FROM {} WHERE id = ?1",
            item.table.as_str()
        ),
        rusqlite::params![item.id],
        |row| row.get(0),
    )
    .optional()
}
