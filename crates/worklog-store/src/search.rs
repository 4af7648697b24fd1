use serde::Serialize;
use worklog_core::{RowId, Table, WorklogError, parse_tags};

use crate::query::escape_like;
use crate::statement::SqlValue;
use crate::store::WorklogStore;

/// Rows kept per table. Matches are ordered by score in SQL before this cap
/// applies, so it only drops the weakest (then oldest) matches of a very broad
/// term; raising it trades memory for recall on such terms.
const CANDIDATES_PER_TABLE: usize = 200;
const SNIPPET_RADIUS: usize = 60;

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub table: Table,
    pub id: RowId,
    pub title: String,
    pub snippet: String,
    pub tags: Vec<String>,
    pub timestamp: String,
    pub score: f64,
}

/// How one table is searched.
struct Searchable {
    title: &'static str,
    body: &'static str,
    timestamp: &'static str,
    columns: &'static [&'static str],
}

fn searchable(table: Table) -> Option<Searchable> {
    let target = match table {
        Table::Memories => Searchable {
            title: "COALESCE(summary, key)",
            body: "content",
            timestamp: "updated_at",
            columns: &["key", "content", "summary", "tags"],
        },
        Table::KnowledgeBase => Searchable {
            title: "title",
            body: "content",
            timestamp: "updated_at",
            columns: &["title", "content", "tags", "category"],
        },
        Table::Entries => Searchable {
            title: "title",
            body: "COALESCE(details, outcome, '')",
            timestamp: "timestamp",
            columns: &["title", "details", "outcome", "tags"],
        },
        Table::Research => Searchable {
            title: "title",
            body: "COALESCE(summary, '')",
            timestamp: "created_at",
            columns: &["title", "summary", "key_points", "tags"],
        },
        Table::ErrorPatterns => Searchable {
            title: "error_signature",
            body: "COALESCE(resolution, error_message, '')",
            timestamp: "last_seen",
            columns: &["error_signature", "error_message", "resolution", "tags"],
        },
        _ => return None,
    };
    Some(target)
}

fn tokenize(term: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    for t in term.split_whitespace().map(str::to_lowercase) {
        if !tokens.contains(&t) {
            tokens.push(t);
        }
    }
    tokens
}

/// Up to `SNIPPET_RADIUS` characters either side of the first token hit.
fn snippet(body: &str, tokens: &[String]) -> String {
    let lower = body.to_lowercase();
    let chars: Vec<char> = body.chars().collect();
    // Lowercasing can change byte lengths, so locate by char offset.
    let hit = tokens
        .iter()
        .filter_map(|t| lower.find(t.as_str()).map(|b| lower[..b].chars().count()))
        .min()
        .unwrap_or(0)
        .min(chars.len());
    let start = hit.saturating_sub(SNIPPET_RADIUS);
    let end = (hit + SNIPPET_RADIUS).min(chars.len());
    let mut out: String = chars[start..end].iter().collect();
    out = out.split_whitespace().collect::<Vec<_>>().join(" ");
    if start > 0 {
        out.insert_str(0, "...");
    }
    if end < chars.len() {
        out.push_str("...");
    }
    out
}

impl WorklogStore {
    /// Search the given tables (all core tables when empty). Every token must
    /// appear in some searchable column of a row. Title hits count double.
    pub fn search(
        &self,
        term: &str,
        tables: &[Table],
        limit: usize,
    ) -> worklog_core::Result<Vec<SearchHit>> {
        let tokens = tokenize(term);
        if tokens.is_empty() {
            return Err(WorklogError::validation("term", "must not be empty"));
        }
        let tables = if tables.is_empty() { Table::CORE } else { tables };

        let mut hits = Vec::new();
        for table in tables {
            let target = searchable(*table).ok_or_else(|| {
                WorklogError::validation("tables", format!("{table} is not searchable"))
            })?;
            hits.extend(self.search_table(*table, &target, &tokens)?);
        }

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
        });
        hits.truncate(limit.max(1));
        Ok(hits)
    }

    fn search_table(
        &self,
        table: Table,
        target: &Searchable,
        tokens: &[String],
    ) -> worklog_core::Result<Vec<SearchHit>> {
        // ?1..?k are LIKE patterns, ?k+1..?2k the bare tokens for scoring.
        let k = tokens.len();
        let mut clauses = Vec::with_capacity(k);
        let mut scores = Vec::with_capacity(k);
        let mut params = Vec::with_capacity(2 * k);
        for (i, token) in tokens.iter().enumerate() {
            let (like, bare) = (i + 1, k + i + 1);
            let any = target
                .columns
                .iter()
                .map(|c| format!("{c} LIKE ?{like} ESCAPE '\\'"))
                .collect::<Vec<_>>()
                .join(" OR ");
            clauses.push(format!("({any})"));
            let mut score = format!(
                "(CASE WHEN instr(lower(COALESCE({}, '')), ?{bare}) > 0 THEN 2 ELSE 0 END)",
                target.title
            );
            for c in target.columns {
                score.push_str(&format!(
                    " + (CASE WHEN instr(lower(COALESCE({c}, '')), ?{bare}) > 0 THEN 1 ELSE 0 END)"
                ));
            }
            scores.push(score);
            params.push(SqlValue::Text(format!("%{}%", escape_like(token))));
        }
        params.extend(tokens.iter().map(|t| SqlValue::Text(t.clone())));
        let sql = format!(
            "SELECT id, {title}, {body}, tags, {ts}, {cols} FROM {table} WHERE {cond} \
             ORDER BY {score} DESC, {ts} DESC LIMIT {CANDIDATES_PER_TABLE}",
            title = target.title,
            body = target.body,
            ts = target.timestamp,
            cols = target.columns.join(", "),
            table = table.as_str(),
            cond = clauses.join(" AND "),
            score = scores.join(" + "),
        );

        let db = self.db();
        let mut stmt = db.prepare(&sql).map_err(|e| self.sql_err(e))?;
        let ncols = target.columns.len();
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params.iter()), |row| {
                let mut fields = Vec::with_capacity(ncols);
                for i in 0..ncols {
                    fields.push(row.get::<_, Option<String>>(5 + i)?.unwrap_or_default());
                }
                Ok((
                    row.get::<_, RowId>(0)?,
                    row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                    fields,
                ))
            })
            .map_err(|e| self.sql_err(e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| self.sql_err(e))?;

        Ok(rows
            .into_iter()
            .map(|(id, title, body, tags, timestamp, fields)| {
                let title_lower = title.to_lowercase();
                let fields: Vec<String> = fields.iter().map(|f| f.to_lowercase()).collect();
                let score: f64 = tokens
                    .iter()
                    .map(|t| {
                        let in_title = if title_lower.contains(t.as_str()) { 2.0 } else { 0.0 };
                        let in_fields = fields.iter().filter(|f| f.contains(t.as_str())).count();
                        in_title + in_fields as f64
                    })
                    .sum();
                SearchHit {
                    table,
                    id,
                    snippet: snippet(&body, tokens),
                    title,
                    tags: parse_tags(&tags),
                    timestamp,
                    score,
                }
            })
            .collect())
    }
}
