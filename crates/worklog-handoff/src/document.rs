//! The on-disk handoff format.
//!
//! ````text
//! ---
//! title: entry: Fixed SSH timeout
//! origin: buildhost
//! created_at: 2026-10-19T08:15:02.417Z
//! attempts: 3
//! last_error: database is locked: database is locked
//! ---
//!
//! # Deferred worklog write
//! ...
//! ```sql
//! INSERT INTO entries (...) VALUES (?1, ...) RETURNING id
//! ```
//!
//! ```json
//! ["2026-10-19 08:14:41", "claude", ...]
//! ```
//! ````

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use worklog_core::WorklogError;
use worklog_store::{SqlValue, Statement};

const SQL_FENCE: &str = "```sql";
const JSON_FENCE: &str = "```json";
const FENCE_END: &str = "```";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandoffDocument {
    pub title: String,
    pub origin: String,
    /// RFC 3339 with milliseconds.
    pub created_at: String,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub statement: Statement,
}

impl HandoffDocument {
    pub fn new(title: impl Into<String>, statement: Statement, origin: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            origin: origin.into(),
            created_at: Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
            attempts: 0,
            last_error: None,
            statement,
        }
    }

    /// Record why the direct write was given up.
    pub fn with_failure(mut self, attempts: u32, last_error: impl Into<String>) -> Self {
        self.attempts = attempts;
        self.last_error = Some(last_error.into());
        self
    }

    /// The statement to replay.
    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    pub fn render(&self) -> worklog_core::Result<String> {
        let mut out = String::new();
        out.push_str("---\n");
        out.push_str(&format!("title: {}\n", one_line(&self.title)));
        out.push_str(&format!("origin: {}\n", one_line(&self.origin)));
        out.push_str(&format!("created_at: {}\n", self.created_at));
        out.push_str(&format!("attempts: {}\n", self.attempts));
        if let Some(err) = &self.last_error {
            out.push_str(&format!("last_error: {}\n", one_line(err)));
        }
        out.push_str("---\n\n");
        out.push_str("# Deferred worklog write\n\n");
        out.push_str(
            "The shared database was unavailable when this write was made. \
             `worklog handoff process` applies it and removes this file.\n\n",
        );
        out.push_str(SQL_FENCE);
        out.push('\n');
        out.push_str(self.statement.sql.trim());
        out.push('\n');
        out.push_str(FENCE_END);
        out.push_str("\n\n");
        out.push_str(JSON_FENCE);
        out.push('\n');
        out.push_str(&serde_json::to_string_pretty(&self.statement.params)?);
        out.push('\n');
        out.push_str(FENCE_END);
        out.push('\n');
        Ok(out)
    }

    /// Parse a handoff file's contents; `path` is only used for error context.
    pub fn parse(content: &str, path: &Path) -> worklog_core::Result<Self> {
        let err = |line: usize, reason: &str| WorklogError::Parse {
            path: path.to_path_buf(),
            line,
            reason: reason.to_string(),
        };
        let lines: Vec<&str> = content.lines().collect();
        let mut i = 0;
        while i < lines.len() && lines[i].trim().is_empty() {
            i += 1;
        }
        if lines.get(i).map(|l| l.trim()) != Some("---") {
            return Err(err(i + 1, "handoff must start with frontmatter (---)"));
        }
        i += 1;

        let mut title = None;
        let mut origin = String::new();
        let mut created_at = None;
        let mut attempts = 0;
        let mut last_error = None;
        loop {
            let Some(line) = lines.get(i) else {
                return Err(err(lines.len(), "missing closing --- for frontmatter"));
            };
            let line = line.trim();
            i += 1;
            if line == "---" {
                break;
            }
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                return Err(err(i, "expected `key: value`"));
            };
            let value = value.trim().to_string();
            match key.trim() {
                "title" => title = Some(value),
                "origin" => origin = value,
                "created_at" => created_at = Some(value),
                "attempts" => {
                    attempts = value
                        .parse()
                        .map_err(|_| err(i, "attempts must be a non-negative integer"))?
                }
                "last_error" => last_error = Some(value).filter(|v| !v.is_empty()),
                _ => {}
            }
        }
        let title = title.ok_or_else(|| err(1, "frontmatter is missing `title`"))?;
        let created_at = created_at.ok_or_else(|| err(1, "frontmatter is missing `created_at`"))?;

        let (sql_start, sql) = fenced_block(&lines, i, SQL_FENCE)
            .ok_or_else(|| err(lines.len(), "missing ```sql block"))?;
        let (json_start, json) = fenced_block(&lines, sql_start, JSON_FENCE)
            .ok_or_else(|| err(lines.len(), "missing ```json parameter block"))?;
        if sql.trim().is_empty() {
            return Err(err(sql_start, "empty ```sql block"));
        }
        let params: Vec<SqlValue> = serde_json::from_str(&json).map_err(|e| {
            err(
                json_start + e.line(),
                format!("invalid parameters: {e}").as_str(),
            )
        })?;

        Ok(Self {
            title,
            origin,
            created_at,
            attempts,
            last_error,
            statement: Statement { sql, params },
        })
    }

    pub fn read(path: &Path) -> worklog_core::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content, path)
    }
}

/// Find the first block opened by `fence` at or after line `from`. Returns the
/// 1-based line of the opening fence and the block's contents.
fn fenced_block(lines: &[&str], from: usize, fence: &str) -> Option<(usize, String)> {
    let open = (from..lines.len()).find(|&n| lines[n].trim() == fence)?;
    let close = (open + 1..lines.len()).find(|&n| lines[n].trim() == FENCE_END)?;
    Some((open + 1, lines[open + 1..close].join("\n")))
}

fn one_line(s: &str) -> String {
    s.replace(['\r', '\n'], " ")
}

/// The file a handoff for `path` is renamed to while being replayed.
pub(crate) fn claimed_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".claimed");
    PathBuf::from(name)
}
