use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use worklog_core::{RowId, WorklogError, join_tags, now_timestamp, parse_tags};

use crate::statement::Statement;
use crate::store::WorklogStore;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewErrorPattern {
    pub error_signature: String,
    pub error_message: Option<String>,
    pub platform: Option<String>,
    pub language: Option<String>,
    /// `None` means the pattern applies across projects.
    pub project: Option<String>,
    pub root_cause: Option<String>,
    pub resolution: Option<String>,
    pub prevention_tip: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

pub(crate) fn pattern_key(
    signature: &str,
    platform: Option<&str>,
    language: Option<&str>,
    project: Option<&str>,
) -> String {
    let part = |s: Option<&str>| s.map(|v| v.trim().to_lowercase()).unwrap_or_default();
    [
        part(Some(signature)),
        part(platform),
        part(language),
        part(project),
    ]
    .join("\u{1f}")
}

impl NewErrorPattern {
    /// Identity of a pattern for deduplication.
    pub fn pattern_key(&self) -> String {
        pattern_key(
            &self.error_signature,
            self.platform.as_deref(),
            self.language.as_deref(),
            self.project.as_deref(),
        )
    }

    /// Insert, or count another occurrence of an existing pattern. Resolution
    /// fields that are still empty on the stored row are filled in.
    pub fn statement(&self) -> worklog_core::Result<Statement> {
        if self.error_signature.trim().is_empty() {
            return Err(WorklogError::validation("error_signature", "must not be empty"));
        }
        Ok(Statement::new(
            "INSERT INTO error_patterns (pattern_key, error_signature, error_message, platform, \
             language, project, root_cause, resolution, prevention_tip, occurrence_count, \
             created_at, last_seen, tags) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, ?10, ?10, ?11) \
             ON CONFLICT(pattern_key) DO UPDATE SET \
             occurrence_count = error_patterns.occurrence_count + 1, \
             last_seen = excluded.last_seen, \
             error_message = COALESCE(NULLIF(error_patterns.error_message, ''), excluded.error_message), \
             root_cause = COALESCE(NULLIF(error_patterns.root_cause, ''), excluded.root_cause), \
             resolution = COALESCE(NULLIF(error_patterns.resolution, ''), excluded.resolution), \
             prevention_tip = COALESCE(NULLIF(error_patterns.prevention_tip, ''), excluded.prevention_tip), \
             version = error_patterns.version + 1 \
             RETURNING id",
        )
        .bind(self.pattern_key())
        .bind(self.error_signature.trim())
        .bind(self.error_message.as_deref())
        .bind(self.platform.as_deref())
        .bind(self.language.as_deref())
        .bind(self.project.as_deref())
        .bind(self.root_cause.as_deref())
        .bind(self.resolution.as_deref())
        .bind(self.prevention_tip.as_deref())
        .bind(now_timestamp())
        .bind(join_tags(&self.tags)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPatternRecord {
    pub id: RowId,
    pub error_signature: String,
    pub error_message: Option<String>,
    pub platform: Option<String>,
    pub language: Option<String>,
    pub project: Option<String>,
    pub root_cause: Option<String>,
    pub resolution: Option<String>,
    pub prevention_tip: Option<String>,
    pub occurrence_count: i64,
    pub created_at: String,
    pub last_seen: String,
    pub tags: Vec<String>,
    pub version: i64,
}

const PATTERN_COLUMNS: &str = "id, error_signature, error_message, platform, language, project, \
     root_cause, resolution, prevention_tip, occurrence_count, created_at, last_seen, tags, version";

impl ErrorPatternRecord {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            error_signature: row.get(1)?,
            error_message: row.get(2)?,
            platform: row.get(3)?,
            language: row.get(4)?,
            project: row.get(5)?,
            root_cause: row.get(6)?,
            resolution: row.get(7)?,
            prevention_tip: row.get(8)?,
            occurrence_count: row.get(9)?,
            created_at: row.get(10)?,
            last_seen: row.get(11)?,
            tags: parse_tags(&row.get::<_, Option<String>>(12)?.unwrap_or_default()),
            version: row.get(13)?,
        })
    }

    /// Whether this pattern's signature matches an error message. The
    /// signature is tried as a case-insensitive regex, then as a substring.
    pub fn matches(&self, message: &str) -> bool {
        match RegexBuilder::new(&self.error_signature)
            .case_insensitive(true)
            .build()
        {
            Ok(re) => re.is_match(message),
            Err(_) => message
                .to_lowercase()
                .contains(&self.error_signature.to_lowercase()),
        }
    }
}

impl WorklogStore {
    pub fn record_error_pattern(
        &self,
        pattern: &NewErrorPattern,
    ) -> worklog_core::Result<ErrorPatternRecord> {
        let id = self.insert(&pattern.statement()?)?;
        self.get_error_pattern(id)
    }

    pub fn get_error_pattern(&self, id: RowId) -> worklog_core::Result<ErrorPatternRecord> {
        let db = self.db();
        db.query_row(
            &format!("SELECT {PATTERN_COLUMNS} FROM error_patterns WHERE id = ?1"),
            rusqlite::params![id],
            ErrorPatternRecord::from_row,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                WorklogError::NotFound(format!("no error pattern with id {id}"))
            }
            other => self.sql_err(other),
        })
    }

    /// Known patterns matching `message`, most frequent first. With a platform,
    /// patterns for other platforms are skipped; platform-less ones still apply.
    pub fn match_error(
        &self,
        message: &str,
        platform: Option<&str>,
    ) -> worklog_core::Result<Vec<ErrorPatternRecord>> {
        let db = self.db();
        let mut stmt = db
            .prepare(&format!(
                "SELECT {PATTERN_COLUMNS} FROM error_patterns \
                 WHERE ?1 IS NULL OR platform IS NULL OR platform = ?1 COLLATE NOCASE \
                 ORDER BY occurrence_count DESC, last_seen DESC"
            ))
            .map_err(|e| self.sql_err(e))?;
        let patterns = stmt
            .query_map(rusqlite::params![platform], ErrorPatternRecord::from_row)
            .map_err(|e| self.sql_err(e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| self.sql_err(e))?;
        Ok(patterns.into_iter().filter(|p| p.matches(message)).collect())
    }
}
