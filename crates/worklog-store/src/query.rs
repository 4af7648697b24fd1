//! Generic filtered reads over any table.
//!
//! Column names are checked against the live schema before they reach SQL;
//! values are always bound.

use chrono::{Duration, Utc};
use rusqlite::Connection;
use rusqlite::types::ValueRef;
use serde_json::Value as JsonValue;
use worklog_core::{Table, WorklogError, format_timestamp};

use crate::statement::SqlValue;
use crate::store::WorklogStore;

/// A result row: column name to value, in select order.
pub type Row = serde_json::Map<String, JsonValue>;

pub const DEFAULT_LIMIT: usize = 20;
pub const MAX_LIMIT: usize = 100;

#[derive(Debug, Clone)]
pub enum Filter {
    Eq(String, SqlValue),
    /// Case-insensitive substring match.
    Like(String, String),
    /// Timestamp column newer than now minus the duration.
    Since(String, Duration),
    /// Numeric lower bound, inclusive.
    AtLeast(String, f64),
}

impl Filter {
    fn column(&self) -> &str {
        match self {
            Filter::Eq(c, _) | Filter::Like(c, _) | Filter::Since(c, _) | Filter::AtLeast(c, _) => c,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone)]
pub struct Query {
    pub table: Table,
    /// Empty selects every column.
    pub columns: Vec<String>,
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, SortOrder)>,
    pub limit: usize,
    pub offset: usize,
}

impl Query {
    pub fn new(table: Table) -> Self {
        Self {
            table,
            columns: Vec::new(),
            filters: Vec::new(),
            order_by: None,
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, order: SortOrder) -> Self {
        self.order_by = Some((column.into(), order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// WHERE clause plus its parameters, after checking every column name.
    fn where_clause(&self, known: &[String]) -> worklog_core::Result<(String, Vec<SqlValue>)> {
        let mut clauses = Vec::with_capacity(self.filters.len());
        let mut params = Vec::with_capacity(self.filters.len());
        for filter in &self.filters {
            let column = check_column(self.table, filter.column(), known)?;
            let n = params.len() + 1;
            match filter {
                Filter::Eq(_, v) => {
                    clauses.push(format!("{column} = ?{n}"));
                    params.push(v.clone());
                }
                Filter::Like(_, needle) => {
                    clauses.push(format!("{column} LIKE ?{n} ESCAPE '\\'"));
                    params.push(SqlValue::Text(format!("%{}%", escape_like(needle))));
                }
                Filter::Since(_, age) => {
                    clauses.push(format!("{column} > ?{n}"));
                    params.push(SqlValue::Text(format_timestamp(Utc::now() - *age)));
                }
                Filter::AtLeast(_, min) => {
                    clauses.push(format!("{column} >= ?{n}"));
                    params.push(SqlValue::Real(*min));
                }
            }
        }
        let sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        Ok((sql, params))
    }

    fn select_sql(&self, known: &[String]) -> worklog_core::Result<(String, Vec<SqlValue>)> {
        let columns = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns
                .iter()
                .map(|c| check_column(self.table, c, known))
                .collect::<worklog_core::Result<Vec<_>>>()?
                .join(", ")
        };
        let (where_sql, params) = self.where_clause(known)?;
        let mut sql = format!("SELECT {columns} FROM {}{where_sql}", self.table.as_str());
        if let Some((column, order)) = &self.order_by {
            let column = check_column(self.table, column, known)?;
            let dir = match order {
                SortOrder::Asc => "ASC",
                SortOrder::Desc => "DESC",
            };
            sql.push_str(&format!(" ORDER BY {column} {dir}"));
        }
        let limit = self.limit.clamp(1, MAX_LIMIT);
        sql.push_str(&format!(" LIMIT {limit} OFFSET {}", self.offset));
        Ok((sql, params))
    }
}

fn check_column<'a>(table: Table, column: &'a str, known: &[String]) -> worklog_core::Result<&'a str> {
    if known.iter().any(|k| k == column) {
        Ok(column)
    } else {
        Err(WorklogError::validation(
            "column",
            format!("'{column}' is not a column of {table}"),
        ))
    }
}

/// Escape `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern.
pub fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Column names of a table, from the live schema.
pub fn table_columns(conn: &Connection, table: Table) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table.as_str()))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

pub(crate) fn value_to_json(value: ValueRef<'_>) -> JsonValue {
    match value {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Integer(i) => JsonValue::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        ValueRef::Text(t) => JsonValue::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => JsonValue::String(format!("<{} bytes>", b.len())),
    }
}

/// Run a SELECT and collect each row as a [`Row`].
pub fn select_rows(
    conn: &Connection,
    sql: &str,
    params: &[SqlValue],
) -> rusqlite::Result<Vec<Row>> {
    let mut stmt = conn.prepare(sql)?;
    let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), |row| {
            let mut out = Row::new();
            for (i, name) in names.iter().enumerate() {
                out.insert(name.clone(), value_to_json(row.get_ref(i)?));
            }
            Ok(out)
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

impl WorklogStore {
    /// Filtered, ordered, paginated read of one table.
    pub fn query(&self, query: &Query) -> worklog_core::Result<Vec<Row>> {
        let db = self.db();
        let known = table_columns(&db, query.table).map_err(|e| self.sql_err(e))?;
        let (sql, params) = query.select_sql(&known)?;
        tracing::debug!(%sql, "query");
        select_rows(&db, &sql, &params).map_err(|e| self.sql_err(e))
    }

    /// Number of rows matching the query's filters, ignoring limit and offset.
    pub fn count(&self, query: &Query) -> worklog_core::Result<i64> {
        let db = self.db();
        let known = table_columns(&db, query.table).map_err(|e| self.sql_err(e))?;
        let (where_sql, params) = query.where_clause(&known)?;
        db.query_row(
            &format!("SELECT COUNT(*) FROM {}{where_sql}", query.table.as_str()),
            rusqlite::params_from_iter(params.iter()),
            |row| row.get(0),
        )
        .map_err(|e| self.sql_err(e))
    }
}
