use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{Connection, ErrorCode, TransactionBehavior};
use tracing::{debug, info, warn};
use worklog_core::{RowId, Table, WorklogError};

use crate::schema;
use crate::statement::Statement;

const JOURNAL_MODES: &[&str] = &["delete", "truncate", "persist", "memory", "wal", "off"];

/// Connection settings applied when the database is opened.
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub journal_mode: String,
    pub busy_timeout: Duration,
    /// The file lives on a shared mount (SMB/NFS); WAL is refused.
    pub network_share: bool,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            journal_mode: "delete".into(),
            busy_timeout: Duration::from_millis(1000),
            network_share: false,
        }
    }
}

/// Handle to the worklog database. Cheap to clone; clones share one connection.
#[derive(Clone, Debug)]
pub struct WorklogStore {
    db: Arc<Mutex<Connection>>,
    path: String,
    journal_mode: String,
}

impl WorklogStore {
    /// Open or create the worklog database at the given path.
    pub fn open(path: &Path, options: &DatabaseOptions) -> worklog_core::Result<Self> {
        info!(?path, "opening worklog store");

        let requested = options.journal_mode.to_lowercase();
        if !JOURNAL_MODES.contains(&requested.as_str()) {
            return Err(WorklogError::validation(
                "database.journal_mode",
                format!("unknown journal mode '{}'", options.journal_mode),
            ));
        }
        if options.network_share && requested == "wal" {
            return Err(WorklogError::Config(
                "WAL journal mode cannot be used on a network share".into(),
            ));
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let display = path.display().to_string();
        let conn = Connection::open(path).map_err(|e| classify(e, &display))?;
        Self::init(conn, display, &requested, options.busy_timeout)
    }

    /// Open an in-memory database (for tests).
    pub fn open_in_memory() -> worklog_core::Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| classify(e, ":memory:"))?;
        Self::init(conn, ":memory:".into(), "memory", Duration::from_millis(1000))
    }

    fn init(
        conn: Connection,
        path: String,
        requested: &str,
        busy_timeout: Duration,
    ) -> worklog_core::Result<Self> {
        conn.busy_timeout(busy_timeout)
            .map_err(|e| classify(e, &path))?;

        // The mode name is checked against JOURNAL_MODES before it gets here.
        let journal_mode: String = conn
            .query_row(&format!("PRAGMA journal_mode = {requested}"), [], |row| {
                row.get(0)
            })
            .map_err(|e| classify(e, &path))?;
        let journal_mode = journal_mode.to_lowercase();
        if journal_mode != requested {
            warn!(requested, actual = %journal_mode, "journal mode not applied");
        } else {
            debug!(%journal_mode, "journal mode set");
        }

        schema::apply_core(&conn).map_err(|e| classify(e, &path))?;
        schema::apply_curation(&conn).map_err(|e| classify(e, &path))?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            path,
            journal_mode,
        })
    }

    /// Get a reference to the raw database connection (for advanced queries).
    pub fn db(&self) -> parking_lot::MutexGuard<'_, Connection> {
        self.db.lock()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The journal mode SQLite reported after opening.
    pub fn journal_mode(&self) -> &str {
        &self.journal_mode
    }

    /// Convert a SQLite error into the workspace error, with this database's path.
    pub fn sql_err(&self, e: rusqlite::Error) -> WorklogError {
        classify(e, &self.path)
    }

    /// Execute one statement, see [`Statement::execute`].
    pub fn execute(&self, statement: &Statement) -> worklog_core::Result<Option<RowId>> {
        let db = self.db.lock();
        statement.execute(&db).map_err(|e| self.sql_err(e))
    }

    /// Execute an insert that ends in `RETURNING id`.
    pub(crate) fn insert(&self, statement: &Statement) -> worklog_core::Result<RowId> {
        self.execute(statement)?
            .ok_or_else(|| WorklogError::Database("insert returned no row id".into()))
    }

    /// Run `f` inside one write transaction. The write lock is taken up front,
    /// so a busy database fails here rather than halfway through `f`.
    pub fn transaction<T, F>(&self, f: F) -> worklog_core::Result<T>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> worklog_core::Result<T>,
    {
        let mut db = self.db.lock();
        let tx = db
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| self.sql_err(e))?;
        let out = f(&tx)?;
        tx.commit().map_err(|e| self.sql_err(e))?;
        Ok(out)
    }

    /// Row counts for every table, in schema order.
    pub fn table_counts(&self) -> worklog_core::Result<Vec<(Table, i64)>> {
        let db = self.db.lock();
        Table::ALL
            .iter()
            .map(|table| {
                let count: i64 = db
                    .query_row(&format!("SELECT COUNT(*) FROM {}", table.as_str()), [], |r| {
                        r.get(0)
                    })
                    .map_err(|e| self.sql_err(e))?;
                Ok((*table, count))
            })
            .collect()
    }
}

/// Version of the SQLite library linked into the binary.
pub fn sqlite_version() -> &'static str {
    rusqlite::version()
}

/// Map a SQLite failure onto the error kinds the write path routes on.
pub fn classify(e: rusqlite::Error, path: &str) -> WorklogError {
    match e.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
            WorklogError::Locked(e.to_string())
        }
        Some(ErrorCode::CannotOpen | ErrorCode::SystemIoFailure | ErrorCode::NotADatabase) => {
            WorklogError::Connectivity(e.to_string())
        }
        Some(ErrorCode::ReadOnly | ErrorCode::PermissionDenied) => WorklogError::ReadOnly {
            path: path.to_string(),
            hint: "SQLite needs write access to the file and its directory for the journal"
                .into(),
        },
        Some(ErrorCode::ConstraintViolation) => WorklogError::Conflict(e.to_string()),
        _ => match e {
            rusqlite::Error::QueryReturnedNoRows => WorklogError::NotFound(e.to_string()),
            other => WorklogError::Database(other.to_string()),
        },
    }
}
