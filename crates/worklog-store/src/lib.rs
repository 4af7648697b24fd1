//! # worklog-store
//!
//! SQLite persistence for the worklog: the schema, a connection handle that
//! refuses WAL on network shares, and typed operations for each table.
//!
//! Every write is built as a [`Statement`] first. The store executes it; the
//! handoff layer can persist the same statement when the database is locked.

pub mod entries;
pub mod error_patterns;
pub mod knowledge;
pub mod memories;
pub mod query;
pub mod recall;
pub mod research;
pub mod schema;
pub mod search;
pub mod statement;
pub mod store;

pub use entries::{EntryRecord, NewEntry};
pub use error_patterns::{ErrorPatternRecord, NewErrorPattern};
pub use knowledge::{KnowledgePatch, KnowledgeRecord, NewKnowledge};
pub use memories::{ConflictPolicy, MemoryPatch, MemoryRecord, NewMemory, clamp_importance};
pub use query::{Filter, Query, Row, SortOrder};
pub use recall::{RecallContext, RecallRequest};
pub use research::{NewResearch, ResearchRecord};
pub use search::SearchHit;
pub use statement::{SqlValue, Statement};
pub use store::{DatabaseOptions, WorklogStore, classify, sqlite_version};
