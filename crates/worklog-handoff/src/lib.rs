//! # worklog-handoff
//!
//! Writes that survive a busy database. A write is retried a bounded number
//! of times; if the database stays locked or unreachable, the statement is
//! saved as a markdown handoff file and replayed later, oldest first.

pub mod document;
pub mod queue;
pub mod retry;
pub mod watch;
pub mod writer;

pub use document::HandoffDocument;
pub use queue::{ClaimedHandoff, HandoffQueue, ProcessReport, hostname};
pub use retry::{AttemptError, RetryPolicy, StatementExecutor, write_with_retry};
pub use watch::WatchOptions;
pub use writer::{RetryingWriter, WriteOutcome};
