use std::future::Future;
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event as NotifyEvent, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use worklog_core::WorklogError;

use crate::queue::{HandoffQueue, ProcessReport};
use crate::retry::{StatementExecutor, run_blocking};

#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Fallback rescan interval; file events on network shares are unreliable.
    pub poll_interval: Duration,
    /// Claims older than this are assumed abandoned.
    pub stale_after: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            stale_after: Duration::from_secs(600),
        }
    }
}

/// Whether a notify event can mean a new pending handoff. Claim renames and
/// deletions by the replay itself are not.
fn announces_handoff(event: &NotifyEvent) -> bool {
    let relevant = matches!(
        event.kind,
        EventKind::Create(_)
            | EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Both | RenameMode::Any))
            | EventKind::Modify(ModifyKind::Data(_))
    );
    relevant
        && event
            .paths
            .iter()
            .any(|p| p.extension().is_some_and(|ext| ext == "md"))
}

impl HandoffQueue {
    /// Replay handoffs whenever the directory changes (and on every poll tick)
    /// until `shutdown` resolves. Returns the combined report.
    ///
    /// After a pass stalls on a busy database, file events are ignored until
    /// the next tick: releasing the failed claim renames the file back, and
    /// that rename must not start another pass straight away.
    pub async fn watch<E, S>(
        &self,
        executor: &E,
        options: &WatchOptions,
        shutdown: S,
    ) -> worklog_core::Result<ProcessReport>
    where
        E: StatementExecutor + ?Sized,
        S: Future<Output = ()>,
    {
        std::fs::create_dir_all(self.dir())?;
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let mut watcher =
            notify::recommended_watcher(move |res: Result<NotifyEvent, notify::Error>| match res {
                Ok(event) => {
                    if announces_handoff(&event) {
                        let _ = tx.send(());
                    }
                }
                Err(e) => warn!(error = %e, "handoff watcher error"),
            })
            .map_err(|e| WorklogError::Config(format!("failed to create file watcher: {e}")))?;
        watcher
            .watch(self.dir(), RecursiveMode::NonRecursive)
            .map_err(|e| WorklogError::Config(format!("failed to watch handoff directory: {e}")))?;

        info!(dir = ?self.dir(), "watching handoff directory");
        let mut total = ProcessReport::default();
        let mut stalled = false;
        let mut ticker = tokio::time::interval(options.poll_interval.max(Duration::from_millis(10)));
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                event = rx.recv() => {
                    if event.is_none() {
                        break;
                    }
                    // Coalesce a burst of events into one pass.
                    while rx.try_recv().is_ok() {}
                    if stalled {
                        continue;
                    }
                    debug!("handoff directory changed");
                }
                _ = ticker.tick() => {}
            }
            match self.recover_stale(options.stale_after) {
                Ok(0) => {}
                Ok(n) => info!(released = n, "released stale claims"),
                Err(e) => warn!(error = %e, "stale claim recovery failed"),
            }
            match run_blocking(|| self.process(executor)) {
                Ok(report) => {
                    stalled = report.stalled;
                    if stalled {
                        debug!(retry_in = ?options.poll_interval, "database busy, waiting for next tick");
                    }
                    total.merge(report);
                }
                Err(e) => {
                    stalled = true;
                    warn!(error = %e, "handoff pass failed");
                }
            }
        }
        info!(applied = total.applied, failed = total.failed, "handoff watcher stopped");
        Ok(total)
    }
}
