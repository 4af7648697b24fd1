#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use worklog_core::{RowId, TaskType, WorklogError};
    use worklog_handoff::*;
    use worklog_store::{ConflictPolicy, DatabaseOptions, NewEntry, NewMemory, Statement, WorklogStore};

    /// Fails with a chosen error a fixed number of times, then delegates.
    struct FlakyExecutor {
        remaining: Mutex<u32>,
        error: fn() -> WorklogError,
        store: WorklogStore,
        calls: Mutex<u32>,
    }

    impl FlakyExecutor {
        fn new(failures: u32, error: fn() -> WorklogError) -> Self {
            Self {
                remaining: Mutex::new(failures),
                error,
                store: WorklogStore::open_in_memory().unwrap(),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    impl StatementExecutor for FlakyExecutor {
        fn execute(&self, statement: &Statement) -> worklog_core::Result<Option<RowId>> {
            *self.calls.lock().unwrap() += 1;
            let mut remaining = self.remaining.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err((self.error)());
            }
            self.store.execute(statement)
        }
    }

    fn locked() -> WorklogError {
        WorklogError::Locked("database is locked".into())
    }

    fn entry(title: &str) -> NewEntry {
        let mut entry = NewEntry::new("claude", TaskType::Debugging, title);
        entry.details = Some("ssh ControlPersist was 0".into());
        entry.tags = vec!["ssh".into(), "timeout".into()];
        entry
    }

    fn write_file(dir: &Path, name: &str, document: &HandoffDocument) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join(name), document.render().unwrap()).unwrap();
    }

    // ── Retry ──────────────────────────────────────────────────

    mod retry {
        use super::*;

        #[tokio::test]
        async fn test_transient_failure_then_success() {
            let executor = FlakyExecutor::new(2, locked);
            let statement = entry("retried").statement().unwrap();
            let id = write_with_retry(&executor, &statement, &RetryPolicy::immediate(3))
                .await
                .unwrap();
            assert!(id.is_some());
            assert_eq!(executor.calls(), 3);
        }

        #[tokio::test]
        async fn test_non_retryable_error_is_not_retried() {
            let executor = FlakyExecutor::new(5, || WorklogError::Conflict("dup".into()));
            let statement = entry("conflict").statement().unwrap();
            let err = write_with_retry(&executor, &statement, &RetryPolicy::immediate(3))
                .await
                .unwrap_err();
            assert_eq!(err.attempts, 1);
            assert!(matches!(err.error, WorklogError::Conflict(_)));
            assert_eq!(executor.calls(), 1);
        }

        #[tokio::test]
        async fn test_deadline_stops_retries() {
            let executor = FlakyExecutor::new(10, locked);
            let policy = RetryPolicy {
                max_attempts: 10,
                backoff_min: Duration::from_millis(50),
                backoff_max: Duration::from_millis(50),
                deadline: Some(Duration::from_millis(10)),
            };
            let statement = entry("deadline").statement().unwrap();
            let err = write_with_retry(&executor, &statement, &policy)
                .await
                .unwrap_err();
            assert_eq!(err.attempts, 1);
            assert!(err.error.is_retryable());
        }

        /// Holds the calling thread the way a busy wait on a locked database does.
        struct SlowExecutor {
            delay: Duration,
            store: WorklogStore,
        }

        impl StatementExecutor for SlowExecutor {
            fn execute(&self, statement: &Statement) -> worklog_core::Result<Option<RowId>> {
                std::thread::sleep(self.delay);
                self.store.execute(statement)
            }
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
        async fn test_slow_write_does_not_stall_other_tasks() {
            let ticks = Arc::new(AtomicU32::new(0));
            let counter = Arc::clone(&ticks);
            let ticker = tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            });
            let write = tokio::spawn(async move {
                let executor = SlowExecutor {
                    delay: Duration::from_millis(400),
                    store: WorklogStore::open_in_memory().unwrap(),
                };
                let statement = entry("slow").statement().unwrap();
                write_with_retry(&executor, &statement, &RetryPolicy::immediate(1)).await
            });

            let id = write.await.unwrap().unwrap();
            ticker.abort();
            assert!(id.is_some());
            assert!(ticks.load(Ordering::SeqCst) >= 5);
        }

        #[test]
        fn test_delay_within_bounds() {
            let policy = RetryPolicy {
                max_attempts: 3,
                backoff_min: Duration::from_millis(100),
                backoff_max: Duration::from_millis(200),
                deadline: None,
            };
            for _ in 0..50 {
                let delay = policy.next_delay();
                assert!(delay >= Duration::from_millis(100));
                assert!(delay <= Duration::from_millis(200));
            }
        }

        #[test]
        fn test_policy_from_config() {
            let config = worklog_config::RetryConfig::default();
            let policy = RetryPolicy::from(&config);
            assert_eq!(policy.max_attempts, config.max_attempts);
            assert_eq!(policy.backoff_min, config.backoff_min());
        }
    }

    // ── Documents ──────────────────────────────────────────────

    mod document {
        use super::*;

        #[test]
        fn test_render_then_parse_preserves_statement() {
            let statement = entry("Fixed SSH\ntimeout").statement().unwrap();
            let doc = HandoffDocument::new("entry: Fixed SSH\ntimeout", statement, "buildhost")
                .with_failure(3, "database is locked");
            let text = doc.render().unwrap();
            assert!(text.starts_with("---\n"));
            assert!(text.contains("```sql\nINSERT INTO entries"));

            let parsed = HandoffDocument::parse(&text, Path::new("x.md")).unwrap();
            assert_eq!(parsed.statement, doc.statement);
            assert_eq!(parsed.title, "entry: Fixed SSH timeout");
            assert_eq!(parsed.attempts, 3);
            assert_eq!(parsed.last_error.as_deref(), Some("database is locked"));
        }

        #[test]
        fn test_missing_frontmatter_reports_line() {
            let err = HandoffDocument::parse("\n# no frontmatter\n", Path::new("a.md")).unwrap_err();
            match err {
                WorklogError::Parse { line, .. } => assert_eq!(line, 2),
                other => panic!("unexpected {other:?}"),
            }
        }

        #[test]
        fn test_bad_params_report_json_line() {
            let text = "---\ntitle: t\ncreated_at: now\n---\n\n```sql\nSELECT 1\n```\n\n```json\n[1,\n  oops]\n```\n";
            let err = HandoffDocument::parse(text, Path::new("b.md")).unwrap_err();
            match err {
                WorklogError::Parse { line, reason, .. } => {
                    assert_eq!(line, 12);
                    assert!(reason.contains("invalid parameters"));
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        #[test]
        fn test_missing_sql_block() {
            let text = "---\ntitle: t\ncreated_at: now\n---\n\nnothing here\n";
            assert!(matches!(
                HandoffDocument::parse(text, Path::new("c.md")),
                Err(WorklogError::Parse { .. })
            ));
        }
    }

    // ── Queue ──────────────────────────────────────────────────

    mod queue {
        use super::*;

        fn doc(title: &str) -> HandoffDocument {
            HandoffDocument::new(title, entry(title).statement().unwrap(), "test")
        }

        #[test]
        fn test_pending_is_fifo_by_stamp() {
            let dir = tempfile::tempdir().unwrap();
            write_file(dir.path(), "zeta-20261019T080000000Z.md", &doc("first"));
            write_file(dir.path(), "alpha-20261019T090000000Z.md", &doc("second"));
            write_file(dir.path(), "beta-20261019T083000000Z.md", &doc("middle"));
            std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

            let queue = HandoffQueue::with_host(dir.path(), "me");
            let names: Vec<String> = queue
                .pending()
                .unwrap()
                .iter()
                .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
                .collect();
            assert_eq!(
                names,
                vec![
                    "zeta-20261019T080000000Z.md",
                    "beta-20261019T083000000Z.md",
                    "alpha-20261019T090000000Z.md",
                ]
            );
        }

        #[test]
        fn test_missing_dir_has_nothing_pending() {
            let dir = tempfile::tempdir().unwrap();
            let queue = HandoffQueue::with_host(dir.path().join("absent"), "me");
            assert!(queue.pending().unwrap().is_empty());
        }

        #[test]
        fn test_create_names_do_not_collide() {
            let dir = tempfile::tempdir().unwrap();
            let queue = HandoffQueue::with_host(dir.path(), "host one");
            let a = queue.create(&doc("a")).unwrap();
            let b = queue.create(&doc("b")).unwrap();
            assert_ne!(a, b);
            let name = a.file_name().unwrap().to_string_lossy().into_owned();
            assert!(name.starts_with("host_one-"), "{name}");
            assert_eq!(queue.pending().unwrap(), vec![a, b]);
        }

        #[test]
        fn test_create_publishes_only_the_finished_file() {
            let dir = tempfile::tempdir().unwrap();
            let queue = HandoffQueue::with_host(dir.path(), "me");
            let path = queue.create(&doc("whole")).unwrap();

            let names: Vec<String> = std::fs::read_dir(dir.path())
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            assert_eq!(names.len(), 1, "{names:?}");
            assert!(names[0].ends_with(".md"));
            let read = HandoffDocument::read(&path).unwrap();
            assert_eq!(read.title, "whole");
        }

        #[test]
        fn test_create_into_unusable_dir_is_handoff_failure() {
            let dir = tempfile::tempdir().unwrap();
            let blocker = dir.path().join("not-a-dir");
            std::fs::write(&blocker, "file").unwrap();
            let queue = HandoffQueue::with_host(blocker.join("handoffs"), "me");
            let err = queue.create(&doc("nowhere")).unwrap_err();
            assert!(matches!(err, WorklogError::HandoffFailed { .. }), "{err:?}");
        }

        #[test]
        fn test_done_markers_are_never_requeued() {
            let dir = tempfile::tempdir().unwrap();
            write_file(dir.path(), "me-20261019T080000000Z.md.done", &doc("applied"));
            let queue = HandoffQueue::with_host(dir.path(), "me");
            assert!(queue.pending().unwrap().is_empty());
            assert!(queue.claimed().unwrap().is_empty());
            assert_eq!(queue.recover_stale(Duration::ZERO).unwrap(), 0);
            assert!(queue.pending().unwrap().is_empty());
        }

        #[test]
        fn test_complete_tolerates_missing_claim() {
            let dir = tempfile::tempdir().unwrap();
            let queue = HandoffQueue::with_host(dir.path(), "me");
            let path = queue.create(&doc("gone")).unwrap();
            let claim = queue.claim(&path).unwrap().unwrap();
            std::fs::remove_file(claim.path()).unwrap();
            claim.complete().unwrap();
            assert!(queue.claimed().unwrap().is_empty());
        }

        #[test]
        fn test_second_claim_loses() {
            let dir = tempfile::tempdir().unwrap();
            let queue = HandoffQueue::with_host(dir.path(), "me");
            let path = queue.create(&doc("contested")).unwrap();

            let first = queue.claim(&path).unwrap();
            assert!(first.is_some());
            assert!(queue.claim(&path).unwrap().is_none());
            assert!(queue.pending().unwrap().is_empty());
            assert_eq!(queue.claimed().unwrap().len(), 1);

            first.unwrap().release().unwrap();
            assert_eq!(queue.pending().unwrap(), vec![path]);
        }

        #[test]
        fn test_recover_stale_claims() {
            let dir = tempfile::tempdir().unwrap();
            let queue = HandoffQueue::with_host(dir.path(), "me");
            let path = queue.create(&doc("abandoned")).unwrap();
            let claim = queue.claim(&path).unwrap().unwrap();
            drop(claim);

            assert_eq!(queue.recover_stale(Duration::from_secs(3600)).unwrap(), 0);
            assert_eq!(queue.recover_stale(Duration::ZERO).unwrap(), 1);
            assert_eq!(queue.pending().unwrap(), vec![path]);
        }

        #[test]
        fn test_process_applies_and_removes() {
            let dir = tempfile::tempdir().unwrap();
            let queue = HandoffQueue::with_host(dir.path(), "me");
            queue.create(&doc("one")).unwrap();
            queue.create(&doc("two")).unwrap();

            let store = WorklogStore::open_in_memory().unwrap();
            let report = queue.process(&store).unwrap();
            assert_eq!(report.applied, 2);
            assert_eq!(report.failed, 0);
            assert!(queue.pending().unwrap().is_empty());
            assert_eq!(store.get_entry(1).unwrap().title, "one");
            assert_eq!(store.get_entry(2).unwrap().title, "two");
        }

        #[test]
        fn test_process_stops_at_lock_and_keeps_order() {
            let dir = tempfile::tempdir().unwrap();
            let queue = HandoffQueue::with_host(dir.path(), "me");
            let first = queue.create(&doc("first")).unwrap();
            let second = queue.create(&doc("second")).unwrap();

            let executor = FlakyExecutor::new(1, locked);
            let report = queue.process(&executor).unwrap();
            assert_eq!(report.applied, 0);
            assert_eq!(report.failed, 1);
            assert!(report.stalled);
            assert_eq!(executor.calls(), 1);
            assert_eq!(queue.pending().unwrap(), vec![first, second]);

            let report = queue.process(&executor).unwrap();
            assert_eq!(report.applied, 2);
            assert!(!report.stalled);
            assert_eq!(executor.store.get_entry(1).unwrap().title, "first");
        }

        #[test]
        fn test_unparseable_file_stays_and_others_proceed() {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("me-20261019T080000000Z.md"), "garbage").unwrap();
            write_file(dir.path(), "me-20261019T090000000Z.md", &doc("good"));

            let queue = HandoffQueue::with_host(dir.path(), "me");
            let store = WorklogStore::open_in_memory().unwrap();
            let report = queue.process(&store).unwrap();
            assert_eq!(report.applied, 1);
            assert_eq!(report.failed, 1);
            assert_eq!(report.errors.len(), 1);
            assert_eq!(queue.pending().unwrap().len(), 1);
        }
    }

    // ── Writer ─────────────────────────────────────────────────

    mod writer {
        use super::*;

        #[tokio::test]
        async fn test_exhausted_retries_defer_then_replay_identically() {
            let dir = tempfile::tempdir().unwrap();
            let queue = HandoffQueue::with_host(dir.path(), "me");
            let executor = FlakyExecutor::new(3, locked);
            let writer = RetryingWriter::new(&executor, queue.clone(), RetryPolicy::immediate(3), "me");

            let outcome = writer.log_entry(&entry("Fixed SSH timeout")).await.unwrap();
            let WriteOutcome::Deferred { path } = outcome.clone() else {
                panic!("expected deferral, got {outcome:?}");
            };
            assert!(outcome.is_deferred());
            assert!(matches!(outcome.rowid(), Err(WorklogError::Deferred { .. })));

            let document = HandoffDocument::read(&path).unwrap();
            assert_eq!(document.attempts, 3);
            assert!(document.last_error.as_deref().unwrap().contains("locked"));

            let direct = WorklogStore::open_in_memory().unwrap();
            direct.execute(document.statement()).unwrap();

            let report = queue.process(&executor).unwrap();
            assert_eq!(report.applied, 1);
            assert!(!path.exists());

            let replayed = executor.store.get_entry(1).unwrap();
            let expected = direct.get_entry(1).unwrap();
            assert_eq!(replayed.title, "Fixed SSH timeout");
            assert_eq!(replayed.timestamp, expected.timestamp);
            assert_eq!(replayed.tags, expected.tags);
            assert_eq!(replayed.details, expected.details);
        }

        #[tokio::test]
        async fn test_applied_write_returns_rowid() {
            let dir = tempfile::tempdir().unwrap();
            let store = WorklogStore::open_in_memory().unwrap();
            let writer = RetryingWriter::new(
                store.clone(),
                HandoffQueue::with_host(dir.path(), "me"),
                RetryPolicy::immediate(3),
                "me",
            );
            let outcome = writer.log_entry(&entry("direct")).await.unwrap();
            assert_eq!(outcome.rowid().unwrap(), Some(1));
            assert!(writer.queue().pending().unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_conflict_is_returned_not_deferred() {
            let dir = tempfile::tempdir().unwrap();
            let store = WorklogStore::open_in_memory().unwrap();
            let writer = RetryingWriter::new(
                store,
                HandoffQueue::with_host(dir.path(), "me"),
                RetryPolicy::immediate(3),
                "me",
            );
            let memory = NewMemory::new("project:deploy-target", "prod-2");
            writer.upsert_memory(&memory, ConflictPolicy::Reject).await.unwrap();
            let err = writer
                .upsert_memory(&memory, ConflictPolicy::Reject)
                .await
                .unwrap_err();
            assert!(matches!(err, WorklogError::Conflict(_)), "{err:?}");
            assert!(writer.queue().pending().unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_validation_fails_before_any_attempt() {
            let dir = tempfile::tempdir().unwrap();
            let executor = FlakyExecutor::new(0, locked);
            let writer = RetryingWriter::new(
                &executor,
                HandoffQueue::with_host(dir.path(), "me"),
                RetryPolicy::immediate(3),
                "me",
            );
            let err = writer.log_entry(&entry("  ")).await.unwrap_err();
            assert!(matches!(err, WorklogError::Validation { .. }));
            assert_eq!(executor.calls(), 0);
        }

        #[tokio::test]
        async fn test_unwritable_handoff_dir_loses_write_loudly() {
            let dir = tempfile::tempdir().unwrap();
            let blocker = dir.path().join("not-a-dir");
            std::fs::write(&blocker, "file").unwrap();
            let executor = FlakyExecutor::new(10, locked);
            let writer = RetryingWriter::new(
                &executor,
                HandoffQueue::with_host(blocker.join("handoffs"), "me"),
                RetryPolicy::immediate(2),
                "me",
            );
            let err = writer.log_entry(&entry("doomed")).await.unwrap_err();
            assert!(matches!(err, WorklogError::HandoffFailed { .. }), "{err:?}");
        }

        #[tokio::test]
        async fn test_real_lock_defers_write() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("worklog.db");
            let options = DatabaseOptions {
                busy_timeout: Duration::ZERO,
                ..Default::default()
            };
            let holder = WorklogStore::open(&path, &options).unwrap();
            let store = WorklogStore::open(&path, &options).unwrap();
            let queue = HandoffQueue::with_host(dir.path().join("handoffs"), "me");
            let writer = RetryingWriter::new(store.clone(), queue.clone(), RetryPolicy::immediate(3), "me");

            holder.db().execute_batch("BEGIN EXCLUSIVE;").unwrap();
            let outcome = writer.log_entry(&entry("while locked")).await.unwrap();
            assert!(outcome.is_deferred());
            holder.db().execute_batch("ROLLBACK;").unwrap();

            let report = queue.process(&store).unwrap();
            assert_eq!(report.applied, 1);
            assert_eq!(store.get_entry(1).unwrap().title, "while locked");
        }
    }

    // ── Watch ──────────────────────────────────────────────────

    mod watch {
        use super::*;

        #[tokio::test]
        async fn test_watch_drains_existing_files_until_shutdown() {
            let dir = tempfile::tempdir().unwrap();
            let queue = HandoffQueue::with_host(dir.path(), "me");
            queue
                .create(&HandoffDocument::new(
                    "entry: watched",
                    entry("watched").statement().unwrap(),
                    "me",
                ))
                .unwrap();

            let store = WorklogStore::open_in_memory().unwrap();
            let options = WatchOptions {
                poll_interval: Duration::from_millis(20),
                stale_after: Duration::from_secs(60),
            };
            let report = queue
                .watch(&store, &options, tokio::time::sleep(Duration::from_millis(300)))
                .await
                .unwrap();
            assert_eq!(report.applied, 1);
            assert!(queue.pending().unwrap().is_empty());
            assert_eq!(store.get_entry(1).unwrap().title, "watched");
        }

        #[tokio::test]
        async fn test_watch_waits_for_tick_while_database_stays_locked() {
            let dir = tempfile::tempdir().unwrap();
            let queue = HandoffQueue::with_host(dir.path(), "me");
            let path = queue
                .create(&HandoffDocument::new(
                    "entry: stuck",
                    entry("stuck").statement().unwrap(),
                    "me",
                ))
                .unwrap();

            let executor = FlakyExecutor::new(u32::MAX, locked);
            let options = WatchOptions {
                poll_interval: Duration::from_secs(30),
                stale_after: Duration::from_secs(600),
            };
            let report = queue
                .watch(&executor, &options, tokio::time::sleep(Duration::from_millis(500)))
                .await
                .unwrap();
            assert!(executor.calls() <= 2, "replayed {} times", executor.calls());
            assert_eq!(report.applied, 0);
            assert!(report.stalled);
            assert_eq!(queue.pending().unwrap(), vec![path]);
        }
    }
}
