#[cfg(test)]
mod tests {
    use std::time::Duration;

    use worklog_core::{
        KnowledgeCategory, MemoryStatus, MemoryType, ResearchStatus, Table, TaskType,
        WorklogError,
    };
    use worklog_store::*;

    fn store() -> WorklogStore {
        WorklogStore::open_in_memory().unwrap()
    }

    // ── Opening ────────────────────────────────────────────────

    mod open {
        use super::*;

        #[test]
        fn test_open_file_uses_delete_journal() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("nested").join("worklog.db");
            let store = WorklogStore::open(&path, &DatabaseOptions::default()).unwrap();
            assert!(path.exists());
            assert_eq!(store.journal_mode(), "delete");
        }

        #[test]
        fn test_wal_refused_on_network_share() {
            let dir = tempfile::tempdir().unwrap();
            let options = DatabaseOptions {
                journal_mode: "wal".into(),
                network_share: true,
                ..Default::default()
            };
            let result = WorklogStore::open(&dir.path().join("w.db"), &options);
            assert!(matches!(result, Err(WorklogError::Config(_))));
        }

        #[test]
        fn test_unknown_journal_mode_rejected() {
            let dir = tempfile::tempdir().unwrap();
            let options = DatabaseOptions {
                journal_mode: "delete; DROP TABLE entries".into(),
                ..Default::default()
            };
            let result = WorklogStore::open(&dir.path().join("w.db"), &options);
            assert!(matches!(result, Err(WorklogError::Validation { .. })));
        }

        #[test]
        fn test_schema_is_idempotent() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("worklog.db");
            {
                let store = WorklogStore::open(&path, &DatabaseOptions::default()).unwrap();
                store
                    .log_entry(&NewEntry::new("claude", TaskType::Maintenance, "first"))
                    .unwrap();
            }
            let store = WorklogStore::open(&path, &DatabaseOptions::default()).unwrap();
            let counts = store.table_counts().unwrap();
            assert_eq!(counts.len(), Table::ALL.len());
            assert!(counts.contains(&(Table::Entries, 1)));
        }

        #[test]
        fn test_garbage_file_is_connectivity_failure() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("worklog.db");
            let garbage: Vec<u8> = (0..4096u32).map(|i| (i * 31 % 251) as u8).collect();
            std::fs::write(&path, garbage).unwrap();

            let err = WorklogStore::open(&path, &DatabaseOptions::default()).unwrap_err();
            assert!(matches!(err, WorklogError::Connectivity(_)), "{err:?}");
            assert!(err.is_retryable());
        }

        /// The first shared schema, before version columns and the error
        /// pattern and research extensions.
        const FIRST_SCHEMA: &str = "
            CREATE TABLE memories (
                id INTEGER PRIMARY KEY AUTOINCREMENT, key TEXT UNIQUE NOT NULL,
                content TEXT NOT NULL, summary TEXT, memory_type TEXT DEFAULT 'fact',
                importance INTEGER DEFAULT 5, status TEXT DEFAULT 'staging', tags TEXT,
                source_agent TEXT, system TEXT, access_count INTEGER DEFAULT 0,
                last_accessed TIMESTAMP, promoted_at TIMESTAMP,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP);
            CREATE TABLE knowledge_base (
                id INTEGER PRIMARY KEY AUTOINCREMENT, category TEXT NOT NULL,
                title TEXT NOT NULL, content TEXT NOT NULL, tags TEXT, source_agent TEXT,
                system TEXT DEFAULT 'shared', is_protocol INTEGER DEFAULT 0, source_url TEXT,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP, UNIQUE(category, title));
            CREATE TABLE entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT, timestamp TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                agent TEXT DEFAULT 'claude', task_type TEXT NOT NULL, title TEXT NOT NULL,
                details TEXT, decision_rationale TEXT, outcome TEXT, tags TEXT, related_files TEXT);
            CREATE TABLE research (
                id INTEGER PRIMARY KEY AUTOINCREMENT, source_type TEXT NOT NULL,
                title TEXT NOT NULL, summary TEXT, key_points TEXT,
                relevance_score INTEGER DEFAULT 5, tags TEXT, status TEXT DEFAULT 'new',
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP);
            CREATE TABLE error_patterns (
                id INTEGER PRIMARY KEY AUTOINCREMENT, error_signature TEXT, error_message TEXT,
                platform TEXT, language TEXT, root_cause TEXT, resolution TEXT,
                prevention_tip TEXT, tags TEXT, created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP);
            INSERT INTO memories (key, content) VALUES ('nas-path', '/mnt/nas/worklog');
            INSERT INTO knowledge_base (category, title, content) VALUES ('security', 'Keys', 'rotate');
            INSERT INTO error_patterns (error_signature, platform) VALUES ('EACCES', 'linux');
            INSERT INTO error_patterns (error_signature, platform) VALUES ('eacces', 'Linux');
        ";

        #[test]
        fn test_first_schema_database_is_upgraded_in_place() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("worklog.db");
            rusqlite::Connection::open(&path)
                .unwrap()
                .execute_batch(FIRST_SCHEMA)
                .unwrap();

            let store = WorklogStore::open(&path, &DatabaseOptions::default()).unwrap();
            let old = store.get_knowledge(1).unwrap();
            assert_eq!(old.category, "security");
            assert_eq!(old.version, 1);
            let id = store
                .store_knowledge(&NewKnowledge::new(KnowledgeCategory::Decisions, "Journal", "DELETE"))
                .unwrap();
            assert_eq!(store.get_knowledge(id).unwrap().version, 1);

            let memory = store.get_memory("nas-path").unwrap();
            assert_eq!(memory.content, "/mnt/nas/worklog");
            assert_eq!(memory.version, 1);

            // The two old rows share a key; the oldest keeps it and absorbs repeats.
            let repeat = store
                .record_error_pattern(&NewErrorPattern {
                    error_signature: "EACCES".into(),
                    platform: Some("linux".into()),
                    ..Default::default()
                })
                .unwrap();
            assert_eq!(repeat.id, 1);
            assert_eq!(repeat.occurrence_count, 2);

            let research = NewResearch {
                source_type: "article".into(),
                source_url: Some("https://sqlite.org/lockingv3.html".into()),
                title: "File locking".into(),
                ..Default::default()
            };
            store.store_research(&research).unwrap();
            assert!(matches!(
                store.store_research(&research),
                Err(WorklogError::Conflict(_))
            ));
            drop(store);

            let reopened = WorklogStore::open(&path, &DatabaseOptions::default()).unwrap();
            assert_eq!(reopened.get_knowledge(1).unwrap().version, 1);
        }

        #[test]
        fn test_locked_database_is_classified() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("worklog.db");
            let options = DatabaseOptions {
                busy_timeout: Duration::ZERO,
                ..Default::default()
            };
            let holder = WorklogStore::open(&path, &options).unwrap();
            let writer = WorklogStore::open(&path, &options).unwrap();
            holder.db().execute_batch("BEGIN EXCLUSIVE;").unwrap();

            let err = writer
                .log_entry(&NewEntry::new("claude", TaskType::Debugging, "blocked"))
                .unwrap_err();
            assert!(matches!(err, WorklogError::Locked(_)), "{err:?}");
            assert!(err.is_retryable());

            holder.db().execute_batch("ROLLBACK;").unwrap();
            assert!(
                writer
                    .log_entry(&NewEntry::new("claude", TaskType::Debugging, "unblocked"))
                    .is_ok()
            );
        }
    }

    // ── Entries ────────────────────────────────────────────────

    mod entries {
        use super::*;

        #[test]
        fn test_debugging_entry_end_to_end() {
            let store = store();
            let mut entry = NewEntry::new(
                "claude",
                TaskType::Debugging,
                "Fixed SSH timeout on build host",
            );
            entry.details = Some("ServerAliveInterval was unset; sessions dropped after 60s".into());
            entry.outcome = Some("Set ServerAliveInterval 30 in ssh_config".into());
            entry.tags = vec!["ssh".into(), "networking".into(), "ssh".into()];
            entry.related_files = vec!["/etc/ssh/ssh_config".into()];

            let id = store.log_entry(&entry).unwrap();
            let stored = store.get_entry(id).unwrap();
            assert_eq!(stored.task_type, "debugging");
            assert_eq!(stored.tags, vec!["ssh", "networking"]);
            assert_eq!(stored.related_files, vec!["/etc/ssh/ssh_config"]);

            let hits = store.search("ssh timeout", &[], 10).unwrap();
            assert_eq!(hits.len(), 1);
            assert_eq!(hits[0].table, Table::Entries);
            assert_eq!(hits[0].id, id);

            let recent = store.recent_entries(Some("claude"), 1, 10).unwrap();
            assert_eq!(recent.len(), 1);

            let rows = store
                .query(
                    &Query::new(Table::Entries)
                        .filter(Filter::Eq("task_type".into(), "debugging".into())),
                )
                .unwrap();
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0]["title"], "Fixed SSH timeout on build host");
        }

        #[test]
        fn test_empty_title_rejected() {
            let store = store();
            let err = store
                .log_entry(&NewEntry::new("claude", TaskType::Research, "   "))
                .unwrap_err();
            assert!(matches!(err, WorklogError::Validation { ref field, .. } if field == "title"));
        }

        #[test]
        fn test_recent_entries_excludes_old() {
            let store = store();
            store
                .log_entry(&NewEntry::new("claude", TaskType::Deployment, "today"))
                .unwrap();
            store
                .db()
                .execute(
                    "INSERT INTO entries (timestamp, agent, task_type, title) \
                     VALUES ('2020-01-01 00:00:00', 'claude', 'deployment', 'ancient')",
                    [],
                )
                .unwrap();
            let recent = store.recent_entries(None, 7, 10).unwrap();
            assert_eq!(recent.len(), 1);
            assert_eq!(recent[0].title, "today");
        }
    }

    // ── Knowledge ──────────────────────────────────────────────

    mod knowledge {
        use super::*;

        #[test]
        fn test_knowledge_roundtrip() {
            let store = store();
            let mut item = NewKnowledge::new(
                KnowledgeCategory::Infrastructure,
                "NAS mount options",
                "Use vers=3.0,nobrl for SQLite over SMB",
            );
            item.tags = vec!["smb".into(), "sqlite".into()];
            let id = store.store_knowledge(&item).unwrap();

            let stored = store.get_knowledge(id).unwrap();
            assert_eq!(stored.category, "infrastructure");
            assert_eq!(stored.title, "NAS mount options");
            assert_eq!(stored.content, item.content);
            assert_eq!(stored.tags, vec!["smb", "sqlite"]);
            assert!(!stored.is_protocol);
            assert_eq!(stored.version, 1);
            assert_eq!(stored.system.as_deref(), Some("shared"));
        }

        #[test]
        fn test_unconventional_category_is_stored_as_given() {
            let store = store();
            let item = NewKnowledge::new(
                KnowledgeCategory::Other("security".into()),
                "Key rotation",
                "Rotate deploy keys quarterly",
            );
            let id = store.store_knowledge(&item).unwrap();
            assert_eq!(store.get_knowledge(id).unwrap().category, "security");

            let entry = NewEntry::new("claude", TaskType::Other("incident".into()), "Pager fired");
            let id = store.log_entry(&entry).unwrap();
            assert_eq!(store.get_entry(id).unwrap().task_type, "incident");
        }

        #[test]
        fn test_duplicate_title_in_category_conflicts() {
            let store = store();
            let item = NewKnowledge::new(KnowledgeCategory::Protocols, "Commit style", "x");
            store.store_knowledge(&item).unwrap();
            let err = store.store_knowledge(&item).unwrap_err();
            assert!(matches!(err, WorklogError::Conflict(_)));

            let other = NewKnowledge::new(KnowledgeCategory::Development, "Commit style", "x");
            assert!(store.store_knowledge(&other).is_ok());
        }

        #[test]
        fn test_update_bumps_version_and_checks_it() {
            let store = store();
            let id = store
                .store_knowledge(&NewKnowledge::new(
                    KnowledgeCategory::Decisions,
                    "Journal mode",
                    "DELETE",
                ))
                .unwrap();
            let patch = KnowledgePatch {
                content: Some("DELETE, never WAL on shares".into()),
                ..Default::default()
            };
            let updated = store.update_knowledge(id, &patch, 1).unwrap();
            assert_eq!(updated.version, 2);
            assert_eq!(updated.content, "DELETE, never WAL on shares");

            let err = store.update_knowledge(id, &patch, 1).unwrap_err();
            assert!(matches!(err, WorklogError::Conflict(_)));
        }
    }

    // ── Memories ───────────────────────────────────────────────

    mod memories {
        use super::*;

        fn memory(key: &str, content: &str) -> NewMemory {
            let mut m = NewMemory::new(key, content);
            m.memory_type = MemoryType::Context;
            m
        }

        #[test]
        fn test_duplicate_key_rejected_by_default() {
            let store = store();
            store
                .upsert_memory(&memory("ctx_ssh", "first"), ConflictPolicy::default())
                .unwrap();
            let err = store
                .upsert_memory(&memory("ctx_ssh", "second"), ConflictPolicy::Reject)
                .unwrap_err();
            match err {
                WorklogError::Conflict(msg) => assert!(msg.contains("ctx_ssh")),
                other => panic!("expected conflict, got {other:?}"),
            }
            let count: i64 = store
                .db()
                .query_row("SELECT COUNT(*) FROM memories", [], |r| r.get(0))
                .unwrap();
            assert_eq!(count, 1);
        }

        #[test]
        fn test_overwrite_keeps_status_and_access() {
            let store = store();
            let id = store
                .upsert_memory(&memory("ctx_build", "v1"), ConflictPolicy::Reject)
                .unwrap();
            store.get_memory("ctx_build").unwrap();

            let mut replacement = memory("ctx_build", "v2");
            replacement.importance = 15;
            let same = store
                .upsert_memory(&replacement, ConflictPolicy::Overwrite)
                .unwrap();
            assert_eq!(same, id);

            let stored = store.memory_by_id(id).unwrap();
            assert_eq!(stored.content, "v2");
            assert_eq!(stored.importance, 10);
            assert_eq!(stored.version, 2);
            assert_eq!(stored.status, MemoryStatus::Staging);
            assert_eq!(stored.access_count, 1);
        }

        #[test]
        fn test_get_memory_counts_access() {
            let store = store();
            store
                .upsert_memory(&memory("fact_a", "a"), ConflictPolicy::Reject)
                .unwrap();
            store.get_memory("fact_a").unwrap();
            let second = store.get_memory("fact_a").unwrap();
            assert_eq!(second.access_count, 2);
            assert!(second.last_accessed.is_some());
            assert_eq!(second.version, 1);
            assert!(matches!(
                store.get_memory("missing"),
                Err(WorklogError::NotFound(_))
            ));
        }

        #[test]
        fn test_status_transitions() {
            let store = store();
            store
                .upsert_memory(&memory("m1", "one"), ConflictPolicy::Reject)
                .unwrap();
            let promote = MemoryPatch {
                status: Some(MemoryStatus::Promoted),
                ..Default::default()
            };
            let promoted = store
                .update_memory("m1", &promote, Some(1), Some("tester"))
                .unwrap();
            assert_eq!(promoted.status, MemoryStatus::Promoted);
            assert!(promoted.promoted_at.is_some());
            assert_eq!(promoted.version, 2);

            let history: i64 = store
                .db()
                .query_row(
                    "SELECT COUNT(*) FROM promotion_history WHERE memory_id = ?1 \
                     AND from_status = 'staging' AND to_status = 'promoted'",
                    rusqlite::params![promoted.id],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(history, 1);

            let back = MemoryPatch {
                status: Some(MemoryStatus::Staging),
                ..Default::default()
            };
            let err = store.update_memory("m1", &back, None, None).unwrap_err();
            assert!(matches!(err, WorklogError::InvalidTransition { .. }));

            let archive = MemoryPatch {
                status: Some(MemoryStatus::Archived),
                ..Default::default()
            };
            let err = store.update_memory("m1", &archive, None, None).unwrap_err();
            assert!(matches!(err, WorklogError::InvalidTransition { .. }));
        }

        #[test]
        fn test_update_with_stale_version_conflicts() {
            let store = store();
            store
                .upsert_memory(&memory("m2", "two"), ConflictPolicy::Reject)
                .unwrap();
            let patch = MemoryPatch {
                importance: Some(8),
                ..Default::default()
            };
            store.update_memory("m2", &patch, Some(1), None).unwrap();
            let err = store.update_memory("m2", &patch, Some(1), None).unwrap_err();
            assert!(matches!(err, WorklogError::Conflict(_)));
        }
    }

    // ── Error patterns ─────────────────────────────────────────

    mod error_patterns {
        use super::*;

        fn pattern(project: Option<&str>) -> NewErrorPattern {
            NewErrorPattern {
                error_signature: "connection refused.*5432".into(),
                platform: Some("linux".into()),
                language: Some("rust".into()),
                project: project.map(String::from),
                ..Default::default()
            }
        }

        #[test]
        fn test_repeat_increments_occurrence() {
            let store = store();
            let first = store.record_error_pattern(&pattern(None)).unwrap();
            assert_eq!(first.occurrence_count, 1);

            let mut again = pattern(None);
            again.resolution = Some("start postgres".into());
            let second = store.record_error_pattern(&again).unwrap();
            assert_eq!(second.id, first.id);
            assert_eq!(second.occurrence_count, 2);
            assert_eq!(second.resolution.as_deref(), Some("start postgres"));

            let other_project = store.record_error_pattern(&pattern(Some("atlas"))).unwrap();
            assert_ne!(other_project.id, first.id);
        }

        #[test]
        fn test_match_error_uses_regex() {
            let store = store();
            store.record_error_pattern(&pattern(None)).unwrap();
            let matches = store
                .match_error("Error: Connection refused (os error 111) on 127.0.0.1:5432", None)
                .unwrap();
            assert_eq!(matches.len(), 1);

            assert!(store.match_error("disk full", None).unwrap().is_empty());
            assert!(
                store
                    .match_error("connection refused at :5432", Some("windows"))
                    .unwrap()
                    .is_empty()
            );
        }
    }

    // ── Research ───────────────────────────────────────────────

    mod research {
        use super::*;

        #[test]
        fn test_research_status_and_duplicate_url() {
            let store = store();
            let item = NewResearch {
                source_type: "article".into(),
                source_url: Some("https://sqlite.org/wal.html".into()),
                title: "Write-Ahead Logging".into(),
                key_points: vec!["WAL needs shared memory".into()],
                ..Default::default()
            };
            let id = store.store_research(&item).unwrap();
            let stored = store.get_research(id).unwrap();
            assert_eq!(stored.status, "new");
            assert_eq!(stored.key_points, vec!["WAL needs shared memory"]);
            assert_eq!(stored.relevance_score, 5);

            assert!(matches!(
                store.store_research(&item),
                Err(WorklogError::Conflict(_))
            ));

            let reviewed = store
                .set_research_status(id, ResearchStatus::Reviewed, 1)
                .unwrap();
            assert_eq!(reviewed.status, "reviewed");
            assert_eq!(reviewed.version, 2);
        }
    }

    // ── Query / search / recall ────────────────────────────────

    mod reads {
        use super::*;

        fn seed(store: &WorklogStore) {
            for i in 0..30 {
                let mut e = NewEntry::new("claude", TaskType::Maintenance, format!("rotate logs {i}"));
                e.tags = vec!["logs".into()];
                store.log_entry(&e).unwrap();
            }
        }

        #[test]
        fn test_query_rejects_unknown_column() {
            let store = store();
            let q = Query::new(Table::Entries).filter(Filter::Eq("1=1 OR title".into(), 1i64.into()));
            assert!(matches!(store.query(&q), Err(WorklogError::Validation { .. })));
            let q = Query::new(Table::Entries).order_by("nope", SortOrder::Asc);
            assert!(matches!(store.query(&q), Err(WorklogError::Validation { .. })));
        }

        #[test]
        fn test_query_pagination_and_count() {
            let store = store();
            seed(&store);
            let q = Query::new(Table::Entries)
                .columns(["id", "title"])
                .filter(Filter::Like("title".into(), "ROTATE".into()))
                .filter(Filter::Since("timestamp".into(), chrono::Duration::hours(1)))
                .order_by("id", SortOrder::Asc)
                .limit(500)
                .offset(5);
            let rows = store.query(&q).unwrap();
            assert_eq!(rows.len(), 25);
            assert_eq!(rows[0]["id"], 6);
            assert_eq!(rows[0].len(), 2);
            assert_eq!(store.count(&q).unwrap(), 30);

            let default_page = store.query(&Query::new(Table::Entries)).unwrap();
            assert_eq!(default_page.len(), 20);
        }

        #[test]
        fn test_like_filter_escapes_wildcards() {
            let store = store();
            store
                .log_entry(&NewEntry::new("claude", TaskType::Maintenance, "100% done"))
                .unwrap();
            store
                .log_entry(&NewEntry::new("claude", TaskType::Maintenance, "100 done"))
                .unwrap();
            let q = Query::new(Table::Entries).filter(Filter::Like("title".into(), "100%".into()));
            assert_eq!(store.count(&q).unwrap(), 1);
        }

        #[test]
        fn test_search_requires_all_tokens_and_ranks_titles() {
            let store = store();
            let mut body_only = NewKnowledge::new(
                KnowledgeCategory::Development,
                "Build notes",
                "the cargo cache lives on the share",
            );
            body_only.tags = vec!["cargo".into()];
            store.store_knowledge(&body_only).unwrap();
            store
                .store_knowledge(&NewKnowledge::new(
                    KnowledgeCategory::Development,
                    "Cargo cache location",
                    "moved off the share",
                ))
                .unwrap();
            store
                .store_knowledge(&NewKnowledge::new(
                    KnowledgeCategory::Development,
                    "Cargo features",
                    "unrelated",
                ))
                .unwrap();

            let hits = store
                .search("cargo cache", &[Table::KnowledgeBase], 10)
                .unwrap();
            assert_eq!(hits.len(), 2);
            assert_eq!(hits[0].title, "Cargo cache location");
            assert!(hits[0].score > hits[1].score);
        }

        #[test]
        fn test_search_keeps_strong_old_match_among_many_weak_ones() {
            let store = store();
            store
                .log_entry(&NewEntry::new("claude", TaskType::Maintenance, "Rotate deploy keys"))
                .unwrap();
            for i in 0..210 {
                let mut weak = NewEntry::new("claude", TaskType::Maintenance, format!("chore {i}"));
                weak.details = Some("remember to rotate".into());
                store.log_entry(&weak).unwrap();
            }

            let hits = store.search("rotate", &[Table::Entries], 5).unwrap();
            assert_eq!(hits.len(), 5);
            assert_eq!(hits[0].title, "Rotate deploy keys");
            assert!(hits[0].score > hits[1].score);
        }

        #[test]
        fn test_search_rejects_curation_tables() {
            let store = store();
            assert!(store.search("x", &[Table::CurationLeases], 5).is_err());
            assert!(store.search("   ", &[], 5).is_err());
        }

        #[test]
        fn test_recall_filters_by_importance_and_status() {
            let store = store();
            let mut important = NewMemory::new("ctx_nas", "NAS share is mounted at /mnt/nas");
            important.memory_type = MemoryType::Context;
            important.importance = 8;
            store
                .upsert_memory(&important, ConflictPolicy::Reject)
                .unwrap();

            let mut minor = NewMemory::new("fact_nas_color", "the NAS is grey");
            minor.importance = 2;
            store.upsert_memory(&minor, ConflictPolicy::Reject).unwrap();

            let mut archived = NewMemory::new("fact_old_nas", "old NAS at /mnt/old");
            archived.importance = 9;
            store.upsert_memory(&archived, ConflictPolicy::Reject).unwrap();
            store
                .db()
                .execute(
                    "UPDATE memories SET status = 'archived' WHERE key = 'fact_old_nas'",
                    [],
                )
                .unwrap();

            store
                .store_knowledge(&NewKnowledge::new(
                    KnowledgeCategory::Infrastructure,
                    "NAS layout",
                    "shares",
                ))
                .unwrap();
            store
                .log_entry(&NewEntry::new("claude", TaskType::Configuration, "Remounted NAS"))
                .unwrap();

            let ctx = store.recall(&RecallRequest::new("NAS")).unwrap();
            assert_eq!(ctx.memories.len(), 1);
            assert_eq!(ctx.memories[0].key, "ctx_nas");
            assert_eq!(ctx.knowledge.len(), 1);
            assert_eq!(ctx.recent_work.len(), 1);
        }

        #[test]
        fn test_transaction_rolls_back_on_error() {
            let store = store();
            let result: worklog_core::Result<()> = store.transaction(|tx| {
                NewEntry::new("claude", TaskType::Handoff, "inside")
                    .statement()?
                    .execute(tx)
                    .map_err(|e| worklog_store::classify(e, ":memory:"))?;
                Err(WorklogError::validation("test", "abort"))
            });
            assert!(result.is_err());
            let count = store.count(&Query::new(Table::Entries)).unwrap();
            assert_eq!(count, 0);
        }

        #[test]
        fn test_statement_survives_json() {
            let stmt = NewEntry::new("claude", TaskType::Documentation, "Wrote README")
                .statement()
                .unwrap();
            let json = serde_json::to_string(&stmt).unwrap();
            let restored: Statement = serde_json::from_str(&json).unwrap();
            assert_eq!(restored, stmt);
            assert_eq!(restored.params[4], SqlValue::Null);
        }
    }
}
