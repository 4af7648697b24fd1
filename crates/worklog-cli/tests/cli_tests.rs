#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use clap::Parser;
    use tempfile::TempDir;
    use worklog_cli::{Cli, LazyStore};
    use worklog_core::{TaskType, WorklogError};
    use worklog_handoff::{HandoffQueue, StatementExecutor};
    use worklog_store::{DatabaseOptions, NewEntry, WorklogStore};

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("worklog").chain(args.iter().copied()))
    }

    /// Config pointing the database and handoff dir into `dir`. Writes are
    /// tried once with no backoff so deferral tests stay fast.
    fn write_config(dir: &Path, db: &Path) -> PathBuf {
        let path = dir.join("worklog.toml");
        let text = format!(
            "[database]\npath = '{}'\n\n\
             [handoff]\ndir = '{}'\n\n\
             [retry]\nmax_attempts = 1\nbackoff_min_secs = 0.0\nbackoff_max_secs = 0.0\n",
            db.display(),
            dir.join("handoffs").display()
        );
        std::fs::write(&path, text).unwrap();
        path
    }

    async fn run(config: &Path, args: &[&str]) -> worklog_core::Result<()> {
        let config = config.to_string_lossy().into_owned();
        let mut full = vec!["--config", config.as_str(), "--quiet"];
        full.extend_from_slice(args);
        parse(&full).unwrap().run().await
    }

    fn open(db: &Path) -> WorklogStore {
        WorklogStore::open(db, &DatabaseOptions::default()).unwrap()
    }

    // ── Argument parsing ───────────────────────────────────────

    mod parsing {
        use super::*;

        #[test]
        fn test_log_accepts_task_type_and_tags() {
            assert!(parse(&["log", "debugging", "fixed ssh timeout", "--tag", "ssh,timeout"]).is_ok());
            assert!(parse(&["log", "Deployment", "rolled out"]).is_ok());
        }

        #[test]
        fn test_log_accepts_unconventional_task_type() {
            assert!(parse(&["log", "incident", "Pager fired"]).is_ok());
            assert!(parse(&["knowledge", "add", "security", "Key rotation", "quarterly"]).is_ok());
            assert!(parse(&["log", "", "blank type"]).is_err());
        }

        #[test]
        fn test_verbose_and_quiet_conflict() {
            assert!(parse(&["--verbose", "--quiet", "tables"]).is_err());
        }

        #[test]
        fn test_query_filters() {
            assert!(parse(&["query", "memories", "--eq", "key=ssh", "--since", "created_at=7d"]).is_ok());
            assert!(parse(&["query", "memories", "--since", "created_at=12h", "--min", "importance=6"]).is_ok());
            assert!(parse(&["query", "memories", "--since", "created_at=7y"]).is_err());
            assert!(parse(&["query", "memories", "--eq", "no-equals-sign"]).is_err());
            assert!(parse(&["query", "nonsense"]).is_err());
        }

        #[test]
        fn test_resolve_tag_needs_exactly_one_decision() {
            assert!(parse(&["curate", "resolve-tag", "k8s"]).is_err());
            assert!(parse(&["curate", "resolve-tag", "k8s", "--alias-of", "kubernetes", "--ignore"]).is_err());
            assert!(parse(&["curate", "resolve-tag", "k8s", "--alias-of", "kubernetes"]).is_ok());
        }

        #[test]
        fn test_item_refs_are_parsed() {
            assert!(parse(&["curate", "relate", "memories#1", "knowledge_base#2"]).is_ok());
            assert!(parse(&["curate", "relate", "memories#1", "bogus#2"]).is_err());
            assert!(parse(&["curate", "resolve-orphan", "memories#3", "--archive"]).is_ok());
            assert!(parse(&["curate", "resolve-orphan", "memories#x", "--archive"]).is_err());
        }

        #[test]
        fn test_promote_auto_and_claim_conflict() {
            assert!(parse(&["curate", "promote", "--auto", "--claim"]).is_err());
            assert!(parse(&["curate", "--agent", "reviewer", "promote", "--claim"]).is_ok());
        }

        #[test]
        fn test_decide_requires_version_and_decision() {
            assert!(parse(&["curate", "decide", "4", "--promote"]).is_err());
            assert!(parse(&["curate", "decide", "4", "--expected-version", "1"]).is_err());
            assert!(parse(&["curate", "decide", "4", "--expected-version", "1", "--promote", "--boost", "2"]).is_ok());
        }

        #[test]
        fn test_hook_mode_override() {
            assert!(parse(&["hook", "session-start", "--mode", "aggressive"]).is_ok());
            assert!(parse(&["hook", "session-start", "--mode", "loud"]).is_err());
        }
    }

    // ── Records ────────────────────────────────────────────────

    mod records {
        use super::*;

        #[tokio::test]
        async fn test_log_writes_entry() {
            let dir = TempDir::new().unwrap();
            let db = dir.path().join("worklog.db");
            let config = write_config(dir.path(), &db);

            run(&config, &[
                "log", "debugging", "ssh timeouts on build box",
                "--outcome", "ControlPersist raised", "--tag", "ssh,timeout", "--agent", "codex",
            ])
            .await
            .unwrap();

            let entries = open(&db).recent_entries(Some("codex"), 1, 10).unwrap();
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].task_type, "debugging");
            assert_eq!(entries[0].tags, vec!["ssh", "timeout"]);
        }

        #[tokio::test]
        async fn test_duplicate_memory_key_needs_overwrite() {
            let dir = TempDir::new().unwrap();
            let db = dir.path().join("worklog.db");
            let config = write_config(dir.path(), &db);

            run(&config, &["memory", "store", "ssh-port", "22", "-i", "7"]).await.unwrap();
            let err = run(&config, &["memory", "store", "ssh-port", "2222"]).await.unwrap_err();
            assert!(matches!(err, WorklogError::Conflict(_)), "{err}");

            run(&config, &["memory", "store", "ssh-port", "2222", "--overwrite"]).await.unwrap();
            assert_eq!(open(&db).get_memory("ssh-port").unwrap().content, "2222");
        }

        #[tokio::test]
        async fn test_knowledge_update_checks_version() {
            let dir = TempDir::new().unwrap();
            let db = dir.path().join("worklog.db");
            let config = write_config(dir.path(), &db);

            run(&config, &["knowledge", "add", "protocols", "Deploy checklist", "tag, build, push"])
                .await
                .unwrap();

            let err = run(&config, &["knowledge", "update", "1", "--expected-version", "7", "--content", "x"])
                .await
                .unwrap_err();
            assert!(matches!(err, WorklogError::Conflict(_)), "{err}");

            run(&config, &["knowledge", "update", "1", "--expected-version", "1", "--content", "tag, build, sign, push"])
                .await
                .unwrap();
            let item = open(&db).get_knowledge(1).unwrap();
            assert_eq!(item.version, 2);
            assert_eq!(item.content, "tag, build, sign, push");
        }

        #[tokio::test]
        async fn test_memory_update_rejects_leaving_archived() {
            let dir = TempDir::new().unwrap();
            let db = dir.path().join("worklog.db");
            let config = write_config(dir.path(), &db);

            run(&config, &["memory", "store", "old-host", "retired"]).await.unwrap();
            run(&config, &["memory", "update", "old-host", "--status", "archived"]).await.unwrap();
            let err = run(&config, &["memory", "update", "old-host", "--status", "promoted"])
                .await
                .unwrap_err();
            assert!(matches!(err, WorklogError::InvalidTransition { .. }), "{err}");
        }
    }

    // ── Deferred writes ────────────────────────────────────────

    mod handoff {
        use super::*;

        #[tokio::test]
        async fn test_unreachable_database_defers_then_replays() {
            let dir = TempDir::new().unwrap();
            // A directory cannot be opened as a database file.
            let unreachable = dir.path().join("not-a-file");
            std::fs::create_dir_all(&unreachable).unwrap();
            let broken = write_config(dir.path(), &unreachable);

            run(&broken, &["log", "deployment", "shipped while the share was down"])
                .await
                .unwrap();

            let queue = HandoffQueue::new(dir.path().join("handoffs"));
            assert_eq!(queue.pending().unwrap().len(), 1);

            let db = dir.path().join("worklog.db");
            let healthy = write_config(dir.path(), &db);
            run(&healthy, &["handoff", "process"]).await.unwrap();

            assert!(queue.pending().unwrap().is_empty());
            let entries = open(&db).recent_entries(None, 1, 10).unwrap();
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].title, "shipped while the share was down");
        }

        #[tokio::test]
        async fn test_session_hook_never_fails() {
            let dir = TempDir::new().unwrap();
            let unreachable = dir.path().join("not-a-file");
            std::fs::create_dir_all(&unreachable).unwrap();
            let broken = write_config(dir.path(), &unreachable);

            for mode in ["light", "remind", "full", "aggressive"] {
                run(&broken, &["hook", "session-start", "--mode", mode]).await.unwrap();
            }
        }

        #[test]
        fn test_lazy_store_opens_on_first_write() {
            let dir = TempDir::new().unwrap();
            let db = dir.path().join("nested").join("worklog.db");
            let lazy = LazyStore::new(&db, DatabaseOptions::default());
            assert!(!lazy.is_open());
            assert!(!db.exists());

            let statement = NewEntry::new("claude", TaskType::Maintenance, "rotated logs")
                .statement()
                .unwrap();
            assert!(lazy.execute(&statement).unwrap().is_some());
            assert!(lazy.is_open());
            assert!(db.exists());
        }
    }

    // ── Reads and curation ─────────────────────────────────────

    mod reads {
        use super::*;

        #[tokio::test]
        async fn test_read_commands_on_fresh_database() {
            let dir = TempDir::new().unwrap();
            let db = dir.path().join("worklog.db");
            let config = write_config(dir.path(), &db);

            run(&config, &["memory", "store", "nas-mount", "NFS share at /mnt/shared", "--tag", "nfs"])
                .await
                .unwrap();
            run(&config, &["tables"]).await.unwrap();
            run(&config, &["search", "nfs share"]).await.unwrap();
            run(&config, &["recall", "nfs", "--min-importance", "1"]).await.unwrap();
            run(&config, &["recent", "--days", "1"]).await.unwrap();
            run(&config, &["query", "memories", "--like", "content=share", "--count"]).await.unwrap();

            let err = run(&config, &["query", "memories", "--eq", "no_such_column=1"])
                .await
                .unwrap_err();
            assert!(matches!(err, WorklogError::Validation { .. }), "{err}");
        }

        #[tokio::test]
        async fn test_full_curation_is_recorded() {
            let dir = TempDir::new().unwrap();
            let db = dir.path().join("worklog.db");
            let config = write_config(dir.path(), &db);

            run(&config, &["memory", "store", "k8s-context", "prod cluster", "--tag", "K8s"])
                .await
                .unwrap();
            run(&config, &["curate", "--agent", "nightly", "full"]).await.unwrap();

            let store = open(&db);
            let db_conn = store.db();
            let (count, agent): (i64, String) = db_conn
                .query_row(
                    "SELECT COUNT(*), MAX(agent) FROM curation_history WHERE operation = 'full_curation'",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .unwrap();
            assert_eq!(count, 1);
            assert_eq!(agent, "nightly");
        }
    }

    // ── Admin ──────────────────────────────────────────────────

    mod admin {
        use super::*;

        #[tokio::test]
        async fn test_init_then_config_set() {
            let dir = TempDir::new().unwrap();
            let config = dir.path().join("worklog.toml");

            run(&config, &["init"]).await.unwrap();
            assert!(config.exists());
            assert!(dir.path().join("worklog.db").exists());
            assert!(dir.path().join("handoffs").is_dir());

            run(&config, &["config", "set", "retry.max_attempts", "5"]).await.unwrap();
            let text = std::fs::read_to_string(&config).unwrap();
            assert!(text.contains("max_attempts = 5"));
            assert!(text.contains("# Worklog configuration"), "comments are kept");

            // An invalid value is refused and the file is left alone.
            assert!(run(&config, &["config", "set", "retry.max_attempts", "0"]).await.is_err());
            assert_eq!(std::fs::read_to_string(&config).unwrap(), text);
        }

        #[tokio::test]
        async fn test_init_keeps_existing_config() {
            let dir = TempDir::new().unwrap();
            let config = dir.path().join("worklog.toml");
            std::fs::write(&config, "[hooks]\nagent = 'gemini'\n").unwrap();

            run(&config, &["init"]).await.unwrap();
            assert_eq!(std::fs::read_to_string(&config).unwrap(), "[hooks]\nagent = 'gemini'\n");
        }

        #[tokio::test]
        async fn test_invalid_config_is_rejected() {
            let dir = TempDir::new().unwrap();
            let config = dir.path().join("worklog.toml");
            std::fs::write(&config, "[hooks]\nmode = 'loud'\n").unwrap();

            let err = run(&config, &["tables"]).await.unwrap_err();
            assert!(matches!(err, WorklogError::Config(_)), "{err}");
        }

        #[test]
        fn test_lazy_store_reports_path() {
            let lazy = LazyStore::new("/tmp/worklog-test.db", DatabaseOptions::default());
            assert_eq!(lazy.path(), Path::new("/tmp/worklog-test.db"));
            assert!(!lazy.is_open());
        }
    }
}
