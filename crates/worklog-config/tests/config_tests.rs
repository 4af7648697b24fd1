#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;
    use std::path::Path;
    use std::time::Duration;

    use worklog_config::ConfigLoader;
    use worklog_config::schema::*;
    use worklog_core::{HookMode, WorklogError};

    // ── Default tests ──────────────────────────────────────────

    #[test]
    fn test_database_config_defaults() {
        let config = DatabaseConfig::default();
        assert_eq!(config.journal_mode, "delete");
        assert!(!config.network_share);
        assert!(config.path.ends_with(".claude/worklog/worklog.db"));
    }

    #[test]
    fn test_retry_config_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.backoff_min().as_secs(), 5);
        assert_eq!(config.backoff_max().as_secs(), 10);
        assert!(config.deadline().is_none());
    }

    #[test]
    fn test_curation_config_defaults() {
        let config = CurationConfig::default();
        assert_eq!(config.duplicate_threshold, 0.8);
        assert_eq!(config.orphan_min_importance, 5);
        assert_eq!(config.promotion_min_importance, 6);
        assert_eq!(config.promotion_min_age_hours, 24);
    }

    #[test]
    fn test_hooks_default_mode() {
        let config = HooksConfig::default();
        assert_eq!(config.hook_mode(), HookMode::Remind);
        assert_eq!(config.agent, "claude");
    }

    #[test]
    fn test_defaults_validate_cleanly() {
        let warnings = WorklogConfig::default().validate().unwrap();
        assert!(warnings.is_empty(), "{warnings:?}");
    }

    // ── TOML tests ─────────────────────────────────────────────

    #[test]
    fn test_config_toml_roundtrip() {
        let config = WorklogConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let restored: WorklogConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(restored.database.path, config.database.path);
        assert_eq!(restored.retry.max_attempts, config.retry.max_attempts);
        assert_eq!(restored.hooks.mode, config.hooks.mode);
    }

    #[test]
    fn test_partial_toml_applies_defaults() {
        let toml_str = r#"
[database]
path = "/mnt/share/worklog.db"
network_share = true

[hooks]
mode = "aggressive"
"#;
        let config: WorklogConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.database.path, Path::new("/mnt/share/worklog.db"));
        assert!(config.database.network_share);
        assert_eq!(config.hooks.hook_mode(), HookMode::Aggressive);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.database.journal_mode, "delete");
    }

    // ── Validation tests ───────────────────────────────────────

    #[test]
    fn test_wal_on_network_share_is_error() {
        let mut config = WorklogConfig::default();
        config.database.journal_mode = "wal".into();
        assert!(config.validate().is_ok());
        config.database.network_share = true;
        let err = config.validate().unwrap_err();
        assert!(err.contains("database.journal_mode"));
    }

    #[test]
    fn test_backoff_bounds_validated() {
        let mut config = WorklogConfig::default();
        config.retry.backoff_min_secs = 12.0;
        let err = config.validate().unwrap_err();
        assert!(err.contains("retry.backoff_min_secs"));
    }

    #[test]
    fn test_non_finite_or_huge_retry_values_rejected() {
        let config: WorklogConfig = toml::from_str("[retry]\ndeadline_secs = inf\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("retry.deadline_secs"), "{err}");
        assert_eq!(config.retry.deadline(), Some(Duration::from_secs(3600)));

        let mut config = WorklogConfig::default();
        config.retry.backoff_max_secs = 1e12;
        let err = config.validate().unwrap_err();
        assert!(err.contains("retry.backoff_max_secs"), "{err}");
        assert_eq!(config.retry.backoff_max(), Duration::from_secs(3600));

        config.retry.backoff_max_secs = f64::NAN;
        assert!(config.validate().is_err());
        assert_eq!(config.retry.backoff_max(), Duration::ZERO);
    }

    #[test]
    fn test_zero_attempts_is_error() {
        let mut config = WorklogConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_hook_mode_is_error() {
        let mut config = WorklogConfig::default();
        config.hooks.mode = "loud".into();
        assert!(config.validate().unwrap_err().contains("hooks.mode"));
    }

    #[test]
    fn test_threshold_range() {
        let mut config = WorklogConfig::default();
        config.curation.duplicate_threshold = 1.5;
        assert!(config.validate().is_err());
        config.curation.duplicate_threshold = 0.3;
        let warnings = config.validate().unwrap();
        assert!(
            warnings
                .iter()
                .any(|w| w.field == "curation.duplicate_threshold"
                    && w.severity == WarningSeverity::Warning)
        );
    }

    // ── Override tests ─────────────────────────────────────────

    #[test]
    fn test_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("WORKLOG_DB_PATH", "/data/wl.db"),
            ("WORKLOG_HANDOFF_DIR", "/data/handoffs"),
            ("WORKLOG_HOOK_MODE", "FULL"),
            ("WORKLOG_SYSTEM", "atlas"),
            ("WORKLOG_LOG_LEVEL", ""),
        ]
        .into_iter()
        .collect();
        let config = ConfigLoader::apply_overrides(WorklogConfig::default(), |k| {
            vars.get(k).map(|v| v.to_string())
        });
        assert_eq!(config.database.path, Path::new("/data/wl.db"));
        assert_eq!(config.handoff.dir, Path::new("/data/handoffs"));
        assert_eq!(config.hooks.hook_mode(), HookMode::Full);
        assert_eq!(config.handoff.origin.as_deref(), Some("atlas"));
        // Empty values are ignored
        assert_eq!(config.logging.level, "warn");
    }

    // ── ConfigLoader tests ─────────────────────────────────────

    #[test]
    fn test_config_loader_with_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("worklog.toml");
        let mut f = std::fs::File::create(&config_path).unwrap();
        writeln!(
            f,
            r#"
[database]
path = "/tmp/worklog-test.db"
busy_timeout_ms = 250

[retry]
max_attempts = 5
backoff_min_secs = 1.0
backoff_max_secs = 2.0
deadline_secs = 30.0
"#
        )
        .unwrap();

        let loader = ConfigLoader::load(Some(config_path.as_path())).unwrap();
        let config = loader.get();
        assert_eq!(config.database.busy_timeout_ms, 250);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.deadline().unwrap().as_secs(), 30);
        assert_eq!(loader.path(), config_path.as_path());
    }

    #[test]
    fn test_config_loader_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(loader.get().retry.max_attempts, 3);
    }

    #[test]
    fn test_parse_error_reports_line() {
        let raw = "[database]\npath = \"/tmp/x.db\"\nbusy_timeout_ms = \"soon\"\n";
        let err = ConfigLoader::parse(raw, Path::new("worklog.toml")).unwrap_err();
        match err {
            WorklogError::Parse { path, line, .. } => {
                assert_eq!(path, Path::new("worklog.toml"));
                assert_eq!(line, 3);
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_config_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("worklog.toml");
        std::fs::write(
            &config_path,
            "[database]\njournal_mode = \"wal\"\nnetwork_share = true\n",
        )
        .unwrap();
        let result = ConfigLoader::load(Some(config_path.as_path()));
        assert!(matches!(result, Err(WorklogError::Config(_))));
    }

    #[test]
    fn test_config_loader_reload() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("worklog.toml");
        std::fs::write(&config_path, "[hooks]\nmode = \"light\"\n").unwrap();

        let loader = ConfigLoader::load(Some(config_path.as_path())).unwrap();
        assert_eq!(loader.get().hooks.hook_mode(), HookMode::Light);

        std::fs::write(&config_path, "[hooks]\nmode = \"full\"\n").unwrap();
        loader.reload().unwrap();
        assert_eq!(loader.get().hooks.hook_mode(), HookMode::Full);
    }

    #[test]
    fn test_expand_home() {
        let expanded = worklog_config::expand_home(Path::new("~/wl/worklog.db"));
        assert!(!expanded.starts_with("~"));
        assert!(expanded.ends_with("wl/worklog.db"));
        let absolute = worklog_config::expand_home(Path::new("/srv/worklog.db"));
        assert_eq!(absolute, Path::new("/srv/worklog.db"));
    }
}
