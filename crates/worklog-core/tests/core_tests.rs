#[cfg(test)]
mod tests {
    use worklog_core::*;

    // ── Enum tests ─────────────────────────────────────────────

    #[test]
    fn test_table_parse_roundtrip() {
        for table in Table::ALL {
            let parsed: Table = table.as_str().parse().unwrap();
            assert_eq!(parsed, *table);
        }
    }

    #[test]
    fn test_table_parse_unknown() {
        let err = "sot_issues".parse::<Table>().unwrap_err();
        assert!(err.to_string().contains("sot_issues"));
        assert!(err.to_string().contains("knowledge_base"));
    }

    #[test]
    fn test_core_tables() {
        assert!(Table::Entries.is_core());
        assert!(Table::Research.is_core());
        assert!(!Table::TopicIndex.is_core());
        assert_eq!(Table::CORE.len(), 5);
    }

    #[test]
    fn test_enum_parse_is_case_insensitive() {
        assert_eq!("Debugging".parse::<TaskType>().unwrap(), TaskType::Debugging);
        assert_eq!(" FACT ".parse::<MemoryType>().unwrap(), MemoryType::Fact);
        assert_eq!(
            "system-administration".parse::<KnowledgeCategory>().unwrap(),
            KnowledgeCategory::SystemAdministration
        );
    }

    #[test]
    fn test_unconventional_task_type_and_category_are_kept() {
        let task: TaskType = "Incident".parse().unwrap();
        assert_eq!(task, TaskType::Other("Incident".into()));
        assert!(!task.is_conventional());
        assert_eq!(task.as_str(), "Incident");

        let category: KnowledgeCategory = " security ".parse().unwrap();
        assert_eq!(category.as_str(), "security");
        assert!("".parse::<TaskType>().is_err());

        let json = serde_json::to_string(&KnowledgeCategory::SystemAdministration).unwrap();
        assert_eq!(json, "\"system-administration\"");
        let restored: TaskType = serde_json::from_str("\"incident\"").unwrap();
        assert_eq!(restored, TaskType::Other("incident".into()));
    }

    #[test]
    fn test_enum_serde_uses_storage_names() {
        let json = serde_json::to_string(&RelationshipType::DuplicateOf).unwrap();
        assert_eq!(json, "\"duplicate_of\"");
        let restored: HookMode = serde_json::from_str("\"aggressive\"").unwrap();
        assert_eq!(restored, HookMode::Aggressive);
    }

    // ── Memory status state machine ────────────────────────────

    #[test]
    fn test_memory_status_transitions() {
        use MemoryStatus::*;
        assert!(Staging.can_transition_to(Promoted));
        assert!(Staging.can_transition_to(Archived));
        assert!(!Staging.can_transition_to(Staging));
        for terminal in [Promoted, Archived] {
            assert!(terminal.is_terminal());
            for to in MemoryStatus::ALL {
                assert!(!terminal.can_transition_to(*to), "{terminal} -> {to}");
            }
        }
    }

    // ── ItemRef ────────────────────────────────────────────────

    #[test]
    fn test_item_ref_parse_and_display() {
        let item: ItemRef = "memories#42".parse().unwrap();
        assert_eq!(item.table, EntryTable::Memories);
        assert_eq!(item.id, 42);
        assert_eq!(item.to_string(), "memories#42");
        assert!("memories".parse::<ItemRef>().is_err());
        assert!("memories#x".parse::<ItemRef>().is_err());
        assert!("research#1".parse::<ItemRef>().is_err());
    }

    // ── Tags ───────────────────────────────────────────────────

    #[test]
    fn test_parse_tags_trims_and_skips_empty() {
        assert_eq!(parse_tags(" a, b ,,c "), vec!["a", "b", "c"]);
        assert!(parse_tags("").is_empty());
    }

    #[test]
    fn test_join_tags_dedupes_in_order() {
        assert_eq!(join_tags(&["b", "a", "b", " ", "c"]), "b,a,c");
    }

    // ── Time ───────────────────────────────────────────────────

    #[test]
    fn test_timestamp_roundtrip() {
        let ts = now_timestamp();
        assert_eq!(ts.len(), 19);
        let parsed = parse_timestamp(&ts).unwrap();
        assert_eq!(format_timestamp(parsed), ts);
        assert!(parse_timestamp("2025-01-02T03:04:05Z").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    // ── Error tests ────────────────────────────────────────────

    #[test]
    fn test_error_retryable() {
        assert!(WorklogError::Locked("busy".into()).is_retryable());
        assert!(WorklogError::Connectivity("disk I/O error".into()).is_retryable());
        assert!(!WorklogError::Conflict("dup".into()).is_retryable());
        let ro = WorklogError::ReadOnly {
            path: "/mnt/share/worklog.db".into(),
            hint: "check directory write permission".into(),
        };
        assert!(!ro.is_retryable());
        assert!(ro.to_string().contains("write permission"));
    }

    #[test]
    fn test_parse_error_display() {
        let err = WorklogError::Parse {
            path: "/tmp/h.md".into(),
            line: 3,
            reason: "missing title".into(),
        };
        assert_eq!(err.to_string(), "parse error in /tmp/h.md:3: missing title");
    }
}
