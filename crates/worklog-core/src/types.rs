use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::WorklogError;

/// Row identifier (SQLite `INTEGER PRIMARY KEY`).
pub type RowId = i64;

/// Declares a closed string enum stored as TEXT in the database.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $field:literal {
            $( $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $text, )+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = WorklogError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_lowercase().as_str() {
                    $( $text => Ok($name::$variant), )+
                    other => Err(WorklogError::validation(
                        $field,
                        format!(
                            "unknown value '{}' (expected one of: {})",
                            other,
                            [$($text),+].join(", ")
                        ),
                    )),
                }
            }
        }
    };
}

/// Declares a string enum whose listed values are conventions only. Unknown
/// text parses to `Other`; only blank text is rejected.
macro_rules! open_text_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $field:literal {
            $( $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(from = "String", into = "String")]
        pub enum $name {
            $( $variant, )+
            Other(String),
        }

        impl $name {
            pub const CONVENTIONAL: &'static [&'static str] = &[$($text),+];

            pub fn as_str(&self) -> &str {
                match self {
                    $( $name::$variant => $text, )+
                    $name::Other(s) => s.as_str(),
                }
            }

            pub fn is_conventional(&self) -> bool {
                !matches!(self, $name::Other(_))
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                let trimmed = s.trim();
                match trimmed.to_lowercase().as_str() {
                    $( $text => $name::$variant, )+
                    _ => $name::Other(trimmed.to_string()),
                }
            }
        }

        impl From<$name> for String {
            fn from(v: $name) -> Self {
                v.as_str().to_string()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = WorklogError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                if s.trim().is_empty() {
                    return Err(WorklogError::validation($field, "must not be empty"));
                }
                Ok($name::from(s.to_string()))
            }
        }
    };
}

text_enum! {
    /// Every table in the worklog database.
    Table, "table" {
        Entries => "entries",
        KnowledgeBase => "knowledge_base",
        Memories => "memories",
        ErrorPatterns => "error_patterns",
        Research => "research",
        TopicIndex => "topic_index",
        TopicEntries => "topic_entries",
        Relationships => "relationships",
        TagTaxonomy => "tag_taxonomy",
        UnknownTags => "unknown_tags",
        DuplicateCandidates => "duplicate_candidates",
        PromotionHistory => "promotion_history",
        CurationHistory => "curation_history",
        CurationLeases => "curation_leases",
    }
}

impl Table {
    /// The five core tables; everything else belongs to the curation extension.
    pub const CORE: &'static [Table] = &[
        Table::Entries,
        Table::KnowledgeBase,
        Table::Memories,
        Table::ErrorPatterns,
        Table::Research,
    ];

    pub fn is_core(&self) -> bool {
        Self::CORE.contains(self)
    }
}

text_enum! {
    /// Tables whose rows take part in topics, relationships and duplicate detection.
    EntryTable, "table" {
        Memories => "memories",
        KnowledgeBase => "knowledge_base",
        Entries => "entries",
    }
}

impl From<EntryTable> for Table {
    fn from(t: EntryTable) -> Self {
        match t {
            EntryTable::Memories => Table::Memories,
            EntryTable::KnowledgeBase => Table::KnowledgeBase,
            EntryTable::Entries => Table::Entries,
        }
    }
}

open_text_enum! {
    /// Conventional task types for work entries. Any other text is kept as `Other`.
    TaskType, "task_type" {
        Configuration => "configuration",
        Deployment => "deployment",
        Debugging => "debugging",
        Documentation => "documentation",
        Research => "research",
        Maintenance => "maintenance",
        Handoff => "handoff",
    }
}

open_text_enum! {
    /// Conventional knowledge base categories. Any other text is kept as `Other`.
    KnowledgeCategory, "category" {
        SystemAdministration => "system-administration",
        Development => "development",
        Infrastructure => "infrastructure",
        Decisions => "decisions",
        Projects => "projects",
        Protocols => "protocols",
    }
}

text_enum! {
    MemoryType, "memory_type" {
        Fact => "fact",
        Entity => "entity",
        Preference => "preference",
        Context => "context",
    }
}

text_enum! {
    /// Memory lifecycle: `staging -> promoted` or `staging -> archived`.
    MemoryStatus, "status" {
        Staging => "staging",
        Promoted => "promoted",
        Archived => "archived",
    }
}

impl MemoryStatus {
    /// `promoted` and `archived` are terminal.
    pub fn can_transition_to(&self, to: MemoryStatus) -> bool {
        matches!(
            (self, to),
            (MemoryStatus::Staging, MemoryStatus::Promoted)
                | (MemoryStatus::Staging, MemoryStatus::Archived)
        )
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, MemoryStatus::Staging)
    }
}

text_enum! {
    RelationshipType, "relationship_type" {
        RelatesTo => "relates_to",
        Supersedes => "supersedes",
        Implements => "implements",
        Documents => "documents",
        DuplicateOf => "duplicate_of",
        DependsOn => "depends_on",
        ParentOf => "parent_of",
        ChildOf => "child_of",
    }
}

text_enum! {
    CurationOperation, "operation" {
        TagNormalization => "tag_normalization",
        RelationshipDiscovery => "relationship_discovery",
        TopicIndexing => "topic_indexing",
        DuplicateDetection => "duplicate_detection",
        MemoryPromotion => "memory_promotion",
        OrphanDetection => "orphan_detection",
        FullCuration => "full_curation",
        CandidateResolution => "candidate_resolution",
        ManualEdit => "manual_edit",
    }
}

text_enum! {
    /// How much context the session-start hook loads automatically.
    HookMode, "hooks.mode" {
        Light => "light",
        Remind => "remind",
        Full => "full",
        Aggressive => "aggressive",
    }
}

text_enum! {
    ResearchStatus, "status" {
        New => "new",
        Reviewed => "reviewed",
        Applied => "applied",
        Archived => "archived",
    }
}

/// A `(table, id)` reference to any row that curation can link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemRef {
    pub table: EntryTable,
    pub id: RowId,
}

impl ItemRef {
    pub fn new(table: EntryTable, id: RowId) -> Self {
        Self { table, id }
    }
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.table, self.id)
    }
}

impl FromStr for ItemRef {
    type Err = WorklogError;

    /// Parses `table#id`, e.g. `memories#12`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (table, id) = s.split_once('#').ok_or_else(|| {
            WorklogError::validation("item", format!("expected TABLE#ID, got '{s}'"))
        })?;
        let id = id
            .parse::<RowId>()
            .map_err(|_| WorklogError::validation("item", format!("invalid id in '{s}'")))?;
        Ok(Self {
            table: table.parse()?,
            id,
        })
    }
}
