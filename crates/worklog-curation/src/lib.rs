//! # worklog-curation
//!
//! Maintenance passes over the worklog database. Passes never make judgement
//! calls on their own: ambiguous findings (an unknown tag, a likely duplicate,
//! an unlinked memory) become pending rows that an agent or a person resolves
//! through the `resolve_*` / `decide_*` calls.
//!
//! Every pass and every resolution is written to `curation_history`.

pub mod curator;
pub mod duplicates;
pub mod history;
mod items;
pub mod lease;
pub mod orphans;
pub mod promotion;
pub mod relationships;
pub mod similarity;
pub mod taxonomy;
pub mod topics;

pub use curator::{CurationSettings, Curator, FullCurationReport};
pub use duplicates::{DuplicateCandidate, DuplicateDecision, DuplicateStats};
pub use history::{HistoryRecord, run_pass};
pub use lease::{Lease, LeaseKind};
pub use orphans::{OrphanDecision, OrphanItem, OrphanReport};
pub use promotion::{PromotionDecision, PromotionStats};
pub use relationships::{DiscoveryStats, Relationship};
pub use similarity::{Comparable, similarity};
pub use taxonomy::{
    TagDecision, TagNormalizationStats, TagResolution, Taxonomy, UnknownTag, clean_tag,
};
pub use topics::{RelevanceTier, Topic, TopicCandidate, TopicIndexStats};
