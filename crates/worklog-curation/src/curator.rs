use std::time::Duration;

use serde::Serialize;
use worklog_config::CurationConfig;
use worklog_core::CurationOperation;
use worklog_store::WorklogStore;

use crate::duplicates::DuplicateStats;
use crate::history::run_pass;
use crate::orphans::OrphanReport;
use crate::promotion::PromotionStats;
use crate::relationships::DiscoveryStats;
use crate::taxonomy::TagNormalizationStats;

/// Thresholds the passes run with.
#[derive(Debug, Clone)]
pub struct CurationSettings {
    pub duplicate_threshold: f64,
    pub orphan_min_importance: i64,
    pub promotion_min_importance: i64,
    pub promotion_min_age: chrono::Duration,
    /// Memories at or above this are promoted by an automatic pass.
    pub auto_promote_importance: i64,
    pub lease_ttl: Duration,
}

impl Default for CurationSettings {
    fn default() -> Self {
        Self::from(&CurationConfig::default())
    }
}

impl From<&CurationConfig> for CurationSettings {
    fn from(config: &CurationConfig) -> Self {
        Self {
            duplicate_threshold: config.duplicate_threshold,
            orphan_min_importance: i64::from(config.orphan_min_importance),
            promotion_min_importance: i64::from(config.promotion_min_importance),
            promotion_min_age: chrono::Duration::hours(
                i64::try_from(config.promotion_min_age_hours).unwrap_or(i64::MAX / 3_600_000),
            ),
            auto_promote_importance: 8,
            lease_ttl: Duration::from_secs(config.lease_secs),
        }
    }
}

/// Runs curation passes and resolutions against one store.
#[derive(Clone)]
pub struct Curator {
    store: WorklogStore,
    settings: CurationSettings,
}

#[derive(Debug, Clone, Serialize)]
pub struct FullCurationReport {
    pub tags: TagNormalizationStats,
    pub orphans: OrphanReport,
    pub relationships: DiscoveryStats,
    pub duplicates: DuplicateStats,
    pub promotion: PromotionStats,
}

impl Curator {
    pub fn new(store: WorklogStore, settings: CurationSettings) -> Self {
        Self { store, settings }
    }

    pub fn store(&self) -> &WorklogStore {
        &self.store
    }

    pub fn settings(&self) -> &CurationSettings {
        &self.settings
    }

    /// Every pass in dependency order: tags first so later passes compare
    /// canonical tags, orphans before discovery so its automatic edges do not
    /// hide rows that need a human decision. Promotion only lists candidates;
    /// nothing is promoted.
    pub fn run_full_curation(&self, agent: &str) -> worklog_core::Result<FullCurationReport> {
        run_pass(&self.store, CurationOperation::FullCuration, agent, || {
            Ok(FullCurationReport {
                tags: self.run_tag_normalization(agent)?,
                orphans: self.run_orphan_detection(agent)?,
                relationships: self.run_relationship_discovery(agent)?,
                duplicates: self.run_duplicate_detection(agent, self.settings.duplicate_threshold)?,
                promotion: self.run_memory_promotion(agent, false)?,
            })
        })
    }
}
