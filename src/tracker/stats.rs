//! Per-campaign variation statistics

use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::render::Choice;

/// Number of independently locked shards per campaign
const SHARD_COUNT: usize = 16;

/// Counts applied by whole renders
#[derive(Debug, Default)]
struct Shard {
    renders: u64,
    alternatives: HashMap<Choice, u64>,
}

/// Live counters for one campaign.
///
/// A render is applied to a single shard under that shard's lock, so a
/// snapshot summing the shards sees every render either fully or not at all.
#[derive(Debug)]
pub(crate) struct CampaignCounters {
    shards: Box<[Mutex<Shard>]>,
    first_recorded_at: DateTime<Utc>,
}

impl Default for CampaignCounters {
    fn default() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::default()).collect(),
            first_recorded_at: Utc::now(),
        }
    }
}

impl CampaignCounters {
    pub(crate) fn record(&self, choices: &[Choice]) {
        let mut shard = lock(&self.shards[shard_index()]);
        shard.renders += 1;
        for choice in choices {
            *shard.alternatives.entry(*choice).or_default() += 1;
        }
    }

    pub(crate) fn snapshot(&self, campaign_id: &str) -> VariationStats {
        let mut total_renders = 0u64;
        let mut groups: BTreeMap<usize, GroupStats> = BTreeMap::new();
        for shard in self.shards.iter() {
            let shard = lock(shard);
            total_renders += shard.renders;
            for (choice, count) in &shard.alternatives {
                let group = groups.entry(choice.group).or_default();
                group.renders += count;
                *group.alternatives.entry(choice.alternative).or_default() += count;
            }
        }

        VariationStats {
            campaign_id: campaign_id.to_string(),
            total_renders,
            groups,
            first_recorded_at: self.first_recorded_at,
            captured_at: Utc::now(),
        }
    }
}

fn lock(shard: &Mutex<Shard>) -> MutexGuard<'_, Shard> {
    shard.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shard for the calling thread; concurrent workers spread across shards
fn shard_index() -> usize {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish() as usize % SHARD_COUNT
}

/// Counts for one variation group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupStats {
    /// Renders that visited this group; always the sum of `alternatives`
    pub renders: u64,
    /// Alternative index to number of times it was rendered
    pub alternatives: BTreeMap<usize, u64>,
}

impl GroupStats {
    /// Fraction of this group's renders that used `alternative`
    pub fn share(&self, alternative: usize) -> f64 {
        if self.renders == 0 {
            return 0.0;
        }
        let count = self.alternatives.get(&alternative).copied().unwrap_or(0);
        count as f64 / self.renders as f64
    }
}

/// Point-in-time statistics for a campaign
#[derive(Debug, Clone, Serialize)]
pub struct VariationStats {
    pub campaign_id: String,
    pub total_renders: u64,
    pub groups: BTreeMap<usize, GroupStats>,
    pub first_recorded_at: DateTime<Utc>,
    pub captured_at: DateTime<Utc>,
}

impl VariationStats {
    pub fn group(&self, index: usize) -> Option<&GroupStats> {
        self.groups.get(&index)
    }

    /// Count for one alternative of one group
    pub fn count(&self, group: usize, alternative: usize) -> u64 {
        self.groups
            .get(&group)
            .and_then(|g| g.alternatives.get(&alternative))
            .copied()
            .unwrap_or(0)
    }
}
