//! Variation tracking.
//!
//! Records which alternative every render used, per campaign, so the spread
//! of variations across a send can be inspected and exported. Each campaign
//! keeps striped shards; a render is applied to one shard under that shard's
//! lock and snapshots merge the shards, so recording never takes a lock that
//! spans a whole campaign.

mod export;
mod stats;

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

use crate::metrics::TrackerMetrics;
use crate::render::Choice;

pub use export::ExportFormat;
pub use stats::{GroupStats, VariationStats};

use stats::CampaignCounters;

/// Tracker-specific error type
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Unknown campaign: {0}")]
    UnknownCampaign(String),

    #[error("Invalid export format: {0} (expected json or csv)")]
    InvalidFormat(String),

    #[error("JSON export failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV export failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("Export failed: {0}")]
    Export(String),
}

/// Concurrent per-campaign variation counters
#[derive(Debug, Default)]
pub struct VariationTracker {
    campaigns: DashMap<String, Arc<CampaignCounters>>,
}

impl VariationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the choices of one render against `campaign_id`
    pub fn record(&self, campaign_id: &str, choices: &[Choice]) {
        // Recording happens under the map entry guard, so `reset` cannot
        // detach a campaign while one of its renders is half applied.
        if let Some(counters) = self.campaigns.get(campaign_id) {
            counters.record(choices);
        } else {
            self.campaigns
                .entry(campaign_id.to_string())
                .or_default()
                .record(choices);
            TrackerMetrics::set_campaigns(self.campaigns.len());
        }
        TrackerMetrics::record_render();
    }

    /// Current statistics, or `None` if nothing was recorded for the campaign
    pub fn snapshot(&self, campaign_id: &str) -> Option<VariationStats> {
        let counters = self.campaigns.get(campaign_id)?.value().clone();
        Some(counters.snapshot(campaign_id))
    }

    /// Serialize a snapshot of `campaign_id`
    pub fn export(&self, campaign_id: &str, format: ExportFormat) -> Result<String, TrackerError> {
        let stats = self
            .snapshot(campaign_id)
            .ok_or_else(|| TrackerError::UnknownCampaign(campaign_id.to_string()))?;
        export::export(&stats, format)
    }

    /// Identifiers of all tracked campaigns, sorted
    pub fn campaigns(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.campaigns.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Stop tracking a campaign, returning its final statistics
    pub fn reset(&self, campaign_id: &str) -> Option<VariationStats> {
        let (_, counters) = self.campaigns.remove(campaign_id)?;
        TrackerMetrics::set_campaigns(self.campaigns.len());
        debug!(campaign_id = %campaign_id, "Campaign tracking reset");
        Some(counters.snapshot(campaign_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn choice(group: usize, alternative: usize) -> Choice {
        Choice { group, alternative }
    }

    #[test]
    fn test_record_and_snapshot() {
        let tracker = VariationTracker::new();
        tracker.record("spring", &[choice(0, 1), choice(1, 0)]);
        tracker.record("spring", &[choice(0, 1), choice(1, 2)]);
        tracker.record("spring", &[choice(0, 0), choice(1, 2)]);

        let stats = tracker.snapshot("spring").unwrap();
        assert_eq!(stats.campaign_id, "spring");
        assert_eq!(stats.total_renders, 3);
        assert_eq!(stats.count(0, 1), 2);
        assert_eq!(stats.count(0, 0), 1);
        assert_eq!(stats.count(1, 2), 2);
        assert_eq!(stats.count(1, 1), 0);
        assert_eq!(stats.group(0).unwrap().renders, 3);
    }

    #[test]
    fn test_unknown_campaign() {
        let tracker = VariationTracker::new();
        assert!(tracker.snapshot("missing").is_none());
        assert!(matches!(
            tracker.export("missing", ExportFormat::Json),
            Err(TrackerError::UnknownCampaign(_))
        ));
    }

    #[test]
    fn test_static_renders_count_without_groups() {
        let tracker = VariationTracker::new();
        tracker.record("plain", &[]);
        tracker.record("plain", &[]);

        let stats = tracker.snapshot("plain").unwrap();
        assert_eq!(stats.total_renders, 2);
        assert!(stats.groups.is_empty());
    }

    #[test]
    fn test_nested_group_renders_follow_visits() {
        let tracker = VariationTracker::new();
        // Group 1 is nested in alternative 0 of group 0
        tracker.record("nested", &[choice(0, 0), choice(1, 1), choice(2, 0)]);
        tracker.record("nested", &[choice(0, 1), choice(2, 1)]);

        let stats = tracker.snapshot("nested").unwrap();
        assert_eq!(stats.group(0).unwrap().renders, 2);
        assert_eq!(stats.group(1).unwrap().renders, 1);
        assert_eq!(stats.group(2).unwrap().renders, 2);
    }

    #[test]
    fn test_json_export() {
        let tracker = VariationTracker::new();
        tracker.record("launch", &[choice(0, 1)]);

        let json = tracker.export("launch", ExportFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["campaign_id"], "launch");
        assert_eq!(value["total_renders"], 1);
        assert_eq!(value["groups"]["0"]["alternatives"]["1"], 1);
    }

    #[test]
    fn test_csv_export() {
        let tracker = VariationTracker::new();
        tracker.record("launch", &[choice(0, 0)]);
        tracker.record("launch", &[choice(0, 0)]);
        tracker.record("launch", &[choice(0, 0)]);
        tracker.record("launch", &[choice(0, 1)]);

        let csv = tracker.export("launch", ExportFormat::Csv).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "campaign_id,group,alternative,count,share");
        assert_eq!(lines[1], "launch,0,0,3,0.7500");
        assert_eq!(lines[2], "launch,0,1,1,0.2500");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_export_format_parsing() {
        assert_eq!("json".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert_eq!(" CSV ".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert!(matches!(
            "xml".parse::<ExportFormat>(),
            Err(TrackerError::InvalidFormat(_))
        ));
        assert_eq!(ExportFormat::default(), ExportFormat::Json);
    }

    #[test]
    fn test_campaigns_and_reset() {
        let tracker = VariationTracker::new();
        tracker.record("b", &[choice(0, 0)]);
        tracker.record("a", &[choice(0, 1)]);
        assert_eq!(tracker.campaigns(), vec!["a".to_string(), "b".to_string()]);

        let final_stats = tracker.reset("a").unwrap();
        assert_eq!(final_stats.total_renders, 1);
        assert_eq!(tracker.campaigns(), vec!["b".to_string()]);
        assert!(tracker.reset("a").is_none());
    }

    #[test]
    fn test_snapshots_during_recording_count_whole_renders() {
        let tracker = Arc::new(VariationTracker::new());
        let done = Arc::new(AtomicBool::new(false));

        let writers: Vec<_> = (0..4)
            .map(|_| {
                let tracker = tracker.clone();
                let done = done.clone();
                std::thread::spawn(move || {
                    while !done.load(Ordering::Relaxed) {
                        tracker.record("flat", &[choice(0, 1), choice(1, 1)]);
                    }
                })
            })
            .collect();

        let mut last_total = 0;
        for _ in 0..5_000 {
            let Some(stats) = tracker.snapshot("flat") else {
                continue;
            };
            // Every render visits both groups of a flat template
            for group in [0, 1] {
                let renders = stats.group(group).map_or(0, |g| g.renders);
                assert_eq!(renders, stats.total_renders);
            }
            assert!(stats.total_renders >= last_total);
            last_total = stats.total_renders;
        }

        done.store(true, Ordering::Relaxed);
        for writer in writers {
            writer.join().unwrap();
        }
    }

    #[test]
    fn test_reset_during_recording_loses_nothing() {
        let tracker = Arc::new(VariationTracker::new());
        let per_writer = 2_000u64;

        let writers: Vec<_> = (0..4)
            .map(|_| {
                let tracker = tracker.clone();
                std::thread::spawn(move || {
                    for _ in 0..per_writer {
                        tracker.record("rolling", &[choice(0, 0)]);
                    }
                })
            })
            .collect();

        let mut counted = 0u64;
        for _ in 0..50 {
            if let Some(stats) = tracker.reset("rolling") {
                counted += stats.total_renders;
            }
            std::thread::yield_now();
        }
        for writer in writers {
            writer.join().unwrap();
        }
        if let Some(stats) = tracker.reset("rolling") {
            counted += stats.total_renders;
        }

        assert_eq!(counted, 4 * per_writer);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_recording_keeps_sums() {
        let tracker = Arc::new(VariationTracker::new());
        let mut handles = Vec::new();

        for task in 0..8usize {
            let tracker = tracker.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..500usize {
                    tracker.record("hot", &[choice(0, (task + i) % 3), choice(1, i % 2)]);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stats = tracker.snapshot("hot").unwrap();
        assert_eq!(stats.total_renders, 4000);
        for group in stats.groups.values() {
            assert_eq!(group.renders, 4000);
            assert_eq!(group.alternatives.values().sum::<u64>(), group.renders);
        }
    }
}
