//! Metrics helper structs for convenient metric recording

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use super::{
    BULK_RUNS_CANCELLED_TOTAL, BULK_RUNS_REJECTED_TOTAL, BULK_RUNS_TOTAL, BULK_RUN_SIZE,
    CACHE_ENTRIES, CACHE_EVICTIONS_TOTAL, CACHE_LOOKUPS_TOTAL, CACHE_SINGLE_FLIGHT_WAITS,
    RENDERS_TOTAL, RENDER_LATENCY, TEMPLATE_PARSES_TOTAL, TRACKED_CAMPAIGNS,
    TRACKED_RENDERS_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording template cache metrics
pub struct CacheMetrics;

impl CacheMetrics {
    pub fn record_hit() {
        CACHE_LOOKUPS_TOTAL.with_label_values(&["hit"]).inc();
    }

    pub fn record_miss() {
        CACHE_LOOKUPS_TOTAL.with_label_values(&["miss"]).inc();
    }

    /// Record an underlying parse and whether it succeeded
    pub fn record_parse(ok: bool) {
        let outcome = if ok { "ok" } else { "error" };
        TEMPLATE_PARSES_TOTAL.with_label_values(&[outcome]).inc();
    }

    pub fn record_single_flight_wait() {
        CACHE_SINGLE_FLIGHT_WAITS.inc();
    }

    pub fn record_capacity_eviction() {
        CACHE_EVICTIONS_TOTAL.with_label_values(&["capacity"]).inc();
    }

    pub fn record_expirations(count: u64) {
        CACHE_EVICTIONS_TOTAL.with_label_values(&["age"]).inc_by(count);
    }

    pub fn set_entries(count: usize) {
        CACHE_ENTRIES.set(count as i64);
    }
}

/// Helper struct for recording render metrics
pub struct RenderMetrics;

impl RenderMetrics {
    /// Record a successful render and its latency
    pub fn record_success(elapsed: Duration) {
        RENDERS_TOTAL.with_label_values(&["success"]).inc();
        RENDER_LATENCY.observe(elapsed.as_secs_f64());
    }

    /// Record a failed render, labelled by error code
    pub fn record_failure(code: &str) {
        RENDERS_TOTAL.with_label_values(&[code]).inc();
    }
}

/// Helper struct for recording bulk run metrics
pub struct BulkMetrics;

impl BulkMetrics {
    pub fn record_started() {
        BULK_RUNS_TOTAL.inc();
    }

    pub fn record_rejected() {
        BULK_RUNS_REJECTED_TOTAL.inc();
    }

    pub fn record_cancelled() {
        BULK_RUNS_CANCELLED_TOTAL.inc();
    }

    /// Record how many recipients a finished run handled
    pub fn record_completed(recipients: u64) {
        BULK_RUN_SIZE.observe(recipients as f64);
    }
}

/// Helper struct for recording tracker metrics
pub struct TrackerMetrics;

impl TrackerMetrics {
    pub fn set_campaigns(count: usize) {
        TRACKED_CAMPAIGNS.set(count as i64);
    }

    pub fn record_render() {
        TRACKED_RENDERS_TOTAL.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_metrics_includes_cache_counters() {
        CacheMetrics::record_hit();
        CacheMetrics::record_parse(true);

        let text = encode_metrics().unwrap();
        assert!(text.contains("ara_variation_cache_lookups_total"));
        assert!(text.contains("ara_variation_template_parses_total"));
    }
}
