//! Prometheus metrics for the variation engine.
//!
//! This module provides metrics for monitoring the engine:
//! - Template cache metrics (hits, misses, parses, evictions)
//! - Render metrics (outcomes, latency)
//! - Bulk run metrics (runs, recipients per run)
//! - Variation tracker metrics (tracked campaigns, recorded choices)

mod helpers;

pub use helpers::{encode_metrics, BulkMetrics, CacheMetrics, RenderMetrics, TrackerMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "ara_variation";

lazy_static! {
    // ============================================================================
    // Template Cache Metrics
    // ============================================================================

    /// Cache lookups by result (hit, miss)
    pub static ref CACHE_LOOKUPS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_cache_lookups_total", METRIC_PREFIX),
        "Template cache lookups",
        &["result"]
    ).unwrap();

    /// Underlying template parses by outcome (ok, error)
    pub static ref TEMPLATE_PARSES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_template_parses_total", METRIC_PREFIX),
        "Template parses performed",
        &["outcome"]
    ).unwrap();

    /// Callers that joined an in-flight parse instead of parsing
    pub static ref CACHE_SINGLE_FLIGHT_WAITS: IntCounter = register_int_counter!(
        format!("{}_cache_single_flight_waits_total", METRIC_PREFIX),
        "Callers that waited on an in-flight parse"
    ).unwrap();

    /// Entries removed by reason (capacity, age)
    pub static ref CACHE_EVICTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_cache_evictions_total", METRIC_PREFIX),
        "Template cache entries removed",
        &["reason"]
    ).unwrap();

    /// Current number of cached templates
    pub static ref CACHE_ENTRIES: IntGauge = register_int_gauge!(
        format!("{}_cache_entries", METRIC_PREFIX),
        "Templates currently cached"
    ).unwrap();

    // ============================================================================
    // Render Metrics
    // ============================================================================

    /// Renders by outcome (success, missing_variable, invalid_path)
    pub static ref RENDERS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_renders_total", METRIC_PREFIX),
        "Template renders",
        &["outcome"]
    ).unwrap();

    /// Time spent selecting and rendering one message
    pub static ref RENDER_LATENCY: Histogram = register_histogram!(
        format!("{}_render_latency_seconds", METRIC_PREFIX),
        "Render latency in seconds",
        vec![0.000_01, 0.000_05, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05]
    ).unwrap();

    // ============================================================================
    // Bulk Metrics
    // ============================================================================

    /// Bulk runs started
    pub static ref BULK_RUNS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_bulk_runs_total", METRIC_PREFIX),
        "Bulk runs started"
    ).unwrap();

    /// Bulk runs rejected before scheduling (bad template or configuration)
    pub static ref BULK_RUNS_REJECTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_bulk_runs_rejected_total", METRIC_PREFIX),
        "Bulk runs rejected before any recipient was scheduled"
    ).unwrap();

    /// Bulk runs cancelled by their caller
    pub static ref BULK_RUNS_CANCELLED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_bulk_runs_cancelled_total", METRIC_PREFIX),
        "Bulk runs cancelled before the input was exhausted"
    ).unwrap();

    /// Recipients per completed bulk run
    pub static ref BULK_RUN_SIZE: Histogram = register_histogram!(
        format!("{}_bulk_run_size", METRIC_PREFIX),
        "Recipients processed per bulk run",
        vec![1.0, 10.0, 100.0, 1_000.0, 10_000.0, 100_000.0, 1_000_000.0]
    ).unwrap();

    // ============================================================================
    // Tracker Metrics
    // ============================================================================

    /// Campaigns with variation statistics in memory
    pub static ref TRACKED_CAMPAIGNS: IntGauge = register_int_gauge!(
        format!("{}_tracked_campaigns", METRIC_PREFIX),
        "Campaigns with in-memory variation statistics"
    ).unwrap();

    /// Renders recorded by the tracker
    pub static ref TRACKED_RENDERS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_tracked_renders_total", METRIC_PREFIX),
        "Renders recorded by the variation tracker"
    ).unwrap();
}
