//! Cache configuration, entries, and statistics

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;

use crate::template::{ParsedTemplate, RawTemplate};

/// Cache misconfiguration, reported at construction time only
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("Invalid cache capacity: {0} (must be at least 1)")]
    InvalidCapacity(usize),

    #[error("Invalid cache max age: must be greater than zero")]
    InvalidMaxAge,
}

/// Bounds for the template cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached templates
    pub max_entries: usize,
    /// Maximum time an entry may stay cached after insertion
    pub max_age: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1024,
            max_age: Duration::from_secs(3600),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.max_entries == 0 {
            return Err(CacheError::InvalidCapacity(self.max_entries));
        }
        if self.max_age.is_zero() {
            return Err(CacheError::InvalidMaxAge);
        }
        Ok(())
    }
}

/// A cached parse, owned by `TemplateCache`
#[derive(Debug)]
pub(crate) struct CacheEntry {
    pub(crate) raw: RawTemplate,
    pub(crate) parsed: Arc<ParsedTemplate>,
    inserted_at: Instant,
    /// Logical clock value of the most recent access
    last_access: AtomicU64,
}

impl CacheEntry {
    pub(crate) fn new(raw: RawTemplate, parsed: Arc<ParsedTemplate>, tick: u64) -> Self {
        Self {
            raw,
            parsed,
            inserted_at: Instant::now(),
            last_access: AtomicU64::new(tick),
        }
    }

    pub(crate) fn touch(&self, tick: u64) {
        self.last_access.fetch_max(tick, Ordering::Relaxed);
    }

    pub(crate) fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    pub(crate) fn is_expired(&self, max_age: Duration) -> bool {
        self.inserted_at.elapsed() >= max_age
    }
}

/// Lock-free cache counters
#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    pub(crate) hits: AtomicU64,
    pub(crate) misses: AtomicU64,
    pub(crate) parses: AtomicU64,
    pub(crate) parse_failures: AtomicU64,
    pub(crate) single_flight_waits: AtomicU64,
    pub(crate) evictions: AtomicU64,
    pub(crate) expirations: AtomicU64,
}

impl CacheCounters {
    pub(crate) fn snapshot(&self, entries: usize) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            parses: self.parses.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            single_flight_waits: self.single_flight_waits.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            entries,
        }
    }
}

/// Snapshot of cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Underlying parses performed, successful or not
    pub parses: u64,
    pub parse_failures: u64,
    pub single_flight_waits: u64,
    /// Entries removed to respect the capacity bound
    pub evictions: u64,
    /// Entries removed for exceeding the max age
    pub expirations: u64,
    pub entries: usize,
}

impl CacheStats {
    /// Hit rate as a percentage of all lookups
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}
