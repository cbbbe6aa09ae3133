//! Content-addressed cache of parsed templates.
//!
//! Entries are keyed by the CRC32 fingerprint of the raw text and verified
//! against the full text, so colliding templates coexist in one bucket.
//! Capacity overflow evicts the least recently used entry; entries older
//! than the configured max age are dropped unconditionally.
//!
//! Concurrent misses for the same text share a single parse: the first
//! caller parses while later callers wait on a `watch` channel for its
//! outcome. Failed parses are handed to every waiter but never cached.

mod types;

pub use types::{CacheConfig, CacheError, CacheStats};

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use smallvec::SmallVec;
use tokio::sync::watch;

use crate::metrics::CacheMetrics;
use crate::template::{fingerprint, parse, ParseError, ParsedTemplate, RawTemplate};

use types::{CacheCounters, CacheEntry};

type ParseOutcome = Result<Arc<ParsedTemplate>, ParseError>;
type Bucket = SmallVec<[Arc<CacheEntry>; 1]>;
type FlightSender = watch::Sender<Option<ParseOutcome>>;

enum FlightRole {
    Leader(Arc<FlightSender>),
    Waiter(watch::Receiver<Option<ParseOutcome>>),
}

/// Concurrency-safe cache of parsed templates
pub struct TemplateCache {
    entries: DashMap<u32, Bucket>,
    inflight: DashMap<Arc<str>, Arc<FlightSender>>,
    len: AtomicUsize,
    clock: AtomicU64,
    counters: CacheCounters,
    config: CacheConfig,
}

impl TemplateCache {
    /// Create a cache, rejecting invalid bounds
    pub fn new(config: CacheConfig) -> Result<Self, CacheError> {
        config.validate()?;
        Ok(Self {
            entries: DashMap::new(),
            inflight: DashMap::new(),
            len: AtomicUsize::new(0),
            clock: AtomicU64::new(0),
            counters: CacheCounters::default(),
            config,
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Number of cached templates
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot(self.len())
    }

    /// Look up already-parsed text without parsing on a miss
    pub fn get(&self, raw: &str) -> Option<Arc<ParsedTemplate>> {
        let found = self.lookup(fingerprint(raw), raw);
        if found.is_some() {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            CacheMetrics::record_hit();
        } else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            CacheMetrics::record_miss();
        }
        found
    }

    /// Return the shared parse of `raw`, parsing at most once per distinct text.
    pub async fn get_or_parse(&self, raw: &str) -> Result<Arc<ParsedTemplate>, ParseError> {
        self.resolve(&RawTemplate::new(raw)).await
    }

    /// Like `get_or_parse`, for text whose fingerprint is already known.
    #[tracing::instrument(
        name = "cache.resolve",
        skip(self, raw),
        fields(fingerprint = raw.fingerprint(), bytes = raw.text().len())
    )]
    pub async fn resolve(&self, raw: &RawTemplate) -> Result<Arc<ParsedTemplate>, ParseError> {
        let fp = raw.fingerprint();
        if let Some(parsed) = self.lookup(fp, raw.text()) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            CacheMetrics::record_hit();
            return Ok(parsed);
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        CacheMetrics::record_miss();

        let role = match self.inflight.entry(raw.shared_text()) {
            Entry::Occupied(slot) => FlightRole::Waiter(slot.get().subscribe()),
            Entry::Vacant(slot) => {
                let (tx, _rx) = watch::channel(None);
                let tx = Arc::new(tx);
                slot.insert(tx.clone());
                FlightRole::Leader(tx)
            }
        };

        match role {
            FlightRole::Leader(tx) => self.lead_parse(raw, tx),
            FlightRole::Waiter(mut rx) => {
                self.counters
                    .single_flight_waits
                    .fetch_add(1, Ordering::Relaxed);
                CacheMetrics::record_single_flight_wait();
                tracing::debug!(fingerprint = fp, "Joining in-flight template parse");

                let published = rx
                    .wait_for(Option::is_some)
                    .await
                    .map(|outcome| outcome.clone());
                match published {
                    Ok(Some(outcome)) => outcome,
                    _ => {
                        tracing::warn!(
                            fingerprint = fp,
                            "In-flight parse ended without a result, parsing without cache"
                        );
                        self.parse_uncached(raw.text())
                    }
                }
            }
        }
    }

    /// Drop every entry older than the max age. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let expired: Vec<(u32, RawTemplate)> = self
            .entries
            .iter()
            .flat_map(|bucket| {
                let fp = *bucket.key();
                bucket
                    .value()
                    .iter()
                    .filter(|entry| entry.is_expired(self.config.max_age))
                    .map(|entry| (fp, entry.raw.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();

        let removed = expired
            .iter()
            .filter(|(fp, raw)| self.remove_entry(*fp, raw.text()))
            .count();

        if removed > 0 {
            self.counters
                .expirations
                .fetch_add(removed as u64, Ordering::Relaxed);
            CacheMetrics::record_expirations(removed as u64);
            CacheMetrics::set_entries(self.len());
            tracing::debug!(removed = removed, "Purged expired templates");
        }
        removed
    }

    /// Remove all cached entries. In-flight parses are left alone.
    pub fn clear(&self) {
        self.entries.clear();
        self.len.store(0, Ordering::Relaxed);
        CacheMetrics::set_entries(0);
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn lookup(&self, fp: u32, raw: &str) -> Option<Arc<ParsedTemplate>> {
        let mut expired = false;
        let found = {
            let bucket = self.entries.get(&fp)?;
            let entry = bucket.iter().find(|entry| entry.raw.text() == raw);
            match entry {
                Some(entry) if entry.is_expired(self.config.max_age) => {
                    expired = true;
                    None
                }
                Some(entry) => {
                    entry.touch(self.tick());
                    Some(entry.parsed.clone())
                }
                None => None,
            }
        };

        if expired && self.remove_entry(fp, raw) {
            self.counters.expirations.fetch_add(1, Ordering::Relaxed);
            CacheMetrics::record_expirations(1);
            CacheMetrics::set_entries(self.len());
        }
        found
    }

    /// Parse on behalf of every concurrent caller and publish the outcome.
    fn lead_parse(&self, raw: &RawTemplate, tx: Arc<FlightSender>) -> ParseOutcome {
        let flight = FlightGuard {
            inflight: &self.inflight,
            key: raw.shared_text(),
            tx,
        };

        // Another leader may have finished between our lookup and claiming the slot.
        let outcome = match self.lookup(raw.fingerprint(), raw.text()) {
            Some(parsed) => Ok(parsed),
            None => {
                let outcome = self.parse_uncached(raw.text());
                if let Ok(parsed) = &outcome {
                    self.insert(raw.fingerprint(), raw.clone(), parsed.clone());
                }
                outcome
            }
        };

        flight.publish(outcome.clone());
        outcome
    }

    fn parse_uncached(&self, raw: &str) -> ParseOutcome {
        self.counters.parses.fetch_add(1, Ordering::Relaxed);
        match parse(raw) {
            Ok(parsed) => {
                CacheMetrics::record_parse(true);
                Ok(Arc::new(parsed))
            }
            Err(err) => {
                self.counters.parse_failures.fetch_add(1, Ordering::Relaxed);
                CacheMetrics::record_parse(false);
                tracing::debug!(error = %err, "Template parse failed");
                Err(err)
            }
        }
    }

    fn insert(&self, fp: u32, raw: RawTemplate, parsed: Arc<ParsedTemplate>) {
        let entry = Arc::new(CacheEntry::new(raw, parsed, self.tick()));
        {
            let mut bucket = self.entries.entry(fp).or_default();
            if let Some(existing) = bucket.iter_mut().find(|e| e.raw == entry.raw) {
                *existing = entry;
                return;
            }
            bucket.push(entry);
        }

        let len = self.len.fetch_add(1, Ordering::Relaxed) + 1;
        if len > self.config.max_entries {
            self.purge_expired();
            while self.len() > self.config.max_entries {
                if !self.evict_lru() {
                    break;
                }
            }
        }
        CacheMetrics::set_entries(self.len());
    }

    fn evict_lru(&self) -> bool {
        let oldest = self
            .entries
            .iter()
            .flat_map(|bucket| {
                let fp = *bucket.key();
                bucket
                    .value()
                    .iter()
                    .map(|entry| (entry.last_access(), fp, entry.raw.clone()))
                    .collect::<Vec<_>>()
            })
            .min_by_key(|(last_access, _, _)| *last_access);

        let Some((_, fp, raw)) = oldest else {
            return false;
        };
        let removed = self.remove_entry(fp, raw.text());
        if removed {
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            CacheMetrics::record_capacity_eviction();
            tracing::debug!(fingerprint = fp, "Evicted least recently used template");
        }
        removed
    }

    fn remove_entry(&self, fp: u32, raw: &str) -> bool {
        let mut removed = false;
        if let Some(mut bucket) = self.entries.get_mut(&fp) {
            let before = bucket.len();
            bucket.retain(|entry| entry.raw.text() != raw);
            removed = bucket.len() < before;
        }
        self.entries.remove_if(&fp, |_, bucket| bucket.is_empty());
        if removed {
            self.len.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }
}

/// Owns an in-flight slot; releases it even if the parse unwinds, which
/// wakes waiters with a closed channel instead of leaving them hanging.
struct FlightGuard<'a> {
    inflight: &'a DashMap<Arc<str>, Arc<FlightSender>>,
    key: Arc<str>,
    tx: Arc<FlightSender>,
}

impl FlightGuard<'_> {
    fn publish(self, outcome: ParseOutcome) {
        self.release();
        self.tx.send_replace(Some(outcome));
    }

    // Only ever removes this guard's own slot, never a successor's.
    fn release(&self) {
        self.inflight
            .remove_if(&self.key, |_, current| Arc::ptr_eq(current, &self.tx));
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.release();
    }
}
