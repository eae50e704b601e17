//! Cache Statistics
//!
//! Per-tier hit/miss/set/eviction counters for observability. Recording is
//! lock-free; `snapshot` is read-only and side-effect-free.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::tier::TierName;

#[derive(Debug, Default)]
struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    evictions: AtomicU64,
}

impl TierCounters {
    fn snapshot(&self, entries: usize) -> TierStats {
        TierStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries,
        }
    }
}

/// Counter collector shared by the engine and its tiers
#[derive(Debug, Default)]
pub struct StatsCollector {
    fast: TierCounters,
    medium: TierCounters,
    durable: TierCounters,
}

impl StatsCollector {
    /// Create a zeroed collector
    pub fn new() -> Self {
        Self::default()
    }

    fn tier(&self, tier: TierName) -> &TierCounters {
        match tier {
            TierName::Fast => &self.fast,
            TierName::Medium => &self.medium,
            TierName::Durable => &self.durable,
        }
    }

    /// Record a hit in `tier`
    pub fn record_hit(&self, tier: TierName) {
        self.tier(tier).hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a miss in `tier`
    pub fn record_miss(&self, tier: TierName) {
        self.tier(tier).misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a write to `tier`
    pub fn record_set(&self, tier: TierName) {
        self.tier(tier).sets.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an eviction from `tier`
    pub fn record_eviction(&self, tier: TierName) {
        self.tier(tier).evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Build a snapshot; tier entry counts are supplied by the engine
    pub fn snapshot(&self, fast_entries: usize, medium_entries: usize, durable_entries: usize) -> StatsSnapshot {
        let fast = self.fast.snapshot(fast_entries);
        let medium = self.medium.snapshot(medium_entries);
        let durable = self.durable.snapshot(durable_entries);

        let hits = fast.hits + medium.hits + durable.hits;
        // A probe that falls through every tier is one logical miss; the
        // durable-tier miss count is the number of full misses
        let misses = durable.misses;
        let total = hits + misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        };

        StatsSnapshot {
            hits,
            misses,
            sets: fast.sets + medium.sets + durable.sets,
            evictions: fast.evictions + medium.evictions + durable.evictions,
            hit_rate,
            fast,
            medium,
            durable,
        }
    }
}

/// Counters for a single tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
    /// Current entry count
    pub entries: usize,
}

/// Point-in-time view of all cache statistics
#[derive(Debug, Clone, Copy)]
pub struct StatsSnapshot {
    /// Total hits across tiers
    pub hits: u64,
    /// Full misses (key absent from every tier)
    pub misses: u64,
    /// Total writes across tiers
    pub sets: u64,
    /// Total evictions across tiers
    pub evictions: u64,
    /// hits / (hits + full misses)
    pub hit_rate: f64,
    pub fast: TierStats,
    pub medium: TierStats,
    pub durable: TierStats,
}

// =============================================================================
// Tests
// =============================================================================
