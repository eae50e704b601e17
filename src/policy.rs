//! Eviction Policies
//!
//! Victim selection for a tier at capacity. The fast tier is strict LRU over
//! its recency order; the medium and durable tiers evict oldest-write-first.
//! High-priority entries are passed over a bounded number of times per call,
//! then evicted anyway so an all-high-priority tier cannot wedge.

use std::collections::{HashMap, VecDeque};

use crate::entry::{CacheEntry, Priority};

/// Maximum high-priority entries passed over per eviction call
pub const MAX_PRIORITY_SKIPS: usize = 8;

/// Victim selection strategy for a tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Least-recently-used, via the tier's recency order (fast tier)
    Lru,
    /// Oldest `created_at` first (medium and durable tiers)
    OldestFirst,
}

impl std::fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvictionPolicy::Lru => write!(f, "lru"),
            EvictionPolicy::OldestFirst => write!(f, "oldest-first"),
        }
    }
}

/// Select and pop the LRU victim from the recency order (head = LRU).
///
/// High-priority entries are re-queued to the tail instead of evicted, up to
/// [`MAX_PRIORITY_SKIPS`] times. Keys no longer present in the entry map are
/// dropped from the order without counting as skips.
pub fn select_lru_victim(
    recency: &mut VecDeque<String>,
    entries: &HashMap<String, CacheEntry>,
) -> Option<String> {
    let mut skips = 0;
    while let Some(key) = recency.pop_front() {
        match entries.get(&key) {
            None => continue,
            Some(entry) if entry.priority() == Priority::High && skips < MAX_PRIORITY_SKIPS => {
                skips += 1;
                recency.push_back(key);
            }
            Some(_) => return Some(key),
        }
    }
    None
}

/// Select the oldest-write victim.
///
/// Ordering is `(created_at, priority, key)`: equal timestamps break first on
/// priority (low evicted first), then on lexicographic key order so the
/// choice is deterministic. The same bounded high-priority skip applies.
pub fn select_oldest_victim(entries: &HashMap<String, CacheEntry>) -> Option<String> {
    let mut candidates: Vec<&CacheEntry> = entries.values().collect();
    candidates.sort_by(|a, b| {
        a.created_at()
            .cmp(&b.created_at())
            .then_with(|| a.priority().cmp(&b.priority()))
            .then_with(|| a.key.cmp(&b.key))
    });

    let mut skips = 0;
    for entry in &candidates {
        if entry.priority() == Priority::High && skips < MAX_PRIORITY_SKIPS {
            skips += 1;
            continue;
        }
        return Some(entry.key.clone());
    }

    // Everything was high-priority and the skip budget ran out
    candidates.first().map(|e| e.key.clone())
}

// =============================================================================
// Tests
// =============================================================================
