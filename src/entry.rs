//! Cache Entry Types
//!
//! Pure data: one key-addressed payload plus the bookkeeping the tiers and
//! the eviction policy read (timestamps, TTL, tags, access stats, priority).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Eviction-order tiebreak: low-priority entries are evicted first, and
/// high-priority entries get a bounded number of skips per eviction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    /// Evicted first
    Low,
    /// Default
    Normal,
    /// Skipped (bounded) by the eviction policy
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl Priority {
    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One cache entry. The same logical key may exist in several tiers at once;
/// each tier holds its own copy.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Key, unique within a tier
    pub key: String,
    /// Payload, raw or codec-compressed
    value: bytes::Bytes,
    /// Whether `value` must pass through the codec before being returned
    compressed: bool,
    /// Creation timestamp (monotonic ms)
    created_at: u64,
    /// Last successful read (monotonic ms)
    last_access: u64,
    /// TTL in milliseconds; 0 = never expires by time
    ttl_ms: u64,
    /// Tags for bulk invalidation
    tags: HashSet<String>,
    /// Successful read count
    access_count: u64,
    /// Eviction tiebreak
    priority: Priority,
}

impl CacheEntry {
    /// Create a new raw (uncompressed) entry with no TTL and default priority
    pub fn new(key: impl Into<String>, value: bytes::Bytes, now: u64) -> Self {
        Self {
            key: key.into(),
            value,
            compressed: false,
            created_at: now,
            last_access: now,
            ttl_ms: 0,
            tags: HashSet::new(),
            access_count: 0,
            priority: Priority::Normal,
        }
    }

    /// Set the TTL (0 = never expires)
    pub fn with_ttl(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = ttl_ms;
        self
    }

    /// Mark the payload as codec-compressed
    pub fn with_compressed(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }

    /// Attach invalidation tags
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Set the eviction priority
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Copy this entry for promotion into a faster tier, replacing the
    /// payload with one re-encoded under the target tier's compression rule.
    /// All bookkeeping (TTL window, tags, access stats, priority) carries
    /// over unchanged so the promoted copy expires when the original would.
    pub fn promoted_copy(&self, value: bytes::Bytes, compressed: bool) -> Self {
        Self {
            key: self.key.clone(),
            value,
            compressed,
            created_at: self.created_at,
            last_access: self.last_access,
            ttl_ms: self.ttl_ms,
            tags: self.tags.clone(),
            access_count: self.access_count,
            priority: self.priority,
        }
    }

    /// Get the stored payload (possibly compressed)
    #[inline]
    pub fn value(&self) -> &bytes::Bytes {
        &self.value
    }

    /// Whether the payload is compressed
    #[inline]
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Creation timestamp (monotonic ms)
    #[inline]
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Last access timestamp (monotonic ms)
    #[inline]
    pub fn last_access(&self) -> u64 {
        self.last_access
    }

    /// TTL in milliseconds (0 = never)
    #[inline]
    pub fn ttl_ms(&self) -> u64 {
        self.ttl_ms
    }

    /// Invalidation tags
    #[inline]
    pub fn tags(&self) -> &HashSet<String> {
        &self.tags
    }

    /// Successful read count
    #[inline]
    pub fn access_count(&self) -> u64 {
        self.access_count
    }

    /// Eviction priority
    #[inline]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Payload size in bytes (as stored)
    #[inline]
    pub fn size(&self) -> usize {
        self.value.len()
    }

    /// Record a successful read and return the new access count
    pub fn record_access(&mut self, now: u64) -> u64 {
        self.last_access = now;
        self.access_count += 1;
        self.access_count
    }

    /// An entry is expired iff a TTL is set and strictly more than `ttl_ms`
    /// milliseconds have passed since creation.
    #[inline]
    pub fn is_expired(&self, now: u64) -> bool {
        self.ttl_ms != 0 && now.saturating_sub(self.created_at) > self.ttl_ms
    }
}

// =============================================================================
// Tests
// =============================================================================
