//! Cache Engine
//!
//! Orchestrates get/set/delete across the three tiers: read-through probing
//! fast → medium → durable with promotion on hit, write to a single target
//! tier, tag-indexed bulk invalidation, request coalescing for loaders, and
//! the periodic expiry sweep.
//!
//! The engine is a cheap-to-clone handle around shared state; the host
//! application constructs one and hands clones to every collaborator instead
//! of publishing a global instance.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::mapref::entry::Entry as DashEntry;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::clock::{Clock, MonotonicClock};
use crate::compression::Compression;
use crate::durable::{DurableStore, DurableTier, InMemoryDurableStore};
use crate::entry::{CacheEntry, Priority};
use crate::error::{Error, Result};
use crate::preload::{KeyMatcher, PreloadAdvisor, RecomputeFn};
use crate::stats::{StatsCollector, StatsSnapshot};
use crate::sweep::PeriodicTask;
use crate::tier::{MemoryTier, TierCapacities, TierName};

/// Engine configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL applied when a write specifies none (`None` = entries never
    /// expire by default)
    pub default_ttl: Option<Duration>,
    /// Entry-count bound per tier
    pub tier_capacities: TierCapacities,
    /// Payloads larger than this are compressed before storage
    pub compression_threshold_bytes: usize,
    /// Whether misses are reported to the preload advisor
    pub enable_preload: bool,
    /// Maximum concurrent preloads before matches are dropped
    pub max_preload_concurrency: usize,
    /// Period of the background expiry sweep
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: None,
            tier_capacities: TierCapacities::default(),
            compression_threshold_bytes: crate::DEFAULT_COMPRESSION_THRESHOLD,
            enable_preload: false,
            max_preload_concurrency: 4,
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// Per-write options
#[derive(Debug, Clone)]
pub struct SetOptions {
    /// TTL for this entry; `None` falls back to the configured default
    pub ttl: Option<Duration>,
    /// Target tier (no fan-out: only promotion-on-read copies across tiers)
    pub tier: TierName,
    /// Invalidation tags
    pub tags: Vec<String>,
    /// Eviction priority
    pub priority: Priority,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            ttl: None,
            tier: TierName::Fast,
            tags: Vec::new(),
            priority: Priority::Normal,
        }
    }
}

type LoadFuture = Shared<BoxFuture<'static, Result<Bytes>>>;

struct EngineInner {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    fast: MemoryTier,
    medium: MemoryTier,
    durable: DurableTier,
    compression: Compression,
    /// tag -> keys carrying it; stale references are dropped lazily
    tag_index: Mutex<HashMap<String, HashSet<String>>>,
    /// One shared loader future per missing key
    in_flight: DashMap<String, LoadFuture>,
    stats: StatsCollector,
    preload: PreloadAdvisor,
    tasks: Mutex<Vec<PeriodicTask>>,
}

impl EngineInner {
    /// Probe fast → medium → durable, promoting on a hit below fast
    fn lookup(&self, key: &str) -> Option<Bytes> {
        let now = self.clock.now_ms();

        if let Some(entry) = self.fast.get(key, now) {
            if let Some(value) = self.decode_or_heal(TierName::Fast, &entry) {
                self.stats.record_hit(TierName::Fast);
                return Some(value);
            }
        }
        self.stats.record_miss(TierName::Fast);

        if let Some(entry) = self.medium.get(key, now) {
            if let Some(value) = self.decode_or_heal(TierName::Medium, &entry) {
                self.stats.record_hit(TierName::Medium);
                self.promote(&entry, &value, &[TierName::Fast]);
                return Some(value);
            }
        }
        self.stats.record_miss(TierName::Medium);

        if let Some(entry) = self.durable.get(key, now) {
            if let Some(value) = self.decode_or_heal(TierName::Durable, &entry) {
                self.stats.record_hit(TierName::Durable);
                self.promote(&entry, &value, &[TierName::Medium, TierName::Fast]);
                return Some(value);
            }
        }
        self.stats.record_miss(TierName::Durable);

        None
    }

    /// Decode a hit, deleting the entry and reporting absence on corruption
    fn decode_or_heal(&self, tier: TierName, entry: &CacheEntry) -> Option<Bytes> {
        if !entry.is_compressed() {
            return Some(entry.value().clone());
        }
        match self.compression.decode(entry.value()) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %entry.key, %tier, error = %e, "corrupt cache entry dropped");
                self.remove_from(tier, &entry.key);
                None
            }
        }
    }

    fn remove_from(&self, tier: TierName, key: &str) {
        match tier {
            TierName::Fast => {
                self.fast.remove(key);
            }
            TierName::Medium => {
                self.medium.remove(key);
            }
            TierName::Durable => {
                self.durable.remove(key);
            }
        }
    }

    /// Copy a hit entry into every faster tier. The source copy is left for
    /// its own TTL/eviction to reclaim, keeping the read path free of
    /// cross-tier deletes.
    fn promote(&self, entry: &CacheEntry, decoded: &Bytes, targets: &[TierName]) {
        for &target in targets {
            let (stored, compressed) = self.compression.maybe_encode(decoded);
            let copy = entry.promoted_copy(stored, compressed);
            let evicted = match target {
                TierName::Fast => self.fast.put(copy),
                TierName::Medium => self.medium.put(copy),
                TierName::Durable => self.durable.put(copy),
            };
            if evicted.is_some() {
                self.stats.record_eviction(target);
            }
        }
    }

    fn write(&self, key: &str, value: Bytes, opts: &SetOptions) {
        let now = self.clock.now_ms();
        let (stored, compressed) = self.compression.maybe_encode(&value);
        let ttl_ms = opts
            .ttl
            .or(self.config.default_ttl)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let entry = CacheEntry::new(key, stored, now)
            .with_compressed(compressed)
            .with_ttl(ttl_ms)
            .with_tags(opts.tags.iter().cloned())
            .with_priority(opts.priority);

        if !opts.tags.is_empty() {
            let mut index = self.tag_index.lock();
            for tag in &opts.tags {
                index
                    .entry(tag.clone())
                    .or_default()
                    .insert(key.to_string());
            }
        }

        let evicted = match opts.tier {
            TierName::Fast => self.fast.put(entry),
            TierName::Medium => self.medium.put(entry),
            TierName::Durable => self.durable.put(entry),
        };
        self.stats.record_set(opts.tier);
        if let Some(victim) = evicted {
            self.stats.record_eviction(opts.tier);
            debug!(tier = %opts.tier, key = %victim, "evicted to admit new entry");
        }
    }

    fn remove_everywhere(&self, key: &str) -> bool {
        let mut removed = self.fast.remove(key).is_some();
        removed |= self.medium.remove(key).is_some();
        removed |= self.durable.remove(key).is_some();
        removed
    }

    fn sweep_expired(&self) -> usize {
        let now = self.clock.now_ms();
        self.fast.sweep_expired(now).len()
            + self.medium.sweep_expired(now).len()
            + self.durable.sweep_expired(now).len()
    }
}

/// Unified tiered cache engine
#[derive(Clone)]
pub struct CacheEngine {
    inner: Arc<EngineInner>,
}

impl CacheEngine {
    /// Create an engine over the given durable store, rehydrate the durable
    /// tier, and start the background sweep. Requires a Tokio runtime.
    pub async fn new(config: CacheConfig, store: Arc<dyn DurableStore>) -> Self {
        Self::with_clock(config, store, Arc::new(MonotonicClock::new())).await
    }

    /// Create with an explicit clock (tests drive expiry deterministically)
    pub async fn with_clock(
        config: CacheConfig,
        store: Arc<dyn DurableStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let inner = Arc::new(EngineInner {
            fast: MemoryTier::new(TierName::Fast, config.tier_capacities.fast),
            medium: MemoryTier::new(TierName::Medium, config.tier_capacities.medium),
            durable: DurableTier::new(store, config.tier_capacities.durable),
            compression: Compression::new(config.compression_threshold_bytes),
            tag_index: Mutex::new(HashMap::new()),
            in_flight: DashMap::new(),
            stats: StatsCollector::new(),
            preload: PreloadAdvisor::new(config.max_preload_concurrency),
            tasks: Mutex::new(Vec::new()),
            clock,
            config,
        });

        let rehydrated = inner.durable.rehydrate(inner.clock.now_ms()).await;
        if rehydrated > 0 {
            debug!(entries = rehydrated, "durable tier rehydrated");
        }

        let engine = Self { inner };
        engine.start_sweep();
        engine
    }

    /// Create with an in-memory durable store (for testing)
    pub async fn in_memory() -> Self {
        Self::new(
            CacheConfig::default(),
            Arc::new(InMemoryDurableStore::new()),
        )
        .await
    }

    fn start_sweep(&self) {
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.config.sweep_interval;
        let task = PeriodicTask::spawn("expiry-sweep", period, move || {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    let removed = inner.sweep_expired();
                    if removed > 0 {
                        debug!(removed, "expiry sweep");
                    }
                }
            }
        });
        self.inner.tasks.lock().push(task);
    }

    /// Get a value, probing all tiers fastest-first. A hit below the fast
    /// tier is copied upward before returning. Expired entries report as
    /// absent. Never fails: internal faults degrade to a miss.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let value = self.inner.lookup(key);
        if value.is_none() {
            self.trigger_preload(key);
        }
        value
    }

    /// Get from a single tier, without promotion
    pub fn get_from(&self, key: &str, tier: TierName) -> Option<Bytes> {
        let inner = &self.inner;
        let now = inner.clock.now_ms();
        let entry = match tier {
            TierName::Fast => inner.fast.get(key, now),
            TierName::Medium => inner.medium.get(key, now),
            TierName::Durable => inner.durable.get(key, now),
        };
        match entry.and_then(|e| inner.decode_or_heal(tier, &e)) {
            Some(value) => {
                inner.stats.record_hit(tier);
                Some(value)
            }
            None => {
                inner.stats.record_miss(tier);
                None
            }
        }
    }

    /// Get, deserializing the payload as JSON
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Get, invoking `loader` on a full miss and caching its result with
    /// default write options.
    ///
    /// Concurrent callers for the same missing key coalesce onto a single
    /// loader execution; every caller receives that one result, including a
    /// failure. On failure nothing is cached.
    pub async fn get_or_load<F, Fut, E>(&self, key: &str, loader: F) -> Result<Bytes>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Bytes, E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        self.get_or_load_with(key, SetOptions::default(), loader)
            .await
    }

    /// [`get_or_load`](Self::get_or_load) with explicit write-back options
    /// for the loaded value. When callers coalesce, the first caller's
    /// options win.
    pub async fn get_or_load_with<F, Fut, E>(
        &self,
        key: &str,
        opts: SetOptions,
        loader: F,
    ) -> Result<Bytes>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Bytes, E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let load = match self.inner.in_flight.entry(key.to_string()) {
            DashEntry::Occupied(existing) => existing.get().clone(),
            DashEntry::Vacant(slot) => {
                let engine = self.clone();
                let key = key.to_string();
                let fut = loader();
                let load: LoadFuture = async move {
                    let outcome = fut.await.map_err(|e| Error::Loader {
                        key: key.clone(),
                        reason: e.to_string(),
                    });
                    match &outcome {
                        Ok(value) => engine.inner.write(&key, value.clone(), &opts),
                        Err(e) => debug!(key = %key, error = %e, "loader failed"),
                    }
                    engine.inner.in_flight.remove(&key);
                    outcome
                }
                .boxed()
                .shared();
                slot.insert(load.clone());
                load
            }
        };

        load.await
    }

    /// Write a value to the fast tier with default options
    pub fn set(&self, key: &str, value: Bytes) {
        self.set_with(key, value, SetOptions::default());
    }

    /// Write a value to one tier. Compression is applied per the configured
    /// threshold and the tag index is updated. There is no fan-out: only
    /// promotion-on-read copies entries across tiers.
    pub fn set_with(&self, key: &str, value: Bytes, opts: SetOptions) {
        self.inner.write(key, value, &opts);
    }

    /// Write a value serialized as JSON
    pub fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let encoded = serde_json::to_vec(value)?;
        self.set(key, Bytes::from(encoded));
        Ok(())
    }

    /// Remove a key from every tier and from every tag's key set. Returns
    /// whether any tier held it.
    pub fn delete(&self, key: &str) -> bool {
        let removed = self.inner.remove_everywhere(key);
        let mut index = self.inner.tag_index.lock();
        index.retain(|_, keys| {
            keys.remove(key);
            !keys.is_empty()
        });
        removed
    }

    /// Remove every key indexed under `tag` from every tier. Returns the
    /// number of keys that were present somewhere. Idempotent.
    pub fn delete_by_tag(&self, tag: &str) -> usize {
        let keys: Vec<String> = match self.inner.tag_index.lock().remove(tag) {
            Some(keys) => keys.into_iter().collect(),
            None => return 0,
        };

        let mut count = 0;
        for key in &keys {
            if self.inner.remove_everywhere(key) {
                count += 1;
            }
        }

        // Drop the removed keys from any other tag sets
        let mut index = self.inner.tag_index.lock();
        index.retain(|_, set| {
            for key in &keys {
                set.remove(key);
            }
            !set.is_empty()
        });

        count
    }

    /// Remove every expired entry from every tier in one pass. Run
    /// periodically in the background; public so tests drive it directly.
    pub fn sweep_expired(&self) -> usize {
        self.inner.sweep_expired()
    }

    /// Register a preload rule (see [`PreloadAdvisor`])
    pub fn register_preload(
        &self,
        matcher: KeyMatcher,
        max_preloads: usize,
        recompute: RecomputeFn,
    ) {
        self.inner.preload.register(matcher, max_preloads, recompute);
    }

    fn trigger_preload(&self, key: &str) {
        if !self.inner.config.enable_preload {
            return;
        }
        let Some((recompute, permit)) = self.inner.preload.plan(key) else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(key, "preload skipped, no async runtime");
            return;
        };

        let engine = self.clone();
        let key = key.to_string();
        handle.spawn(async move {
            let _permit = permit;
            match recompute(&key).await {
                Ok(value) => {
                    let opts = SetOptions {
                        tier: TierName::Medium,
                        priority: Priority::High,
                        ..SetOptions::default()
                    };
                    engine.inner.write(&key, value, &opts);
                    debug!(key = %key, "preloaded");
                }
                Err(e) => debug!(key = %key, error = %e, "preload recompute failed"),
            }
        });
    }

    /// Read-only statistics snapshot
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot(
            self.inner.fast.len(),
            self.inner.medium.len(),
            self.inner.durable.len(),
        )
    }

    /// Engine configuration
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Stop background tasks and drain pending durable flushes
    pub async fn shutdown(&self) {
        let tasks: Vec<PeriodicTask> = self.inner.tasks.lock().drain(..).collect();
        for task in tasks {
            task.shutdown().await;
        }
        self.inner.durable.shutdown().await;
    }
}

// =============================================================================
// Tests
// =============================================================================
