//! Durable Tier
//!
//! The durable tier pairs an in-memory index (a [`MemoryTier`]) with an
//! external persistent key-value store behind the [`DurableStore`] adapter.
//! Reads are always served from the index; the adapter is touched only at
//! rehydration and by the background flusher.
//!
//! Writes are fire-and-forget for callers but ordered per key: every accepted
//! mutation carries a monotonic sequence number, and a flush whose sequence
//! is older than the latest accepted write for that key is skipped. A slow
//! save can therefore never clobber a newer one, regardless of completion
//! order. Adapter failures are logged and absorbed; the in-memory tiers stay
//! authoritative for the process lifetime.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::entry::{CacheEntry, Priority};
use crate::error::{Error, Result};
use crate::tier::{MemoryTier, TierName};

/// Entry form handed to the durable store adapter. Serde-serializable so
/// adapters choose their own persistence format.
///
/// Timestamps are process-relative and therefore not persisted; a rehydrated
/// entry restarts its TTL window at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub key: String,
    pub value: Vec<u8>,
    pub compressed: bool,
    pub ttl_ms: u64,
    pub tags: Vec<String>,
    pub access_count: u64,
    pub priority: Priority,
    /// Write sequence number, monotonic per engine instance
    pub seq: u64,
}

impl PersistedEntry {
    /// Capture a cache entry for persistence
    pub fn from_entry(entry: &CacheEntry, seq: u64) -> Self {
        Self {
            key: entry.key.clone(),
            value: entry.value().to_vec(),
            compressed: entry.is_compressed(),
            ttl_ms: entry.ttl_ms(),
            tags: entry.tags().iter().cloned().collect(),
            access_count: entry.access_count(),
            priority: entry.priority(),
            seq,
        }
    }

    /// Rebuild a cache entry, anchoring its TTL window at `now`
    pub fn into_entry(self, now: u64) -> CacheEntry {
        CacheEntry::new(self.key, bytes::Bytes::from(self.value), now)
            .with_compressed(self.compressed)
            .with_ttl(self.ttl_ms)
            .with_tags(self.tags)
            .with_priority(self.priority)
    }
}

/// External persistent key-value store behind the durable tier
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Load one entry
    async fn load(&self, key: &str) -> Result<Option<PersistedEntry>>;

    /// Save one entry (replaces any previous value)
    async fn save(&self, key: &str, entry: PersistedEntry) -> Result<()>;

    /// Delete one entry; returns whether it was present
    async fn delete_key(&self, key: &str) -> Result<bool>;

    /// List stored keys with the given prefix (empty prefix = all)
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;
}

/// In-memory durable store for tests
pub struct InMemoryDurableStore {
    entries: DashMap<String, PersistedEntry>,
    loads: AtomicU64,
    saves: AtomicU64,
    deletes: AtomicU64,
    fail_saves: AtomicBool,
}

impl Default for InMemoryDurableStore {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            loads: AtomicU64::new(0),
            saves: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            fail_saves: AtomicBool::new(false),
        }
    }
}

impl InMemoryDurableStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fetch a stored entry directly (test inspection)
    pub fn entry(&self, key: &str) -> Option<PersistedEntry> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    /// Save count
    pub fn saves(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }

    /// Load count
    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    /// Delete count
    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    /// Make every subsequent save fail (failure-absorption tests)
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl DurableStore for InMemoryDurableStore {
    async fn load(&self, key: &str) -> Result<Option<PersistedEntry>> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        Ok(self.entries.get(key).map(|e| e.value().clone()))
    }

    async fn save(&self, key: &str, entry: PersistedEntry) -> Result<()> {
        self.saves.fetch_add(1, Ordering::Relaxed);
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(Error::DurableStore {
                op: "save",
                key: key.to_string(),
                reason: "injected failure".into(),
            });
        }
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete_key(&self, key: &str) -> Result<bool> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(self.entries.remove(key).is_some())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| k.starts_with(prefix))
            .collect())
    }
}

enum FlushOp {
    Save(PersistedEntry),
    Delete { key: String, seq: u64 },
}

async fn apply_flush_op(
    store: &dyn DurableStore,
    latest_seq: &DashMap<String, u64>,
    op: FlushOp,
) {
    match op {
        FlushOp::Save(entry) => {
            let stale = latest_seq
                .get(&entry.key)
                .map(|latest| *latest > entry.seq)
                .unwrap_or(false);
            if stale {
                debug!(key = %entry.key, seq = entry.seq, "skipping stale durable save");
                return;
            }
            let key = entry.key.clone();
            if let Err(e) = store.save(&key, entry).await {
                warn!(key = %key, error = %e, "durable save failed");
            }
        }
        FlushOp::Delete { key, seq } => {
            let stale = latest_seq
                .get(&key)
                .map(|latest| *latest > seq)
                .unwrap_or(false);
            if stale {
                debug!(key = %key, seq, "skipping stale durable delete");
                return;
            }
            if let Err(e) = store.delete_key(&key).await {
                warn!(key = %key, error = %e, "durable delete failed");
            }
        }
    }
}

async fn run_flusher(
    store: Arc<dyn DurableStore>,
    latest_seq: Arc<DashMap<String, u64>>,
    mut rx: mpsc::UnboundedReceiver<FlushOp>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                // Teardown: drain whatever is already queued, then stop
                while let Ok(op) = rx.try_recv() {
                    apply_flush_op(store.as_ref(), &latest_seq, op).await;
                }
                break;
            }
            op = rx.recv() => match op {
                Some(op) => apply_flush_op(store.as_ref(), &latest_seq, op).await,
                None => break,
            },
        }
    }
}

/// The durable tier: rehydrated index plus background flusher
pub struct DurableTier {
    index: MemoryTier,
    store: Arc<dyn DurableStore>,
    seq: AtomicU64,
    latest_seq: Arc<DashMap<String, u64>>,
    flush_tx: mpsc::UnboundedSender<FlushOp>,
    cancel: CancellationToken,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl DurableTier {
    /// Create the tier and spawn its flusher. Requires a Tokio runtime.
    pub fn new(store: Arc<dyn DurableStore>, capacity: usize) -> Self {
        let latest_seq = Arc::new(DashMap::new());
        let (flush_tx, flush_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let flusher = tokio::spawn(run_flusher(
            Arc::clone(&store),
            Arc::clone(&latest_seq),
            flush_rx,
            cancel.clone(),
        ));

        Self {
            index: MemoryTier::new(TierName::Durable, capacity),
            store,
            seq: AtomicU64::new(0),
            latest_seq,
            flush_tx,
            cancel,
            flusher: Mutex::new(Some(flusher)),
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn enqueue(&self, op: FlushOp) {
        // Fails only once the flusher has shut down; mutations after
        // teardown lose durability, not correctness
        let _ = self.flush_tx.send(op);
    }

    /// Load every stored entry into the index. Adapter failures are logged
    /// and skipped. Returns the number of rehydrated entries.
    pub async fn rehydrate(&self, now: u64) -> usize {
        let keys = match self.store.list_keys("").await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "durable store unavailable, starting cold");
                return 0;
            }
        };

        let mut count = 0;
        for key in keys {
            match self.store.load(&key).await {
                Ok(Some(persisted)) => {
                    self.seq.fetch_max(persisted.seq, Ordering::SeqCst);
                    self.latest_seq.insert(key, persisted.seq);
                    if let Some(victim) = self.index.put(persisted.into_entry(now)) {
                        // Store had more entries than the tier admits
                        let seq = self.next_seq();
                        self.latest_seq.insert(victim.clone(), seq);
                        self.enqueue(FlushOp::Delete { key: victim, seq });
                    }
                    count += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(key = %key, error = %e, "durable load failed during rehydration");
                }
            }
        }
        count
    }

    /// Get from the rehydrated index (never awaits the adapter)
    pub fn get(&self, key: &str, now: u64) -> Option<CacheEntry> {
        self.index.get(key, now)
    }

    /// Whether a live entry exists for `key`
    pub fn contains(&self, key: &str, now: u64) -> bool {
        self.index.contains(key, now)
    }

    /// Insert or replace, scheduling a flush; returns the evicted key if the
    /// capacity bound displaced one
    pub fn put(&self, entry: CacheEntry) -> Option<String> {
        let seq = self.next_seq();
        let key = entry.key.clone();
        let persisted = PersistedEntry::from_entry(&entry, seq);
        self.latest_seq.insert(key, seq);

        let evicted = self.index.put(entry);
        if let Some(victim) = &evicted {
            let victim_seq = self.next_seq();
            self.latest_seq.insert(victim.clone(), victim_seq);
            self.enqueue(FlushOp::Delete {
                key: victim.clone(),
                seq: victim_seq,
            });
        }
        self.enqueue(FlushOp::Save(persisted));

        evicted
    }

    /// Delete from the index and schedule deletion from the store
    pub fn remove(&self, key: &str) -> Option<CacheEntry> {
        let seq = self.next_seq();
        self.latest_seq.insert(key.to_string(), seq);
        let removed = self.index.remove(key);
        self.enqueue(FlushOp::Delete {
            key: key.to_string(),
            seq,
        });
        removed
    }

    /// Sweep expired entries out of the index and the store
    pub fn sweep_expired(&self, now: u64) -> Vec<String> {
        let removed = self.index.sweep_expired(now);
        for key in &removed {
            let seq = self.next_seq();
            self.latest_seq.insert(key.clone(), seq);
            self.enqueue(FlushOp::Delete {
                key: key.clone(),
                seq,
            });
        }
        removed
    }

    /// Number of indexed entries
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the index is empty
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Evictions since construction
    pub fn evictions(&self) -> u64 {
        self.index.evictions()
    }

    /// Drain pending flushes and stop the flusher
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.flusher.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "durable flusher task panicked");
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
