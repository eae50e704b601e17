//! TierCache - Tiered Client-Side Cache Engine
//!
//! A single cache engine serving data from the fastest available tier, with
//! promotion on hit, TTL expiry, capacity-bound eviction, transparent
//! compression, tag-indexed invalidation, and request coalescing for
//! expensive recomputes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          Cache Engine                                │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  Fast (LRU)         │ Medium (oldest-first) │ Durable (store-backed) │
//! │  ┌───────────────┐  │ ┌──────────────────┐  │ ┌───────────────────┐  │
//! │  │ MemoryTier    │  │ │ MemoryTier       │  │ │ Rehydrated index  │  │
//! │  │ recency order │  │ │ created_at order │  │ │ + ordered flusher │  │
//! │  └───────────────┘  │ └──────────────────┘  │ └───────────────────┘  │
//! │         │           │          │            │          │             │
//! │         └───────────┴──────────┴────────────┴──────────┘             │
//! │                               │                                      │
//! │        probe fastest-first · promote on hit · sweep expired          │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reads probe fast → medium → durable; a hit below the fast tier is copied
//! upward (the slower copy is left for that tier's own TTL/eviction).
//! Concurrent loads for the same missing key coalesce onto one loader
//! execution. The durable tier lives behind the [`DurableStore`] adapter and
//! absorbs adapter failures: a store outage degrades durability, never
//! correctness.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use tiercache::{CacheConfig, CacheEngine, InMemoryDurableStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = CacheEngine::new(
//!         CacheConfig::default(),
//!         Arc::new(InMemoryDurableStore::new()),
//!     )
//!     .await;
//!
//!     engine.set("user:1", Bytes::from_static(b"{\"name\":\"alice\"}"));
//!     let value = engine
//!         .get_or_load("user:2", || async {
//!             Ok::<_, std::convert::Infallible>(Bytes::from_static(b"{}"))
//!         })
//!         .await;
//!     assert!(value.is_ok());
//!
//!     engine.shutdown().await;
//! }
//! ```
//!
//! # Modules
//!
//! - [`clock`] - Monotonic time source, injectable for tests
//! - [`compression`] - LZ4 codec with size-threshold gating
//! - [`durable`] - Durable store adapter and store-backed tier
//! - [`engine`] - The unified cache engine
//! - [`entry`] - Cache entry data model
//! - [`error`] - Error types
//! - [`policy`] - Eviction victim selection
//! - [`preload`] - Miss-driven preload advisor
//! - [`stats`] - Per-tier counters and snapshots
//! - [`sweep`] - Periodic background task with cancellation
//! - [`tier`] - In-memory entry stores

pub mod clock;
pub mod compression;
pub mod durable;
pub mod engine;
pub mod entry;
pub mod error;
pub mod policy;
pub mod preload;
pub mod stats;
pub mod sweep;
pub mod tier;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use compression::{Codec, Compression, Lz4Codec, NoopCodec};
pub use durable::{DurableStore, DurableTier, InMemoryDurableStore, PersistedEntry};
pub use engine::{CacheConfig, CacheEngine, SetOptions};
pub use entry::{CacheEntry, Priority};
pub use error::{Error, Result};
pub use policy::EvictionPolicy;
pub use preload::{KeyMatcher, PreloadAdvisor, RecomputeFn};
pub use stats::{StatsSnapshot, TierStats};
pub use sweep::PeriodicTask;
pub use tier::{MemoryTier, TierCapacities, TierName};

/// Default fast-tier capacity (entries)
pub const DEFAULT_FAST_CAPACITY: usize = 256;

/// Default medium-tier capacity (entries)
pub const DEFAULT_MEDIUM_CAPACITY: usize = 1024;

/// Default durable-tier capacity (entries)
pub const DEFAULT_DURABLE_CAPACITY: usize = 4096;

/// Default compression threshold (1 KiB)
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = compression::DEFAULT_COMPRESSION_THRESHOLD;

// =============================================================================
// Tests
// =============================================================================
