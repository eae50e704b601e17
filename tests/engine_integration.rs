//! End-to-end cache engine flows: multi-tier promotion, coalescing under
//! concurrency, durable persistence across engine lifetimes, and bulk
//! invalidation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::FutureExt;
use tiercache::{
    CacheConfig, CacheEngine, InMemoryDurableStore, KeyMatcher, ManualClock, Priority, SetOptions,
    TierCapacities, TierName,
};

fn small_config() -> CacheConfig {
    CacheConfig {
        tier_capacities: TierCapacities {
            fast: 2,
            medium: 4,
            durable: 16,
        },
        ..CacheConfig::default()
    }
}

#[tokio::test]
async fn test_durable_hit_promotes_to_all_faster_tiers() {
    let store = Arc::new(InMemoryDurableStore::new());
    let engine = CacheEngine::new(CacheConfig::default(), store).await;

    // Step 1: value exists only in the durable tier
    engine.set_with(
        "report:q3",
        Bytes::from_static(b"totals"),
        SetOptions {
            tier: TierName::Durable,
            ..SetOptions::default()
        },
    );
    assert!(engine.get_from("report:q3", TierName::Fast).is_none());
    assert!(engine.get_from("report:q3", TierName::Medium).is_none());

    // Step 2: a probe-all read hits durable and copies upward
    assert_eq!(engine.get("report:q3").unwrap().as_ref(), b"totals");
    assert!(engine.get_from("report:q3", TierName::Fast).is_some());
    assert!(engine.get_from("report:q3", TierName::Medium).is_some());

    // Step 3: the durable copy was left in place (copy, not move)
    assert!(engine.get_from("report:q3", TierName::Durable).is_some());

    // Step 4: the next probe-all read is a fast-tier hit
    engine.get("report:q3");
    let stats = engine.stats();
    assert!(stats.fast.hits >= 1);
    assert_eq!(stats.durable.hits, 2); // initial probe + step 3 direct read

    engine.shutdown().await;
}

#[tokio::test]
async fn test_promotion_needs_no_second_load() {
    let engine = CacheEngine::in_memory().await;
    let invocations = Arc::new(AtomicUsize::new(0));

    // Populate the durable tier only, through a loader
    let counter = Arc::clone(&invocations);
    engine
        .get_or_load_with(
            "k",
            SetOptions {
                tier: TierName::Durable,
                ..SetOptions::default()
            },
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, std::convert::Infallible>(Bytes::from_static(b"v"))
            },
        )
        .await
        .unwrap();

    // The durable hit promotes; reading again must not touch the loader
    assert!(engine.get("k").is_some());
    assert!(engine.get_from("k", TierName::Fast).is_some());
    assert_eq!(invocations.load(Ordering::SeqCst), 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_reads_and_writes() {
    use tokio::task::JoinSet;

    let engine = CacheEngine::in_memory().await;
    let mut join_set = JoinSet::new();

    for i in 0..16 {
        let engine = engine.clone();
        join_set.spawn(async move {
            let key = format!("object-{}", i);
            engine.set(&key, Bytes::from(format!("data-{}", i).into_bytes()));
            engine.get(&key).is_some()
        });
    }

    let mut successes = 0;
    while let Some(result) = join_set.join_next().await {
        if result.unwrap() {
            successes += 1;
        }
    }

    assert_eq!(successes, 16);
    assert_eq!(engine.stats().fast.entries, 16);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_coalescing_across_cloned_handles() {
    let engine = CacheEngine::in_memory().await;
    let invocations = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        let invocations = Arc::clone(&invocations);
        handles.push(tokio::spawn(async move {
            engine
                .get_or_load("expensive", move || async move {
                    invocations.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(40)).await;
                    Ok::<_, std::convert::Infallible>(Bytes::from_static(b"computed"))
                })
                .await
                .unwrap()
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap().as_ref(), b"computed");
    }
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_durable_entries_survive_engine_restart() {
    let store = Arc::new(InMemoryDurableStore::new());

    {
        let engine = CacheEngine::new(CacheConfig::default(), store.clone()).await;
        engine.set_with(
            "persisted",
            Bytes::from_static(b"still here"),
            SetOptions {
                tier: TierName::Durable,
                ..SetOptions::default()
            },
        );
        // Shutdown drains the flush queue into the store
        engine.shutdown().await;
    }
    assert_eq!(store.len(), 1);

    // A fresh engine over the same store rehydrates the durable tier
    let engine = CacheEngine::new(CacheConfig::default(), store).await;
    assert_eq!(engine.get("persisted").unwrap().as_ref(), b"still here");
    engine.shutdown().await;
}

#[tokio::test]
async fn test_durable_flush_is_last_writer_wins() {
    let store = Arc::new(InMemoryDurableStore::new());
    let engine = CacheEngine::new(CacheConfig::default(), store.clone()).await;

    for i in 0..10 {
        engine.set_with(
            "counter",
            Bytes::from(format!("{}", i).into_bytes()),
            SetOptions {
                tier: TierName::Durable,
                ..SetOptions::default()
            },
        );
    }
    engine.shutdown().await;

    assert_eq!(store.entry("counter").unwrap().value, b"9");
}

#[tokio::test]
async fn test_store_outage_degrades_durability_not_correctness() {
    let store = Arc::new(InMemoryDurableStore::new());
    store.set_fail_saves(true);
    let engine = CacheEngine::new(CacheConfig::default(), store.clone()).await;

    engine.set_with(
        "k",
        Bytes::from_static(b"v"),
        SetOptions {
            tier: TierName::Durable,
            ..SetOptions::default()
        },
    );

    // The running session still serves the entry
    assert!(engine.get("k").is_some());
    engine.shutdown().await;
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_tag_invalidation_end_to_end() {
    let engine = CacheEngine::new(small_config(), Arc::new(InMemoryDurableStore::new())).await;

    for (key, tier) in [
        ("viz:1", TierName::Fast),
        ("viz:2", TierName::Medium),
        ("viz:3", TierName::Durable),
    ] {
        engine.set_with(
            key,
            Bytes::from_static(b"chart"),
            SetOptions {
                tier,
                tags: vec!["dataset:7".into()],
                ..SetOptions::default()
            },
        );
    }
    engine.set("unrelated", Bytes::from_static(b"other"));

    assert_eq!(engine.delete_by_tag("dataset:7"), 3);
    for key in ["viz:1", "viz:2", "viz:3"] {
        assert!(engine.get(key).is_none());
    }
    assert!(engine.get("unrelated").is_some());
    assert_eq!(engine.delete_by_tag("dataset:7"), 0);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_expiry_with_manual_clock_and_sweep() {
    let clock = Arc::new(ManualClock::new());
    let engine = CacheEngine::with_clock(
        CacheConfig::default(),
        Arc::new(InMemoryDurableStore::new()),
        clock.clone(),
    )
    .await;

    engine.set_with(
        "ephemeral",
        Bytes::from_static(b"v"),
        SetOptions {
            ttl: Some(Duration::from_millis(200)),
            ..SetOptions::default()
        },
    );
    engine.set("eternal", Bytes::from_static(b"v"));

    clock.set(199);
    assert!(engine.get("ephemeral").is_some());

    clock.set(201);
    // Eager sweep purges the expired entry without a read touching it
    assert_eq!(engine.sweep_expired(), 1);
    assert!(engine.get("ephemeral").is_none());
    assert!(engine.get("eternal").is_some());

    engine.shutdown().await;
}

#[tokio::test]
async fn test_eviction_respects_priority_tiebreak() {
    let engine = CacheEngine::new(small_config(), Arc::new(InMemoryDurableStore::new())).await;

    engine.set_with(
        "pinned",
        Bytes::from_static(b"v"),
        SetOptions {
            priority: Priority::High,
            ..SetOptions::default()
        },
    );
    engine.set("plain", Bytes::from_static(b"v"));

    // Fast tier is full (capacity 2); the high-priority entry is skipped
    engine.set("incoming", Bytes::from_static(b"v"));

    assert!(engine.get("pinned").is_some());
    assert!(engine.get("plain").is_none());
    engine.shutdown().await;
}

#[tokio::test]
async fn test_preload_fills_cache_after_matching_miss() {
    let config = CacheConfig {
        enable_preload: true,
        ..CacheConfig::default()
    };
    let engine = CacheEngine::new(config, Arc::new(InMemoryDurableStore::new())).await;
    let recomputes = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&recomputes);
    engine.register_preload(
        KeyMatcher::Prefix("frame:".into()),
        8,
        Arc::new(move |key: &str| {
            let key = key.to_string();
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Bytes::from(format!("rendered {}", key).into_bytes()))
            }
            .boxed()
        }),
    );

    // The miss returns immediately; the preload runs in the background
    assert!(engine.get("frame:12").is_none());
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(recomputes.load(Ordering::SeqCst), 1);
    let value = engine.get("frame:12").unwrap();
    assert_eq!(value.as_ref(), b"rendered frame:12");

    // Preloaded entries land in medium at high priority
    assert!(engine.get_from("frame:12", TierName::Medium).is_some());

    engine.shutdown().await;
}

#[tokio::test]
async fn test_compressed_payload_survives_tiers_and_restart() {
    let store = Arc::new(InMemoryDurableStore::new());
    let payload = Bytes::from(b"highly repetitive payload ".repeat(200));

    {
        let engine = CacheEngine::new(CacheConfig::default(), store.clone()).await;
        engine.set_with(
            "big",
            payload.clone(),
            SetOptions {
                tier: TierName::Durable,
                ..SetOptions::default()
            },
        );
        engine.shutdown().await;
    }

    // Stored compressed: the persisted bytes are smaller than the payload
    let persisted = store.entry("big").unwrap();
    assert!(persisted.compressed);
    assert!(persisted.value.len() < payload.len());

    // Decompression is transparent after rehydration and promotion
    let engine = CacheEngine::new(CacheConfig::default(), store).await;
    assert_eq!(engine.get("big").unwrap(), payload);
    assert_eq!(engine.get_from("big", TierName::Fast).unwrap(), payload);
    engine.shutdown().await;
}
