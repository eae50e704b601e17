//! Preload Advisor
//!
//! Watches cache misses for keys matching registered patterns and triggers an
//! external recompute so the next lookup hits. Preloading is an optimization,
//! never a correctness requirement: the missing caller is never blocked, and
//! matches beyond the concurrency cap are dropped silently.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use regex::Regex;
use tracing::debug;

use crate::error::Result;

/// Recompute callback: receives the missed key, produces the value to seed
pub type RecomputeFn = Arc<dyn Fn(&str) -> BoxFuture<'static, Result<Bytes>> + Send + Sync>;

/// Key pattern a preload rule watches for
#[derive(Debug, Clone)]
pub enum KeyMatcher {
    /// Keys starting with the given prefix
    Prefix(String),
    /// Keys matching a regular expression
    Pattern(Regex),
}

impl KeyMatcher {
    /// Whether `key` matches
    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyMatcher::Prefix(prefix) => key.starts_with(prefix.as_str()),
            KeyMatcher::Pattern(regex) => regex.is_match(key),
        }
    }
}

struct PreloadRule {
    matcher: KeyMatcher,
    recompute: RecomputeFn,
    /// Lifetime budget: the rule stops matching once spent
    max_preloads: usize,
    triggered: AtomicUsize,
}

impl PreloadRule {
    /// Claim one unit of the rule's budget
    fn try_consume(&self) -> bool {
        self.triggered
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.max_preloads).then_some(n + 1)
            })
            .is_ok()
    }
}

/// Releases one in-flight slot when dropped
pub(crate) struct PreloadPermit {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for PreloadPermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Registry of preload rules with a global in-flight cap
pub struct PreloadAdvisor {
    rules: RwLock<Vec<PreloadRule>>,
    in_flight: Arc<AtomicUsize>,
    max_concurrency: usize,
}

impl PreloadAdvisor {
    /// Create an advisor admitting at most `max_concurrency` concurrent
    /// preloads
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_concurrency,
        }
    }

    /// Register a rule: keys matching `matcher` trigger `recompute`, at most
    /// `max_preloads` times over the rule's lifetime
    pub fn register(&self, matcher: KeyMatcher, max_preloads: usize, recompute: RecomputeFn) {
        self.rules.write().push(PreloadRule {
            matcher,
            recompute,
            max_preloads,
            triggered: AtomicUsize::new(0),
        });
    }

    /// Number of registered rules
    pub fn rule_count(&self) -> usize {
        self.rules.read().len()
    }

    /// Currently in-flight preloads
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// React to a miss: if a rule with remaining budget matches and the
    /// concurrency cap admits it, return the recompute to run plus a permit
    /// that must live for the duration of the preload.
    pub(crate) fn plan(&self, key: &str) -> Option<(RecomputeFn, PreloadPermit)> {
        let rules = self.rules.read();
        let rule = rules.iter().find(|r| {
            r.matcher.matches(key) && r.triggered.load(Ordering::SeqCst) < r.max_preloads
        })?;

        let admitted = self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.max_concurrency).then_some(n + 1)
            })
            .is_ok();
        if !admitted {
            debug!(key, "preload dropped, concurrency cap reached");
            return None;
        }

        let permit = PreloadPermit {
            in_flight: Arc::clone(&self.in_flight),
        };
        if !rule.try_consume() {
            // Budget spent; the permit drop releases the slot
            return None;
        }

        Some((Arc::clone(&rule.recompute), permit))
    }
}

// =============================================================================
// Tests
// =============================================================================
