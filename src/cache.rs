//! Two-tier cache orchestration: L1-first reads, L2-on-miss with
//! write-through promotion, skip-null write suppression, and the
//! never-resurrect-past-`expiresAt` invariant (spec §4.5).

use std::sync::Arc;

use tracing::debug;

use crate::entry::{now_secs, CacheEntry};
use crate::l1::L1Store;
use crate::l2::L2Backend;
use crate::rules::Ttl;

/// Which tier actually served a read, for cache-level reporting (spec §6
/// `cache_level`) and per-tier metrics (spec §4.6 "Side effects").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    L1,
    L2,
}

/// Outcome of a read, distinguishing a fresh hit from a stale one, and
/// which tier served it, so the dispatcher can decide whether to trigger a
/// background refresh and report the right `cache_level`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Fresh(CacheEntry, CacheTier),
    Stale(CacheEntry, CacheTier),
    Miss,
}

/// Combines the in-process hot tier with the distributed warm tier
/// behind a single read/write API (spec §4.5).
#[derive(Clone)]
pub struct TwoTierCache {
    l1: L1Store,
    l2: Arc<dyn L2Backend>,
}

impl TwoTierCache {
    #[must_use]
    pub fn new(l1: L1Store, l2: Arc<dyn L2Backend>) -> Self {
        Self { l1, l2 }
    }

    /// Fresh-first lookup: L1, then L2 with write-through promotion into
    /// L1 using the remaining TTL of the promoted entry.
    pub async fn get(&self, key: &str) -> ReadOutcome {
        if let Some(entry) = self.l1.get(key) {
            return ReadOutcome::Fresh(entry, CacheTier::L1);
        }

        if let Some(entry) = self.l2.get(key).await {
            self.l1.set(key, entry.clone());
            return ReadOutcome::Fresh(entry, CacheTier::L2);
        }

        ReadOutcome::Miss
    }

    /// Stale-tolerant lookup used for the stale-if-error fallback path
    /// (spec §8 Scenario C): checks L1 first (any non-expired entry),
    /// then L2. Never promotes a stale L2 hit back into L1 since a fresh
    /// write will follow once the upstream call succeeds.
    pub async fn get_allow_stale(&self, key: &str) -> ReadOutcome {
        if let Some(entry) = self.l1.get(key) {
            return ReadOutcome::Fresh(entry, CacheTier::L1);
        }
        if let Some(entry) = self.l1.get_stale(key) {
            return ReadOutcome::Stale(entry, CacheTier::L1);
        }

        if let Some(entry) = self.l2.get(key).await {
            self.l1.set(key, entry.clone());
            return ReadOutcome::Fresh(entry, CacheTier::L2);
        }
        if let Some(entry) = self.l2.get_stale(key).await {
            return ReadOutcome::Stale(entry, CacheTier::L2);
        }

        ReadOutcome::Miss
    }

    /// Write `payload` to both tiers under `key` with the given `ttl`,
    /// unless `skip_null` suppresses the write (spec §4.2 "Skip-null").
    /// `skip_null` is the caller's pre-evaluated decision (`RuleSet`
    /// policy AND the JSON result being null), not re-derived here.
    pub async fn set(&self, key: &str, payload: Vec<u8>, ttl: Ttl, skip_null: bool) {
        if skip_null {
            debug!(key = %key, "skip-null policy suppressed cache write");
            return;
        }
        if !ttl.is_cacheable() {
            return;
        }

        let entry = CacheEntry::new(payload, ttl, now_secs());
        self.l1.set(key, entry.clone());
        if let Err(e) = self.l2.set(key, &entry).await {
            debug!(key = %key, error = %e, "l2 write-through failed, l1 still populated");
        }
    }

    pub async fn delete(&self, key: &str) {
        self.l1.delete(key);
        self.l2.delete(key).await;
    }

    #[must_use]
    pub fn l1(&self) -> &L1Store {
        &self.l1
    }

    /// Releases L1 resources; the L2 backend's connection is dropped
    /// with the `Arc` and needs no explicit shutdown call.
    pub fn close(&self) {
        self.l1.close();
    }
}
