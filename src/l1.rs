//! L1 (in-memory, hot-tier) store: sharded `DashMap`, a byte-size budget,
//! a per-entry max payload size, and an idle-eviction sweep (spec §4.4).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::entry::{now_secs, CacheEntry};

/// One shard of the L1 store. Sharding spreads lock contention across
/// `DashMap`'s own internal shard count is not enough under the write
/// volume this cache sees, so entries are additionally bucketed by key
/// hash into `shard_count` independent maps, each with its own tracked
/// byte usage.
struct Shard {
    map: DashMap<String, StoredEntry>,
    bytes: AtomicU64,
}

struct StoredEntry {
    entry: CacheEntry,
    last_touched: AtomicU64,
    size: u64,
}

/// Configuration for [`L1Store`].
#[derive(Debug, Clone, Copy)]
pub struct L1Config {
    /// Number of shards; rounded up to the next power of two.
    pub shard_count: usize,
    /// Total byte budget across all shards. Once exceeded, writes are
    /// rejected until the idle-eviction sweep reclaims space.
    pub max_total_bytes: u64,
    /// Entries whose payload exceeds this size are never stored.
    pub max_entry_bytes: u64,
    /// How often the background sweep runs.
    pub idle_sweep_interval: Duration,
    /// Entries untouched for longer than this are evicted by the sweep.
    pub idle_ttl: Duration,
}

impl Default for L1Config {
    fn default() -> Self {
        Self {
            shard_count: 16,
            max_total_bytes: 256 * 1024 * 1024,
            max_entry_bytes: 4 * 1024 * 1024,
            idle_sweep_interval: Duration::from_secs(30),
            idle_ttl: Duration::from_secs(600),
        }
    }
}

/// Counters exposed for `/cache/info` and metrics (spec §6).
#[derive(Debug, Default)]
pub struct L1Stats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub sets: AtomicU64,
    pub rejected_oversize: AtomicU64,
    pub rejected_over_budget: AtomicU64,
    pub evicted_idle: AtomicU64,
}

/// Sharded in-memory hot tier. Cheap to clone (all state is behind `Arc`).
#[derive(Clone)]
pub struct L1Store {
    shards: Arc<Vec<Shard>>,
    config: L1Config,
    stats: Arc<L1Stats>,
}

impl L1Store {
    #[must_use]
    pub fn new(config: L1Config) -> Self {
        let shard_count = config.shard_count.next_power_of_two().max(1);
        let shards = (0..shard_count)
            .map(|_| Shard {
                map: DashMap::new(),
                bytes: AtomicU64::new(0),
            })
            .collect();
        Self {
            shards: Arc::new(shards),
            config: L1Config {
                shard_count,
                ..config
            },
            stats: Arc::new(L1Stats::default()),
        }
    }

    #[must_use]
    pub fn stats(&self) -> &L1Stats {
        &self.stats
    }

    fn shard_for(&self, key: &str) -> &Shard {
        let hash = fnv1a(key.as_bytes());
        let idx = (hash as usize) & (self.shards.len() - 1);
        &self.shards[idx]
    }

    fn total_bytes(&self) -> u64 {
        self.shards.iter().map(|s| s.bytes.load(Ordering::Relaxed)).sum()
    }

    /// Fresh-only read: returns `None` on miss, expiry, or stale entries.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let now = now_secs();
        let shard = self.shard_for(key);
        match shard.map.get(key) {
            Some(stored) if stored.entry.is_fresh(now) => {
                stored.last_touched.store(u64::try_from(now).unwrap_or(0), Ordering::Relaxed);
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(stored.entry.clone())
            }
            Some(_) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Read regardless of freshness, excluding entries past `expires_at`
    /// (used for stale-if-error fallback, spec §4.5/§8 Scenario C).
    #[must_use]
    pub fn get_stale(&self, key: &str) -> Option<CacheEntry> {
        let now = now_secs();
        let shard = self.shard_for(key);
        let stored = shard.map.get(key)?;
        if stored.entry.is_expired(now) {
            return None;
        }
        stored.last_touched.store(u64::try_from(now).unwrap_or(0), Ordering::Relaxed);
        Some(stored.entry.clone())
    }

    /// Insert or overwrite `key`. Silently rejects oversize entries and
    /// entries that would push the store over its total byte budget
    /// (spec §4.4): the caller keeps operating against L2 in that case.
    pub fn set(&self, key: &str, entry: CacheEntry) {
        let size = entry.payload.len() as u64;
        if size > self.config.max_entry_bytes {
            self.stats.rejected_oversize.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, size, "l1 entry exceeds max_entry_bytes, skipping");
            return;
        }
        if self.total_bytes().saturating_add(size) > self.config.max_total_bytes {
            self.stats.rejected_over_budget.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "l1 total byte budget exceeded, skipping");
            return;
        }

        let shard = self.shard_for(key);
        let now = u64::try_from(now_secs()).unwrap_or(0);
        let stored = StoredEntry {
            entry,
            last_touched: AtomicU64::new(now),
            size,
        };
        if let Some(old) = shard.map.insert(key.to_string(), stored) {
            shard.bytes.fetch_sub(old.size, Ordering::Relaxed);
        }
        shard.bytes.fetch_add(size, Ordering::Relaxed);
        self.stats.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delete(&self, key: &str) {
        let shard = self.shard_for(key);
        if let Some((_, old)) = shard.map.remove(key) {
            shard.bytes.fetch_sub(old.size, Ordering::Relaxed);
        }
    }

    /// Total number of entries across all shards.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.map.len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove entries untouched for longer than `idle_ttl`, and anything
    /// past `expires_at` regardless of idle time.
    fn sweep_once(&self) {
        let now = now_secs();
        let idle_cutoff = u64::try_from(now).unwrap_or(0).saturating_sub(self.config.idle_ttl.as_secs());
        let mut evicted = 0u64;
        for shard in self.shards.iter() {
            let mut freed = 0u64;
            shard.map.retain(|_, stored| {
                let expired = stored.entry.is_expired(now);
                let idle = stored.last_touched.load(Ordering::Relaxed) < idle_cutoff;
                if expired || idle {
                    freed += stored.size;
                    evicted += 1;
                    false
                } else {
                    true
                }
            });
            if freed > 0 {
                shard.bytes.fetch_sub(freed, Ordering::Relaxed);
            }
        }
        if evicted > 0 {
            self.stats.evicted_idle.fetch_add(evicted, Ordering::Relaxed);
            debug!(count = evicted, "l1 idle sweep evicted entries");
        }
    }

    /// Spawn the background idle-eviction sweep. Returns the task handle
    /// so callers can abort it on shutdown.
    pub fn spawn_idle_sweeper(&self) -> JoinHandle<()> {
        let store = self.clone();
        let interval = store.config.idle_sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                store.sweep_once();
            }
        })
    }

    /// No background resources to release beyond the sweeper task, which
    /// the caller owns via the `JoinHandle` it was given.
    pub fn close(&self) {
        if self.total_bytes() > self.config.max_total_bytes {
            warn!("l1 store closed while over its byte budget");
        }
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01B3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Ttl;

    fn entry(payload: &[u8], fresh: u64, stale: u64) -> CacheEntry {
        CacheEntry::new(payload.to_vec(), Ttl { fresh, stale }, now_secs())
    }

    #[test]
    fn set_then_get_fresh_hit() {
        let store = L1Store::new(L1Config::default());
        store.set("k1", entry(b"v1", 60, 0));
        assert_eq!(store.get("k1").unwrap().payload, b"v1");
    }

    #[test]
    fn get_stale_entry_misses_via_get_but_hits_via_get_stale() {
        let store = L1Store::new(L1Config::default());
        // Back-dated by one second: `fresh: 0` makes `stale_at == created_at`,
        // and `is_fresh` is inclusive of `now == stale_at`, so a same-second
        // write would still read as fresh.
        store.set("k1", CacheEntry::new(b"v1".to_vec(), Ttl { fresh: 0, stale: 60 }, now_secs() - 1));
        assert!(store.get("k1").is_none());
        assert_eq!(store.get_stale("k1").unwrap().payload, b"v1");
    }

    #[test]
    fn expired_entry_misses_both_reads() {
        let store = L1Store::new(L1Config::default());
        let stale_entry = CacheEntry::new(b"v1".to_vec(), Ttl { fresh: 0, stale: 0 }, now_secs() - 10);
        store.set("k1", stale_entry);
        assert!(store.get("k1").is_none());
        assert!(store.get_stale("k1").is_none());
    }

    #[test]
    fn oversize_entry_is_rejected() {
        let mut config = L1Config::default();
        config.max_entry_bytes = 4;
        let store = L1Store::new(config);
        store.set("k1", entry(b"too big", 60, 0));
        assert!(store.get("k1").is_none());
        assert_eq!(store.stats().rejected_oversize.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn over_budget_entry_is_rejected() {
        let mut config = L1Config::default();
        config.max_total_bytes = 10;
        config.max_entry_bytes = 10;
        let store = L1Store::new(config);
        store.set("k1", entry(b"1234567890", 60, 0));
        store.set("k2", entry(b"more", 60, 0));
        assert!(store.get("k1").is_some());
        assert!(store.get("k2").is_none());
        assert_eq!(store.stats().rejected_over_budget.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn delete_removes_entry_and_frees_bytes() {
        let store = L1Store::new(L1Config::default());
        store.set("k1", entry(b"v1", 60, 0));
        store.delete("k1");
        assert!(store.get("k1").is_none());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn shard_count_rounds_up_to_power_of_two() {
        let store = L1Store::new(L1Config {
            shard_count: 10,
            ..L1Config::default()
        });
        assert_eq!(store.shards.len(), 16);
    }
}
