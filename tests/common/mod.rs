//! Shared integration-test infrastructure: an in-memory `L2Backend` stand-in
//! and builders for a minimal rule set / provider list, since these tests
//! run without a live Redis or live upstream RPC provider.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};

use rpc_cache_gateway::{CacheEntry, L2Backend};

/// In-memory `L2Backend` used in place of Redis/KeyDB for integration
/// tests that don't need to exercise the real wire client (that's
/// `l2.rs`'s own unit test, which is the only place the real `redis` crate
/// needs to be reached).
#[derive(Default)]
pub struct FakeL2 {
    store: Mutex<DashMap<String, CacheEntry>>,
}

#[async_trait]
impl L2Backend for FakeL2 {
    async fn get(&self, key: &str) -> Option<CacheEntry> {
        let store = self.store.lock().unwrap();
        let entry = store.get(key)?.clone();
        if entry.is_fresh(rpc_cache_gateway::entry::now_secs()) {
            Some(entry)
        } else {
            None
        }
    }

    async fn get_stale(&self, key: &str) -> Option<CacheEntry> {
        let store = self.store.lock().unwrap();
        let entry = store.get(key)?.clone();
        if !entry.is_expired(rpc_cache_gateway::entry::now_secs()) {
            Some(entry)
        } else {
            None
        }
    }

    async fn set(&self, key: &str, entry: &CacheEntry) -> rpc_cache_gateway::Result<()> {
        self.store.lock().unwrap().insert(key.to_string(), entry.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) {
        self.store.lock().unwrap().remove(key);
    }
}

#[must_use]
pub fn fake_l2() -> Arc<FakeL2> {
    Arc::new(FakeL2::default())
}

/// A rule set with a `short` class TTL of 5s fresh / 2s stale, used by both
/// the cache and the dispatcher integration tests.
pub fn sample_rules_yaml() -> &'static str {
    r"
ttl_defaults:
  default: { permanent: 3600, short: 5, minimal: 1, short_stale: 2 }
cache_rules:
  eth_blockNumber: short
  eth_getTransactionReceipt: minimal
skip_null_cache: [eth_getTransactionReceipt]
"
}

/// Build a one-chain provider-list JSON document pointing at the given
/// provider URLs, in priority order.
pub fn provider_list_json(chain: &str, network: &str, urls: &[&str]) -> String {
    let providers: Vec<String> = urls
        .iter()
        .enumerate()
        .map(|(i, url)| {
            format!(r#"{{"type":"test","name":"p{i}","url":"{url}","authType":"no-auth"}}"#)
        })
        .collect();
    format!(
        r#"{{"chains":[{{"name":"{chain}","network":"{network}","providers":[{}]}}]}}"#,
        providers.join(",")
    )
}
