//! L2 (distributed, warm-tier) store backed by Redis/KeyDB via
//! `redis::aio::ConnectionManager` (spec §4.4). Failures here are always
//! non-fatal cache faults; callers fall back to treating the read as a
//! miss or the write as skipped.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::{debug, info, warn};

use crate::entry::CacheEntry;
use crate::error::{GatewayError, Result};

/// Backend seam for the warm tier, implemented by [`L2Store`]. Exists so
/// `TwoTierCache` can be exercised in tests against a fake without a
/// live Redis/KeyDB instance.
#[async_trait]
pub trait L2Backend: Send + Sync {
    async fn get(&self, key: &str) -> Option<CacheEntry>;
    async fn get_stale(&self, key: &str) -> Option<CacheEntry>;
    async fn set(&self, key: &str, entry: &CacheEntry) -> Result<()>;
    async fn delete(&self, key: &str);
}

/// Configuration for [`L2Store`].
#[derive(Debug, Clone)]
pub struct L2Config {
    pub url: String,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for L2Config {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            read_timeout: Duration::from_millis(200),
            write_timeout: Duration::from_millis(500),
        }
    }
}

/// Distributed warm tier. Clone is cheap: `ConnectionManager` is
/// internally reference-counted and multiplexes commands over a single
/// connection with automatic reconnection.
#[derive(Clone)]
pub struct L2Store {
    conn: ConnectionManager,
    config: L2Config,
}

impl L2Store {
    /// Connect to Redis/KeyDB at `config.url` and verify it with `PING`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Redis`] if the client cannot be created or
    /// the connection manager fails to establish a connection.
    pub async fn connect(config: L2Config) -> Result<Self> {
        info!(url = %config.url, "connecting to l2 store");
        let client = Client::open(config.url.as_str())?;
        let conn = ConnectionManager::new(client).await?;

        let mut ping_conn = conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut ping_conn).await?;
        info!("l2 store connected");

        Ok(Self { conn, config })
    }

    /// Fresh-only read. Returns `None` on a miss, a transport error, or a
    /// corrupt stored value (which is also scheduled for deletion so the
    /// corruption doesn't persist).
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        let raw = self.get_raw(key).await?;
        match CacheEntry::decode(&raw) {
            Ok(entry) if entry.is_fresh(crate::entry::now_secs()) => Some(entry),
            Ok(_) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "l2 entry failed to decode, deleting");
                self.delete(key).await;
                None
            }
        }
    }

    /// Read regardless of freshness, as long as it hasn't passed
    /// `expires_at` (spec §4.5/§8 Scenario C).
    pub async fn get_stale(&self, key: &str) -> Option<CacheEntry> {
        let raw = self.get_raw(key).await?;
        match CacheEntry::decode(&raw) {
            Ok(entry) if !entry.is_expired(crate::entry::now_secs()) => Some(entry),
            Ok(_) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "l2 entry failed to decode, deleting");
                self.delete(key).await;
                None
            }
        }
    }

    async fn get_raw(&self, key: &str) -> Option<Vec<u8>> {
        let mut conn = self.conn.clone();
        let fut = conn.get::<_, Vec<u8>>(key);
        match tokio::time::timeout(self.config.read_timeout, fut).await {
            Ok(Ok(bytes)) if !bytes.is_empty() => Some(bytes),
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                debug!(key = %key, error = %e, "l2 get failed");
                None
            }
            Err(_) => {
                debug!(key = %key, "l2 get timed out");
                None
            }
        }
    }

    /// Write `entry` with an absolute expiry equal to its total remaining
    /// TTL: `SET key value EX total_ttl` (spec §4.4). A zero or negative
    /// remaining TTL is treated as "nothing to store".
    ///
    /// # Errors
    ///
    /// Never returns an error to the caller; faults are logged as cache
    /// faults and swallowed so a write failure degrades gracefully
    /// instead of failing the request that triggered it.
    pub async fn set(&self, key: &str, entry: &CacheEntry) -> Result<()> {
        let total_ttl = entry.remaining_total(crate::entry::now_secs());
        if total_ttl == 0 {
            return Ok(());
        }
        let encoded = entry.encode()?;

        let mut conn = self.conn.clone();
        let fut = conn.set_ex::<_, _, ()>(key, encoded, total_ttl);
        match tokio::time::timeout(self.config.write_timeout, fut).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!(key = %key, error = %e, "l2 set failed");
                Err(GatewayError::CacheFault {
                    tier: "l2",
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                warn!(key = %key, "l2 set timed out");
                Err(GatewayError::CacheFault {
                    tier: "l2",
                    reason: "write timed out".to_string(),
                })
            }
        }
    }

    pub async fn delete(&self, key: &str) {
        let mut conn = self.conn.clone();
        let fut = conn.del::<_, ()>(key);
        if let Err(e) = tokio::time::timeout(self.config.write_timeout, fut)
            .await
            .unwrap_or(Err(redis::RedisError::from(std::io::Error::other("timed out"))))
        {
            debug!(key = %key, error = %e, "l2 delete failed");
        }
    }

    /// Nothing to flush explicitly; `ConnectionManager` closes its
    /// connection when dropped.
    pub fn close(&self) {}
}

#[async_trait]
impl L2Backend for L2Store {
    async fn get(&self, key: &str) -> Option<CacheEntry> {
        Self::get(self, key).await
    }

    async fn get_stale(&self, key: &str) -> Option<CacheEntry> {
        Self::get_stale(self, key).await
    }

    async fn set(&self, key: &str, entry: &CacheEntry) -> Result<()> {
        Self::set(self, key, entry).await
    }

    async fn delete(&self, key: &str) {
        Self::delete(self, key).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_points_at_localhost() {
        let config = L2Config::default();
        assert_eq!(config.url, "redis://127.0.0.1:6379");
        assert!(config.read_timeout < config.write_timeout);
    }
}
