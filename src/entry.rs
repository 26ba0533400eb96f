//! Cache entry codec — the four-field envelope stored in L1/L2, and the
//! fresh/stale/expired lifecycle predicates (spec §4.3).

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{GatewayError, Result};
use crate::rules::Ttl;

/// On-the-wire L2 envelope (spec §6): `{data, created_at, stale_at,
/// expires_at}` with base64-encoded payload bytes. L1 stores
/// [`CacheEntry`] directly without serialization since it never leaves
/// the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireEntry {
    data: String,
    created_at: i64,
    stale_at: i64,
    expires_at: i64,
}

/// A cached response payload with its freshness window.
///
/// Invariant: `created_at <= stale_at <= expires_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub payload: Vec<u8>,
    pub created_at: i64,
    pub stale_at: i64,
    pub expires_at: i64,
}

impl CacheEntry {
    /// Build a new entry from `payload` and a `TTL`, stamping `now` as the
    /// creation time. All timestamps are seconds since the Unix epoch
    /// (spec §9 Open Question #1: conversion to seconds happens here, at
    /// the boundary where data enters the cache).
    #[must_use]
    pub fn new(payload: Vec<u8>, ttl: Ttl, now: i64) -> Self {
        let stale_at = now + i64::try_from(ttl.fresh).unwrap_or(i64::MAX - now);
        let expires_at = stale_at + i64::try_from(ttl.stale).unwrap_or(i64::MAX - stale_at);
        Self {
            payload,
            created_at: now,
            stale_at,
            expires_at,
        }
    }

    /// `true` iff `now <= stale_at`.
    #[must_use]
    pub fn is_fresh(&self, now: i64) -> bool {
        now <= self.stale_at
    }

    /// `true` iff `now > expires_at`.
    #[must_use]
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }

    /// Remaining seconds until `stale_at`, clamped to zero.
    #[must_use]
    pub fn remaining_fresh(&self, now: i64) -> u64 {
        u64::try_from(self.stale_at - now).unwrap_or(0)
    }

    /// Remaining seconds until `expires_at`, clamped to zero.
    #[must_use]
    pub fn remaining_total(&self, now: i64) -> u64 {
        u64::try_from(self.expires_at - now).unwrap_or(0)
    }

    /// Re-derive a `Ttl` for write-through promotion: fresh is the
    /// remaining time to `stale_at`, stale is the remaining time from
    /// `stale_at` to `expires_at` (spec §4.5 "remaining TTL").
    #[must_use]
    pub fn remaining_ttl(&self, now: i64) -> Ttl {
        let fresh = self.remaining_fresh(now);
        let stale = u64::try_from(self.expires_at - self.stale_at.max(now)).unwrap_or(0);
        Ttl { fresh, stale }
    }

    /// Serialize to the canonical L2 wire form.
    ///
    /// # Errors
    ///
    /// Never fails in practice (base64 + JSON of plain fields), but
    /// returns a `Result` to keep the call site uniform with `decode`.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let wire = WireEntry {
            data: base64::engine::general_purpose::STANDARD.encode(&self.payload),
            created_at: self.created_at,
            stale_at: self.stale_at,
            expires_at: self.expires_at,
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    /// Decode the canonical L2 wire form. A corrupt encoding is reported
    /// as a cache fault; callers treat this as a miss and delete the key
    /// (spec §4.3, §4.4).
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let wire: WireEntry = serde_json::from_slice(bytes).map_err(|e| GatewayError::CacheFault {
            tier: "l2",
            reason: format!("corrupt entry encoding: {e}"),
        })?;
        let payload = base64::engine::general_purpose::STANDARD
            .decode(wire.data)
            .map_err(|e| GatewayError::CacheFault {
                tier: "l2",
                reason: format!("corrupt base64 payload: {e}"),
            })?;
        Ok(Self {
            payload,
            created_at: wire.created_at,
            stale_at: wire.stale_at,
            expires_at: wire.expires_at,
        })
    }
}

/// Current time as whole seconds since the Unix epoch.
#[must_use]
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
