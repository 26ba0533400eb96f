//! Operations boundary: the four endpoints the HTTP front door invokes
//! over its local transport (spec §6). This module only implements the
//! plain async request/response shapes; framing and routing are the
//! front door's job (spec §1 "Out of scope").

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::{CacheTier, ReadOutcome, TwoTierCache};
use crate::entry::now_secs;
use crate::fingerprint::{rewrite_id, Fingerprint, RpcRequest};
use crate::rules::{RuleSetLoader, Ttl};

#[derive(Debug, Deserialize)]
pub struct CacheGetRequest {
    pub chain: String,
    pub network: String,
    pub raw_body: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheStatus {
    Hit,
    Miss,
    Bypass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CacheLevel {
    L1,
    L2,
    #[serde(rename = "MISS")]
    Miss,
}

#[derive(Debug, Serialize)]
pub struct CacheGetResponse {
    pub success: bool,
    pub found: bool,
    pub fresh: bool,
    pub data: Option<Value>,
    pub key: Option<String>,
    pub cache_type: Option<&'static str>,
    pub ttl: Option<u64>,
    pub cache_status: CacheStatus,
    pub cache_level: CacheLevel,
}

impl CacheGetResponse {
    fn bypass() -> Self {
        Self {
            success: false,
            found: false,
            fresh: false,
            data: None,
            key: None,
            cache_type: None,
            ttl: None,
            cache_status: CacheStatus::Bypass,
            cache_level: CacheLevel::Miss,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CacheSetRequest {
    pub chain: String,
    pub network: String,
    pub raw_body: Vec<u8>,
    pub data: Value,
    pub ttl: Option<u64>,
    pub stale_ttl: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct CacheSetResponse {
    pub success: bool,
}

#[derive(Debug, Deserialize)]
pub struct CacheInfoRequest {
    pub chain: String,
    pub network: String,
    pub raw_body: Vec<u8>,
}

#[derive(Debug, Serialize)]
pub struct CacheInfoResponse {
    pub success: bool,
    pub cache_type: Option<&'static str>,
    pub ttl: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub time: i64,
}

/// The four documented operations, backed directly by `TwoTierCache` and
/// `RuleSetLoader`.
pub struct CacheOps {
    cache: TwoTierCache,
    rules: std::sync::Arc<RuleSetLoader>,
}

impl CacheOps {
    #[must_use]
    pub fn new(cache: TwoTierCache, rules: std::sync::Arc<RuleSetLoader>) -> Self {
        Self { cache, rules }
    }

    /// `POST /cache/get`.
    pub async fn get(&self, req: CacheGetRequest) -> CacheGetResponse {
        let Ok(rpc) = RpcRequest::parse(&req.raw_body) else {
            return CacheGetResponse::bypass();
        };
        let Ok(key) = Fingerprint::build(&req.chain, &req.network, &rpc) else {
            return CacheGetResponse::bypass();
        };

        let rules = self.rules.current();
        let class = rules.classify(&rpc.method);
        let cache_type = class_label(class);

        match self.cache.get_allow_stale(key.as_str()).await {
            ReadOutcome::Fresh(entry, tier) => {
                Self::found_response(&entry, &rpc.id, key.as_str(), cache_type, true, level_from_tier(tier))
            }
            ReadOutcome::Stale(entry, tier) => {
                Self::found_response(&entry, &rpc.id, key.as_str(), cache_type, false, level_from_tier(tier))
            }
            ReadOutcome::Miss => CacheGetResponse {
                success: true,
                found: false,
                fresh: false,
                data: None,
                key: Some(key.to_string()),
                cache_type,
                ttl: None,
                cache_status: CacheStatus::Miss,
                cache_level: CacheLevel::Miss,
            },
        }
    }

    fn found_response(
        entry: &crate::entry::CacheEntry,
        caller_id: &Value,
        key: &str,
        cache_type: Option<&'static str>,
        fresh: bool,
        level: CacheLevel,
    ) -> CacheGetResponse {
        let mut data: Option<Value> = serde_json::from_slice(&entry.payload).ok();
        if let Some(json) = data.as_mut() {
            rewrite_id(json, caller_id);
        }
        CacheGetResponse {
            success: true,
            found: true,
            fresh,
            data,
            key: Some(key.to_string()),
            cache_type,
            ttl: Some(entry.remaining_total(now_secs())),
            cache_status: CacheStatus::Hit,
            cache_level: level,
        }
    }

    /// `POST /cache/set`. `ttl`/`stale_ttl` override the RuleSet-derived
    /// values for this write only (spec §6).
    pub async fn set(&self, req: CacheSetRequest) -> CacheSetResponse {
        let Ok(rpc) = RpcRequest::parse(&req.raw_body) else {
            return CacheSetResponse { success: false };
        };
        let Ok(key) = Fingerprint::build(&req.chain, &req.network, &rpc) else {
            return CacheSetResponse { success: false };
        };

        let rules = self.rules.current();
        let class = rules.classify(&rpc.method);
        let base_ttl = rules.ttl(&req.chain, &req.network, class);
        let ttl = Ttl {
            fresh: req.ttl.unwrap_or(base_ttl.fresh),
            stale: req.stale_ttl.unwrap_or(base_ttl.stale),
        };

        let skip_null = rules.should_skip_null(&rpc.method) && req.data.get("result").is_some_and(Value::is_null);
        let Ok(bytes) = serde_json::to_vec(&req.data) else {
            return CacheSetResponse { success: false };
        };
        self.cache.set(key.as_str(), bytes, ttl, skip_null).await;
        CacheSetResponse { success: true }
    }

    /// `POST /cache/info`.
    pub async fn info(&self, req: CacheInfoRequest) -> CacheInfoResponse {
        let Ok(rpc) = RpcRequest::parse(&req.raw_body) else {
            return CacheInfoResponse { success: false, cache_type: None, ttl: None };
        };

        let rules = self.rules.current();
        let class = rules.classify(&rpc.method);
        let ttl = rules.ttl(&req.chain, &req.network, class);
        CacheInfoResponse {
            success: true,
            cache_type: class_label(class),
            ttl: Some(ttl.total()),
        }
    }

    /// `GET /health`.
    #[must_use]
    pub fn health() -> HealthResponse {
        HealthResponse { status: "healthy", time: now_secs() }
    }
}

/// Maps the tier that actually served a read to the reported `cache_level`
/// (spec §6 `cache_level ∈ {L1, L2, MISS}`).
fn level_from_tier(tier: CacheTier) -> CacheLevel {
    match tier {
        CacheTier::L1 => CacheLevel::L1,
        CacheTier::L2 => CacheLevel::L2,
    }
}

fn class_label(class: crate::rules::CacheClass) -> Option<&'static str> {
    use crate::rules::CacheClass;
    match class {
        CacheClass::Permanent => Some("permanent"),
        CacheClass::Short => Some("short"),
        CacheClass::Minimal => Some("minimal"),
        CacheClass::None => None,
    }
}
