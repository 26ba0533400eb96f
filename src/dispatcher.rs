//! RPC dispatcher: cache consult, provider iteration with auth/header
//! injection, retry classification, and response-shape rewriting for
//! cached replies (spec §4.6).

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{CacheTier, ReadOutcome, TwoTierCache};
use crate::config::{AuthKind, Provider, ProviderSetLoader};
use crate::error::{GatewayError, StatusHint};
use crate::fingerprint::{rewrite_id, Fingerprint, RpcRequest};
use crate::metrics::MetricsSink;
use crate::rules::RuleSetLoader;

/// HTTP response status codes that mean "try the next provider" (spec
/// §4.6 step 7).
const RETRYABLE_STATUSES: [u16; 10] = [401, 402, 403, 429, 500, 501, 502, 503, 504, 505];

/// JSON-RPC `error.code` values that mean "try the next provider".
const RETRYABLE_RPC_CODES: [i64; 4] = [32005, 33000, 33300, 33400];

/// Response headers never forwarded from an upstream provider: connection
/// control, transfer encoding, and CORS headers, which the front door
/// owns (spec §4.6 step 6).
const BLOCKED_RESPONSE_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
    "access-control-allow-origin",
    "access-control-allow-credentials",
    "access-control-allow-methods",
    "access-control-allow-headers",
    "access-control-expose-headers",
    "access-control-max-age",
];

/// An HTTP-shaped outcome: what the front door relays to its own caller.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl DispatchOutcome {
    fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: serde_json::to_vec(&body).unwrap_or_default(),
        }
    }

    fn bad_request(reason: &str) -> Self {
        Self::json(400, serde_json::json!({"success": false, "error": reason}))
    }

    fn not_found(reason: &str) -> Self {
        Self::json(404, serde_json::json!({"success": false, "error": reason}))
    }

    fn bad_gateway(reason: &str) -> Self {
        Self::json(502, serde_json::json!({"success": false, "error": reason}))
    }

    /// Build the HTTP-shaped outcome for an error the dispatcher raised
    /// itself (as opposed to one passed through from a provider), using
    /// the error's own `status_hint` to pick the shape.
    fn from_error(err: &GatewayError) -> Self {
        let reason = err.to_string();
        match err.status_hint() {
            StatusHint::BadRequest => Self::bad_request(&reason),
            StatusHint::NotFound => Self::not_found(&reason),
            StatusHint::BadGateway => Self::bad_gateway(&reason),
            StatusHint::Internal => Self::bad_gateway(&reason),
        }
    }

    fn passthrough(status: u16, mut headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
        headers.retain(|(name, _)| !BLOCKED_RESPONSE_HEADERS.contains(&name.to_lowercase().as_str()));
        if !headers.iter().any(|(n, _)| n.eq_ignore_ascii_case("content-type")) {
            headers.push(("content-type".to_string(), "application/json".to_string()));
        }
        Self { status, headers, body }
    }
}

/// Tunables for provider iteration (spec §5 "Cancellation & timeouts").
#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    pub attempt_timeout: Duration,
    pub iteration_deadline: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(5),
            iteration_deadline: Duration::from_secs(15),
        }
    }
}

pub struct Dispatcher {
    cache: TwoTierCache,
    rules: Arc<RuleSetLoader>,
    providers: Arc<ProviderSetLoader>,
    http: reqwest::Client,
    metrics: Arc<dyn MetricsSink>,
    config: DispatcherConfig,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        cache: TwoTierCache,
        rules: Arc<RuleSetLoader>,
        providers: Arc<ProviderSetLoader>,
        http: reqwest::Client,
        metrics: Arc<dyn MetricsSink>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            cache,
            rules,
            providers,
            http,
            metrics,
            config,
        }
    }

    /// Full dispatch pipeline (spec §4.6).
    pub async fn handle(
        &self,
        chain: &str,
        network: &str,
        provider_class: Option<&str>,
        raw_body: &[u8],
    ) -> DispatchOutcome {
        let req = match RpcRequest::parse(raw_body) {
            Ok(req) => req,
            Err(e) => {
                self.metrics.increment("dispatch_bypass", &[("reason", "invalid_request")]);
                return DispatchOutcome::bad_request(&e.to_string());
            }
        };

        let key = match Fingerprint::build(chain, network, &req) {
            Ok(key) => key,
            Err(e) => {
                self.metrics.increment("dispatch_bypass", &[("reason", "invalid_request")]);
                return DispatchOutcome::bad_request(&e.to_string());
            }
        };

        let rules = self.rules.current();
        let class = rules.classify(&req.method);
        let ttl = rules.ttl(chain, network, class);

        match self.cache.get_allow_stale(key.as_str()).await {
            ReadOutcome::Fresh(entry, tier) => {
                self.metrics
                    .increment("dispatch_hit", &[("freshness", "fresh"), ("tier", tier_label(tier))]);
                Self::respond_from_entry(entry.payload, &req.id)
            }
            ReadOutcome::Stale(entry, tier) => {
                self.metrics
                    .increment("dispatch_hit", &[("freshness", "stale"), ("tier", tier_label(tier))]);
                match self
                    .forward_to_providers(chain, network, provider_class, &req, key.as_str(), ttl, rules.should_skip_null(&req.method))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        debug!(key = key.as_str(), "stale-if-error fallback engaged");
                        Self::respond_from_entry(entry.payload, &req.id)
                    }
                }
            }
            ReadOutcome::Miss => {
                self.metrics.increment("dispatch_miss", &[]);
                match self
                    .forward_to_providers(chain, network, provider_class, &req, key.as_str(), ttl, rules.should_skip_null(&req.method))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(outcome) => outcome,
                }
            }
        }
    }

    fn respond_from_entry(mut payload: Vec<u8>, caller_id: &Value) -> DispatchOutcome {
        if let Ok(mut json) = serde_json::from_slice::<Value>(&payload) {
            rewrite_id(&mut json, caller_id);
            payload = serde_json::to_vec(&json).unwrap_or(payload);
        }
        DispatchOutcome::passthrough(200, Vec::new(), payload)
    }

    /// Provider selection and iteration (spec §4.6 steps 5-8).
    ///
    /// Returns `Ok(outcome)` for any response that reached a caller (a
    /// final provider response, a 404 for an unknown class, or a 502
    /// after exhausting providers) and `Err(())` only for the stale-if-
    /// error signal: "all providers failed while a stale fallback is
    /// available", letting the caller retry with the cached copy.
    async fn forward_to_providers(
        &self,
        chain: &str,
        network: &str,
        provider_class: Option<&str>,
        req: &RpcRequest,
        cache_key: &str,
        ttl: crate::rules::Ttl,
        skip_null: bool,
    ) -> Result<DispatchOutcome, DispatchOutcome> {
        let providers = self.providers.current();
        let Some(chain_providers) = providers.for_chain(chain, network) else {
            self.metrics.increment("dispatch_bypass", &[("reason", "no_providers")]);
            return Err(DispatchOutcome::from_error(&GatewayError::NoProviderAvailable {
                class: provider_class.map(str::to_string),
            }));
        };

        let candidates: Vec<&Provider> = match provider_class {
            Some(class) => chain_providers.filter_by_class(class),
            None => chain_providers.providers.iter().collect(),
        };

        if candidates.is_empty() {
            self.metrics.increment("dispatch_bypass", &[("reason", "provider_class_not_found")]);
            return Err(DispatchOutcome::from_error(&GatewayError::NoProviderAvailable {
                class: provider_class.map(str::to_string),
            }));
        }

        let deadline = tokio::time::Instant::now() + self.config.iteration_deadline;

        for provider in candidates {
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let attempt_timeout = remaining.min(self.config.attempt_timeout);
            if attempt_timeout.is_zero() {
                break;
            }

            match self.attempt_provider(provider, req, attempt_timeout).await {
                AttemptOutcome::Final { status, headers, body, cacheable_json } => {
                    self.metrics.increment("dispatch_upstream_status", &[("status", &status.to_string())]);
                    if let Some(json) = cacheable_json {
                        self.maybe_cache(cache_key, &json, req, ttl, skip_null).await;
                    }
                    return Ok(DispatchOutcome::passthrough(status, headers, body));
                }
                AttemptOutcome::Retry { status } => {
                    self.metrics.increment(
                        "dispatch_upstream_retry",
                        &[("status", &status.map(|s| s.to_string()).unwrap_or_else(|| "none".to_string()))],
                    );
                    continue;
                }
            }
        }

        self.metrics.increment("dispatch_all_providers_failed", &[]);
        Err(DispatchOutcome::from_error(&GatewayError::AllProvidersFailed {
            chain: chain.to_string(),
            network: network.to_string(),
        }))
    }

    async fn attempt_provider(&self, provider: &Provider, req: &RpcRequest, timeout: Duration) -> AttemptOutcome {
        let url = outbound_url(provider);
        let mut builder = self.http.post(url).json(req);
        if let AuthKind::Basic { login, password } = &provider.auth {
            let credentials = base64::engine::general_purpose::STANDARD.encode(format!("{login}:{password}"));
            builder = builder.header("authorization", format!("Basic {credentials}"));
        }

        let sent = tokio::time::timeout(timeout, builder.send()).await;
        let response = match sent {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                warn!(provider = %provider.name, error = %e, "provider transport error");
                return AttemptOutcome::Retry { status: None };
            }
            Err(_) => {
                warn!(provider = %provider.name, "provider attempt timed out");
                return AttemptOutcome::Retry { status: None };
            }
        };

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
            .collect::<Vec<_>>();
        let body = match response.bytes().await {
            Ok(b) => b.to_vec(),
            Err(e) => {
                warn!(provider = %provider.name, error = %e, "failed to read provider response body");
                return AttemptOutcome::Retry { status: Some(status) };
            }
        };

        if RETRYABLE_STATUSES.contains(&status) {
            return AttemptOutcome::Retry { status: Some(status) };
        }

        let parsed: Option<Value> = serde_json::from_slice(&body).ok();
        if let Some(code) = rpc_error_code(parsed.as_ref()) {
            if RETRYABLE_RPC_CODES.contains(&code) {
                return AttemptOutcome::Retry { status: Some(status) };
            }
        }

        let cacheable_json = parsed.filter(|json| is_successful_shape(json));
        AttemptOutcome::Final { status, headers, body, cacheable_json }
    }

    async fn maybe_cache(&self, key: &str, json: &Value, req: &RpcRequest, ttl: crate::rules::Ttl, skip_null: bool) {
        let is_null_result = json.get("result").is_some_and(Value::is_null);
        let skip = skip_null && is_null_result;

        let mut stored = json.clone();
        // Store with the original caller id so replays rewrite correctly;
        // `rewrite_id` overwrites it on every future read regardless.
        rewrite_id(&mut stored, &req.id);
        let Ok(bytes) = serde_json::to_vec(&stored) else {
            return;
        };
        self.cache.set(key, bytes, ttl, skip).await;
    }
}

enum AttemptOutcome {
    Final {
        status: u16,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
        cacheable_json: Option<Value>,
    },
    Retry {
        status: Option<u16>,
    },
}

fn tier_label(tier: CacheTier) -> &'static str {
    match tier {
        CacheTier::L1 => "l1",
        CacheTier::L2 => "l2",
    }
}

fn rpc_error_code(json: Option<&Value>) -> Option<i64> {
    json?.get("error")?.get("code")?.as_i64()
}

fn is_successful_shape(json: &Value) -> bool {
    json.get("error").is_none_or(Value::is_null)
}

fn outbound_url(provider: &Provider) -> String {
    match &provider.auth {
        AuthKind::Token { token } => format!("{}/{token}", provider.url.trim_end_matches('/')),
        AuthKind::None | AuthKind::Basic { .. } => provider.url.clone(),
    }
}
