//! Provider health runner: periodic parallel fan-out probes, reference-
//! response comparison, and atomic publication of the valid provider set
//! (spec §4.7).

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{ChainProviders, Provider, ProviderSetLoader};

/// One fixed probe in the test matrix: an RPC call and how to judge
/// whether a provider's response matches the reference.
#[derive(Debug, Clone)]
pub struct ProbeCase {
    pub method: String,
    pub params: Value,
    pub tolerance: Tolerance,
}

/// How strictly a probe response must match the reference provider's.
#[derive(Debug, Clone, Copy)]
pub enum Tolerance {
    /// `result` must be byte-identical JSON.
    Exact,
    /// `result` (or a `0x`-prefixed hex number within it) may differ by
    /// at most this much — e.g. block height drift across providers.
    NumericMaxDifference(f64),
}

/// Tunables for a health cycle (spec §5 "HealthRunner cycles carry a
/// per-cycle deadline").
#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub cycle_interval: Duration,
    pub cycle_timeout: Duration,
    pub test_matrix: Vec<ProbeCase>,
}

pub struct HealthRunner {
    providers: Arc<ProviderSetLoader>,
    http: reqwest::Client,
    config: HealthConfig,
}

impl HealthRunner {
    #[must_use]
    pub fn new(providers: Arc<ProviderSetLoader>, http: reqwest::Client, config: HealthConfig) -> Self {
        Self { providers, http, config }
    }

    /// Run one probe cycle over every configured `(chain, network)`.
    /// Never panics on an individual provider's failure; a group that
    /// yields zero valid providers leaves the prior publication in
    /// place (spec §4.7 "Failure semantics", §8 invariant 8).
    pub async fn run_cycle(&self) {
        let snapshot = self.providers.current();
        for ((chain, network), group) in snapshot.chain_groups() {
            self.run_group_cycle(chain.as_str(), network.as_str(), group).await;
        }
    }

    async fn run_group_cycle(&self, chain: &str, network: &str, group: &ChainProviders) {
        if group.providers.is_empty() {
            return;
        }
        // The first configured provider is the reference for this pair;
        // a documented choice since the matrix doesn't name one
        // explicitly (see DESIGN.md).
        let reference_name = group.providers[0].name.clone();

        let probes = group.providers.iter().map(|provider| self.probe_provider(provider.clone()));
        let results = join_all(probes).await;

        let reference_responses = results
            .iter()
            .find(|r| r.provider == reference_name)
            .and_then(|r| r.responses.clone());

        let Some(reference_responses) = reference_responses else {
            warn!(chain, network, "reference provider unreachable this cycle, keeping prior set");
            return;
        };

        let mut valid = Vec::new();
        for (provider, result) in group.providers.iter().zip(results.iter()) {
            let Some(responses) = &result.responses else {
                continue;
            };
            if matches_reference(&self.config.test_matrix, responses, &reference_responses) {
                valid.push(provider.clone());
            }
        }

        debug!(chain, network, valid = valid.len(), total = group.providers.len(), "health cycle complete");
        self.providers.publish(chain, network, ChainProviders { providers: valid });
    }

    async fn probe_provider(&self, provider: Provider) -> ProbeOutcome {
        let mut responses = Vec::with_capacity(self.config.test_matrix.len());
        let deadline = tokio::time::Instant::now() + self.config.cycle_timeout;

        for case in &self.config.test_matrix {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return ProbeOutcome { provider: provider.name.clone(), responses: None };
            }

            let body = serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": case.method,
                "params": case.params,
            });
            let sent = tokio::time::timeout(remaining, self.http.post(&provider.url).json(&body).send()).await;

            let value = match sent {
                Ok(Ok(resp)) => resp.json::<Value>().await.ok(),
                _ => None,
            };
            let Some(value) = value else {
                return ProbeOutcome { provider: provider.name.clone(), responses: None };
            };
            responses.push(value);
        }

        ProbeOutcome { provider: provider.name, responses: Some(responses) }
    }

    /// Spawn the periodic cycle ticker. Returns the task handle so
    /// callers can abort it on shutdown.
    pub fn spawn_ticker(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.cycle_interval);
            loop {
                ticker.tick().await;
                self.run_cycle().await;
            }
        })
    }
}

struct ProbeOutcome {
    provider: String,
    responses: Option<Vec<Value>>,
}

fn matches_reference(matrix: &[ProbeCase], responses: &[Value], reference: &[Value]) -> bool {
    if responses.len() != reference.len() || responses.len() != matrix.len() {
        return false;
    }
    matrix.iter().zip(responses.iter().zip(reference.iter())).all(|(case, (got, want))| {
        let got_result = got.get("result");
        let want_result = want.get("result");
        match (got_result, want_result, case.tolerance) {
            (Some(g), Some(w), Tolerance::Exact) => g == w,
            (Some(g), Some(w), Tolerance::NumericMaxDifference(max_diff)) => {
                match (numeric_value(g), numeric_value(w)) {
                    (Some(a), Some(b)) => (a - b).abs() <= max_diff,
                    _ => g == w,
                }
            }
            _ => false,
        }
    })
}

fn numeric_value(value: &Value) -> Option<f64> {
    if let Some(n) = value.as_f64() {
        return Some(n);
    }
    let s = value.as_str()?;
    let hex = s.strip_prefix("0x")?;
    i64::from_str_radix(hex, 16).ok().map(|n| n as f64)
}
