//! RPC Cache Gateway core
//!
//! The cache core for a multi-tier read-through JSON-RPC cache sitting
//! between a reverse proxy and upstream blockchain RPC providers:
//!
//! - **Fingerprint**: deterministic cache-key derivation from a JSON-RPC
//!   request, independent of `id`.
//! - **RuleSet**: method → cache class → TTL policy, reloadable from a
//!   YAML document.
//! - **L1 / L2 / TwoTierCache**: sharded in-process hot tier, a
//!   Redis/KeyDB warm tier, and the orchestration between them.
//! - **Dispatcher**: provider failover with JSON-RPC-aware retry
//!   semantics and response-shape rewriting for cached replies.
//! - **HealthRunner**: parallel provider probes with atomic publication
//!   of the valid provider set.
//! - **CacheOps**: the four operations the HTTP front door invokes.
//!
//! The HTTP front door itself, authentication, metrics exposition, and
//! static configuration loading beyond what's listed above are external
//! collaborators; this crate exposes plain async entry points for them.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use rpc_cache_gateway::{GatewayConfig, GatewayCore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let rules_yaml = std::fs::read_to_string("cache-rules.yaml")?;
//!     let providers_json = std::fs::read_to_string("providers.json")?;
//!     let config = GatewayConfig::default();
//!
//!     let gateway = GatewayCore::new(config, &rules_yaml, &providers_json).await?;
//!     gateway.spawn_background_tasks();
//!
//!     let outcome = gateway
//!         .dispatcher()
//!         .handle("ethereum", "mainnet", None, br#"{"jsonrpc":"2.0","method":"eth_blockNumber","id":1}"#)
//!         .await;
//!     println!("status: {}", outcome.status);
//!
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod entry;
pub mod error;
pub mod fingerprint;
pub mod health;
pub mod l1;
pub mod l2;
pub mod metrics;
pub mod ops;
pub mod rules;

pub use cache::{CacheTier, ReadOutcome, TwoTierCache};
pub use config::{AuthKind, ChainProviders, Provider, ProviderSet, ProviderSetLoader};
pub use dispatcher::{DispatchOutcome, Dispatcher, DispatcherConfig};
pub use entry::CacheEntry;
pub use error::{GatewayError, Result, StatusHint};
pub use fingerprint::{Fingerprint, RpcRequest};
pub use health::{HealthConfig, HealthRunner, ProbeCase, Tolerance};
pub use l1::{L1Config, L1Store};
pub use l2::{L2Backend, L2Config, L2Store};
pub use metrics::{MetricsSink, NoopMetricsSink, TracingMetricsSink};
pub use ops::CacheOps;
pub use rules::{CacheClass, RuleSet, RuleSetLoader, Ttl};

/// Top-level configuration for wiring a [`GatewayCore`].
pub struct GatewayConfig {
    pub l1: L1Config,
    pub l2: L2Config,
    pub dispatcher: DispatcherConfig,
    pub health: HealthConfig,
    pub rule_reload_interval: Duration,
    pub metrics: Arc<dyn MetricsSink>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            l1: L1Config::default(),
            l2: L2Config::default(),
            dispatcher: DispatcherConfig::default(),
            health: HealthConfig {
                cycle_interval: Duration::from_secs(30),
                cycle_timeout: Duration::from_secs(10),
                test_matrix: Vec::new(),
            },
            rule_reload_interval: Duration::from_secs(60),
            metrics: Arc::new(NoopMetricsSink),
        }
    }
}

/// Owns every long-lived component and wires them together the way the
/// data flow in the design calls for: request → Fingerprint →
/// `RuleSet.classify` → `TwoTierCache.get` → (hit) id-rewrite / (miss)
/// `Dispatcher.forward` → `TwoTierCache.set`.
#[derive(Clone)]
pub struct GatewayCore {
    cache: TwoTierCache,
    rules: Arc<RuleSetLoader>,
    providers: Arc<ProviderSetLoader>,
    dispatcher: Arc<Dispatcher>,
    health: Arc<HealthRunner>,
    ops: Arc<CacheOps>,
}

impl GatewayCore {
    /// Build every component from already-loaded configuration documents.
    /// Configuration faults here are fatal (spec §7): the caller should
    /// abort process startup on error.
    ///
    /// # Errors
    ///
    /// Propagates [`GatewayError::RuleSetInvalid`] / [`GatewayError::Configuration`]
    /// from document parsing, or [`GatewayError::Redis`] if the L2 store
    /// cannot be reached.
    pub async fn new(config: GatewayConfig, rules_yaml: &str, providers_json: &str) -> Result<Self> {
        info!("initializing rpc cache gateway core");

        let rules = Arc::new(RuleSetLoader::from_yaml(rules_yaml)?);
        let providers = Arc::new(ProviderSetLoader::from_json(providers_json)?);

        let l1 = L1Store::new(config.l1);
        let l2 = L2Store::connect(config.l2).await?;
        let cache = TwoTierCache::new(l1, Arc::new(l2));

        let http = reqwest::Client::builder()
            .build()
            .map_err(GatewayError::from)?;

        let dispatcher = Arc::new(Dispatcher::new(
            cache.clone(),
            rules.clone(),
            providers.clone(),
            http.clone(),
            config.metrics.clone(),
            config.dispatcher,
        ));

        let health = Arc::new(HealthRunner::new(providers.clone(), http, config.health));
        let ops = Arc::new(CacheOps::new(cache.clone(), rules.clone()));

        info!("rpc cache gateway core initialized");

        Ok(Self {
            cache,
            rules,
            providers,
            dispatcher,
            health,
            ops,
        })
    }

    #[must_use]
    pub fn cache(&self) -> &TwoTierCache {
        &self.cache
    }

    #[must_use]
    pub fn rules(&self) -> &Arc<RuleSetLoader> {
        &self.rules
    }

    #[must_use]
    pub fn providers(&self) -> &Arc<ProviderSetLoader> {
        &self.providers
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    #[must_use]
    pub fn health(&self) -> &Arc<HealthRunner> {
        &self.health
    }

    #[must_use]
    pub fn ops(&self) -> &Arc<CacheOps> {
        &self.ops
    }

    /// Spawn the health-cycle ticker. Rule-set reload scheduling is left
    /// to the caller (it needs a `source` closure to re-fetch the YAML
    /// document, e.g. from disk or a remote store) via
    /// [`RuleSetLoader::spawn_reload_ticker`].
    pub fn spawn_background_tasks(&self) -> tokio::task::JoinHandle<()> {
        Arc::clone(&self.health).spawn_ticker()
    }

    /// Best-effort shutdown of in-process resources.
    pub fn close(&self) {
        self.cache.close();
    }
}
