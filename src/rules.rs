//! Cache rules engine — method -> cache class -> TTL, with chain/network
//! overrides, loaded from the on-disk YAML document described in spec §6
//! and reloaded on a schedule via an atomically-swapped snapshot.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{GatewayError, Result};

/// Policy tag assigned to a method, determining which TTL profile applies.
/// `None` is uncacheable (TTL always zero).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheClass {
    Permanent,
    Short,
    Minimal,
    None,
}

impl CacheClass {
    const ALL: [Self; 3] = [Self::Permanent, Self::Short, Self::Minimal];
}

/// Fresh/stale window, in seconds, for a `(chain, network, class)` lookup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ttl {
    pub fresh: u64,
    pub stale: u64,
}

impl Ttl {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.fresh + self.stale
    }

    #[must_use]
    pub fn is_cacheable(&self) -> bool {
        self.total() > 0
    }
}

/// Partial TTL map for a single scope (default, chain, or chain:network).
/// Keys absent here fall back to the next-less-specific scope; keys present
/// with value `0` are final (spec §4.2, §9).
///
/// The `<class>_stale` keys are a backward-compatible extension of the
/// documented schema (spec §6): the published grammar only names
/// `permanent`/`short`/`minimal` because the original proxy's stale window
/// is a fixed global grace period, but this rule set makes it overridable
/// per scope. Absent stale keys default to `0`, preserving the documented
/// behavior for any document that doesn't set them (see DESIGN.md).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TtlScope {
    #[serde(default)]
    pub permanent: Option<u64>,
    #[serde(default)]
    pub short: Option<u64>,
    #[serde(default)]
    pub minimal: Option<u64>,
    #[serde(default)]
    pub permanent_stale: Option<u64>,
    #[serde(default)]
    pub short_stale: Option<u64>,
    #[serde(default)]
    pub minimal_stale: Option<u64>,
}

impl TtlScope {
    fn get(&self, class: CacheClass) -> Option<u64> {
        match class {
            CacheClass::Permanent => self.permanent,
            CacheClass::Short => self.short,
            CacheClass::Minimal => self.minimal,
            CacheClass::None => Some(0),
        }
    }

    fn get_stale(&self, class: CacheClass) -> Option<u64> {
        match class {
            CacheClass::Permanent => self.permanent_stale,
            CacheClass::Short => self.short_stale,
            CacheClass::Minimal => self.minimal_stale,
            CacheClass::None => Some(0),
        }
    }

    fn defines_all_classes(&self) -> bool {
        self.permanent.is_some() && self.short.is_some() && self.minimal.is_some()
    }
}

/// On-disk shape of the cache-rules YAML document (spec §6).
#[derive(Debug, Clone, Deserialize)]
struct RuleSetDocument {
    ttl_defaults: HashMap<String, TtlScope>,
    #[serde(default)]
    cache_rules: HashMap<String, String>,
    #[serde(default)]
    skip_null_cache: Vec<String>,
}

/// Immutable, validated policy snapshot. Cheap to clone (all fields are
/// small maps); the loader wraps it in an `ArcSwap` for atomic reload.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    ttl_defaults: HashMap<String, TtlScope>,
    method_map: HashMap<String, CacheClass>,
    skip_null: HashSet<String>,
}

impl RuleSet {
    /// Parse and validate a YAML document per spec §6/§4.2.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::RuleSetInvalid`] if `default` is missing,
    /// doesn't define all three classes, or a `cache_rules` entry names an
    /// unknown class.
    pub fn parse(yaml: &str) -> Result<Self> {
        let doc: RuleSetDocument = serde_yaml::from_str(yaml)?;
        Self::from_document(doc)
    }

    fn from_document(doc: RuleSetDocument) -> Result<Self> {
        let default_scope = doc.ttl_defaults.get("default").ok_or_else(|| {
            GatewayError::RuleSetInvalid("ttl_defaults.default is required".to_string())
        })?;
        if !default_scope.defines_all_classes() {
            return Err(GatewayError::RuleSetInvalid(
                "ttl_defaults.default must define permanent, short, and minimal".to_string(),
            ));
        }

        let mut method_map = HashMap::with_capacity(doc.cache_rules.len());
        for (method, class_name) in &doc.cache_rules {
            let class = parse_class(class_name).ok_or_else(|| {
                GatewayError::RuleSetInvalid(format!(
                    "unknown cache class '{class_name}' for method '{method}'"
                ))
            })?;
            method_map.insert(method.clone(), class);
        }

        Ok(Self {
            ttl_defaults: doc.ttl_defaults,
            method_map,
            skip_null: doc.skip_null_cache.into_iter().collect(),
        })
    }

    /// Cache class for `method`. `None`-class for unknown methods or an
    /// empty method map (spec §4.2).
    #[must_use]
    pub fn classify(&self, method: &str) -> CacheClass {
        self.method_map
            .get(method)
            .copied()
            .unwrap_or(CacheClass::None)
    }

    /// TTL for `(chain, network, class)`. Lookup order:
    /// `chain:network` -> `chain` -> `default`. An explicit zero at a
    /// more-specific scope is final and does not fall back; only an
    /// absent key falls back (spec §4.2, §9 Open Question #2).
    #[must_use]
    pub fn ttl(&self, chain: &str, network: &str, class: CacheClass) -> Ttl {
        if class == CacheClass::None {
            return Ttl::default();
        }

        let scopes = [
            format!("{chain}:{network}"),
            chain.to_string(),
            "default".to_string(),
        ];

        let fresh = self.resolve_component(&scopes, class, FreshOrStale::Fresh);
        let stale = self.resolve_component(&scopes, class, FreshOrStale::Stale);
        Ttl { fresh, stale }
    }

    fn resolve_component(&self, scopes: &[String], class: CacheClass, which: FreshOrStale) -> u64 {
        for scope_name in scopes {
            let Some(scope) = self.ttl_defaults.get(scope_name) else {
                continue;
            };
            let value = match which {
                FreshOrStale::Fresh => scope.get(class),
                FreshOrStale::Stale => scope.get_stale(class),
            };
            if let Some(value) = value {
                return value;
            }
        }
        0
    }

    /// Whether a null `result` for `method` must never be cached.
    #[must_use]
    pub fn should_skip_null(&self, method: &str) -> bool {
        self.skip_null.contains(method)
    }
}

#[derive(Clone, Copy)]
enum FreshOrStale {
    Fresh,
    Stale,
}

fn parse_class(name: &str) -> Option<CacheClass> {
    match name {
        "permanent" => Some(CacheClass::Permanent),
        "short" => Some(CacheClass::Short),
        "minimal" => Some(CacheClass::Minimal),
        "none" => Some(CacheClass::None),
        _ => None,
    }
}

/// Owns the live `RuleSet` behind an atomic pointer swap (spec §9
/// "Versioned configuration"). Readers take one load per operation;
/// `reload` builds a new snapshot off to the side and swaps it in only
/// after validation succeeds, leaving the prior `RuleSet` in effect on
/// failure.
pub struct RuleSetLoader {
    current: ArcSwap<RuleSet>,
    reload_errors: std::sync::atomic::AtomicU64,
}

impl RuleSetLoader {
    /// Construct a loader from an already-validated `RuleSet`.
    #[must_use]
    pub fn new(initial: RuleSet) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
            reload_errors: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Parse `yaml` at startup. Configuration faults here are fatal
    /// (spec §7); the caller should abort process startup on error.
    ///
    /// # Errors
    ///
    /// Propagates [`GatewayError::RuleSetInvalid`] / YAML parse errors.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(Self::new(RuleSet::parse(yaml)?))
    }

    /// Current validated snapshot. Cheap (Arc clone).
    #[must_use]
    pub fn current(&self) -> Arc<RuleSet> {
        self.current.load_full()
    }

    /// Validate `yaml` and, on success, atomically swap it in. On
    /// failure the prior `RuleSet` remains active and a counter is bumped
    /// (spec §4.2/§7 Policy fault).
    pub fn reload(&self, yaml: &str) -> Result<()> {
        match RuleSet::parse(yaml) {
            Ok(new_set) => {
                self.current.store(Arc::new(new_set));
                debug!("rule set reloaded");
                Ok(())
            }
            Err(e) => {
                self.reload_errors
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                warn!(error = %e, "rule set reload rejected, keeping prior rule set");
                Err(e)
            }
        }
    }

    /// Number of reload attempts that failed validation since startup.
    #[must_use]
    pub fn reload_error_count(&self) -> u64 {
        self.reload_errors.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Spawn a background task reloading from `source` on a fixed cadence
    /// (spec §2 "reloaded on a schedule"). Returns the task handle so
    /// callers can abort it on shutdown.
    pub fn spawn_reload_ticker<F, Fut>(
        self: &Arc<Self>,
        interval: Duration,
        mut source: F,
    ) -> tokio::task::JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<String>> + Send,
    {
        let loader = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match source().await {
                    Ok(yaml) => {
                        if let Err(e) = loader.reload(&yaml) {
                            warn!(error = %e, "scheduled rule set reload failed");
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to fetch rule set source for reload"),
                }
            }
        })
    }
}
