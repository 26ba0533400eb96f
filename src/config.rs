//! Provider-list configuration: on-disk JSON format, the `ProviderSet`
//! snapshot keyed by `(chain, network)`, and its atomically-swapped
//! loader (spec §3, §6, §9 "Versioned configuration").

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{GatewayError, Result};

/// How a provider authenticates outbound requests (spec §3 `Provider`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthKind {
    None,
    Token { token: String },
    Basic { login: String, password: String },
}

/// A single upstream RPC endpoint.
#[derive(Debug, Clone)]
pub struct Provider {
    pub name: String,
    pub class: String,
    pub url: String,
    pub auth: AuthKind,
}

/// Ordered, preference-ranked providers for one `(chain, network)` pair.
#[derive(Debug, Clone, Default)]
pub struct ChainProviders {
    pub providers: Vec<Provider>,
}

impl ChainProviders {
    #[must_use]
    pub fn filter_by_class(&self, class: &str) -> Vec<&Provider> {
        self.providers.iter().filter(|p| p.class == class).collect()
    }
}

/// Immutable snapshot of every chain's provider list.
#[derive(Debug, Clone, Default)]
pub struct ProviderSet {
    chains: HashMap<(String, String), ChainProviders>,
}

impl ProviderSet {
    /// Parse the on-disk provider-list JSON (spec §6).
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Configuration`] when `authType` requires
    /// credential fields that are absent.
    pub fn parse(json: &str) -> Result<Self> {
        let doc: ProviderListDocument = serde_json::from_str(json)?;
        Self::from_document(doc)
    }

    fn from_document(doc: ProviderListDocument) -> Result<Self> {
        let mut chains = HashMap::with_capacity(doc.chains.len());
        for chain in doc.chains {
            let mut providers = Vec::with_capacity(chain.providers.len());
            for raw in chain.providers {
                providers.push(raw.into_provider()?);
            }
            chains.insert((chain.name, chain.network), ChainProviders { providers });
        }
        Ok(Self { chains })
    }

    /// Providers configured for `(chain, network)`, or an empty list.
    #[must_use]
    pub fn for_chain(&self, chain: &str, network: &str) -> Option<&ChainProviders> {
        self.chains.get(&(chain.to_string(), network.to_string()))
    }

    /// Every configured `(chain, network)` group, for the health runner's
    /// fan-out.
    pub fn chain_groups(&self) -> impl Iterator<Item = (&(String, String), &ChainProviders)> {
        self.chains.iter()
    }
}

#[derive(Debug, Deserialize)]
struct ProviderListDocument {
    chains: Vec<ChainDocument>,
}

#[derive(Debug, Deserialize)]
struct ChainDocument {
    name: String,
    network: String,
    providers: Vec<ProviderDocument>,
}

#[derive(Debug, Deserialize)]
struct ProviderDocument {
    #[serde(rename = "type")]
    class: String,
    name: String,
    url: String,
    #[serde(rename = "authType")]
    auth_type: String,
    #[serde(rename = "authToken")]
    auth_token: Option<String>,
    #[serde(rename = "authLogin")]
    auth_login: Option<String>,
    #[serde(rename = "authPassword")]
    auth_password: Option<String>,
}

impl ProviderDocument {
    fn into_provider(self) -> Result<Provider> {
        let auth = match self.auth_type.as_str() {
            "no-auth" => AuthKind::None,
            "token-auth" => AuthKind::Token {
                token: self.auth_token.ok_or_else(|| {
                    GatewayError::Configuration(format!(
                        "provider '{}': token-auth requires authToken",
                        self.name
                    ))
                })?,
            },
            "basic-auth" => AuthKind::Basic {
                login: self.auth_login.ok_or_else(|| {
                    GatewayError::Configuration(format!(
                        "provider '{}': basic-auth requires authLogin",
                        self.name
                    ))
                })?,
                password: self.auth_password.ok_or_else(|| {
                    GatewayError::Configuration(format!(
                        "provider '{}': basic-auth requires authPassword",
                        self.name
                    ))
                })?,
            },
            other => {
                return Err(GatewayError::Configuration(format!(
                    "provider '{}': unknown authType '{other}'",
                    self.name
                )))
            }
        };
        Ok(Provider {
            name: self.name,
            class: self.class,
            url: self.url,
            auth,
        })
    }
}

/// Owns the live `ProviderSet` behind an atomic pointer swap, mirroring
/// [`crate::rules::RuleSetLoader`]. The `HealthRunner` is the sole writer;
/// the `Dispatcher` only ever reads the current snapshot.
pub struct ProviderSetLoader {
    current: ArcSwap<ProviderSet>,
}

impl ProviderSetLoader {
    #[must_use]
    pub fn new(initial: ProviderSet) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
        }
    }

    /// Parse the startup provider list. Configuration faults here are
    /// fatal (spec §7); the caller should abort process startup.
    ///
    /// # Errors
    ///
    /// Propagates [`GatewayError::Configuration`] / JSON parse errors.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(Self::new(ProviderSet::parse(json)?))
    }

    #[must_use]
    pub fn current(&self) -> Arc<ProviderSet> {
        self.current.load_full()
    }

    /// Publish `candidate` for `(chain, network)` into a fresh snapshot,
    /// built by cloning the current one and replacing only that entry.
    /// A candidate with zero providers is rejected and the current
    /// publication is left untouched (spec §4.7, §8 invariant 8).
    pub fn publish(&self, chain: &str, network: &str, candidate: ChainProviders) {
        if candidate.providers.is_empty() {
            warn!(chain, network, "health cycle produced zero valid providers, keeping prior set");
            return;
        }
        let mut next = (*self.current.load_full()).clone();
        next.chains.insert((chain.to_string(), network.to_string()), candidate);
        self.current.store(Arc::new(next));
        debug!(chain, network, "provider set published");
    }
}
