//! Crate-wide error taxonomy.
//!
//! Mirrors the fault classes of the cache design: input validation, cache
//! faults (degraded, never fatal), upstream faults, policy faults (reload
//! rejection), and configuration faults (fatal at startup). The Dispatcher
//! and `CacheOps` translate these into HTTP-shaped outcomes for the front
//! door; this crate never depends on an HTTP framework to do it.

use std::fmt;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Coarse class used by callers to decide how to report an error upstream,
/// without this crate depending on an HTTP status type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusHint {
    /// Caller input was invalid; never retried.
    BadRequest,
    /// Requested resource (e.g. provider class) does not exist.
    NotFound,
    /// All upstream providers failed.
    BadGateway,
    /// Internal fault; not directly actionable by the caller.
    Internal,
}

/// Unified error type for the cache gateway core.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Empty chain, network, or method; malformed JSON-RPC body.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// L1/L2 operation failed or decoded to a corrupt entry. Always
    /// non-fatal: reads degrade to a miss, writes are silently skipped.
    #[error("cache fault ({tier}): {reason}")]
    CacheFault {
        /// Which tier faulted ("l1" or "l2").
        tier: &'static str,
        /// Human-readable reason, logged alongside the `cache_error` counter.
        reason: String,
    },

    /// No provider (or no provider of the requested class) is available.
    #[error("no provider available{}", class.as_ref().map(|c| format!(" for class '{c}'")).unwrap_or_default())]
    NoProviderAvailable {
        /// The requested provider class, if any was given.
        class: Option<String>,
    },

    /// Every provider in the iteration order failed.
    #[error("all providers failed for {chain}:{network}")]
    AllProvidersFailed {
        /// Chain identifier.
        chain: String,
        /// Network identifier.
        network: String,
    },

    /// `RuleSet::reload` rejected the candidate document; the prior
    /// `RuleSet` remains active.
    #[error("rule set validation failed: {0}")]
    RuleSetInvalid(String),

    /// Startup configuration is missing or malformed. Fatal: the caller
    /// should abort process startup.
    #[error("configuration fault: {0}")]
    Configuration(String),

    #[error(transparent)]
    Redis(#[from] redis::RedisError),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Build an `InvalidRequest` for an empty required field.
    pub fn empty_field(field: &'static str) -> Self {
        Self::InvalidRequest(format!("{field} must not be empty"))
    }

    /// Coarse status classification for front doors that map errors to HTTP.
    #[must_use]
    pub fn status_hint(&self) -> StatusHint {
        match self {
            Self::InvalidRequest(_) => StatusHint::BadRequest,
            Self::NoProviderAvailable { .. } => StatusHint::NotFound,
            Self::AllProvidersFailed { .. } => StatusHint::BadGateway,
            Self::CacheFault { .. }
            | Self::RuleSetInvalid(_)
            | Self::Configuration(_)
            | Self::Redis(_)
            | Self::Http(_)
            | Self::Json(_)
            | Self::Yaml(_)
            | Self::Io(_) => StatusHint::Internal,
        }
    }
}

impl fmt::Display for StatusHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BadRequest => "400",
            Self::NotFound => "404",
            Self::BadGateway => "502",
            Self::Internal => "500",
        };
        write!(f, "{s}")
    }
}
