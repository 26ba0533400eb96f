//! Request fingerprinting — cache key derivation from a JSON-RPC request.
//!
//! The key format is a stability contract shared with any companion process
//! reading the same L2 store (spec §9): do not change the digest algorithm
//! or the field order without versioning the key prefix.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GatewayError, Result};

const DEFAULT_JSONRPC_VERSION: &str = "2.0";

/// A parsed JSON-RPC request body. `id` is carried for response rewriting
/// but is never an input to the fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Value,
}

fn default_jsonrpc() -> String {
    DEFAULT_JSONRPC_VERSION.to_string()
}

impl RpcRequest {
    /// Parse a raw JSON-RPC body, rejecting an empty method.
    pub fn parse(raw_body: &[u8]) -> Result<Self> {
        let req: Self = serde_json::from_slice(raw_body)
            .map_err(|e| GatewayError::InvalidRequest(format!("malformed JSON-RPC body: {e}")))?;
        if req.method.is_empty() {
            return Err(GatewayError::empty_field("method"));
        }
        Ok(req)
    }
}

/// Deterministic byte-string identifying a logical RPC request for caching.
/// Equal for requests differing only in `id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Build a cache key from `(chain, network, req)`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidRequest`] when `chain`, `network`, or
    /// `req.method` is empty.
    pub fn build(chain: &str, network: &str, req: &RpcRequest) -> Result<Self> {
        if chain.is_empty() {
            return Err(GatewayError::empty_field("chain"));
        }
        if network.is_empty() {
            return Err(GatewayError::empty_field("network"));
        }
        if req.method.is_empty() {
            return Err(GatewayError::empty_field("method"));
        }

        let jsonrpc = if req.jsonrpc.is_empty() {
            DEFAULT_JSONRPC_VERSION
        } else {
            req.jsonrpc.as_str()
        };

        let digest = params_digest(&req.params);

        Ok(Self(format!(
            "{chain}:{network}:{}:{jsonrpc}:{digest}",
            req.method
        )))
    }

    /// Map `build` over a non-empty batch, aborting on the first error.
    ///
    /// # Errors
    ///
    /// Returns the first encountered error, annotated with the offending
    /// batch index.
    pub fn build_batch(chain: &str, network: &str, reqs: &[RpcRequest]) -> Result<Vec<Self>> {
        if reqs.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "batch must not be empty".to_string(),
            ));
        }
        reqs.iter()
            .enumerate()
            .map(|(idx, req)| {
                Self::build(chain, network, req)
                    .map_err(|e| annotate_batch_index(e, idx))
            })
            .collect()
    }

    /// Borrow the key as a string slice (e.g. for store lookups).
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn annotate_batch_index(err: GatewayError, idx: usize) -> GatewayError {
    match err {
        GatewayError::InvalidRequest(msg) => {
            GatewayError::InvalidRequest(format!("batch[{idx}]: {msg}"))
        }
        other => other,
    }
}

/// Serialize `params` to a deterministic byte form and hash it.
///
/// The digest choice (MD5, rendered as lowercase hex) is fixed for
/// cross-tier/cross-process compatibility; it is not used as a security
/// primitive. Absent params (`Value::Null`) digest to the empty string.
fn params_digest(params: &Value) -> String {
    if params.is_null() {
        return String::new();
    }
    // serde_json::Value serializes object keys in insertion order; callers
    // construct params from a fixed schema so this is stable across
    // processes for the cases this cache handles (positional arrays and
    // request bodies produced by deterministic serializers upstream).
    let canonical =
        serde_json::to_vec(params).unwrap_or_else(|_| b"null".to_vec());
    let digest = md5::compute(&canonical);
    format!("{digest:x}")
}

/// Overwrite `payload`'s `id` field with the caller's `id` (see spec §4.1,
/// "response rewriting"). Other fields are left byte-identical.
pub fn rewrite_id(payload: &mut Value, caller_id: &Value) {
    if let Value::Object(map) = payload {
        map.insert("id".to_string(), caller_id.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(method: &str, params: Value, id: i64) -> RpcRequest {
        RpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: Value::from(id),
        }
    }

    #[test]
    fn identical_method_and_params_same_key_differing_id() {
        let r1 = req("eth_getBlockByHash", serde_json::json!(["0x1", true]), 1);
        let r2 = req("eth_getBlockByHash", serde_json::json!(["0x1", true]), 2);
        let k1 = Fingerprint::build("ethereum", "mainnet", &r1).unwrap();
        let k2 = Fingerprint::build("ethereum", "mainnet", &r2).unwrap();
        assert_eq!(k1, k2);
    }

    #[test]
    fn differing_method_or_params_differing_key() {
        let base = req("eth_getBlockByHash", serde_json::json!(["0x1", true]), 1);
        let other_method = req("eth_blockNumber", serde_json::json!(["0x1", true]), 1);
        let other_params = req("eth_getBlockByHash", serde_json::json!(["0x2", true]), 1);

        let k_base = Fingerprint::build("ethereum", "mainnet", &base).unwrap();
        let k_method = Fingerprint::build("ethereum", "mainnet", &other_method).unwrap();
        let k_params = Fingerprint::build("ethereum", "mainnet", &other_params).unwrap();

        assert_ne!(k_base, k_method);
        assert_ne!(k_base, k_params);
    }

    #[test]
    fn empty_chain_network_or_method_errors() {
        let r = req("eth_blockNumber", Value::Null, 1);
        assert!(Fingerprint::build("", "mainnet", &r).is_err());
        assert!(Fingerprint::build("ethereum", "", &r).is_err());

        let mut bad = r.clone();
        bad.method = String::new();
        assert!(Fingerprint::build("ethereum", "mainnet", &bad).is_err());
    }

    #[test]
    fn key_format_is_colon_delimited_with_default_jsonrpc() {
        let r = RpcRequest {
            jsonrpc: String::new(),
            method: "eth_blockNumber".to_string(),
            params: Value::Null,
            id: Value::from(1),
        };
        let key = Fingerprint::build("ethereum", "mainnet", &r).unwrap();
        assert_eq!(key.as_str(), "ethereum:mainnet:eth_blockNumber:2.0:");
    }

    #[test]
    fn build_batch_aborts_on_first_error() {
        let ok = req("eth_blockNumber", Value::Null, 1);
        let mut bad = ok.clone();
        bad.method = String::new();
        let batch = vec![ok, bad];
        let err = Fingerprint::build_batch("ethereum", "mainnet", &batch).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(ref m) if m.contains("batch[1]")));
    }

    #[test]
    fn rewrite_id_replaces_only_id_field() {
        let mut payload = serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": {"number": "0x123"}});
        rewrite_id(&mut payload, &Value::from(999));
        assert_eq!(payload["id"], Value::from(999));
        assert_eq!(payload["result"]["number"], "0x123");
    }
}
