//! End-to-end dispatcher tests against fake upstream providers (spec §8
//! scenarios A-F): cache miss forwards and caches, cache hit short-
//! circuits, provider failover on a retryable status, all-providers-fail
//! yields a bad gateway, an unknown provider class yields not-found, and a
//! stale entry falls back to itself when every provider fails.

mod common;

use std::sync::Arc;
use std::time::Duration;

use rpc_cache_gateway::config::ProviderSet;
use rpc_cache_gateway::{
    Dispatcher, DispatcherConfig, Fingerprint, L1Config, L1Store, NoopMetricsSink,
    ProviderSetLoader, RpcRequest, RuleSet, RuleSetLoader, Ttl, TwoTierCache,
};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn rpc_body(method: &str, id: i64) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({"jsonrpc": "2.0", "method": method, "params": [], "id": id})).unwrap()
}

fn build_dispatcher(rules_yaml: &str, providers_json: &str) -> Dispatcher {
    let rules = Arc::new(RuleSetLoader::new(RuleSet::parse(rules_yaml).unwrap()));
    let providers = Arc::new(ProviderSetLoader::new(ProviderSet::parse(providers_json).unwrap()));
    let cache = TwoTierCache::new(L1Store::new(L1Config::default()), common::fake_l2());
    Dispatcher::new(
        cache,
        rules,
        providers,
        reqwest::Client::new(),
        Arc::new(NoopMetricsSink),
        DispatcherConfig {
            attempt_timeout: Duration::from_millis(500),
            iteration_deadline: Duration::from_secs(2),
        },
    )
}

#[tokio::test]
async fn miss_forwards_to_provider_and_caches_the_result() {
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": "0x10"})))
        .expect(1)
        .mount(&provider)
        .await;

    let dispatcher = build_dispatcher(common::sample_rules_yaml(), &common::provider_list_json("ethereum", "mainnet", &[&provider.uri()]));

    let first = dispatcher.handle("ethereum", "mainnet", None, &rpc_body("eth_blockNumber", 7)).await;
    assert_eq!(first.status, 200);
    let body: serde_json::Value = serde_json::from_slice(&first.body).unwrap();
    assert_eq!(body["id"], 7);
    assert_eq!(body["result"], "0x10");

    // Second call for the same logical request must be served from cache,
    // not forwarded again (the mock's `expect(1)` would fail verification
    // on drop otherwise).
    let second = dispatcher.handle("ethereum", "mainnet", None, &rpc_body("eth_blockNumber", 99)).await;
    assert_eq!(second.status, 200);
    let body: serde_json::Value = serde_json::from_slice(&second.body).unwrap();
    assert_eq!(body["id"], 99);
    assert_eq!(body["result"], "0x10");
}

#[tokio::test]
async fn failing_provider_is_retried_against_the_next_one() {
    let failing = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&failing)
        .await;

    let healthy = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": "0x20"})))
        .mount(&healthy)
        .await;

    let dispatcher = build_dispatcher(
        common::sample_rules_yaml(),
        &common::provider_list_json("ethereum", "mainnet", &[&failing.uri(), &healthy.uri()]),
    );

    let outcome = dispatcher.handle("ethereum", "mainnet", None, &rpc_body("eth_blockNumber", 1)).await;
    assert_eq!(outcome.status, 200);
    let body: serde_json::Value = serde_json::from_slice(&outcome.body).unwrap();
    assert_eq!(body["result"], "0x20");
}

#[tokio::test]
async fn all_providers_failing_yields_bad_gateway() {
    let failing_a = MockServer::start().await;
    Mock::given(method("POST")).respond_with(ResponseTemplate::new(503)).mount(&failing_a).await;
    let failing_b = MockServer::start().await;
    Mock::given(method("POST")).respond_with(ResponseTemplate::new(500)).mount(&failing_b).await;

    let dispatcher = build_dispatcher(
        common::sample_rules_yaml(),
        &common::provider_list_json("ethereum", "mainnet", &[&failing_a.uri(), &failing_b.uri()]),
    );

    let outcome = dispatcher.handle("ethereum", "mainnet", None, &rpc_body("eth_blockNumber", 1)).await;
    assert_eq!(outcome.status, 502);
}

#[tokio::test]
async fn unknown_chain_network_pair_is_not_found() {
    let dispatcher = build_dispatcher(common::sample_rules_yaml(), &common::provider_list_json("ethereum", "mainnet", &["http://127.0.0.1:1"]));

    let outcome = dispatcher.handle("polygon", "mainnet", None, &rpc_body("eth_blockNumber", 1)).await;
    assert_eq!(outcome.status, 404);
}

#[tokio::test]
async fn non_retryable_error_shape_is_forwarded_verbatim_and_not_cached() {
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"jsonrpc": "2.0", "id": 1, "error": {"code": 3, "message": "execution reverted"}})))
        .expect(2)
        .mount(&provider)
        .await;

    let dispatcher = build_dispatcher(common::sample_rules_yaml(), &common::provider_list_json("ethereum", "mainnet", &[&provider.uri()]));

    let outcome = dispatcher.handle("ethereum", "mainnet", None, &rpc_body("eth_blockNumber", 5)).await;
    assert_eq!(outcome.status, 200);
    let body: serde_json::Value = serde_json::from_slice(&outcome.body).unwrap();
    assert_eq!(body["error"]["code"], 3);

    // A second identical request hits the provider again: an error shape
    // is never cached, so there is nothing to serve from the cache tier.
    let outcome = dispatcher.handle("ethereum", "mainnet", None, &rpc_body("eth_blockNumber", 6)).await;
    assert_eq!(outcome.status, 200);
}

#[tokio::test]
async fn stale_entry_is_served_when_every_provider_fails() {
    let failing = MockServer::start().await;
    Mock::given(method("POST")).respond_with(ResponseTemplate::new(503)).mount(&failing).await;

    let rules = Arc::new(RuleSetLoader::new(RuleSet::parse(common::sample_rules_yaml()).unwrap()));
    let providers = Arc::new(ProviderSetLoader::new(
        ProviderSet::parse(&common::provider_list_json("ethereum", "mainnet", &[&failing.uri()])).unwrap(),
    ));
    let cache = TwoTierCache::new(L1Store::new(L1Config::default()), common::fake_l2());

    // Prime the cache with an already-stale (fresh window elapsed, not yet
    // expired) entry for this exact request, bypassing the dispatcher.
    let req = RpcRequest::parse(&rpc_body("eth_blockNumber", 1)).unwrap();
    let key = Fingerprint::build("ethereum", "mainnet", &req).unwrap();
    let stale_payload = serde_json::to_vec(&serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": "0xstale"})).unwrap();
    cache.set(key.as_str(), stale_payload, Ttl { fresh: 0, stale: 30 }, false).await;

    let dispatcher = Dispatcher::new(
        cache,
        rules,
        providers,
        reqwest::Client::new(),
        Arc::new(NoopMetricsSink),
        DispatcherConfig {
            attempt_timeout: Duration::from_millis(500),
            iteration_deadline: Duration::from_secs(2),
        },
    );

    let outcome = dispatcher.handle("ethereum", "mainnet", None, &rpc_body("eth_blockNumber", 9)).await;
    assert_eq!(outcome.status, 200);
    let body: serde_json::Value = serde_json::from_slice(&outcome.body).unwrap();
    assert_eq!(body["result"], "0xstale");
    assert_eq!(body["id"], 9);
}
