//! Integration tests for the health runner's parallel probe fan-out and
//! atomic publish behavior against fake providers (spec §4.7, §8
//! invariant 8).

mod common;

use std::sync::Arc;
use std::time::Duration;

use rpc_cache_gateway::config::ProviderSet;
use rpc_cache_gateway::{HealthConfig, HealthRunner, ProbeCase, ProviderSetLoader, Tolerance};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn block_number_matrix() -> Vec<ProbeCase> {
    vec![ProbeCase {
        method: "eth_blockNumber".to_string(),
        params: serde_json::Value::Null,
        tolerance: Tolerance::Exact,
    }]
}

#[tokio::test]
async fn mismatched_provider_is_dropped_from_the_published_set() {
    let reference = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": "0x100"})))
        .mount(&reference)
        .await;

    let drifting = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": "0x999"})))
        .mount(&drifting)
        .await;

    let providers = Arc::new(ProviderSetLoader::new(
        ProviderSet::parse(&common::provider_list_json("ethereum", "mainnet", &[&reference.uri(), &drifting.uri()])).unwrap(),
    ));

    let runner = HealthRunner::new(
        providers.clone(),
        reqwest::Client::new(),
        HealthConfig {
            cycle_interval: Duration::from_secs(3600),
            cycle_timeout: Duration::from_secs(2),
            test_matrix: block_number_matrix(),
        },
    );

    runner.run_cycle().await;

    let published = providers.current();
    let group = published.for_chain("ethereum", "mainnet").unwrap();
    assert_eq!(group.providers.len(), 1);
    assert_eq!(group.providers[0].name, "p0");
}

#[tokio::test]
async fn reference_provider_unreachable_keeps_the_prior_publication() {
    let unreachable = "http://127.0.0.1:1";
    let healthy = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": "0x100"})))
        .mount(&healthy)
        .await;

    let providers = Arc::new(ProviderSetLoader::new(
        ProviderSet::parse(&common::provider_list_json("ethereum", "mainnet", &[unreachable, &healthy.uri()])).unwrap(),
    ));
    let before = providers.current().for_chain("ethereum", "mainnet").unwrap().providers.len();

    let runner = HealthRunner::new(
        providers.clone(),
        reqwest::Client::new(),
        HealthConfig {
            cycle_interval: Duration::from_secs(3600),
            cycle_timeout: Duration::from_millis(500),
            test_matrix: block_number_matrix(),
        },
    );

    runner.run_cycle().await;

    let after = providers.current().for_chain("ethereum", "mainnet").unwrap().providers.len();
    assert_eq!(before, after);
}
