//! Shared test helpers for `relay-core` unit tests.
//!
//! Builders for chain specs and endpoint descriptors so that parser, tracker
//! and orchestrator tests agree on one set of dummy chains.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{HealthCheckConfig, ProviderConfig};
use crate::spec::{
    Api, ApiCollection, BlockParser, ChainSpec, FunctionTag, ParseDirective, ParserFunc,
    Verification,
};
use crate::state::{LocalChainParams, LocalStateTracker};
use crate::types::{NetworkAddress, NodeUrl, ProviderIdentity, RpcProviderEndpoint};

// ==============================================================================
// Spec Builders
// ==============================================================================

fn api(name: &str, parser: BlockParser, compute_units: u64, addon: &str) -> Api {
    Api {
        name: name.into(),
        block_parsing: parser,
        compute_units,
        enabled: true,
        addon: addon.into(),
    }
}

/// An Ethereum-like spec: 12 s blocks, a jsonrpc collection with a handful of
/// APIs, the two tracker directives and one chain-id verification.
pub fn chain_spec(chain_id: &str) -> ChainSpec {
    ChainSpec {
        index: chain_id.into(),
        average_block_time_ms: 12_000,
        block_distance_for_finalized_data: 7,
        blocks_in_finalization_proof: 3,
        allowed_block_lag_for_qos_sync: 5,
        data_reliability_enabled: true,
        api_collections: vec![ApiCollection {
            api_interface: "jsonrpc".into(),
            apis: vec![
                api(
                    "eth_blockNumber",
                    BlockParser::new(ParserFunc::Default, &["latest"]),
                    10,
                    "",
                ),
                api(
                    "eth_getBlockByNumber",
                    BlockParser::new(ParserFunc::ParseByArg, &["0"]),
                    20,
                    "",
                ),
                api(
                    "eth_chainId",
                    BlockParser::new(ParserFunc::Empty, &[]),
                    10,
                    "",
                ),
                api(
                    "eth_getProof",
                    BlockParser::new(ParserFunc::ParseByArg, &["2"]).with_default("latest"),
                    50,
                    "archive",
                ),
            ],
            parse_directives: vec![
                ParseDirective {
                    function_tag: FunctionTag::GetBlocknum,
                    function_template:
                        r#"{"jsonrpc":"2.0","id":1,"method":"eth_blockNumber","params":[]}"#.into(),
                    result_parsing: BlockParser::new(ParserFunc::ParseByArg, &["0"]),
                },
                ParseDirective {
                    function_tag: FunctionTag::GetBlockByNum,
                    function_template:
                        r#"{"jsonrpc":"2.0","id":1,"method":"eth_getBlockByNumber","params":["{block_hex}",false]}"#
                            .into(),
                    result_parsing: BlockParser::new(ParserFunc::ParseCanonical, &["0", "hash"]),
                },
            ],
            verifications: vec![Verification {
                name: "chain-id".into(),
                function_template: r#"{"jsonrpc":"2.0","id":1,"method":"eth_chainId","params":[]}"#
                    .into(),
                parse: BlockParser::new(ParserFunc::ParseByArg, &["0"]),
                expected: "0x1".into(),
            }],
        }],
    }
}

// ==============================================================================
// Endpoint Builders
// ==============================================================================

pub fn endpoint(chain_id: &str, address: &str) -> RpcProviderEndpoint {
    RpcProviderEndpoint {
        network_address: NetworkAddress::new(address),
        chain_id: chain_id.into(),
        api_interface: "jsonrpc".into(),
        geolocation: 1,
        node_urls: vec![NodeUrl::new(format!("http://{}-node:8545", chain_id.to_lowercase()))],
    }
}

// ==============================================================================
// Orchestrator Builders
// ==============================================================================

/// Provider settings with a fixed identity, no health monitor and a 10 ms
/// retry unit. Not yet validated.
pub fn provider_config(endpoints: Vec<RpcProviderEndpoint>) -> ProviderConfig {
    ProviderConfig {
        endpoints,
        identity: Some(ProviderIdentity {
            address: "provider-1".into(),
        }),
        health_check: HealthCheckConfig {
            enabled: false,
            interval: Duration::from_secs(60),
        },
        retry_backoff_unit: Duration::from_millis(10),
        ..ProviderConfig::default()
    }
}

/// A local state tracker holding [`chain_spec`] for each of `chains`.
pub fn local_state_tracker(chains: &[&str]) -> Arc<LocalStateTracker> {
    Arc::new(LocalStateTracker::new(
        chains.iter().map(|chain_id| chain_spec(chain_id)).collect(),
        LocalChainParams::default(),
    ))
}
