//! Turns CLI arguments and files into a `ProviderConfig` and chain specs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{bail, eyre, WrapErr};
use serde::Deserialize;

use relay_core::config::HealthCheckConfig;
use relay_core::spec::ChainSpec;
use relay_core::state::LocalChainParams;
use relay_core::types::{NetworkAddress, NodeUrl, ProviderIdentity, RpcProviderEndpoint};
use relay_core::ProviderConfig;

use crate::cli::Cli;

/// Positional arguments per endpoint group.
const GROUP_LEN: usize = 4;

// ==============================================================================
// Endpoint Files
// ==============================================================================

#[derive(Debug, Deserialize)]
struct EndpointFile {
    endpoints: Vec<EndpointEntry>,
}

#[derive(Debug, Deserialize)]
struct EndpointEntry {
    /// Empty means "the previous endpoint's listener".
    #[serde(default)]
    network_address: String,
    chain_id: String,
    api_interface: String,
    #[serde(default)]
    geolocation: u64,
    node_urls: Vec<NodeUrlEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NodeUrlEntry {
    Plain(String),
    Detailed {
        url: String,
        #[serde(default)]
        addons: Vec<String>,
    },
}

impl From<EndpointEntry> for RpcProviderEndpoint {
    fn from(entry: EndpointEntry) -> Self {
        Self {
            network_address: NetworkAddress::new(entry.network_address),
            chain_id: entry.chain_id,
            api_interface: entry.api_interface,
            geolocation: entry.geolocation,
            node_urls: entry
                .node_urls
                .into_iter()
                .map(|node| match node {
                    NodeUrlEntry::Plain(url) => NodeUrl::new(url),
                    NodeUrlEntry::Detailed { url, addons } => NodeUrl { url, addons },
                })
                .collect(),
        }
    }
}

pub fn parse_endpoint_file(text: &str) -> eyre::Result<Vec<RpcProviderEndpoint>> {
    let file: EndpointFile = serde_yaml::from_str(text).wrap_err("parse endpoints YAML")?;
    Ok(file.endpoints.into_iter().map(Into::into).collect())
}

/// Parse repeated `ADDRESS CHAIN_ID API_INTERFACE NODE_URLS` groups.
pub fn parse_endpoint_groups(args: &[String], geolocation: u64) -> eyre::Result<Vec<RpcProviderEndpoint>> {
    if args.len() % GROUP_LEN != 0 {
        bail!(
            "endpoints must be given as groups of ADDRESS CHAIN_ID API_INTERFACE NODE_URLS; got {} arguments",
            args.len()
        );
    }
    args.chunks(GROUP_LEN)
        .map(|group| {
            let node_urls: Vec<NodeUrl> = group[3]
                .split(',')
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(NodeUrl::new)
                .collect();
            if node_urls.is_empty() {
                return Err(eyre!("endpoint {} {} has no node urls", group[1], group[2]));
            }
            Ok(RpcProviderEndpoint {
                network_address: NetworkAddress::new(group[0].as_str()),
                chain_id: group[1].clone(),
                api_interface: group[2].clone(),
                geolocation,
                node_urls,
            })
        })
        .collect()
}

pub async fn resolve_endpoints(cli: &Cli) -> eyre::Result<Vec<RpcProviderEndpoint>> {
    if !cli.endpoints.is_empty() {
        return parse_endpoint_groups(&cli.endpoints, cli.geolocation);
    }
    let Some(path) = &cli.endpoints_file else {
        bail!("no endpoints given; pass endpoint groups or --endpoints-file");
    };
    let text = tokio::fs::read_to_string(path)
        .await
        .wrap_err_with(|| format!("read endpoints file {}", path.display()))?;
    parse_endpoint_file(&text).wrap_err_with(|| format!("load endpoints file {}", path.display()))
}

// ==============================================================================
// Chain Specs
// ==============================================================================

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SpecFile {
    Many(Vec<ChainSpec>),
    One(ChainSpec),
}

/// Parse a spec file holding one spec or a list of them. `.json` files are
/// read as JSON, anything else as YAML.
pub fn parse_spec_file(path: &Path, text: &str) -> eyre::Result<Vec<ChainSpec>> {
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let file: SpecFile = if is_json {
        serde_json::from_str(text).wrap_err("parse JSON chain spec")?
    } else {
        serde_yaml::from_str(text).wrap_err("parse YAML chain spec")?
    };
    Ok(match file {
        SpecFile::Many(specs) => specs,
        SpecFile::One(spec) => vec![spec],
    })
}

pub async fn load_specs(paths: &[PathBuf]) -> eyre::Result<Vec<ChainSpec>> {
    let mut specs = Vec::new();
    for path in paths {
        let text = tokio::fs::read_to_string(path)
            .await
            .wrap_err_with(|| format!("read chain spec {}", path.display()))?;
        let loaded = parse_spec_file(path, &text)
            .wrap_err_with(|| format!("load chain spec {}", path.display()))?;
        for spec in &loaded {
            tracing::info!(chain = %spec.index, path = %path.display(), "loaded chain spec");
        }
        specs.extend(loaded);
    }
    Ok(specs)
}

// ==============================================================================
// Provider Settings
// ==============================================================================

pub fn provider_config(cli: &Cli, endpoints: Vec<RpcProviderEndpoint>) -> ProviderConfig {
    ProviderConfig {
        endpoints,
        identity: cli
            .identity
            .clone()
            .map(|address| ProviderIdentity { address }),
        parallel_connections: cli.parallel_connections,
        reward_storage_path: cli.reward_storage_path.clone(),
        reward_ttl: Duration::from_secs(cli.reward_ttl_secs),
        snapshot_threshold: cli.snapshot_threshold,
        snapshot_timeout: Duration::from_secs(cli.snapshot_timeout_secs),
        shard_id: cli.shard_id,
        health_check: HealthCheckConfig {
            enabled: !cli.disable_health_check,
            interval: Duration::from_secs(cli.health_check_interval_secs),
        },
        metrics_interval: Duration::from_secs(cli.metrics_interval_secs),
        stickiness_header: cli.stickiness_header.clone(),
        spec_validation_interval: Duration::from_secs(cli.spec_validation_interval_secs),
        retry_backoff_unit: Duration::from_millis(cli.retry_backoff_ms),
        max_retry_attempts: cli.max_retry_attempts,
        shutdown_grace: Duration::from_secs(cli.shutdown_grace_secs),
        ..ProviderConfig::default()
    }
}

pub fn chain_params(cli: &Cli) -> LocalChainParams {
    LocalChainParams {
        block_memory_size: cli.block_memory_size,
        epoch_duration: Duration::from_secs(cli.epoch_duration_secs),
        ..LocalChainParams::default()
    }
}
