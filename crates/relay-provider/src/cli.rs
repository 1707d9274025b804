use std::path::PathBuf;

use clap::Parser;

/// Relay provider: serves chain RPC endpoints to relay consumers.
///
/// Endpoints come either from positional groups of
/// `ADDRESS CHAIN_ID API_INTERFACE NODE_URLS` (node urls comma-separated)
/// or from a YAML file given with `--endpoints-file`.
#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    /// Endpoint groups: ADDRESS CHAIN_ID API_INTERFACE NODE_URLS, repeated.
    #[arg(value_name = "ENDPOINT")]
    pub endpoints: Vec<String>,

    /// YAML file listing endpoints. Ignored when positional endpoints are given.
    #[arg(long, env = "RELAY_PROVIDER_ENDPOINTS_FILE")]
    pub endpoints_file: Option<PathBuf>,

    /// Chain spec files, JSON or YAML (repeatable).
    #[arg(long = "spec", env = "RELAY_PROVIDER_SPECS", value_delimiter = ',')]
    pub specs: Vec<PathBuf>,

    /// Provider address relays and rewards are accounted to.
    #[arg(long, env = "RELAY_PROVIDER_IDENTITY")]
    pub identity: Option<String>,

    /// Geolocation assigned to positional endpoints.
    #[arg(long, default_value = "1")]
    pub geolocation: u64,

    /// Concurrent requests per endpoint towards its nodes.
    #[arg(long, default_value = "4")]
    pub parallel_connections: usize,

    /// Directory for reward proof snapshots. If omitted, proofs are in-memory only.
    #[arg(long, env = "RELAY_PROVIDER_REWARD_STORAGE")]
    pub reward_storage_path: Option<PathBuf>,

    /// Seconds a relay proof is kept before it expires.
    #[arg(long, default_value = "86400")]
    pub reward_ttl_secs: u64,

    /// Unsaved proofs that trigger a reward snapshot.
    #[arg(long, default_value = "1000")]
    pub snapshot_threshold: usize,

    /// Maximum seconds between reward snapshots while proofs are unsaved.
    #[arg(long, default_value = "60")]
    pub snapshot_timeout_secs: u64,

    #[arg(long, default_value = "0")]
    pub shard_id: u32,

    /// Disable the per-endpoint node health monitor.
    #[arg(long)]
    pub disable_health_check: bool,

    #[arg(long, default_value = "300")]
    pub health_check_interval_secs: u64,

    /// Seconds between metrics log lines.
    #[arg(long, default_value = "60")]
    pub metrics_interval_secs: u64,

    /// Request header whose value pins a consumer to one node.
    #[arg(long, default_value = relay_core::config::DEFAULT_STICKINESS_HEADER)]
    pub stickiness_header: String,

    #[arg(long, default_value = "1800")]
    pub spec_validation_interval_secs: u64,

    /// Backoff unit for retrying failed endpoints; attempt n waits n units.
    #[arg(long, default_value = "1000")]
    pub retry_backoff_ms: u64,

    /// Give up on failed endpoints after this many retries (default: never).
    #[arg(long)]
    pub max_retry_attempts: Option<u32>,

    /// Seconds each listener gets to drain on shutdown.
    #[arg(long, default_value = "10")]
    pub shutdown_grace_secs: u64,

    /// Local epoch length in seconds.
    #[arg(long, default_value = "900")]
    pub epoch_duration_secs: u64,

    /// Epochs a consumer session stays valid.
    #[arg(long, default_value = "3")]
    pub block_memory_size: u64,
}
