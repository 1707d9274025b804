mod cli;
mod config;

use std::sync::Arc;

use clap::Parser;
use eyre::WrapErr;
use tokio_util::sync::CancellationToken;

use relay_core::state::LocalStateTracker;
use relay_core::{HttpBackend, RpcProvider};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .init();

    let endpoints = config::resolve_endpoints(&args)
        .await
        .wrap_err("while resolving provider endpoints")?;
    let specs = config::load_specs(&args.specs)
        .await
        .wrap_err("while loading chain specs")?;
    let provider_config = config::provider_config(&args, endpoints)
        .validate()
        .wrap_err("invalid provider configuration")?;

    tracing::info!(
        endpoints = provider_config.endpoints.len(),
        chains = ?provider_config.chain_ids(),
        specs = specs.len(),
        "starting relay provider"
    );

    let state_tracker = Arc::new(LocalStateTracker::new(specs, config::chain_params(&args)));
    let shutdown = CancellationToken::new();
    let epoch_ticker = state_tracker.spawn_epoch_ticker(shutdown.child_token());

    let provider = RpcProvider::new(provider_config, state_tracker, Arc::new(HttpBackend));
    let result = provider.start(shutdown.clone()).await;

    shutdown.cancel();
    if let Err(err) = epoch_ticker.await {
        tracing::warn!(error = %err, "epoch ticker task failed");
    }
    result.wrap_err("relay provider stopped with an error")?;

    tracing::info!("relay provider stopped");
    Ok(())
}
