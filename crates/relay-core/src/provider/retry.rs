use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::types::RpcProviderEndpoint;

use super::setup::ProviderContext;

/// Retry attempts run one endpoint at a time before switching to parallel.
const SERIAL_RETRY_ATTEMPTS: u32 = 2;

/// Retry disabled endpoints until all are enabled, `shutdown` fires, or the
/// configured attempt cap is reached. Attempt `n` first waits `n` backoff
/// units. Returns the endpoints still disabled.
pub async fn retry_disabled_endpoints(
    ctx: Arc<ProviderContext>,
    mut disabled: Vec<Arc<RpcProviderEndpoint>>,
    shutdown: CancellationToken,
) -> Vec<Arc<RpcProviderEndpoint>> {
    let mut attempt: u32 = 0;
    while !disabled.is_empty() {
        attempt = attempt.saturating_add(1);
        if ctx.config.max_retry_attempts.is_some_and(|max| attempt > max) {
            warn!(
                attempts = attempt - 1,
                remaining = disabled.len(),
                "giving up on disabled endpoints"
            );
            break;
        }

        let backoff = ctx.config.retry_backoff_unit.saturating_mul(attempt);
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(backoff) => {}
        }

        let parallel = attempt > SERIAL_RETRY_ATTEMPTS;
        info!(attempt, parallel, endpoints = disabled.len(), "retrying disabled endpoints");
        let outcome = ctx.setup_all(disabled, parallel).await;
        for endpoint in &outcome.active {
            info!(endpoint = %endpoint, attempt, "endpoint recovered");
        }
        disabled = outcome
            .disabled
            .into_iter()
            .map(|(endpoint, _)| endpoint)
            .collect();
    }
    disabled
}

pub fn spawn_retry_loop(
    ctx: Arc<ProviderContext>,
    disabled: Vec<Arc<RpcProviderEndpoint>>,
    shutdown: CancellationToken,
) -> JoinHandle<Vec<Arc<RpcProviderEndpoint>>> {
    tokio::spawn(retry_disabled_endpoints(ctx, disabled, shutdown))
}
