use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::chain::{ChainParser, ChainRouter, ChainTracker};
use crate::error::RelayError;
use crate::listener::RelayReceiver;
use crate::metrics::ProviderMetrics;
use crate::monitor::RelaysMonitor;
use crate::rewards::{RewardServer, RewardStoreKey};
use crate::session::ProviderSessionManager;
use crate::types::{RelayProof, RelayReply, RelayRequest, RpcEndpoint};

/// Everything one serving unit needs, assembled during endpoint setup.
pub struct ServerComponents {
    pub sessions: Arc<ProviderSessionManager>,
    pub parser: Arc<ChainParser>,
    pub router: Arc<dyn ChainRouter>,
    pub tracker: Arc<ChainTracker>,
    pub rewards: Arc<RewardServer>,
    pub reward_key: RewardStoreKey,
    pub metrics: Arc<ProviderMetrics>,
    pub monitor: Option<Arc<RelaysMonitor>>,
}

/// Serves relays for one `(chain_id, api_interface)`: admit the session,
/// parse the payload, forward it to a node, then account for it.
pub struct RpcProviderServer {
    endpoint: RpcEndpoint,
    parts: ServerComponents,
}

impl RpcProviderServer {
    pub fn new(parts: ServerComponents) -> Self {
        Self {
            endpoint: parts.sessions.endpoint().clone(),
            parts,
        }
    }

    pub fn endpoint(&self) -> &RpcEndpoint {
        &self.endpoint
    }

    async fn serve(
        &self,
        request: RelayRequest,
        stickiness: Option<String>,
    ) -> Result<RelayReply, RelayError> {
        let parts = &self.parts;
        parts.sessions.accept_relay(&request).await?;
        let parsed = parts.parser.parse_relay(&request.data, &request.addon)?;

        let reply = parts
            .router
            .send_node_msg(&request.data, &parsed.addon, stickiness.as_deref())
            .await?;

        parts
            .rewards
            .save_proof(
                &parts.reward_key,
                RelayProof {
                    chain_id: request.chain_id.clone(),
                    consumer: request.consumer.clone(),
                    session_id: request.session_id,
                    epoch: request.epoch,
                    relay_num: request.relay_num,
                    compute_units: parsed.compute_units,
                },
            )
            .await?;
        parts
            .sessions
            .add_compute_units(&request.consumer, request.session_id, parsed.compute_units)
            .await;
        parts.metrics.add_relay(&self.endpoint, parsed.compute_units);
        if let Some(monitor) = &parts.monitor {
            monitor.record_activity();
        }

        let latest_block = parts.tracker.latest_block().await;
        let finalized_block_hash = if parsed.requested_block >= 0 {
            parts.tracker.block_hash(parsed.requested_block).await
        } else {
            None
        };
        debug!(
            endpoint = %self.endpoint,
            api = %parsed.api,
            cu = parsed.compute_units,
            requested_block = parsed.requested_block,
            node = %reply.node_url,
            "relay served"
        );

        Ok(RelayReply {
            data: reply.data,
            latest_block,
            requested_block: parsed.requested_block,
            finalized_block_hash,
        })
    }
}

#[async_trait]
impl RelayReceiver for RpcProviderServer {
    async fn relay(
        &self,
        request: RelayRequest,
        stickiness: Option<String>,
    ) -> Result<RelayReply, RelayError> {
        let consumer = request.consumer.clone();
        let result = self.serve(request, stickiness).await;
        if let Err(err) = &result {
            warn!(endpoint = %self.endpoint, consumer = %consumer, error = %err, "relay failed");
            self.parts.metrics.add_relay_error(&self.endpoint);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainTrackerConfig, TrackerCallbacks};
    use crate::mock::{MockFetcher, MockRouter};
    use crate::rewards::RewardServerConfig;
    use crate::state::{LocalChainParams, LocalStateTracker, SpecUpdatable};
    use crate::test_util::chain_spec;
    use serde_json::json;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct Harness {
        server: RpcProviderServer,
        router: Arc<MockRouter>,
        rewards: Arc<RewardServer>,
        metrics: Arc<ProviderMetrics>,
        shutdown: CancellationToken,
    }

    async fn harness() -> Harness {
        let endpoint = RpcEndpoint::new("ETH1", "jsonrpc");
        let parser = Arc::new(ChainParser::new("jsonrpc").unwrap());
        parser.set_spec(Arc::new(chain_spec("ETH1"))).unwrap();

        let shutdown = CancellationToken::new();
        let (fetcher, _handle) = MockFetcher::new("ETH1", 20);
        let tracker = ChainTracker::start(
            Arc::new(fetcher),
            ChainTrackerConfig::from_stats(&parser.chain_block_stats().unwrap()),
            TrackerCallbacks::default(),
            shutdown.clone(),
        )
        .await
        .unwrap();

        let state = Arc::new(LocalStateTracker::new(vec![], LocalChainParams::default()));
        let rewards = Arc::new(RewardServer::new(
            RewardServerConfig {
                storage_path: None,
                ttl: Duration::from_secs(3600),
                snapshot_threshold: 100,
                snapshot_timeout: Duration::from_secs(60),
            },
            state,
        ));
        let reward_key = RewardStoreKey::new("ETH1", "provider-1", 0);
        rewards.add_database(&reward_key).await.unwrap();

        let router = Arc::new(MockRouter::builder().with_latest_block(20).build());
        let metrics = Arc::new(ProviderMetrics::new());
        let server = RpcProviderServer::new(ServerComponents {
            sessions: Arc::new(ProviderSessionManager::new(endpoint, 3, 1)),
            parser,
            router: router.clone(),
            tracker,
            rewards: rewards.clone(),
            reward_key,
            metrics: metrics.clone(),
            monitor: None,
        });
        Harness {
            server,
            router,
            rewards,
            metrics,
            shutdown,
        }
    }

    fn request(relay_num: u64, data: serde_json::Value) -> RelayRequest {
        RelayRequest {
            chain_id: "ETH1".into(),
            api_interface: "jsonrpc".into(),
            consumer: "consumer-1".into(),
            session_id: 7,
            epoch: 1,
            relay_num,
            data,
            addon: String::new(),
        }
    }

    #[tokio::test]
    async fn relay_is_forwarded_and_accounted() {
        let h = harness().await;
        let data = json!({"jsonrpc": "2.0", "id": 1, "method": "eth_getBlockByNumber", "params": ["0x12", false]});
        let reply = h
            .server
            .relay(request(1, data), Some("sticky".into()))
            .await
            .unwrap();

        assert_eq!(reply.requested_block, 18);
        assert_eq!(reply.latest_block, 20);
        assert_eq!(reply.finalized_block_hash.as_deref(), Some("0xhash18"));
        assert_eq!(reply.data["result"]["hash"], "0xhash18");
        assert_eq!(
            h.router.requests(),
            vec![("eth_getBlockByNumber".to_owned(), Some("sticky".to_owned()))]
        );

        let proofs = h.rewards.proofs(&RewardStoreKey::new("ETH1", "provider-1", 0)).await;
        assert_eq!(proofs.len(), 1);
        assert_eq!(proofs[0].compute_units, 20);
        let snapshot = h.metrics.snapshot();
        assert_eq!(snapshot.relays, 1);
        assert_eq!(snapshot.compute_units, 20);
        h.shutdown.cancel();
    }

    #[tokio::test]
    async fn replayed_relay_is_rejected_and_counted() {
        let h = harness().await;
        let data = json!({"jsonrpc": "2.0", "id": 1, "method": "eth_blockNumber", "params": []});
        let reply = h.server.relay(request(1, data.clone()), None).await.unwrap();
        assert_eq!(reply.requested_block, crate::parser::LATEST_BLOCK);
        assert_eq!(reply.finalized_block_hash, None);

        let err = h.server.relay(request(1, data), None).await.unwrap_err();
        assert!(matches!(err, RelayError::Session(_)));
        assert_eq!(h.metrics.snapshot().relay_errors, 1);
        assert_eq!(h.router.requests().len(), 1);
        h.shutdown.cancel();
    }

    #[tokio::test]
    async fn unsupported_api_never_reaches_the_node() {
        let h = harness().await;
        let data = json!({"jsonrpc": "2.0", "id": 1, "method": "debug_traceCall", "params": []});
        let err = h.server.relay(request(1, data), None).await.unwrap_err();
        assert!(matches!(err, RelayError::BadRequest(_)));
        assert!(h.router.requests().is_empty());
        h.shutdown.cancel();
    }
}
