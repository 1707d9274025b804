use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::header;
use tokio::sync::Semaphore;
use tracing::{debug, trace};

use crate::error::CoreError;
use crate::types::{NodeUrl, RpcProviderEndpoint};

/// A node's answer to a forwarded request.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeReply {
    pub data: serde_json::Value,
    pub node_url: String,
}

/// Forwards chain RPC payloads to the upstream nodes of one endpoint.
#[async_trait]
pub trait ChainRouter: Send + Sync {
    /// Send `body` to a node that serves `addon`. Requests carrying the same
    /// `stickiness` key land on the same node while the node set is stable.
    async fn send_node_msg(
        &self,
        body: &serde_json::Value,
        addon: &str,
        stickiness: Option<&str>,
    ) -> Result<NodeReply, CoreError>;
}

// ==============================================================================
// HTTP Router
// ==============================================================================

pub struct HttpChainRouter {
    client: reqwest::Client,
    nodes: Vec<NodeUrl>,
    next: AtomicUsize,
    permits: Arc<Semaphore>,
}

impl HttpChainRouter {
    /// `parallel_connections` bounds in-flight requests across all nodes.
    pub fn new(endpoint: &RpcProviderEndpoint, parallel_connections: usize) -> Result<Self, CoreError> {
        if endpoint.node_urls.is_empty() {
            return Err(CoreError::Config(format!("endpoint {endpoint} has no node urls")));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(parallel_connections.max(1))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| CoreError::Config(format!("build http client: {e}")))?;

        Ok(Self {
            client,
            nodes: endpoint.node_urls.clone(),
            next: AtomicUsize::new(rand::thread_rng().gen_range(0..endpoint.node_urls.len())),
            permits: Arc::new(Semaphore::new(parallel_connections.max(1))),
        })
    }

    fn pick_node(&self, addon: &str, stickiness: Option<&str>) -> Result<&NodeUrl, CoreError> {
        let candidates: Vec<&NodeUrl> = self.nodes.iter().filter(|n| n.supports(addon)).collect();
        if candidates.is_empty() {
            return Err(CoreError::Spec(format!("no node url supports addon {addon:?}")));
        }
        let slot = match stickiness {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                hasher.finish() as usize
            }
            None => self.next.fetch_add(1, Ordering::Relaxed),
        };
        Ok(candidates[slot % candidates.len()])
    }
}

#[async_trait]
impl ChainRouter for HttpChainRouter {
    async fn send_node_msg(
        &self,
        body: &serde_json::Value,
        addon: &str,
        stickiness: Option<&str>,
    ) -> Result<NodeReply, CoreError> {
        let node = self.pick_node(addon, stickiness)?;
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| CoreError::Connectivity(format!("router closed: {e}")))?;

        debug!(node = %node.url, addon, "forwarding request");
        let response = self
            .client
            .post(&node.url)
            .header(header::CONTENT_TYPE, "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| CoreError::Connectivity(format!("{}: {e}", node.url)))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CoreError::Connectivity(format!("{}: {e}", node.url)))?;
        trace!(node = %node.url, %status, body = %text, "node response");

        let data: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
            CoreError::Rpc(format!("{} answered {status} with an undecodable body: {e}", node.url))
        })?;
        Ok(NodeReply {
            data,
            node_url: node.url.clone(),
        })
    }
}

/// Extract the `result` member of a JSON-RPC response as raw JSON bytes.
pub fn jsonrpc_result_bytes(reply: &serde_json::Value) -> Result<Vec<u8>, CoreError> {
    if let Some(err) = reply.get("error").filter(|e| !e.is_null()) {
        return Err(CoreError::Rpc(format!("node returned error: {err}")));
    }
    match reply.get("result") {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(result) => serde_json::to_vec(result)
            .map_err(|e| CoreError::Rpc(format!("re-encode result: {e}"))),
    }
}
