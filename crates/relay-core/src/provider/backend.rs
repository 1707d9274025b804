use std::sync::Arc;

use async_trait::async_trait;

use crate::chain::{ChainFetcher, ChainParser, ChainRouter, FetcherMode, HttpChainRouter, NodeChainFetcher};
use crate::error::CoreError;
use crate::listener::{Listener, ProviderListener};
use crate::types::{NetworkAddress, RpcProviderEndpoint};

/// Builds the network-facing pieces of an endpoint: the router towards its
/// nodes, the fetcher reading chain state through that router, and the
/// listener consumers connect to.
#[async_trait]
pub trait ProviderBackend: Send + Sync {
    fn chain_router(
        &self,
        endpoint: &RpcProviderEndpoint,
        parallel_connections: usize,
    ) -> Result<Arc<dyn ChainRouter>, CoreError>;

    fn chain_fetcher(
        &self,
        endpoint: &RpcProviderEndpoint,
        router: Arc<dyn ChainRouter>,
        parser: Arc<ChainParser>,
        mode: FetcherMode,
    ) -> Arc<dyn ChainFetcher>;

    async fn listener(
        &self,
        address: &NetworkAddress,
        stickiness_header: &str,
    ) -> Result<Arc<dyn Listener>, CoreError>;
}

/// reqwest routers, node fetchers and axum listeners.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpBackend;

#[async_trait]
impl ProviderBackend for HttpBackend {
    fn chain_router(
        &self,
        endpoint: &RpcProviderEndpoint,
        parallel_connections: usize,
    ) -> Result<Arc<dyn ChainRouter>, CoreError> {
        Ok(Arc::new(HttpChainRouter::new(endpoint, parallel_connections)?))
    }

    fn chain_fetcher(
        &self,
        endpoint: &RpcProviderEndpoint,
        router: Arc<dyn ChainRouter>,
        parser: Arc<ChainParser>,
        mode: FetcherMode,
    ) -> Arc<dyn ChainFetcher> {
        Arc::new(NodeChainFetcher::new(endpoint.key(), router, parser, mode))
    }

    async fn listener(
        &self,
        address: &NetworkAddress,
        stickiness_header: &str,
    ) -> Result<Arc<dyn Listener>, CoreError> {
        Ok(Arc::new(ProviderListener::bind(address, stickiness_header).await?))
    }
}
