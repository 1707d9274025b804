use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::CoreError;
use crate::parser::{
    parse_block_from_reply, parse_message_response, unquote_if_quoted, JsonRpcInput,
};
use crate::spec::{FunctionTag, ParseDirective};
use crate::types::RpcEndpoint;

use super::parser::ChainParser;
use super::router::{jsonrpc_result_bytes, ChainRouter};

/// Reads chain state from the endpoint's own nodes.
#[async_trait]
pub trait ChainFetcher: Send + Sync {
    /// Check the nodes against the spec. [`CoreError::Connectivity`] means a
    /// node could not be reached; [`CoreError::Spec`] means it answered but
    /// does not match the spec.
    async fn validate(&self) -> Result<(), CoreError>;

    async fn fetch_latest_block_num(&self) -> Result<i64, CoreError>;

    async fn fetch_block_hash_by_num(&self, block: i64) -> Result<String, CoreError>;

    fn endpoint(&self) -> &RpcEndpoint;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetcherMode {
    /// Verifications plus latest-block and block-hash fetching.
    Full,
    /// Only the spec verifications run during validation.
    VerificationsOnly,
}

pub struct NodeChainFetcher {
    endpoint: RpcEndpoint,
    router: Arc<dyn ChainRouter>,
    parser: Arc<ChainParser>,
    mode: FetcherMode,
}

impl NodeChainFetcher {
    pub fn new(
        endpoint: RpcEndpoint,
        router: Arc<dyn ChainRouter>,
        parser: Arc<ChainParser>,
        mode: FetcherMode,
    ) -> Self {
        Self {
            endpoint,
            router,
            parser,
            mode,
        }
    }

    pub fn mode(&self) -> FetcherMode {
        self.mode
    }

    fn directive(&self, tag: FunctionTag) -> Result<ParseDirective, CoreError> {
        self.parser.directive(tag).ok_or_else(|| {
            CoreError::Spec(format!("{} spec has no {tag:?} directive", self.endpoint))
        })
    }
}

/// Send a spec request template to a node and wrap the reply's result.
pub(crate) async fn send_template(
    router: &dyn ChainRouter,
    template: &str,
) -> Result<JsonRpcInput, CoreError> {
    let body: serde_json::Value = serde_json::from_str(template)
        .map_err(|e| CoreError::Spec(format!("invalid request template {template}: {e}")))?;
    let reply = router.send_node_msg(&body, "", None).await?;
    Ok(JsonRpcInput::from_result(jsonrpc_result_bytes(&reply.data)?))
}

pub(crate) async fn fetch_block_hash(
    router: &dyn ChainRouter,
    directive: &ParseDirective,
    block: i64,
) -> Result<String, CoreError> {
    let input = send_template(router, &directive.render(Some(block))).await?;
    let values = parse_message_response(&input, &directive.result_parsing)?;
    let hash = values
        .first()
        .map(|v| v.stringify())
        .filter(|h| !h.is_empty())
        .ok_or_else(|| CoreError::Rpc(format!("no hash returned for block {block}")))?;
    Ok(unquote_if_quoted(&hash)?.into_owned())
}

#[async_trait]
impl ChainFetcher for NodeChainFetcher {
    async fn validate(&self) -> Result<(), CoreError> {
        for verification in self.parser.verifications() {
            let input = send_template(self.router.as_ref(), &verification.function_template).await?;
            let values = parse_message_response(&input, &verification.parse).map_err(|e| {
                CoreError::Spec(format!("verification {} unparseable: {e}", verification.name))
            })?;
            let got = match values.first() {
                Some(value) => unquote_if_quoted(&value.stringify())?.into_owned(),
                None => String::new(),
            };
            let passed = if verification.expected == "*" {
                !got.is_empty()
            } else {
                got == verification.expected
            };
            if !passed {
                return Err(CoreError::Spec(format!(
                    "verification {} failed: expected {:?}, node returned {got:?}",
                    verification.name, verification.expected
                )));
            }
            debug!(endpoint = %self.endpoint, verification = %verification.name, "verification passed");
        }

        if self.mode == FetcherMode::Full {
            let latest = self.fetch_latest_block_num().await?;
            self.fetch_block_hash_by_num(latest).await?;
            info!(endpoint = %self.endpoint, latest, "chain fetcher validated");
        }
        Ok(())
    }

    async fn fetch_latest_block_num(&self) -> Result<i64, CoreError> {
        let directive = self.directive(FunctionTag::GetBlocknum)?;
        let input = send_template(self.router.as_ref(), &directive.render(None)).await?;
        Ok(parse_block_from_reply(&input, &directive.result_parsing)?)
    }

    async fn fetch_block_hash_by_num(&self, block: i64) -> Result<String, CoreError> {
        let directive = self.directive(FunctionTag::GetBlockByNum)?;
        fetch_block_hash(self.router.as_ref(), &directive, block).await
    }

    fn endpoint(&self) -> &RpcEndpoint {
        &self.endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRouter;
    use crate::state::SpecUpdatable;
    use crate::test_util::chain_spec;

    fn parser() -> Arc<ChainParser> {
        let parser = Arc::new(ChainParser::new("jsonrpc").unwrap());
        parser.set_spec(Arc::new(chain_spec("ETH1"))).unwrap();
        parser
    }

    fn fetcher(router: MockRouter, mode: FetcherMode) -> NodeChainFetcher {
        NodeChainFetcher::new(
            RpcEndpoint::new("ETH1", "jsonrpc"),
            Arc::new(router),
            parser(),
            mode,
        )
    }

    #[tokio::test]
    async fn fetches_latest_block_and_hash_through_directives() {
        let router = MockRouter::builder().with_latest_block(0x1b4).build();
        let fetcher = fetcher(router, FetcherMode::Full);
        assert_eq!(fetcher.fetch_latest_block_num().await.unwrap(), 436);
        assert_eq!(fetcher.fetch_block_hash_by_num(436).await.unwrap(), "0xhash436");
    }

    #[tokio::test]
    async fn validate_distinguishes_unreachable_from_mismatch() {
        let fetcher = fetcher(MockRouter::builder().unreachable().build(), FetcherMode::Full);
        assert!(matches!(fetcher.validate().await, Err(CoreError::Connectivity(_))));

        let router = MockRouter::builder().with_chain_id("0x5").build();
        let fetcher = self::fetcher(router, FetcherMode::VerificationsOnly);
        assert!(matches!(fetcher.validate().await, Err(CoreError::Spec(_))));
    }

    #[tokio::test]
    async fn validate_passes_on_matching_node() {
        let router = MockRouter::builder().with_latest_block(100).build();
        let fetcher = fetcher(router, FetcherMode::Full);
        fetcher.validate().await.unwrap();
    }
}
