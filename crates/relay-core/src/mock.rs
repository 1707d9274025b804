//! In-memory stand-ins for nodes, fetchers and listeners.
//!
//! `MockRouter` answers the handful of Ethereum-style methods the shared test
//! spec uses. `MockFetcher` serves a movable chain head whose block hashes are
//! `0xhash{height}`. `MockBackend` hands both out to the orchestrator together
//! with `MockListener`s that record their receivers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};

use crate::chain::{ChainFetcher, ChainParser, ChainRouter, FetcherMode, NodeReply};
use crate::error::CoreError;
use crate::listener::{Listener, RelayReceiver};
use crate::provider::ProviderBackend;
use crate::types::{NetworkAddress, RpcEndpoint, RpcProviderEndpoint};

fn mock_hash(height: i64) -> String {
    format!("0xhash{height}")
}

// ==============================================================================
// Mock Router
// ==============================================================================

pub struct MockRouter {
    latest: i64,
    chain_id: String,
    unreachable: bool,
    requests: Mutex<Vec<(String, Option<String>)>>,
}

impl MockRouter {
    pub fn builder() -> MockRouterBuilder {
        MockRouterBuilder {
            latest: 100,
            chain_id: "0x1".into(),
            unreachable: false,
        }
    }

    /// `(method, stickiness)` of every request received so far.
    pub fn requests(&self) -> Vec<(String, Option<String>)> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn answer(&self, body: &JsonValue) -> JsonValue {
        let method = body.get("method").and_then(JsonValue::as_str).unwrap_or_default();
        let params = body.get("params").cloned().unwrap_or(JsonValue::Null);
        let result = match method {
            "eth_blockNumber" => json!(format!("{:#x}", self.latest)),
            "eth_chainId" => json!(self.chain_id),
            "eth_getBlockByNumber" => {
                let height = params
                    .get(0)
                    .and_then(JsonValue::as_str)
                    .and_then(|text| i64::from_str_radix(text.trim_start_matches("0x"), 16).ok())
                    .unwrap_or(self.latest);
                json!({ "number": format!("{height:#x}"), "hash": mock_hash(height) })
            }
            _ => json!({ "method": method, "params": params }),
        };
        json!({ "jsonrpc": "2.0", "id": body.get("id").cloned().unwrap_or(json!(1)), "result": result })
    }
}

pub struct MockRouterBuilder {
    latest: i64,
    chain_id: String,
    unreachable: bool,
}

impl MockRouterBuilder {
    pub fn with_latest_block(mut self, latest: i64) -> Self {
        self.latest = latest;
        self
    }

    pub fn with_chain_id(mut self, chain_id: &str) -> Self {
        self.chain_id = chain_id.into();
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    pub fn build(self) -> MockRouter {
        MockRouter {
            latest: self.latest,
            chain_id: self.chain_id,
            unreachable: self.unreachable,
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ChainRouter for MockRouter {
    async fn send_node_msg(
        &self,
        body: &JsonValue,
        _addon: &str,
        stickiness: Option<&str>,
    ) -> Result<NodeReply, CoreError> {
        if self.unreachable {
            return Err(CoreError::Connectivity("mock node unreachable".into()));
        }
        let method = body
            .get("method")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_owned();
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((method, stickiness.map(str::to_owned)));
        Ok(NodeReply {
            data: self.answer(body),
            node_url: "http://mock-node".into(),
        })
    }
}

// ==============================================================================
// Mock Fetcher
// ==============================================================================

#[derive(Default)]
struct FetcherState {
    latest: AtomicI64,
    unreachable: AtomicBool,
    latest_calls: AtomicUsize,
}

pub struct MockFetcher {
    endpoint: RpcEndpoint,
    state: Arc<FetcherState>,
    /// Validations left to fail before the fetcher passes. Shared per chain
    /// by `MockBackend`.
    validate_failures: Arc<AtomicUsize>,
    validate_delay: Duration,
}

/// Moves a [`MockFetcher`]'s chain head after it has been handed out.
#[derive(Clone)]
pub struct MockFetcherHandle {
    state: Arc<FetcherState>,
}

impl MockFetcher {
    pub fn new(chain_id: &str, latest: i64) -> (Self, MockFetcherHandle) {
        Self::for_endpoint(
            RpcEndpoint::new(chain_id, "jsonrpc"),
            latest,
            Arc::new(AtomicUsize::new(0)),
            Duration::ZERO,
        )
    }

    fn for_endpoint(
        endpoint: RpcEndpoint,
        latest: i64,
        validate_failures: Arc<AtomicUsize>,
        validate_delay: Duration,
    ) -> (Self, MockFetcherHandle) {
        let state = Arc::new(FetcherState::default());
        state.latest.store(latest, Ordering::SeqCst);
        let handle = MockFetcherHandle {
            state: Arc::clone(&state),
        };
        (
            Self {
                endpoint,
                state,
                validate_failures,
                validate_delay,
            },
            handle,
        )
    }

    fn check_reachable(&self) -> Result<(), CoreError> {
        if self.state.unreachable.load(Ordering::SeqCst) {
            return Err(CoreError::Connectivity(format!("{} node unreachable", self.endpoint)));
        }
        Ok(())
    }
}

impl MockFetcherHandle {
    pub fn set_latest(&self, latest: i64) {
        self.state.latest.store(latest, Ordering::SeqCst);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Calls to `fetch_latest_block_num`, failed ones included.
    pub fn latest_calls(&self) -> usize {
        self.state.latest_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainFetcher for MockFetcher {
    async fn validate(&self) -> Result<(), CoreError> {
        if !self.validate_delay.is_zero() {
            tokio::time::sleep(self.validate_delay).await;
        }
        self.check_reachable()?;
        let consumed = self
            .validate_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if consumed.is_ok() {
            return Err(CoreError::Connectivity(format!("{} validation refused", self.endpoint)));
        }
        Ok(())
    }

    async fn fetch_latest_block_num(&self) -> Result<i64, CoreError> {
        self.state.latest_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;
        Ok(self.state.latest.load(Ordering::SeqCst))
    }

    async fn fetch_block_hash_by_num(&self, block: i64) -> Result<String, CoreError> {
        self.check_reachable()?;
        Ok(mock_hash(block))
    }

    fn endpoint(&self) -> &RpcEndpoint {
        &self.endpoint
    }
}

// ==============================================================================
// Mock Listener
// ==============================================================================

pub struct MockListener {
    address: NetworkAddress,
    receivers: tokio::sync::Mutex<HashMap<RpcEndpoint, Arc<dyn RelayReceiver>>>,
    shut_down: AtomicBool,
}

impl MockListener {
    pub fn new(address: &NetworkAddress) -> Self {
        Self {
            address: address.clone(),
            receivers: tokio::sync::Mutex::new(HashMap::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    pub async fn receiver(&self, endpoint: &RpcEndpoint) -> Option<Arc<dyn RelayReceiver>> {
        self.receivers.lock().await.get(endpoint).cloned()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Listener for MockListener {
    fn address(&self) -> &NetworkAddress {
        &self.address
    }

    async fn register_receiver(
        &self,
        receiver: Arc<dyn RelayReceiver>,
        endpoint: &RpcEndpoint,
    ) -> Result<(), CoreError> {
        let mut receivers = self.receivers.lock().await;
        if receivers.contains_key(endpoint) {
            return Err(CoreError::Registry(format!("{endpoint} already registered")));
        }
        receivers.insert(endpoint.clone(), receiver);
        Ok(())
    }

    async fn receiver_count(&self) -> usize {
        self.receivers.lock().await.len()
    }

    async fn shutdown(&self, _grace: Duration) -> Result<(), CoreError> {
        self.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ==============================================================================
// Mock Backend
// ==============================================================================

/// Builds mock routers, fetchers and listeners for the orchestrator.
#[derive(Default)]
pub struct MockBackend {
    latest: i64,
    validate_failures: Mutex<HashMap<String, Arc<AtomicUsize>>>,
    validate_delay: Duration,
    listener_failures: Mutex<HashMap<NetworkAddress, usize>>,
    listeners: Mutex<Vec<Arc<MockListener>>>,
    /// Chain id and time of every router request, i.e. every setup that got
    /// past the parser steps.
    setup_starts: Mutex<Vec<(String, tokio::time::Instant)>>,
}

impl MockBackend {
    pub fn new(latest: i64) -> Self {
        Self {
            latest,
            ..Self::default()
        }
    }

    /// Make the first `times` fetcher validations of `chain_id` fail with a
    /// connectivity error.
    pub fn failing_validations(self, chain_id: &str, times: usize) -> Self {
        self.failures(chain_id).store(times, Ordering::SeqCst);
        self
    }

    /// Every fetcher validation takes `delay` before answering.
    pub fn with_validation_delay(mut self, delay: Duration) -> Self {
        self.validate_delay = delay;
        self
    }

    /// Make the first `times` listener creations on `address` fail.
    pub fn failing_listeners(self, address: &str, times: usize) -> Self {
        self.listener_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(NetworkAddress::new(address), times);
        self
    }

    pub fn setup_starts(&self) -> Vec<(String, tokio::time::Instant)> {
        self.setup_starts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn failures_left(&self, chain_id: &str) -> usize {
        self.failures(chain_id).load(Ordering::SeqCst)
    }

    pub fn listeners(&self) -> Vec<Arc<MockListener>> {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn failures(&self, chain_id: &str) -> Arc<AtomicUsize> {
        Arc::clone(
            self.validate_failures
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(chain_id.to_owned())
                .or_default(),
        )
    }
}

#[async_trait]
impl ProviderBackend for MockBackend {
    fn chain_router(
        &self,
        endpoint: &RpcProviderEndpoint,
        _parallel_connections: usize,
    ) -> Result<Arc<dyn ChainRouter>, CoreError> {
        self.setup_starts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((endpoint.chain_id.clone(), tokio::time::Instant::now()));
        Ok(Arc::new(MockRouter::builder().with_latest_block(self.latest).build()))
    }

    fn chain_fetcher(
        &self,
        endpoint: &RpcProviderEndpoint,
        _router: Arc<dyn ChainRouter>,
        _parser: Arc<ChainParser>,
        _mode: FetcherMode,
    ) -> Arc<dyn ChainFetcher> {
        let (fetcher, _handle) = MockFetcher::for_endpoint(
            endpoint.key(),
            self.latest,
            self.failures(&endpoint.chain_id),
            self.validate_delay,
        );
        Arc::new(fetcher)
    }

    async fn listener(
        &self,
        address: &NetworkAddress,
        _stickiness_header: &str,
    ) -> Result<Arc<dyn Listener>, CoreError> {
        if let Some(left) = self
            .listener_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(address)
            .filter(|left| **left > 0)
        {
            *left -= 1;
            return Err(CoreError::Io(std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                format!("{address} in use"),
            )));
        }
        let listener = Arc::new(MockListener::new(address));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&listener));
        Ok(listener)
    }
}
