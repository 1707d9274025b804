//! HTTP listener shared by every endpoint bound to one network address.
//!
//! A [`ProviderListener`] serves `POST /relay` and `GET /health` with axum and
//! dispatches each relay to the [`RelayReceiver`] registered for the
//! request's `(chain_id, api_interface)`.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{CoreError, RelayError};
use crate::types::{NetworkAddress, RelayReply, RelayRequest, RpcEndpoint};

/// Serves relays for one `(chain_id, api_interface)`.
#[async_trait]
pub trait RelayReceiver: Send + Sync {
    async fn relay(
        &self,
        request: RelayRequest,
        stickiness: Option<String>,
    ) -> Result<RelayReply, RelayError>;
}

#[async_trait]
pub trait Listener: Send + Sync {
    fn address(&self) -> &NetworkAddress;

    /// Fails if a receiver is already registered for `endpoint`.
    async fn register_receiver(
        &self,
        receiver: Arc<dyn RelayReceiver>,
        endpoint: &RpcEndpoint,
    ) -> Result<(), CoreError>;

    async fn receiver_count(&self) -> usize;

    /// Stop accepting connections and wait up to `grace` for in-flight
    /// requests to finish.
    async fn shutdown(&self, grace: Duration) -> Result<(), CoreError>;
}

// ==============================================================================
// Error Responses
// ==============================================================================

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) | Self::Parse(_) => StatusCode::BAD_REQUEST,
            Self::UnknownEndpoint(_) => StatusCode::NOT_FOUND,
            Self::Session(_) => StatusCode::FORBIDDEN,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

// ==============================================================================
// Router
// ==============================================================================

struct ListenerState {
    receivers: RwLock<HashMap<RpcEndpoint, Arc<dyn RelayReceiver>>>,
    stickiness_header: HeaderName,
}

type SharedState = Arc<ListenerState>;

fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/relay", post(relay))
        .route("/health", get(health))
        .with_state(state)
}

async fn relay(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(request): Json<RelayRequest>,
) -> Result<Json<RelayReply>, RelayError> {
    let endpoint = request.endpoint();
    let receiver = state
        .receivers
        .read()
        .await
        .get(&endpoint)
        .cloned()
        .ok_or_else(|| RelayError::UnknownEndpoint(endpoint.to_string()))?;

    let stickiness = headers
        .get(&state.stickiness_header)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    receiver.relay(request, stickiness).await.map(Json)
}

async fn health(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let mut endpoints: Vec<String> = state
        .receivers
        .read()
        .await
        .keys()
        .map(ToString::to_string)
        .collect();
    endpoints.sort();
    Json(serde_json::json!({ "status": "ok", "endpoints": endpoints }))
}

// ==============================================================================
// Provider Listener
// ==============================================================================

pub struct ProviderListener {
    address: NetworkAddress,
    local_addr: SocketAddr,
    state: SharedState,
    shutdown: CancellationToken,
    server: Mutex<Option<JoinHandle<io::Result<()>>>>,
}

impl ProviderListener {
    /// Bind `address` and start serving. `stickiness_header` names the
    /// request header forwarded to receivers as the stickiness key.
    pub async fn bind(address: &NetworkAddress, stickiness_header: &str) -> Result<Self, CoreError> {
        let stickiness_header = HeaderName::from_bytes(stickiness_header.as_bytes()).map_err(|e| {
            CoreError::Config(format!("invalid stickiness header {stickiness_header:?}: {e}"))
        })?;
        let listener = tokio::net::TcpListener::bind(&address.address).await?;
        let local_addr = listener.local_addr()?;

        let state = Arc::new(ListenerState {
            receivers: RwLock::new(HashMap::new()),
            stickiness_header,
        });
        let router = build_router(state.clone());
        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let server = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
        });

        info!(address = %address, local = %local_addr, "listener started");
        Ok(Self {
            address: address.clone(),
            local_addr,
            state,
            shutdown,
            server: Mutex::new(Some(server)),
        })
    }

    /// The bound socket address, useful when binding port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl Listener for ProviderListener {
    fn address(&self) -> &NetworkAddress {
        &self.address
    }

    async fn register_receiver(
        &self,
        receiver: Arc<dyn RelayReceiver>,
        endpoint: &RpcEndpoint,
    ) -> Result<(), CoreError> {
        let mut receivers = self.state.receivers.write().await;
        if receivers.contains_key(endpoint) {
            return Err(CoreError::Registry(format!(
                "{endpoint} already has a receiver on {}",
                self.address
            )));
        }
        receivers.insert(endpoint.clone(), receiver);
        debug!(address = %self.address, endpoint = %endpoint, "receiver registered");
        Ok(())
    }

    async fn receiver_count(&self) -> usize {
        self.state.receivers.read().await.len()
    }

    async fn shutdown(&self, grace: Duration) -> Result<(), CoreError> {
        self.shutdown.cancel();
        let Some(mut server) = self.server.lock().await.take() else {
            return Ok(());
        };
        match tokio::time::timeout(grace, &mut server).await {
            Ok(Ok(result)) => result.map_err(CoreError::from),
            Ok(Err(join)) => Err(CoreError::Io(io::Error::other(join))),
            Err(_) => {
                warn!(address = %self.address, ?grace, "listener did not drain in time");
                server.abort();
                Err(CoreError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("listener {} did not drain within {grace:?}", self.address),
                )))
            }
        }
    }
}
