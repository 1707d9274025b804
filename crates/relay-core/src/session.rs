use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::RelayError;
use crate::state::EpochUpdatable;
use crate::types::{RelayRequest, RpcEndpoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SessionState {
    epoch: u64,
    last_relay_num: u64,
    compute_units: u64,
}

/// Consumer sessions of one endpoint.
///
/// A session is valid for `block_memory_size` epochs after the epoch it was
/// opened in. Relay numbers within a session must strictly increase.
pub struct ProviderSessionManager {
    endpoint: RpcEndpoint,
    block_memory_size: u64,
    current_epoch: AtomicU64,
    sessions: Mutex<HashMap<(String, u64), SessionState>>,
}

impl ProviderSessionManager {
    pub fn new(endpoint: RpcEndpoint, block_memory_size: u64, current_epoch: u64) -> Self {
        Self {
            endpoint,
            block_memory_size,
            current_epoch: AtomicU64::new(current_epoch),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn endpoint(&self) -> &RpcEndpoint {
        &self.endpoint
    }

    pub fn current_epoch(&self) -> u64 {
        self.current_epoch.load(Ordering::SeqCst)
    }

    pub fn is_epoch_valid(&self, epoch: u64) -> bool {
        let current = self.current_epoch();
        epoch <= current && epoch.saturating_add(self.block_memory_size) >= current
    }

    /// Admit a relay: its epoch must be in the memory window and its relay
    /// number must be new for the session.
    pub async fn accept_relay(&self, request: &RelayRequest) -> Result<(), RelayError> {
        if !self.is_epoch_valid(request.epoch) {
            return Err(RelayError::Session(format!(
                "epoch {} outside the window ending at {}",
                request.epoch,
                self.current_epoch()
            )));
        }

        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .entry((request.consumer.clone(), request.session_id))
            .or_insert(SessionState {
                epoch: request.epoch,
                last_relay_num: 0,
                compute_units: 0,
            });
        if session.epoch != request.epoch {
            return Err(RelayError::Session(format!(
                "session {} belongs to epoch {}",
                request.session_id, session.epoch
            )));
        }
        if request.relay_num <= session.last_relay_num {
            return Err(RelayError::Session(format!(
                "relay number {} already used (last {})",
                request.relay_num, session.last_relay_num
            )));
        }
        session.last_relay_num = request.relay_num;
        Ok(())
    }

    pub async fn add_compute_units(&self, consumer: &str, session_id: u64, compute_units: u64) {
        if let Some(session) = self
            .sessions
            .lock()
            .await
            .get_mut(&(consumer.to_owned(), session_id))
        {
            session.compute_units += compute_units;
        }
    }

    pub async fn session_compute_units(&self, consumer: &str, session_id: u64) -> Option<u64> {
        self.sessions
            .lock()
            .await
            .get(&(consumer.to_owned(), session_id))
            .map(|s| s.compute_units)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[async_trait]
impl EpochUpdatable for ProviderSessionManager {
    async fn update_epoch(&self, epoch: u64) {
        self.current_epoch.store(epoch, Ordering::SeqCst);
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.epoch.saturating_add(self.block_memory_size) >= epoch);
        debug!(
            endpoint = %self.endpoint,
            epoch,
            pruned = before - sessions.len(),
            "session epoch updated"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(epoch: u64, relay_num: u64) -> RelayRequest {
        RelayRequest {
            chain_id: "ETH1".into(),
            api_interface: "jsonrpc".into(),
            consumer: "consumer-1".into(),
            session_id: 7,
            epoch,
            relay_num,
            data: json!({"method": "eth_blockNumber"}),
            addon: String::new(),
        }
    }

    fn manager() -> ProviderSessionManager {
        ProviderSessionManager::new(RpcEndpoint::new("ETH1", "jsonrpc"), 2, 10)
    }

    #[tokio::test]
    async fn epoch_window_bounds_accepted_relays() {
        let sessions = manager();
        assert!(sessions.accept_relay(&request(10, 1)).await.is_ok());
        assert!(sessions.is_epoch_valid(8));
        assert!(!sessions.is_epoch_valid(7));
        assert!(matches!(
            sessions.accept_relay(&request(11, 1)).await,
            Err(RelayError::Session(_))
        ));
    }

    #[tokio::test]
    async fn replayed_relay_numbers_are_rejected() {
        let sessions = manager();
        sessions.accept_relay(&request(10, 1)).await.unwrap();
        sessions.accept_relay(&request(10, 2)).await.unwrap();
        assert!(sessions.accept_relay(&request(10, 2)).await.is_err());
        assert!(sessions.accept_relay(&request(10, 1)).await.is_err());
    }

    #[tokio::test]
    async fn epoch_update_prunes_expired_sessions() {
        let sessions = manager();
        sessions.accept_relay(&request(9, 1)).await.unwrap();
        sessions.add_compute_units("consumer-1", 7, 30).await;
        assert_eq!(sessions.session_compute_units("consumer-1", 7).await, Some(30));

        sessions.update_epoch(11).await;
        assert_eq!(sessions.session_count().await, 1);
        sessions.update_epoch(12).await;
        assert_eq!(sessions.session_count().await, 0);
    }
}
