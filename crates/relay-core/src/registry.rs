//! Shared-resource registries used during endpoint setup.
//!
//! [`PerChainRegistry`] guards each chain id with its own mutex so endpoints
//! of unrelated chains never wait on each other. [`ListenerRegistry`] has a
//! single lock, held only while a listener is looked up or created.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::CoreError;
use crate::types::NetworkAddress;

// ==============================================================================
// Per-Chain Registry
// ==============================================================================

pub struct PerChainRegistry<T: ?Sized> {
    /// Built once from the configured endpoints; only slot contents change.
    slots: HashMap<String, Mutex<Option<Arc<T>>>>,
}

impl<T: ?Sized> PerChainRegistry<T> {
    pub fn new<I, S>(chain_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            slots: chain_ids
                .into_iter()
                .map(|id| (id.into(), Mutex::new(None)))
                .collect(),
        }
    }

    pub fn chain_ids(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    /// Return the chain's resource, creating it with `create` if absent.
    ///
    /// The chain's mutex is held across `create`, so concurrent first use
    /// yields exactly one instance. The returned flag is `true` for the caller
    /// that created it. A failed `create` leaves the slot empty.
    pub async fn get_or_try_create<F, Fut, E>(
        &self,
        chain_id: &str,
        create: F,
    ) -> Result<(Arc<T>, bool), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<T>, E>>,
        E: From<CoreError>,
    {
        let slot = self.slots.get(chain_id).ok_or_else(|| {
            CoreError::Registry(format!("chain {chain_id} was not configured at startup"))
        })?;

        let mut guard = slot.lock().await;
        if let Some(existing) = guard.as_ref() {
            return Ok((Arc::clone(existing), false));
        }
        let created = create().await?;
        *guard = Some(Arc::clone(&created));
        Ok((created, true))
    }

    pub async fn get(&self, chain_id: &str) -> Option<Arc<T>> {
        match self.slots.get(chain_id) {
            Some(slot) => slot.lock().await.clone(),
            None => None,
        }
    }
}

// ==============================================================================
// Listener Registry
// ==============================================================================

pub struct ListenerRegistry<L: ?Sized> {
    listeners: Mutex<HashMap<NetworkAddress, Arc<L>>>,
}

impl<L: ?Sized> Default for ListenerRegistry<L> {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
        }
    }
}

impl<L: ?Sized> ListenerRegistry<L> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the listener for `address` or create it. Receiver
    /// registration happens on the returned listener, outside this lock.
    pub async fn get_or_try_create<F, Fut>(
        &self,
        address: &NetworkAddress,
        create: F,
    ) -> Result<(Arc<L>, bool), CoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<L>, CoreError>>,
    {
        let mut listeners = self.listeners.lock().await;
        if let Some(existing) = listeners.get(address) {
            return Ok((Arc::clone(existing), false));
        }
        let created = create().await?;
        listeners.insert(address.clone(), Arc::clone(&created));
        Ok((created, true))
    }

    pub async fn count(&self) -> usize {
        self.listeners.lock().await.len()
    }

    pub async fn snapshot(&self) -> Vec<(NetworkAddress, Arc<L>)> {
        self.listeners
            .lock()
            .await
            .iter()
            .map(|(address, listener)| (address.clone(), Arc::clone(listener)))
            .collect()
    }
}
