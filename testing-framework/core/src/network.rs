use std::future::Future;

use testing_framework_config::{ChainId, Dialect, eth_chain_id, native_chain_id};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Dialect and chain identifier transactions are currently signed against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActiveContext {
    pub dialect: Dialect,
    pub chain_id: ChainId,
}

/// The single process-wide protocol context.
///
/// Only [`NetworkContext::with_context`] mutates it, and only while holding
/// the guard.
#[derive(Debug)]
pub struct NetworkContext {
    network: String,
    active: Mutex<ActiveContext>,
}

impl NetworkContext {
    #[must_use]
    pub fn new(network: impl Into<String>, dialect: Dialect) -> Self {
        let network = network.into();
        let chain_id = Self::derive(&network, dialect, 0);
        Self {
            network,
            active: Mutex::new(ActiveContext { dialect, chain_id }),
        }
    }

    #[must_use]
    pub fn network(&self) -> &str {
        &self.network
    }

    /// Chain identifier for `dialect` on `shard` of this network.
    #[must_use]
    pub fn chain_id(&self, dialect: Dialect, shard: u32) -> ChainId {
        Self::derive(&self.network, dialect, shard)
    }

    fn derive(network: &str, dialect: Dialect, shard: u32) -> ChainId {
        match dialect {
            Dialect::Native => native_chain_id(network),
            Dialect::Eth => eth_chain_id(network, shard),
        }
    }

    pub async fn current(&self) -> ActiveContext {
        *self.active.lock().await
    }

    /// Runs `operation` with `dialect`/`chain_id` active, then restores the
    /// previous context on every exit path, including cancellation and panic.
    ///
    /// Calls are serialized. Calling `current` or `with_context` from inside
    /// `operation` deadlocks; the active context is passed in instead.
    pub async fn with_context<F, Fut, T>(&self, dialect: Dialect, chain_id: ChainId, operation: F) -> T
    where
        F: FnOnce(ActiveContext) -> Fut,
        Fut: Future<Output = T>,
    {
        let guard = self.active.lock().await;
        let previous = *guard;
        let mut restore = Restore { guard, previous };

        let active = ActiveContext { dialect, chain_id };
        *restore.guard = active;
        debug!(from = %previous.chain_id, to = %chain_id, %dialect, "network context switched");

        operation(active).await
    }
}

struct Restore<'a> {
    guard: MutexGuard<'a, ActiveContext>,
    previous: ActiveContext,
}

impl Drop for Restore<'_> {
    fn drop(&mut self) {
        *self.guard = self.previous;
        debug!(chain_id = %self.previous.chain_id, "network context restored");
    }
}
