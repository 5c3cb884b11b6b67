//! KeyedPoolRegistry: one pool per distinct configuration.
//!
//! The registry is an ordinary value owned by the application (typically
//! behind an `Arc` in its shared state). Pools are created lazily on first
//! use and live until [`KeyedPoolRegistry::reset_all`].

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::info;

use crate::error::PoolResult;
use crate::factory::{Dialer, FailoverFactory};
use crate::hosts::HostSetStats;
use crate::key::PoolKey;
use crate::pool::{PoolStats, ResourcePool};
use crate::settings::PoolSettings;

/// A pool whose connections are dialed through a failover factory.
pub type FailoverPool<D> = ResourcePool<FailoverFactory<D>>;

/// Counters for one registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryEntryStats {
    pub key: PoolKey,
    pub pool: PoolStats,
    pub hosts: HostSetStats,
}

/// Maps canonical pool keys to pools. All pools share one dialer.
pub struct KeyedPoolRegistry<D: Dialer> {
    dialer: Arc<D>,
    pools: RwLock<HashMap<PoolKey, Arc<FailoverPool<D>>>>,
}

impl<D: Dialer> KeyedPoolRegistry<D> {
    pub fn new(dialer: D) -> Self {
        Self::with_shared_dialer(Arc::new(dialer))
    }

    pub fn with_shared_dialer(dialer: Arc<D>) -> Self {
        Self {
            dialer,
            pools: RwLock::new(HashMap::new()),
        }
    }

    /// Return the pool for `settings`, creating it on first use.
    ///
    /// Concurrent first calls for the same key all receive the same pool.
    /// No connection is dialed here; that happens on the first `acquire()`.
    pub async fn get_or_create_pool(
        &self,
        settings: &PoolSettings,
    ) -> PoolResult<Arc<FailoverPool<D>>> {
        let key = PoolKey::from_settings(settings);

        if let Some(pool) = self.pools.read().await.get(&key) {
            return Ok(Arc::clone(pool));
        }

        let mut pools = self.pools.write().await;
        // Another caller may have won the race between the two locks.
        if let Some(pool) = pools.get(&key) {
            return Ok(Arc::clone(pool));
        }

        let factory = FailoverFactory::new(Arc::clone(&self.dialer), settings.clone())?;
        let pool = Arc::new(
            ResourcePool::new(factory, settings.pool_max_size)
                .with_release_timeout(settings.release_timeout()?)
                .with_label(key.short()),
        );
        pools.insert(key.clone(), Arc::clone(&pool));

        info!(
            key = key.short(),
            hosts = ?settings.host_list(),
            port = settings.port,
            max_size = settings.pool_max_size,
            registered = pools.len(),
            "created pool"
        );
        Ok(pool)
    }

    /// Look up an existing pool without creating one.
    pub async fn get(&self, key: &PoolKey) -> Option<Arc<FailoverPool<D>>> {
        self.pools.read().await.get(key).cloned()
    }

    /// Number of registered pools.
    pub async fn len(&self) -> usize {
        self.pools.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pools.read().await.is_empty()
    }

    /// Close every pool and forget them all.
    ///
    /// Callers still holding a pool `Arc` keep a working (emptied) pool;
    /// the next `get_or_create_pool` builds a fresh one.
    pub async fn reset_all(&self) {
        let drained: Vec<(PoolKey, Arc<FailoverPool<D>>)> =
            self.pools.write().await.drain().collect();

        let count = drained.len();
        for (_, pool) in drained {
            pool.close_all().await;
        }
        info!(pools = count, "registry reset");
    }

    /// Counters for every registered pool, ordered by key.
    pub async fn stats(&self) -> Vec<RegistryEntryStats> {
        let pools = self.pools.read().await;
        let mut entries: Vec<RegistryEntryStats> = pools
            .iter()
            .map(|(key, pool)| RegistryEntryStats {
                key: key.clone(),
                pool: pool.stats(),
                hosts: pool.factory().hosts().stats(),
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }
}

impl<D: Dialer> std::fmt::Debug for KeyedPoolRegistry<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedPoolRegistry").finish_non_exhaustive()
    }
}
