//! Pool registry.
//!
//! The set of pools known to the process, fixed at startup. Each pool
//! carries its static spec, its believed target size and the lock that
//! serializes scale operations on it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use nodepool_core::{CoreError, PoolId};
use tokio::sync::{Mutex, MutexGuard};

use crate::types::{LockScope, PoolSpec};
use crate::{Result, ScalerError};

/// A node pool and its mutable bookkeeping.
#[derive(Debug)]
pub struct Pool {
    spec: PoolSpec,
    target_size: AtomicUsize,
    lock: Arc<Mutex<()>>,
}

impl Pool {
    fn new(spec: PoolSpec, lock: Arc<Mutex<()>>) -> Self {
        Self {
            spec,
            target_size: AtomicUsize::new(0),
            lock,
        }
    }

    /// Pool id.
    #[must_use]
    pub fn id(&self) -> &PoolId {
        &self.spec.id
    }

    /// Static configuration.
    #[must_use]
    pub fn spec(&self) -> &PoolSpec {
        &self.spec
    }

    /// Minimum size.
    #[must_use]
    pub fn min_size(&self) -> usize {
        self.spec.min_size
    }

    /// Maximum size.
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.spec.max_size
    }

    /// Believed number of instances.
    #[must_use]
    pub fn target_size(&self) -> usize {
        self.target_size.load(Ordering::SeqCst)
    }

    pub(crate) fn set_target_size(&self, size: usize) {
        self.target_size.store(size, Ordering::SeqCst);
    }

    pub(crate) fn add_target(&self, delta: usize) -> usize {
        self.target_size.fetch_add(delta, Ordering::SeqCst) + delta
    }

    /// Subtract `delta`, stopping at zero. Returns the new size.
    pub(crate) fn sub_target(&self, delta: usize) -> usize {
        let mut current = self.target_size.load(Ordering::SeqCst);
        loop {
            let next = current.saturating_sub(delta);
            match self.target_size.compare_exchange(
                current,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    /// Wait for exclusive access to scale this pool.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }

    /// Whether two pools share a lock.
    #[must_use]
    pub fn shares_lock_with(&self, other: &Pool) -> bool {
        Arc::ptr_eq(&self.lock, &other.lock)
    }
}

/// The pools managed by this process.
#[derive(Debug, Default)]
pub struct PoolRegistry {
    pools: BTreeMap<PoolId, Arc<Pool>>,
}

impl PoolRegistry {
    /// Build a registry from pool specs.
    ///
    /// With [`LockScope::Global`] every pool shares one lock; with
    /// [`LockScope::PerPool`] each pool gets its own.
    ///
    /// # Errors
    ///
    /// Returns an error if a spec is invalid or two pools share an id.
    pub fn new(specs: impl IntoIterator<Item = PoolSpec>, scope: LockScope) -> Result<Self> {
        let global = Arc::new(Mutex::new(()));
        let mut pools = BTreeMap::new();

        for spec in specs {
            spec.validate()?;
            let lock = match scope {
                LockScope::Global => Arc::clone(&global),
                LockScope::PerPool => Arc::new(Mutex::new(())),
            };
            let id = spec.id.clone();
            if pools.insert(id.clone(), Arc::new(Pool::new(spec, lock))).is_some() {
                return Err(ScalerError::Config(format!("duplicate pool id: {id}")));
            }
        }

        Ok(Self { pools })
    }

    /// Look up a pool.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PoolNotFound`] for an unknown id.
    pub fn get(&self, id: &PoolId) -> nodepool_core::Result<Arc<Pool>> {
        self.pools
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::PoolNotFound(id.clone()))
    }

    /// Whether the pool is registered.
    #[must_use]
    pub fn exists(&self, id: &PoolId) -> bool {
        self.pools.contains_key(id)
    }

    /// Registered pool ids in sorted order.
    #[must_use]
    pub fn ids(&self) -> Vec<PoolId> {
        self.pools.keys().cloned().collect()
    }

    /// Iterate over all pools.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Pool>> {
        self.pools.values()
    }

    /// Number of pools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}
