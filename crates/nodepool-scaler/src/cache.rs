//! Instance directory.
//!
//! Holds the last instance list fetched from the provider, with a bounded
//! staleness, and the instance-type catalog entries looked up so far.
//! Locks are never held across a provider call; a successful fetch replaces
//! the cached list wholesale.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use nodepool_core::PoolId;
use nodepool_provider::{CloudProvider, Instance, InstanceTypeSpec, ProviderError, POOL_LABEL};
use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
struct CachedInstances {
    instances: Arc<Vec<Instance>>,
    fetched_at: Instant,
}

/// Cached view of the provider's instances and instance types.
pub struct InstanceDirectory {
    provider: Arc<dyn CloudProvider>,
    ttl: Duration,
    instances: RwLock<Option<CachedInstances>>,
    instance_types: RwLock<HashMap<String, Arc<InstanceTypeSpec>>>,
}

impl InstanceDirectory {
    /// Create a directory whose instance list is at most `ttl` old.
    #[must_use]
    pub fn new(provider: Arc<dyn CloudProvider>, ttl: Duration) -> Self {
        Self {
            provider,
            ttl,
            instances: RwLock::new(None),
            instance_types: RwLock::new(HashMap::new()),
        }
    }

    /// The provider behind this directory.
    #[must_use]
    pub fn provider(&self) -> &Arc<dyn CloudProvider> {
        &self.provider
    }

    /// All pool-labeled instances, served from cache while it is fresh.
    ///
    /// # Errors
    ///
    /// Returns the provider error if the cache is stale and the fetch fails.
    pub async fn list(&self) -> Result<Arc<Vec<Instance>>, ProviderError> {
        let fresh = self
            .instances
            .read()
            .as_ref()
            .filter(|cached| cached.fetched_at.elapsed() < self.ttl)
            .map(|cached| Arc::clone(&cached.instances));

        match fresh {
            Some(instances) => Ok(instances),
            None => self.refresh().await,
        }
    }

    /// Fetch the instance list from the provider and replace the cache.
    ///
    /// # Errors
    ///
    /// Returns the provider error; the previous cache entry is left in place.
    pub async fn refresh(&self) -> Result<Arc<Vec<Instance>>, ProviderError> {
        let instances = Arc::new(self.provider.list_instances(POOL_LABEL).await?);
        debug!(count = instances.len(), "Refreshed instance cache");

        *self.instances.write() = Some(CachedInstances {
            instances: Arc::clone(&instances),
            fetched_at: Instant::now(),
        });
        Ok(instances)
    }

    /// Force the next [`list`](Self::list) to go to the provider.
    pub fn invalidate(&self) {
        self.instances.write().take();
    }

    /// Instances labeled with `pool`.
    ///
    /// # Errors
    ///
    /// See [`list`](Self::list).
    pub async fn list_by_pool(&self, pool: &PoolId) -> Result<Vec<Instance>, ProviderError> {
        let instances = self.list().await?;
        Ok(instances
            .iter()
            .filter(|i| i.pool() == Some(pool.as_str()))
            .cloned()
            .collect())
    }

    /// Find an instance by name.
    ///
    /// # Errors
    ///
    /// See [`list`](Self::list).
    pub async fn find_by_name(&self, name: &str) -> Result<Option<Instance>, ProviderError> {
        let instances = self.list().await?;
        Ok(instances.iter().find(|i| i.name == name).cloned())
    }

    /// Look up an instance type, caching it for the life of the process.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::NotFound`] if the provider has no such type,
    /// or any other provider error from the lookup.
    pub async fn instance_type(&self, name: &str) -> Result<Arc<InstanceTypeSpec>, ProviderError> {
        let cached = self.instance_types.read().get(name).cloned();
        if let Some(spec) = cached {
            return Ok(spec);
        }

        let spec = Arc::new(self.provider.get_instance_type(name).await?);
        self.instance_types
            .write()
            .insert(name.to_string(), Arc::clone(&spec));
        Ok(spec)
    }
}

impl std::fmt::Debug for InstanceDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceDirectory")
            .field("ttl", &self.ttl)
            .field("cached", &self.instances.read().as_ref().map(|c| c.instances.len()))
            .field("instance_types", &self.instance_types.read().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodepool_provider::MockProvider;

    fn directory(provider: &Arc<MockProvider>, ttl: Duration) -> InstanceDirectory {
        InstanceDirectory::new(Arc::clone(provider) as Arc<dyn CloudProvider>, ttl)
    }

    fn pool(name: &str) -> PoolId {
        PoolId::new(name).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn list_is_cached_until_ttl() {
        let provider = Arc::new(MockProvider::new());
        provider.insert_instance("pool1");
        let dir = directory(&provider, Duration::from_secs(60));

        assert_eq!(dir.list().await.unwrap().len(), 1);
        provider.insert_instance("pool1");
        assert_eq!(dir.list().await.unwrap().len(), 1);
        assert_eq!(provider.list_calls(), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(dir.list().await.unwrap().len(), 2);
        assert_eq!(provider.list_calls(), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_fetch() {
        let provider = Arc::new(MockProvider::new());
        let dir = directory(&provider, Duration::from_secs(60));

        assert!(dir.list().await.unwrap().is_empty());
        provider.insert_instance("pool1");
        dir.invalidate();
        assert_eq!(dir.list().await.unwrap().len(), 1);
        assert_eq!(provider.list_calls(), 2);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_entry() {
        let provider = Arc::new(MockProvider::new());
        provider.insert_instance("pool1");
        let dir = directory(&provider, Duration::from_secs(60));
        dir.list().await.unwrap();

        provider.set_list_unavailable(true);
        assert!(dir.refresh().await.is_err());

        // Still fresh, so no provider call.
        assert_eq!(dir.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn list_surfaces_provider_errors() {
        let provider = Arc::new(MockProvider::new());
        provider.set_list_unavailable(true);
        let dir = directory(&provider, Duration::from_secs(60));

        assert!(matches!(
            dir.list().await,
            Err(ProviderError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn filter_by_pool_and_name() {
        let provider = Arc::new(MockProvider::new());
        let id = provider.insert_instance("pool1");
        provider.insert_instance("pool1");
        provider.insert_instance("pool2");
        let dir = directory(&provider, Duration::from_secs(60));

        assert_eq!(dir.list_by_pool(&pool("pool1")).await.unwrap().len(), 2);
        assert_eq!(dir.list_by_pool(&pool("pool3")).await.unwrap().len(), 0);

        let name = format!("pool1-seed-{id}");
        let found = dir.find_by_name(&name).await.unwrap().unwrap();
        assert_eq!(found.id, id);
        assert!(dir.find_by_name("nope").await.unwrap().is_none());
        assert_eq!(provider.list_calls(), 1);
    }

    #[tokio::test]
    async fn instance_types_cached_per_name() {
        let provider = Arc::new(
            MockProvider::new()
                .with_instance_type(MockProvider::instance_type("cx22", 2, 4.0, &["fsn1"])),
        );
        let dir = directory(&provider, Duration::from_secs(60));

        let first = dir.instance_type("cx22").await.unwrap();
        let second = dir.instance_type("cx22").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(provider.instance_type_calls(), 1);

        assert!(matches!(
            dir.instance_type("cx99").await,
            Err(ProviderError::NotFound(_))
        ));
    }
}
