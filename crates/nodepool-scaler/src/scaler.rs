//! The pool scaler.
//!
//! Grow and Shrink fan one unit of work per instance out to the provider,
//! join on all of them, and then correct the pool's target size. Grow
//! corrects arithmetically (requested minus failed units); Shrink asks the
//! provider for the pool's real instance count and only falls back to
//! arithmetic when that listing fails.
//!
//! Per-unit failures never fail the call. Only validation errors and a
//! provider that cannot be reached before any instance work starts are
//! returned to the caller.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use k8s_openapi::api::core::v1::Node;
use nodepool_core::{InstanceId, PoolId};
use nodepool_provider::{
    CloudProvider, CreateInstanceRequest, Instance, InstanceTypeSpec, ProviderError, POOL_LABEL,
};
use tracing::{debug, error, info, warn};

use crate::bootstrap::KubeEnv;
use crate::cache::InstanceDirectory;
use crate::registry::{Pool, PoolRegistry};
use crate::template::{build_simulated_node, new_node_name};
use crate::types::{ClusterConfig, InstanceInfo, NodeRef, ScalerConfig};
use crate::waiter::{await_action, ActionOutcome};
use crate::{Result, ScalerError};

/// Keeps node pools at their requested size.
pub struct PoolScaler {
    provider: Arc<dyn CloudProvider>,
    registry: PoolRegistry,
    directory: InstanceDirectory,
    config: ScalerConfig,
}

impl PoolScaler {
    /// Create a scaler for the pools in `cluster`.
    ///
    /// Every pool starts with a target size of zero; call
    /// [`refresh_target_sizes`](Self::refresh_target_sizes) to load the
    /// provider's current counts.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool specs are invalid.
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        cluster: ClusterConfig,
        config: ScalerConfig,
    ) -> Result<Self> {
        let registry = PoolRegistry::new(cluster.pools, config.lock_scope)?;
        let directory = InstanceDirectory::new(Arc::clone(&provider), config.cache_ttl());

        Ok(Self {
            provider,
            registry,
            directory,
            config,
        })
    }

    /// The registered pools.
    #[must_use]
    pub fn registry(&self) -> &PoolRegistry {
        &self.registry
    }

    /// The instance directory.
    #[must_use]
    pub fn directory(&self) -> &InstanceDirectory {
        &self.directory
    }

    /// The scaler configuration.
    #[must_use]
    pub fn config(&self) -> &ScalerConfig {
        &self.config
    }

    /// Add `delta` instances to a pool.
    ///
    /// Returns `Ok` even if some creations fail; the pool's target size only
    /// counts the instances that actually started.
    ///
    /// # Errors
    ///
    /// - [`ScalerError::InvalidDelta`] if `delta <= 0`
    /// - [`ScalerError::MaxSizeExceeded`] if the pool would outgrow its max
    /// - [`ScalerError::TypeNotFound`] / [`ScalerError::TypeUnavailableInRegion`]
    ///   if the pool's instance type cannot be bought in its region
    /// - [`ScalerError::ProviderUnavailable`] if the type lookup fails
    pub async fn grow(&self, id: &PoolId, delta: i64) -> Result<()> {
        let count = usize::try_from(delta)
            .ok()
            .filter(|d| *d > 0)
            .ok_or(ScalerError::InvalidDelta {
                delta,
                expected: "positive",
            })?;
        let pool = self.registry.get(id)?;

        let _guard = pool.lock().await;

        let current = pool.target_size();
        let desired = current.saturating_add(count);
        if desired > pool.max_size() {
            return Err(ScalerError::MaxSizeExceeded {
                current,
                desired,
                max: pool.max_size(),
            });
        }
        self.purchasable_type(&pool).await?;

        info!(pool = %id, current, desired, "Scaling pool up");

        let results = join_all((0..count).map(|_| self.create_unit(&pool))).await;
        let failed = results.iter().filter(|started| !**started).count();
        if failed > 0 {
            warn!(pool = %id, requested = count, failed, "Some instances failed to start");
        }

        pool.add_target(count - failed);
        let size = settle(&pool);

        self.directory.invalidate();
        if let Err(e) = self.directory.refresh().await {
            error!(pool = %id, error = %e, "Failed to refresh instances after scale up");
        }

        info!(pool = %id, target_size = size, "Scaled pool up");
        Ok(())
    }

    /// Remove the given nodes from a pool.
    ///
    /// Deletions run concurrently and in no particular order. Afterwards the
    /// target size is reset to the number of instances the provider still
    /// lists for the pool.
    ///
    /// # Errors
    ///
    /// - [`ScalerError::BelowMinimumSize`] if the pool would shrink below its
    ///   minimum; no deletes are issued
    pub async fn shrink(&self, id: &PoolId, nodes: &[NodeRef]) -> Result<()> {
        let pool = self.registry.get(id)?;

        let _guard = pool.lock().await;

        let current = pool.target_size();
        let removing = nodes.len();
        let remaining = current
            .checked_sub(removing)
            .filter(|remaining| *remaining >= pool.min_size());
        if remaining.is_none() {
            return Err(ScalerError::BelowMinimumSize {
                current,
                removing,
                min: pool.min_size(),
            });
        }

        info!(pool = %id, current, removing, "Scaling pool down");

        // Resolve every node against one fresh listing.
        if let Err(e) = self.directory.refresh().await {
            self.directory.invalidate();
            debug!(pool = %id, error = %e, "Could not refresh instances before scale down");
        }

        let results = join_all(nodes.iter().map(|node| self.delete_unit(&pool, node))).await;
        let failed = results.iter().filter(|deleted| !**deleted).count();
        if failed > 0 {
            warn!(pool = %id, requested = removing, failed, "Some instances failed to delete");
        }

        self.reset_target_size(&pool, removing).await;
        let size = settle(&pool);

        info!(pool = %id, target_size = size, "Scaled pool down");
        Ok(())
    }

    /// Retract unfulfilled growth by lowering the target size.
    ///
    /// Touches neither the provider nor any existing instance, and does not
    /// check the pool minimum.
    ///
    /// # Errors
    ///
    /// Returns [`ScalerError::InvalidDelta`] unless `delta < 0`.
    pub fn decrease_target_size(&self, id: &PoolId, delta: i64) -> Result<()> {
        if delta >= 0 {
            return Err(ScalerError::InvalidDelta {
                delta,
                expected: "negative",
            });
        }
        let pool = self.registry.get(id)?;

        let by = usize::try_from(delta.unsigned_abs()).unwrap_or(usize::MAX);
        let size = pool.sub_target(by);
        debug!(pool = %id, delta, target_size = size, "Decreased target size");
        Ok(())
    }

    /// The pool's believed size.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown pool.
    pub fn current_size(&self, id: &PoolId) -> Result<usize> {
        Ok(self.registry.get(id)?.target_size())
    }

    /// The pool's minimum size.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown pool.
    pub fn min_size(&self, id: &PoolId) -> Result<usize> {
        Ok(self.registry.get(id)?.min_size())
    }

    /// The pool's maximum size.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown pool.
    pub fn max_size(&self, id: &PoolId) -> Result<usize> {
        Ok(self.registry.get(id)?.max_size())
    }

    /// Instances the provider lists for the pool.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown pool or if listing fails.
    pub async fn list_instances(&self, id: &PoolId) -> Result<Vec<InstanceInfo>> {
        self.registry.get(id)?;

        let instances = self.directory.list_by_pool(id).await?;
        Ok(instances
            .into_iter()
            .map(|i| InstanceInfo {
                id: i.provider_id(),
                status: i.status,
            })
            .collect())
    }

    /// The node a new instance of the pool would register as.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown pool, an unknown instance type, or
    /// malformed bootstrap metadata.
    pub async fn build_simulated_node(&self, id: &PoolId) -> Result<Node> {
        let pool = self.registry.get(id)?;
        let spec = pool.spec();

        let instance_type = self.lookup_type(&spec.instance_type).await?;
        let extra_labels = match KubeEnv::extract(&spec.metadata)? {
            Some(env) => env.node_labels()?,
            None => BTreeMap::new(),
        };

        Ok(build_simulated_node(spec, &instance_type, extra_labels))
    }

    /// Set every pool's target size to the provider's current count.
    ///
    /// # Errors
    ///
    /// Returns [`ScalerError::ProviderUnavailable`] if listing fails.
    pub async fn refresh_target_sizes(&self) -> Result<()> {
        let instances = self.directory.refresh().await?;

        for pool in self.registry.iter() {
            let _guard = pool.lock().await;
            let count = count_in_pool(&instances, pool.id());
            pool.set_target_size(count);
            info!(pool = %pool.id(), target_size = count, "Loaded pool size");
        }
        Ok(())
    }

    /// Whether the pool is registered.
    #[must_use]
    pub fn exists(&self, id: &PoolId) -> bool {
        self.registry.exists(id)
    }

    /// One-line description of the pool.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown pool.
    pub fn debug(&self, id: &PoolId) -> Result<String> {
        let pool = self.registry.get(id)?;
        Ok(format!(
            "cluster ID: {} (min:{} max:{})",
            pool.id(),
            pool.min_size(),
            pool.max_size()
        ))
    }

    /// Pools exist only as labels on instances, so there is nothing to
    /// delete on the provider side.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown pool.
    pub fn delete_pool(&self, id: &PoolId) -> Result<()> {
        self.registry.get(id)?;
        debug!(pool = %id, "Pool deletion is a no-op");
        Ok(())
    }

    async fn lookup_type(&self, name: &str) -> Result<Arc<InstanceTypeSpec>> {
        self.directory.instance_type(name).await.map_err(|e| match e {
            ProviderError::NotFound(_) => ScalerError::TypeNotFound(name.to_string()),
            other => ScalerError::ProviderUnavailable(other),
        })
    }

    async fn purchasable_type(&self, pool: &Pool) -> Result<Arc<InstanceTypeSpec>> {
        let spec = pool.spec();
        let instance_type = self.lookup_type(&spec.instance_type).await?;
        if !instance_type.available_in(&spec.region) {
            return Err(ScalerError::TypeUnavailableInRegion {
                instance_type: spec.instance_type.clone(),
                region: spec.region.clone(),
            });
        }
        Ok(instance_type)
    }

    fn create_request(&self, pool: &Pool) -> CreateInstanceRequest {
        let spec = pool.spec();
        let mut labels = BTreeMap::new();
        labels.insert(POOL_LABEL.to_string(), spec.id.to_string());

        CreateInstanceRequest {
            name: new_node_name(&spec.id),
            instance_type: spec.instance_type.clone(),
            region: spec.region.clone(),
            image: self.config.image.clone(),
            user_data: self.config.user_data.clone(),
            labels,
            start_after_create: true,
            ssh_keys: self.config.ssh_key.iter().cloned().collect(),
            networks: self.config.network.into_iter().collect(),
            firewalls: self.config.firewall.into_iter().collect(),
            public_ipv4: self.config.public_ipv4,
            public_ipv6: self.config.public_ipv6,
        }
    }

    /// Create one instance and wait for it to start. Returns whether it did.
    async fn create_unit(&self, pool: &Pool) -> bool {
        let request = self.create_request(pool);

        let created = match self.provider.create_instance(&request).await {
            Ok(created) => created,
            Err(e) => {
                warn!(
                    pool = %pool.id(),
                    instance_type = %request.instance_type,
                    region = %request.region,
                    error = %e,
                    "Failed to create instance"
                );
                return false;
            }
        };

        let outcome = await_action(
            self.provider.as_ref(),
            &created.action,
            self.config.create_timeout(),
        )
        .await;

        if outcome.is_success() {
            debug!(pool = %pool.id(), instance = %created.instance.name, "Instance started");
            return true;
        }

        warn!(
            pool = %pool.id(),
            instance = %created.instance.name,
            outcome = ?outcome,
            "Instance failed to start, removing it"
        );
        self.remove_half_created(&created.instance).await;
        false
    }

    /// Best-effort cleanup of an instance whose creation did not finish.
    async fn remove_half_created(&self, instance: &Instance) {
        if let Err(e) = self.provider.delete_instance(instance.id).await {
            warn!(
                instance = %instance.name,
                instance_id = %instance.id,
                error = %e,
                "Failed to remove instance after failed start"
            );
        }
    }

    /// Delete one node's instance and wait for it. Returns whether it went.
    async fn delete_unit(&self, pool: &Pool, node: &NodeRef) -> bool {
        let id = match self.resolve_instance(pool, node).await {
            Ok(id) => id,
            Err(reason) => {
                warn!(pool = %pool.id(), node = %node.name, reason = %reason, "Cannot delete node");
                return false;
            }
        };

        info!(pool = %pool.id(), node = %node.name, instance_id = %id, "Evicting instance");

        let action = match self.provider.delete_instance(id).await {
            Ok(action) => action,
            Err(e) => {
                error!(
                    pool = %pool.id(),
                    node = %node.name,
                    instance_id = %id,
                    error = %e,
                    "Failed to delete instance"
                );
                return false;
            }
        };

        match await_action(self.provider.as_ref(), &action, self.config.delete_timeout()).await {
            ActionOutcome::Success => true,
            outcome => {
                warn!(
                    pool = %pool.id(),
                    node = %node.name,
                    instance_id = %id,
                    outcome = ?outcome,
                    "Instance deletion did not complete"
                );
                false
            }
        }
    }

    /// Map a node to the instance backing it.
    ///
    /// A provider id is trusted unless the directory shows the instance in
    /// another pool. A bare name must be found in this pool.
    async fn resolve_instance(
        &self,
        pool: &Pool,
        node: &NodeRef,
    ) -> std::result::Result<InstanceId, String> {
        if let Some(provider_id) = node.provider_id.as_deref().filter(|p| !p.is_empty()) {
            let id = InstanceId::from_provider_id(provider_id).map_err(|e| e.to_string())?;

            match self.directory.list().await {
                Ok(instances) => {
                    let owner = instances.iter().find(|i| i.id == id).and_then(Instance::pool);
                    if let Some(owner) = owner.filter(|o| *o != pool.id().as_str()) {
                        return Err(format!("instance {id} belongs to pool {owner}"));
                    }
                }
                Err(e) => {
                    debug!(instance_id = %id, error = %e, "Could not verify instance pool");
                }
            }
            return Ok(id);
        }

        match self.directory.find_by_name(&node.name).await {
            Ok(Some(instance)) if instance.pool() == Some(pool.id().as_str()) => Ok(instance.id),
            Ok(Some(instance)) => Err(format!(
                "instance {} is not in this pool",
                instance.provider_id()
            )),
            Ok(None) => Err("no instance with this name".to_string()),
            Err(e) => Err(format!("failed to look up instance: {e}")),
        }
    }

    /// Set the target size from the provider's instance list, or subtract
    /// `expected_delta` if the list cannot be fetched.
    async fn reset_target_size(&self, pool: &Pool, expected_delta: usize) {
        self.directory.invalidate();
        match self.directory.refresh().await {
            Ok(instances) => {
                let count = count_in_pool(&instances, pool.id());
                info!(
                    pool = %pool.id(),
                    from = pool.target_size(),
                    to = count,
                    expected_delta,
                    "Reset pool size from provider"
                );
                pool.set_target_size(count);
            }
            Err(e) => {
                let size = pool.sub_target(expected_delta);
                warn!(
                    pool = %pool.id(),
                    expected_delta,
                    target_size = size,
                    error = %e,
                    "Failed to list instances, target size is approximate"
                );
            }
        }
    }
}

impl std::fmt::Debug for PoolScaler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolScaler")
            .field("registry", &self.registry)
            .field("directory", &self.directory)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn count_in_pool(instances: &[Instance], pool: &PoolId) -> usize {
    instances
        .iter()
        .filter(|i| i.pool() == Some(pool.as_str()))
        .count()
}

/// Clamp the pool's target size into its bounds. Returns the settled size.
fn settle(pool: &Pool) -> usize {
    let size = pool.target_size();
    let settled = size.clamp(pool.min_size(), pool.max_size());
    if settled != size {
        warn!(
            pool = %pool.id(),
            target_size = size,
            settled,
            "Target size outside pool bounds, clamping"
        );
        pool.set_target_size(settled);
    }
    settled
}
