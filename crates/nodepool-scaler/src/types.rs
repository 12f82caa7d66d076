//! Configuration and request types for the scaler crate.

use std::path::Path;
use std::time::Duration;

use k8s_openapi::api::core::v1::Node;
use nodepool_core::PoolId;
use nodepool_provider::InstanceStatus;
use serde::{Deserialize, Serialize};

use crate::bootstrap::MetadataItem;
use crate::{Result, ScalerError};

/// How scale operations are serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LockScope {
    /// One lock for every pool in the process.
    #[default]
    Global,
    /// One lock per pool; operations on different pools run in parallel.
    PerPool,
}

/// Configuration for the reconciler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalerConfig {
    /// How long to wait for a creation action before giving up on it.
    #[serde(default = "ScalerConfig::default_create_timeout")]
    pub create_timeout_seconds: u64,

    /// How long to wait for a deletion action.
    #[serde(default = "ScalerConfig::default_delete_timeout")]
    pub delete_timeout_seconds: u64,

    /// Maximum age of the cached instance list.
    #[serde(default = "ScalerConfig::default_cache_ttl")]
    pub cache_ttl_seconds: u64,

    /// Lock granularity for scale operations.
    #[serde(default)]
    pub lock_scope: LockScope,

    /// Image for new instances.
    #[serde(default = "ScalerConfig::default_image")]
    pub image: String,

    /// Cloud-init user data for new instances.
    #[serde(default)]
    pub user_data: Option<String>,

    /// SSH key name or id to install.
    #[serde(default)]
    pub ssh_key: Option<String>,

    /// Private network id to attach at creation time.
    #[serde(default)]
    pub network: Option<u64>,

    /// Firewall id to apply at creation time.
    #[serde(default)]
    pub firewall: Option<u64>,

    /// Attach a public IPv4 address.
    #[serde(default = "ScalerConfig::default_true")]
    pub public_ipv4: bool,

    /// Attach a public IPv6 address.
    #[serde(default = "ScalerConfig::default_true")]
    pub public_ipv6: bool,
}

impl ScalerConfig {
    const fn default_create_timeout() -> u64 {
        300 // 5 minutes
    }

    const fn default_delete_timeout() -> u64 {
        120
    }

    const fn default_cache_ttl() -> u64 {
        60
    }

    fn default_image() -> String {
        "ubuntu-24.04".to_string()
    }

    const fn default_true() -> bool {
        true
    }

    /// Load configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - `HCLOUD_CLOUD_INIT`: base64-encoded cloud-init user data
    /// - `HCLOUD_IMAGE`: image name or id for new instances
    /// - `HCLOUD_SSH_KEY`: SSH key name or id
    /// - `HCLOUD_NETWORK`: private network id
    /// - `HCLOUD_FIREWALL`: firewall id
    /// - `HCLOUD_PUBLIC_IPV4` / `HCLOUD_PUBLIC_IPV6`: "true" or "false"
    /// - `NODEPOOL_CREATE_TIMEOUT_SECONDS`: creation action deadline
    /// - `NODEPOOL_DELETE_TIMEOUT_SECONDS`: deletion action deadline
    /// - `NODEPOOL_CACHE_TTL_SECONDS`: instance cache staleness bound
    /// - `NODEPOOL_LOCK_SCOPE`: "global" or "per_pool"
    ///
    /// # Errors
    ///
    /// Returns an error if a set variable cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("HCLOUD_CLOUD_INIT") {
            config.user_data = Some(crate::bootstrap::decode_user_data(&val)?);
        }
        if let Ok(val) = std::env::var("HCLOUD_IMAGE") {
            config.image = val;
        }
        if let Ok(val) = std::env::var("HCLOUD_SSH_KEY") {
            config.ssh_key = Some(val);
        }
        if let Ok(val) = std::env::var("HCLOUD_NETWORK") {
            config.network = Some(parse_env("HCLOUD_NETWORK", &val)?);
        }
        if let Ok(val) = std::env::var("HCLOUD_FIREWALL") {
            config.firewall = Some(parse_env("HCLOUD_FIREWALL", &val)?);
        }
        if let Ok(val) = std::env::var("HCLOUD_PUBLIC_IPV4") {
            config.public_ipv4 = parse_env("HCLOUD_PUBLIC_IPV4", &val)?;
        }
        if let Ok(val) = std::env::var("HCLOUD_PUBLIC_IPV6") {
            config.public_ipv6 = parse_env("HCLOUD_PUBLIC_IPV6", &val)?;
        }
        if let Ok(val) = std::env::var("NODEPOOL_CREATE_TIMEOUT_SECONDS") {
            config.create_timeout_seconds = parse_env("NODEPOOL_CREATE_TIMEOUT_SECONDS", &val)?;
        }
        if let Ok(val) = std::env::var("NODEPOOL_DELETE_TIMEOUT_SECONDS") {
            config.delete_timeout_seconds = parse_env("NODEPOOL_DELETE_TIMEOUT_SECONDS", &val)?;
        }
        if let Ok(val) = std::env::var("NODEPOOL_CACHE_TTL_SECONDS") {
            config.cache_ttl_seconds = parse_env("NODEPOOL_CACHE_TTL_SECONDS", &val)?;
        }
        if let Ok(val) = std::env::var("NODEPOOL_LOCK_SCOPE") {
            config.lock_scope = match val.to_lowercase().as_str() {
                "global" => LockScope::Global,
                "per_pool" | "per-pool" | "pool" => LockScope::PerPool,
                other => {
                    return Err(ScalerError::Config(format!(
                        "NODEPOOL_LOCK_SCOPE must be global or per_pool, got {other}"
                    )))
                }
            };
        }

        Ok(config)
    }

    /// Creation deadline as a `Duration`.
    #[must_use]
    pub fn create_timeout(&self) -> Duration {
        Duration::from_secs(self.create_timeout_seconds)
    }

    /// Deletion deadline as a `Duration`.
    #[must_use]
    pub fn delete_timeout(&self) -> Duration {
        Duration::from_secs(self.delete_timeout_seconds)
    }

    /// Cache staleness bound as a `Duration`.
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

impl Default for ScalerConfig {
    fn default() -> Self {
        Self {
            create_timeout_seconds: Self::default_create_timeout(),
            delete_timeout_seconds: Self::default_delete_timeout(),
            cache_ttl_seconds: Self::default_cache_ttl(),
            lock_scope: LockScope::Global,
            image: Self::default_image(),
            user_data: None,
            ssh_key: None,
            network: None,
            firewall: None,
            public_ipv4: true,
            public_ipv6: true,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ScalerError::Config(format!("invalid value for {name}: {value}")))
}

/// Static configuration of one node pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSpec {
    /// Pool id, also the value of the pool label on every instance.
    pub id: PoolId,
    /// Minimum number of instances.
    pub min_size: usize,
    /// Maximum number of instances.
    pub max_size: usize,
    /// Instance type name.
    pub instance_type: String,
    /// Region (location) name.
    pub region: String,
    /// Bootstrap metadata, e.g. a `kube-env` document.
    #[serde(default)]
    pub metadata: Vec<MetadataItem>,
}

impl PoolSpec {
    /// Parse a `min:max:type:region:name` pool description.
    ///
    /// Instance type and region are lowercased.
    ///
    /// # Errors
    ///
    /// Returns an error if the description is malformed.
    pub fn parse(spec: &str) -> Result<Self> {
        let parts: Vec<&str> = spec.trim().split(':').collect();
        let [min, max, instance_type, region, name] = parts.as_slice() else {
            return Err(ScalerError::Config(format!(
                "pool spec must be min:max:type:region:name, got {spec}"
            )));
        };

        let min_size = parse_env("pool min size", min)?;
        let max_size = parse_env("pool max size", max)?;
        let id = PoolId::new(*name).map_err(|e| ScalerError::Config(e.to_string()))?;

        let pool = Self {
            id,
            min_size,
            max_size,
            instance_type: instance_type.to_lowercase(),
            region: region.to_lowercase(),
            metadata: Vec::new(),
        };
        pool.validate()?;
        Ok(pool)
    }

    /// Check the static invariants of the pool definition.
    ///
    /// # Errors
    ///
    /// Returns an error if `min_size > max_size` or the type or region is empty.
    pub fn validate(&self) -> Result<()> {
        if self.min_size > self.max_size {
            return Err(ScalerError::Config(format!(
                "pool {}: min size {} exceeds max size {}",
                self.id, self.min_size, self.max_size
            )));
        }
        if self.instance_type.is_empty() || self.region.is_empty() {
            return Err(ScalerError::Config(format!(
                "pool {}: instance type and region are required",
                self.id
            )));
        }
        Ok(())
    }
}

/// The set of pools to manage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Pool specifications.
    pub pools: Vec<PoolSpec>,
}

impl ClusterConfig {
    /// Load pools from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ScalerError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&contents).map_err(|e| {
            ScalerError::Config(format!("failed to parse {}: {e}", path.display()))
        })?;
        for pool in &config.pools {
            pool.validate()?;
        }
        Ok(config)
    }

    /// Parse a comma-separated list of `min:max:type:region:name` entries.
    ///
    /// # Errors
    ///
    /// Returns an error if any entry is malformed.
    pub fn from_pool_list(list: &str) -> Result<Self> {
        let pools = list
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(PoolSpec::parse)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { pools })
    }

    /// Load pools from `NODEPOOL_CLUSTER_CONFIG` (a JSON file path) or,
    /// failing that, `NODEPOOL_POOLS`.
    ///
    /// # Errors
    ///
    /// Returns an error if neither variable is set or the content is invalid.
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = std::env::var("NODEPOOL_CLUSTER_CONFIG") {
            return Self::from_file(path);
        }
        if let Ok(list) = std::env::var("NODEPOOL_POOLS") {
            return Self::from_pool_list(&list);
        }
        Err(ScalerError::Config(
            "set NODEPOOL_CLUSTER_CONFIG or NODEPOOL_POOLS".to_string(),
        ))
    }
}

/// A node the caller wants removed from a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRef {
    /// Node (and instance) name.
    pub name: String,
    /// Provider-qualified id, e.g. `hcloud://42`, when known.
    #[serde(default)]
    pub provider_id: Option<String>,
}

impl NodeRef {
    /// A node known only by name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider_id: None,
        }
    }
}

impl From<&Node> for NodeRef {
    fn from(node: &Node) -> Self {
        Self {
            name: node.metadata.name.clone().unwrap_or_default(),
            provider_id: node.spec.as_ref().and_then(|s| s.provider_id.clone()),
        }
    }
}

/// An instance as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    /// Provider-qualified id.
    pub id: String,
    /// Lifecycle status, if known.
    pub status: Option<InstanceStatus>,
}
