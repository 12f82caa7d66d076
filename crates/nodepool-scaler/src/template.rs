//! Simulated node builder.
//!
//! Builds the Kubernetes `Node` a freshly started instance of a pool would
//! register as, so callers can simulate a scale-up before committing to it.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Node, NodeCondition, NodeStatus};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use nodepool_core::PoolId;
use nodepool_provider::{InstanceTypeSpec, POOL_LABEL};

use crate::types::PoolSpec;

/// Pod capacity advertised for every simulated node.
pub const DEFAULT_POD_CAPACITY: u32 = 110;

/// Well-known node label for the instance type.
pub const LABEL_INSTANCE_TYPE: &str = "node.kubernetes.io/instance-type";
/// Well-known node label for the region.
pub const LABEL_TOPOLOGY_REGION: &str = "topology.kubernetes.io/region";
/// Well-known node label for the CPU architecture.
pub const LABEL_ARCH: &str = "kubernetes.io/arch";
/// CSI driver topology label.
pub const LABEL_CSI_LOCATION: &str = "csi.hetzner.cloud/location";

/// Generate a fresh instance name for `pool`.
///
/// Names look like `workers-3f9a0c1d2b4e5f60`.
#[must_use]
pub fn new_node_name(pool: &PoolId) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{pool}-{}", &suffix[..16])
}

/// Build the simulated node for `pool` backed by `instance_type`.
///
/// `extra_labels` (typically from the pool's kube-env `NODE_LABELS`) are
/// applied first; the pool's own labels win on conflict.
#[must_use]
pub fn build_simulated_node(
    pool: &PoolSpec,
    instance_type: &InstanceTypeSpec,
    extra_labels: BTreeMap<String, String>,
) -> Node {
    let resources = build_resources(instance_type);

    Node {
        metadata: ObjectMeta {
            name: Some(new_node_name(&pool.id)),
            labels: Some(build_labels(pool, instance_type, extra_labels)),
            ..Default::default()
        },
        status: Some(NodeStatus {
            capacity: Some(resources.clone()),
            allocatable: Some(resources),
            conditions: Some(build_ready_conditions()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn build_labels(
    pool: &PoolSpec,
    instance_type: &InstanceTypeSpec,
    mut labels: BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    labels.insert(LABEL_INSTANCE_TYPE.to_string(), pool.instance_type.clone());
    labels.insert(LABEL_TOPOLOGY_REGION.to_string(), pool.region.clone());
    labels.insert(
        LABEL_ARCH.to_string(),
        instance_type.architecture.kubernetes_arch().to_string(),
    );
    labels.insert(LABEL_CSI_LOCATION.to_string(), pool.region.clone());
    labels.insert(POOL_LABEL.to_string(), pool.id.to_string());
    labels
}

fn build_resources(instance_type: &InstanceTypeSpec) -> BTreeMap<String, Quantity> {
    let mut resources = BTreeMap::new();
    resources.insert(
        "pods".to_string(),
        Quantity(DEFAULT_POD_CAPACITY.to_string()),
    );
    resources.insert("cpu".to_string(), Quantity(instance_type.cores.to_string()));
    resources.insert(
        "memory".to_string(),
        Quantity(instance_type.memory_bytes().to_string()),
    );
    resources.insert(
        "ephemeral-storage".to_string(),
        Quantity(instance_type.disk_bytes().to_string()),
    );
    resources
}

fn build_ready_conditions() -> Vec<NodeCondition> {
    let condition = |type_: &str, status: &str| NodeCondition {
        type_: type_.to_string(),
        status: status.to_string(),
        ..Default::default()
    };

    vec![
        condition("Ready", "True"),
        condition("MemoryPressure", "False"),
        condition("DiskPressure", "False"),
        condition("PIDPressure", "False"),
        condition("NetworkUnavailable", "False"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodepool_provider::{Architecture, MockProvider};

    fn pool() -> PoolSpec {
        PoolSpec::parse("0:5:cax21:nbg1:arm-workers").unwrap()
    }

    fn arm_type() -> InstanceTypeSpec {
        InstanceTypeSpec {
            architecture: Architecture::Arm,
            ..MockProvider::instance_type("cax21", 4, 8.0, &["nbg1"])
        }
    }

    #[test]
    fn node_names_are_unique_and_prefixed() {
        let id = PoolId::new("workers").unwrap();
        let a = new_node_name(&id);
        let b = new_node_name(&id);

        assert!(a.starts_with("workers-"));
        assert_eq!(a.len(), "workers-".len() + 16);
        assert!(a["workers-".len()..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn capacity_matches_instance_type() {
        let node = build_simulated_node(&pool(), &arm_type(), BTreeMap::new());
        let status = node.status.unwrap();
        let capacity = status.capacity.unwrap();

        assert_eq!(capacity["pods"], Quantity("110".to_string()));
        assert_eq!(capacity["cpu"], Quantity("4".to_string()));
        assert_eq!(capacity["memory"], Quantity((8u64 << 30).to_string()));
        assert_eq!(
            capacity["ephemeral-storage"],
            Quantity((40u64 << 30).to_string())
        );
        assert_eq!(status.allocatable.unwrap(), capacity);

        let conditions = status.conditions.unwrap();
        let ready = conditions.iter().find(|c| c.type_ == "Ready").unwrap();
        assert_eq!(ready.status, "True");
    }

    #[test]
    fn labels_describe_the_pool() {
        let mut extra = BTreeMap::new();
        extra.insert("tier".to_string(), "batch".to_string());
        extra.insert(POOL_LABEL.to_string(), "spoofed".to_string());

        let node = build_simulated_node(&pool(), &arm_type(), extra);
        let labels = node.metadata.labels.unwrap();

        assert_eq!(labels[LABEL_INSTANCE_TYPE], "cax21");
        assert_eq!(labels[LABEL_TOPOLOGY_REGION], "nbg1");
        assert_eq!(labels[LABEL_CSI_LOCATION], "nbg1");
        assert_eq!(labels[LABEL_ARCH], "arm64");
        assert_eq!(labels[POOL_LABEL], "arm-workers");
        assert_eq!(labels["tier"], "batch");
    }
}
