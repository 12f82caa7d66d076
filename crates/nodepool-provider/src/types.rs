//! Types shared between the provider implementations and the reconciler.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use nodepool_core::InstanceId;
use serde::{Deserialize, Serialize};

/// Label attached to every managed instance, holding the owning pool id.
pub const POOL_LABEL: &str = "hcloud/node-group";

/// Error code reported for instances in a status the reconciler does not know.
pub const UNKNOWN_STATUS_ERROR_CODE: &str = "no-code-hcloud";

/// Lifecycle status of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum InstanceStatus {
    /// The instance is being provisioned or booting.
    Creating,
    /// The instance is up.
    Running,
    /// The instance is stopping, powered off or being removed.
    Deleting,
    /// The provider reported a status that does not map to a lifecycle state.
    Unknown {
        /// Provider-side error class.
        error_code: String,
        /// The raw provider status.
        message: String,
    },
}

impl InstanceStatus {
    /// Map a Hetzner Cloud server status string.
    ///
    /// Returns `None` for an empty status.
    #[must_use]
    pub fn from_hcloud(status: &str) -> Option<Self> {
        let mapped = match status {
            "" => return None,
            "initializing" | "starting" => Self::Creating,
            "running" => Self::Running,
            "off" | "stopping" | "deleting" => Self::Deleting,
            other => Self::Unknown {
                error_code: UNKNOWN_STATUS_ERROR_CODE.to_string(),
                message: other.to_string(),
            },
        };
        Some(mapped)
    }
}

/// A provisioned compute instance as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Provider-assigned id.
    pub id: InstanceId,
    /// Instance name, also used as the Kubernetes node name.
    pub name: String,
    /// Lifecycle status, if the provider reported one.
    pub status: Option<InstanceStatus>,
    /// Provider labels.
    pub labels: BTreeMap<String, String>,
    /// When the provider created the instance.
    pub created: Option<DateTime<Utc>>,
}

impl Instance {
    /// The pool this instance belongs to, derived from [`POOL_LABEL`].
    #[must_use]
    pub fn pool(&self) -> Option<&str> {
        self.labels.get(POOL_LABEL).map(String::as_str)
    }

    /// The provider-qualified id, e.g. `hcloud://42`.
    #[must_use]
    pub fn provider_id(&self) -> String {
        self.id.provider_id()
    }
}

/// CPU architecture of an instance type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    /// x86-64.
    #[default]
    X86,
    /// 64-bit ARM.
    Arm,
}

impl Architecture {
    /// Parse a Hetzner Cloud architecture string. Unknown values map to x86.
    #[must_use]
    pub fn from_hcloud(arch: &str) -> Self {
        match arch {
            "arm" => Self::Arm,
            _ => Self::X86,
        }
    }

    /// The value of the `kubernetes.io/arch` label for this architecture.
    #[must_use]
    pub const fn kubernetes_arch(self) -> &'static str {
        match self {
            Self::X86 => "amd64",
            Self::Arm => "arm64",
        }
    }
}

/// Price of an instance type at one location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    /// Location name, e.g. `fsn1`.
    pub location: String,
    /// Gross hourly price as reported by the provider.
    pub hourly_gross: Option<String>,
}

/// Catalog data for an instance type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceTypeSpec {
    /// Type name, e.g. `cx22`.
    pub name: String,
    /// Number of CPU cores.
    pub cores: u32,
    /// Memory in GB.
    pub memory_gb: f64,
    /// Disk size in GB.
    pub disk_gb: u64,
    /// CPU architecture.
    pub architecture: Architecture,
    /// Locations where the type can be purchased.
    pub pricings: Vec<Pricing>,
}

impl InstanceTypeSpec {
    /// Whether the type is purchasable in `region`.
    #[must_use]
    pub fn available_in(&self, region: &str) -> bool {
        self.pricings.iter().any(|p| p.location == region)
    }

    /// Memory in bytes (GB are binary gigabytes on this provider).
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn memory_bytes(&self) -> u64 {
        (self.memory_gb * f64::from(1u32 << 30)) as u64
    }

    /// Disk size in bytes.
    #[must_use]
    pub const fn disk_bytes(&self) -> u64 {
        self.disk_gb << 30
    }
}

/// Handle to an in-flight asynchronous provider operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAction {
    /// Provider action id.
    pub id: u64,
    /// The command the action performs, e.g. `create_server`.
    pub command: String,
}

/// Error attached to a failed provider action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionError {
    /// Provider error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// A notification emitted while watching a [`PendingAction`].
///
/// A watch emits any number of `Progress` events followed by at most one
/// terminal event. A stream that closes without a terminal event means the
/// action succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionEvent {
    /// Completion estimate in percent.
    Progress(u8),
    /// The action finished successfully.
    Completed,
    /// The action failed.
    Failed(ActionError),
}

/// Parameters for creating an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateInstanceRequest {
    /// Instance name.
    pub name: String,
    /// Instance type name.
    pub instance_type: String,
    /// Location name.
    pub region: String,
    /// Image name or id.
    pub image: String,
    /// Cloud-init user data.
    pub user_data: Option<String>,
    /// Labels to attach.
    pub labels: BTreeMap<String, String>,
    /// Boot the instance right after creation.
    pub start_after_create: bool,
    /// SSH key names or ids.
    pub ssh_keys: Vec<String>,
    /// Private network ids to attach.
    pub networks: Vec<u64>,
    /// Firewall ids to apply.
    pub firewalls: Vec<u64>,
    /// Attach a public IPv4 address.
    pub public_ipv4: bool,
    /// Attach a public IPv6 address.
    pub public_ipv6: bool,
}

/// Result of a successful create call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedInstance {
    /// The instance as it exists right after the call.
    pub instance: Instance,
    /// The provisioning action to wait on.
    pub action: PendingAction,
}
