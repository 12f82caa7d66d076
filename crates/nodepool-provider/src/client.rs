//! The cloud provider capability and its Hetzner Cloud implementation.
//!
//! [`CloudProvider`] is the seam between the reconciler and the remote
//! control plane. [`HcloudClient`] talks to the Hetzner Cloud REST API;
//! tests use the in-memory mock behind the `test-utils` feature.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nodepool_core::InstanceId;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::config::HcloudConfig;
use crate::error::{ProviderError, Result};
use crate::types::{
    ActionError, ActionEvent, Architecture, CreateInstanceRequest, CreatedInstance, Instance,
    InstanceStatus, InstanceTypeSpec, PendingAction, Pricing,
};

/// Capacity of the channel returned by [`CloudProvider::watch_action`].
pub const ACTION_EVENT_BUFFER: usize = 8;

/// Page size used when listing instances.
const LIST_PAGE_SIZE: u32 = 50;

/// Operations the reconciler needs from a cloud provider.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Create an instance and return it together with its provisioning action.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider rejects or cannot receive the request.
    async fn create_instance(&self, request: &CreateInstanceRequest) -> Result<CreatedInstance>;

    /// Delete an instance and return the deletion action.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider rejects or cannot receive the request.
    async fn delete_instance(&self, id: InstanceId) -> Result<PendingAction>;

    /// List all instances matching a label selector.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing fails.
    async fn list_instances(&self, label_selector: &str) -> Result<Vec<Instance>>;

    /// Fetch catalog data for an instance type.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::NotFound`] if the provider has no such type.
    async fn get_instance_type(&self, name: &str) -> Result<InstanceTypeSpec>;

    /// Start watching an action.
    ///
    /// The returned stream yields progress events followed by at most one
    /// terminal event. Closing without a terminal event means success.
    fn watch_action(&self, action: &PendingAction) -> mpsc::Receiver<ActionEvent>;
}

/// Hetzner Cloud REST client.
#[derive(Debug, Clone)]
pub struct HcloudClient {
    client: reqwest::Client,
    config: HcloudConfig,
}

impl HcloudClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be built.
    pub fn new(config: HcloudConfig) -> Result<Self> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(std::time::Duration::from_secs(5))
            .build()
            .map_err(|e| ProviderError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Create a client with a pre-configured reqwest client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, config: HcloudConfig) -> Self {
        Self { client, config }
    }

    /// Get the client configuration.
    #[must_use]
    pub fn config(&self) -> &HcloudConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.endpoint)
    }

    async fn get_action(&self, id: u64) -> Result<ActionWire> {
        let response = self
            .client
            .get(self.url(&format!("/actions/{id}")))
            .bearer_auth(&self.config.token)
            .send()
            .await?;
        let body: ActionResponse = decode(check(response).await?).await?;
        Ok(body.action)
    }

    /// Poll an action until it finishes or the receiver goes away.
    async fn poll_action(self, id: u64, tx: mpsc::Sender<ActionEvent>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval());

        loop {
            ticker.tick().await;
            if tx.is_closed() {
                debug!(action_id = id, "Action watcher dropped, stop polling");
                return;
            }

            let action = match self.get_action(id).await {
                Ok(action) => action,
                Err(e) => {
                    warn!(action_id = id, error = %e, "Failed to poll action");
                    let _ = tx
                        .send(ActionEvent::Failed(ActionError {
                            code: "watch_failed".to_string(),
                            message: e.to_string(),
                        }))
                        .await;
                    return;
                }
            };

            match action.status.as_str() {
                "success" => {
                    let _ = tx.send(ActionEvent::Completed).await;
                    return;
                }
                "error" => {
                    let error = action.error.map_or_else(
                        || ActionError {
                            code: "unknown".to_string(),
                            message: "action failed without error details".to_string(),
                        },
                        ActionError::from,
                    );
                    let _ = tx.send(ActionEvent::Failed(error)).await;
                    return;
                }
                _ => {
                    // Progress is advisory; a full buffer just drops the update.
                    if let Err(TrySendError::Closed(_)) =
                        tx.try_send(ActionEvent::Progress(action.progress))
                    {
                        return;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl CloudProvider for HcloudClient {
    async fn create_instance(&self, request: &CreateInstanceRequest) -> Result<CreatedInstance> {
        let body = CreateServerBody::from(request);

        let response = self
            .client
            .post(self.url("/servers"))
            .bearer_auth(&self.config.token)
            .json(&body)
            .send()
            .await?;
        let created: CreateServerResponse = decode(check(response).await?).await?;

        debug!(
            name = %created.server.name,
            server_id = created.server.id,
            action_id = created.action.id,
            "Created server"
        );

        Ok(CreatedInstance {
            instance: created.server.into(),
            action: created.action.into(),
        })
    }

    async fn delete_instance(&self, id: InstanceId) -> Result<PendingAction> {
        let response = self
            .client
            .delete(self.url(&format!("/servers/{id}")))
            .bearer_auth(&self.config.token)
            .send()
            .await?;
        let deleted: ActionResponse = decode(check(response).await?).await?;

        debug!(server_id = %id, action_id = deleted.action.id, "Deleted server");
        Ok(deleted.action.into())
    }

    async fn list_instances(&self, label_selector: &str) -> Result<Vec<Instance>> {
        let mut instances = Vec::new();
        let mut page = 1;

        loop {
            let response = self
                .client
                .get(self.url("/servers"))
                .bearer_auth(&self.config.token)
                .query(&[
                    ("label_selector", label_selector.to_string()),
                    ("page", page.to_string()),
                    ("per_page", LIST_PAGE_SIZE.to_string()),
                ])
                .send()
                .await?;
            let body: ListServersResponse = decode(check(response).await?).await?;

            instances.extend(body.servers.into_iter().map(Instance::from));

            match body.meta.and_then(|m| m.pagination.next_page) {
                Some(next) if next > page => page = next,
                _ => break,
            }
        }

        Ok(instances)
    }

    async fn get_instance_type(&self, name: &str) -> Result<InstanceTypeSpec> {
        let response = self
            .client
            .get(self.url("/server_types"))
            .bearer_auth(&self.config.token)
            .query(&[("name", name)])
            .send()
            .await?;
        let body: ServerTypesResponse = decode(check(response).await?).await?;

        body.server_types
            .into_iter()
            .find(|t| t.name == name)
            .map(InstanceTypeSpec::from)
            .ok_or_else(|| ProviderError::NotFound(format!("server type {name}")))
    }

    fn watch_action(&self, action: &PendingAction) -> mpsc::Receiver<ActionEvent> {
        let (tx, rx) = mpsc::channel(ACTION_EVENT_BUFFER);
        tokio::spawn(self.clone().poll_action(action.id, tx));
        rx
    }
}

/// Turn non-success responses into [`ProviderError`]s.
async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let (code, message) = serde_json::from_str::<ApiErrorResponse>(&text).map_or_else(
        |_| ("unknown".to_string(), text.clone()),
        |e| (e.error.code, e.error.message),
    );

    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(ProviderError::NotFound(message));
    }

    Err(ProviderError::Api {
        status: status.as_u16(),
        code,
        message,
    })
}

async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    response
        .json::<T>()
        .await
        .map_err(|e| ProviderError::Decode(e.to_string()))
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct CreateServerBody<'a> {
    name: &'a str,
    server_type: &'a str,
    image: &'a str,
    location: &'a str,
    start_after_create: bool,
    labels: &'a BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_data: Option<&'a str>,
    #[serde(skip_serializing_if = "is_empty_slice")]
    ssh_keys: &'a [String],
    #[serde(skip_serializing_if = "is_empty_slice")]
    networks: &'a [u64],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    firewalls: Vec<FirewallRef>,
    public_net: PublicNet,
}

#[derive(Debug, Serialize)]
struct FirewallRef {
    firewall: u64,
}

#[derive(Debug, Serialize)]
struct PublicNet {
    enable_ipv4: bool,
    enable_ipv6: bool,
}

fn is_empty_slice<T>(items: &&[T]) -> bool {
    items.is_empty()
}

impl<'a> From<&'a CreateInstanceRequest> for CreateServerBody<'a> {
    fn from(req: &'a CreateInstanceRequest) -> Self {
        Self {
            name: &req.name,
            server_type: &req.instance_type,
            image: &req.image,
            location: &req.region,
            start_after_create: req.start_after_create,
            labels: &req.labels,
            user_data: req.user_data.as_deref(),
            ssh_keys: &req.ssh_keys,
            networks: &req.networks,
            firewalls: req
                .firewalls
                .iter()
                .map(|&firewall| FirewallRef { firewall })
                .collect(),
            public_net: PublicNet {
                enable_ipv4: req.public_ipv4,
                enable_ipv6: req.public_ipv6,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct ServerWire {
    id: u64,
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    created: Option<DateTime<Utc>>,
}

impl From<ServerWire> for Instance {
    fn from(server: ServerWire) -> Self {
        Self {
            id: InstanceId::new(server.id),
            name: server.name,
            status: InstanceStatus::from_hcloud(&server.status),
            labels: server.labels,
            created: server.created,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ActionWire {
    id: u64,
    #[serde(default)]
    command: String,
    status: String,
    #[serde(default)]
    progress: u8,
    error: Option<ErrorWire>,
}

impl From<ActionWire> for PendingAction {
    fn from(action: ActionWire) -> Self {
        Self {
            id: action.id,
            command: action.command,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorWire {
    code: String,
    message: String,
}

impl From<ErrorWire> for ActionError {
    fn from(e: ErrorWire) -> Self {
        Self {
            code: e.code,
            message: e.message,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ErrorWire,
}

#[derive(Debug, Deserialize)]
struct CreateServerResponse {
    server: ServerWire,
    action: ActionWire,
}

#[derive(Debug, Deserialize)]
struct ActionResponse {
    action: ActionWire,
}

#[derive(Debug, Deserialize)]
struct ListServersResponse {
    servers: Vec<ServerWire>,
    meta: Option<MetaWire>,
}

#[derive(Debug, Deserialize)]
struct MetaWire {
    pagination: PaginationWire,
}

#[derive(Debug, Deserialize)]
struct PaginationWire {
    next_page: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ServerTypesResponse {
    server_types: Vec<ServerTypeWire>,
}

#[derive(Debug, Deserialize)]
struct ServerTypeWire {
    name: String,
    cores: u32,
    memory: f64,
    disk: u64,
    #[serde(default)]
    architecture: String,
    #[serde(default)]
    prices: Vec<PriceWire>,
}

#[derive(Debug, Deserialize)]
struct PriceWire {
    location: String,
    price_hourly: Option<PriceAmountWire>,
}

#[derive(Debug, Deserialize)]
struct PriceAmountWire {
    gross: String,
}

impl From<ServerTypeWire> for InstanceTypeSpec {
    fn from(t: ServerTypeWire) -> Self {
        Self {
            name: t.name,
            cores: t.cores,
            memory_gb: t.memory,
            disk_gb: t.disk,
            architecture: Architecture::from_hcloud(&t.architecture),
            pricings: t
                .prices
                .into_iter()
                .map(|p| Pricing {
                    location: p.location,
                    hourly_gross: p.price_hourly.map(|a| a.gross),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_creation() {
        let client =
            HcloudClient::new(HcloudConfig::new("token").with_endpoint("http://localhost:4000"))
                .unwrap();
        assert_eq!(client.config().endpoint, "http://localhost:4000");
    }

    #[test]
    fn client_requires_token() {
        assert!(HcloudClient::new(HcloudConfig::new("")).is_err());
    }

    #[test]
    fn create_body_omits_empty_optionals() {
        let request = CreateInstanceRequest {
            name: "pool1-abc".to_string(),
            instance_type: "cx22".to_string(),
            region: "fsn1".to_string(),
            image: "ubuntu-24.04".to_string(),
            user_data: None,
            labels: BTreeMap::new(),
            start_after_create: true,
            ssh_keys: Vec::new(),
            networks: Vec::new(),
            firewalls: Vec::new(),
            public_ipv4: true,
            public_ipv6: false,
        };

        let json = serde_json::to_value(CreateServerBody::from(&request)).unwrap();
        assert_eq!(json["server_type"], "cx22");
        assert_eq!(json["location"], "fsn1");
        assert_eq!(json["public_net"]["enable_ipv6"], false);
        assert!(json.get("user_data").is_none());
        assert!(json.get("ssh_keys").is_none());
        assert!(json.get("firewalls").is_none());
    }

    #[test]
    fn create_body_carries_attachments() {
        let request = CreateInstanceRequest {
            name: "pool1-abc".to_string(),
            instance_type: "cx22".to_string(),
            region: "fsn1".to_string(),
            image: "ubuntu-24.04".to_string(),
            user_data: Some("#cloud-config".to_string()),
            labels: BTreeMap::new(),
            start_after_create: true,
            ssh_keys: vec!["ops".to_string()],
            networks: vec![12],
            firewalls: vec![34],
            public_ipv4: true,
            public_ipv6: true,
        };

        let json = serde_json::to_value(CreateServerBody::from(&request)).unwrap();
        assert_eq!(json["user_data"], "#cloud-config");
        assert_eq!(json["ssh_keys"][0], "ops");
        assert_eq!(json["networks"][0], 12);
        assert_eq!(json["firewalls"][0]["firewall"], 34);
    }
}
