//! A scriptable in-memory provider for tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use nodepool_core::InstanceId;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::client::{CloudProvider, ACTION_EVENT_BUFFER};
use crate::error::{ProviderError, Result};
use crate::types::{
    ActionError, ActionEvent, Architecture, CreateInstanceRequest, CreatedInstance, Instance,
    InstanceStatus, InstanceTypeSpec, PendingAction, Pricing, POOL_LABEL,
};

/// How the mock handles one create or delete call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockBehavior {
    /// The call and its action succeed.
    #[default]
    Succeed,
    /// The call itself is rejected with an API error.
    RejectCall,
    /// The call is accepted but its action fails.
    FailAction,
    /// The call is accepted but its action never reports a result.
    HangAction,
}

/// A provider call recorded by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    /// `create_instance` for the named instance.
    CreateInstance(String),
    /// `delete_instance`.
    DeleteInstance(InstanceId),
    /// `list_instances` with the given selector.
    ListInstances(String),
    /// `get_instance_type` for the named type.
    GetInstanceType(String),
}

#[derive(Debug, Clone, Copy)]
enum ActionPlan {
    Succeed,
    Fail,
    Hang,
}

#[derive(Default)]
struct MockState {
    instances: BTreeMap<InstanceId, Instance>,
    instance_types: HashMap<String, InstanceTypeSpec>,
    create_script: VecDeque<MockBehavior>,
    delete_script: VecDeque<MockBehavior>,
    actions: HashMap<u64, ActionPlan>,
    hung: Vec<mpsc::Sender<ActionEvent>>,
    calls: Vec<ProviderCall>,
    unavailable: bool,
    list_unavailable: bool,
    latency: Option<Duration>,
}

/// A mock provider that keeps instances in memory.
///
/// Create and delete calls follow a per-call script (see
/// [`MockBehavior`]); unscripted calls succeed. The mock also counts
/// overlapping creates and deletes so tests can assert serialization.
#[derive(Default)]
pub struct MockProvider {
    state: Mutex<MockState>,
    next_id: AtomicU64,
    active_creates: AtomicUsize,
    active_deletes: AtomicUsize,
    overlaps: AtomicUsize,
}

impl MockProvider {
    /// Create an empty mock provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instance type in the catalog.
    #[must_use]
    pub fn with_instance_type(self, spec: InstanceTypeSpec) -> Self {
        self.state.lock().instance_types.insert(spec.name.clone(), spec);
        self
    }

    /// Build a simple x86 instance type purchasable in `locations`.
    #[must_use]
    pub fn instance_type(name: &str, cores: u32, memory_gb: f64, locations: &[&str]) -> InstanceTypeSpec {
        InstanceTypeSpec {
            name: name.to_string(),
            cores,
            memory_gb,
            disk_gb: 40,
            architecture: Architecture::X86,
            pricings: locations
                .iter()
                .map(|l| Pricing {
                    location: (*l).to_string(),
                    hourly_gross: Some("0.0100".to_string()),
                })
                .collect(),
        }
    }

    /// Delay every create and delete call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = Some(latency);
    }

    /// Queue behaviors for upcoming create calls.
    pub fn script_creates(&self, behaviors: impl IntoIterator<Item = MockBehavior>) {
        self.state.lock().create_script.extend(behaviors);
    }

    /// Queue behaviors for upcoming delete calls.
    pub fn script_deletes(&self, behaviors: impl IntoIterator<Item = MockBehavior>) {
        self.state.lock().delete_script.extend(behaviors);
    }

    /// Make every call fail as if the provider could not be reached.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// Make only `list_instances` fail.
    pub fn set_list_unavailable(&self, unavailable: bool) {
        self.state.lock().list_unavailable = unavailable;
    }

    /// Seed a running instance belonging to `pool`.
    pub fn insert_instance(&self, pool: &str) -> InstanceId {
        let id = self.allocate_id();
        let instance = Instance {
            id,
            name: format!("{pool}-seed-{id}"),
            status: Some(InstanceStatus::Running),
            labels: pool_labels(pool),
            created: Some(Utc::now()),
        };
        self.state.lock().instances.insert(id, instance);
        id
    }

    /// All instances currently known to the mock.
    #[must_use]
    pub fn instances(&self) -> Vec<Instance> {
        self.state.lock().instances.values().cloned().collect()
    }

    /// Number of instances labeled with `pool`.
    #[must_use]
    pub fn instance_count(&self, pool: &str) -> usize {
        self.state
            .lock()
            .instances
            .values()
            .filter(|i| i.pool() == Some(pool))
            .count()
    }

    /// The calls received so far, in arrival order.
    #[must_use]
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.state.lock().calls.clone()
    }

    /// Number of `create_instance` calls received.
    #[must_use]
    pub fn create_calls(&self) -> usize {
        self.count_calls(|c| matches!(c, ProviderCall::CreateInstance(_)))
    }

    /// Number of `delete_instance` calls received.
    #[must_use]
    pub fn delete_calls(&self) -> usize {
        self.count_calls(|c| matches!(c, ProviderCall::DeleteInstance(_)))
    }

    /// Number of `list_instances` calls received.
    #[must_use]
    pub fn list_calls(&self) -> usize {
        self.count_calls(|c| matches!(c, ProviderCall::ListInstances(_)))
    }

    /// Number of `get_instance_type` calls received.
    #[must_use]
    pub fn instance_type_calls(&self) -> usize {
        self.count_calls(|c| matches!(c, ProviderCall::GetInstanceType(_)))
    }

    /// How many times a create started while a delete was running, or the
    /// other way round.
    #[must_use]
    pub fn mutation_overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    fn count_calls(&self, pred: impl Fn(&ProviderCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| pred(c)).count()
    }

    fn allocate_id(&self) -> InstanceId {
        InstanceId::new(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn register_action(&self, state: &mut MockState, command: &str, plan: ActionPlan) -> PendingAction {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        state.actions.insert(id, plan);
        PendingAction {
            id,
            command: command.to_string(),
        }
    }

    /// Record a call and return the configured latency.
    fn begin(&self, call: ProviderCall) -> Result<Option<Duration>> {
        let mut state = self.state.lock();
        state.calls.push(call);
        if state.unavailable {
            return Err(ProviderError::Unavailable("mock provider unavailable".to_string()));
        }
        Ok(state.latency)
    }

    fn enter(&self, mine: &AtomicUsize, other: &AtomicUsize) {
        mine.fetch_add(1, Ordering::SeqCst);
        if other.load(Ordering::SeqCst) > 0 {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
    }
}

fn pool_labels(pool: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(POOL_LABEL.to_string(), pool.to_string());
    labels
}

fn rejected(what: &str) -> ProviderError {
    ProviderError::Api {
        status: 503,
        code: "unavailable".to_string(),
        message: format!("{what} rejected by mock"),
    }
}

/// Matches a `key` or `key=value` selector against labels.
fn selector_matches(selector: &str, labels: &BTreeMap<String, String>) -> bool {
    selector.split(',').filter(|s| !s.is_empty()).all(|term| {
        match term.split_once('=') {
            Some((key, value)) => labels.get(key).is_some_and(|v| v == value),
            None => labels.contains_key(term),
        }
    })
}

#[async_trait]
impl CloudProvider for MockProvider {
    async fn create_instance(&self, request: &CreateInstanceRequest) -> Result<CreatedInstance> {
        let latency = self.begin(ProviderCall::CreateInstance(request.name.clone()))?;

        self.enter(&self.active_creates, &self.active_deletes);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let result = {
            let mut state = self.state.lock();
            let behavior = state.create_script.pop_front().unwrap_or_default();
            let plan = match behavior {
                MockBehavior::RejectCall => None,
                MockBehavior::Succeed => Some(ActionPlan::Succeed),
                MockBehavior::FailAction => Some(ActionPlan::Fail),
                MockBehavior::HangAction => Some(ActionPlan::Hang),
            };

            match plan {
                None => Err(rejected("create")),
                Some(plan) => {
                    let id = self.allocate_id();
                    let instance = Instance {
                        id,
                        name: request.name.clone(),
                        status: Some(InstanceStatus::Creating),
                        labels: request.labels.clone(),
                        created: Some(Utc::now()),
                    };
                    state.instances.insert(id, instance.clone());
                    let action = self.register_action(&mut state, "create_server", plan);
                    Ok(CreatedInstance { instance, action })
                }
            }
        };

        self.active_creates.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn delete_instance(&self, id: InstanceId) -> Result<PendingAction> {
        let latency = self.begin(ProviderCall::DeleteInstance(id))?;

        self.enter(&self.active_deletes, &self.active_creates);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let result = {
            let mut state = self.state.lock();
            let behavior = state.delete_script.pop_front().unwrap_or_default();

            if state.instances.contains_key(&id) {
                match behavior {
                    MockBehavior::RejectCall => Err(rejected("delete")),
                    MockBehavior::Succeed => {
                        state.instances.remove(&id);
                        Ok(self.register_action(&mut state, "delete_server", ActionPlan::Succeed))
                    }
                    MockBehavior::FailAction => {
                        Ok(self.register_action(&mut state, "delete_server", ActionPlan::Fail))
                    }
                    MockBehavior::HangAction => {
                        if let Some(instance) = state.instances.get_mut(&id) {
                            instance.status = Some(InstanceStatus::Deleting);
                        }
                        Ok(self.register_action(&mut state, "delete_server", ActionPlan::Hang))
                    }
                }
            } else {
                Err(ProviderError::NotFound(format!("server {id}")))
            }
        };

        self.active_deletes.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn list_instances(&self, label_selector: &str) -> Result<Vec<Instance>> {
        self.begin(ProviderCall::ListInstances(label_selector.to_string()))?;

        let state = self.state.lock();
        if state.list_unavailable {
            return Err(ProviderError::Unavailable("mock listing unavailable".to_string()));
        }
        Ok(state
            .instances
            .values()
            .filter(|i| selector_matches(label_selector, &i.labels))
            .cloned()
            .collect())
    }

    async fn get_instance_type(&self, name: &str) -> Result<InstanceTypeSpec> {
        self.begin(ProviderCall::GetInstanceType(name.to_string()))?;

        self.state
            .lock()
            .instance_types
            .get(name)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(format!("server type {name}")))
    }

    fn watch_action(&self, action: &PendingAction) -> mpsc::Receiver<ActionEvent> {
        let (tx, rx) = mpsc::channel(ACTION_EVENT_BUFFER);
        let mut state = self.state.lock();

        match state.actions.remove(&action.id) {
            Some(ActionPlan::Fail) => {
                let _ = tx.try_send(ActionEvent::Progress(10));
                let _ = tx.try_send(ActionEvent::Failed(ActionError {
                    code: "action_failed".to_string(),
                    message: format!("{} failed", action.command),
                }));
            }
            Some(ActionPlan::Hang) => {
                let _ = tx.try_send(ActionEvent::Progress(0));
                state.hung.push(tx);
            }
            // Success is signalled by closing the stream.
            Some(ActionPlan::Succeed) | None => {
                let _ = tx.try_send(ActionEvent::Progress(100));
            }
        }

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(pool: &str) -> CreateInstanceRequest {
        CreateInstanceRequest {
            name: format!("{pool}-new"),
            instance_type: "cx22".to_string(),
            region: "fsn1".to_string(),
            image: "ubuntu-24.04".to_string(),
            user_data: None,
            labels: pool_labels(pool),
            start_after_create: true,
            ssh_keys: Vec::new(),
            networks: Vec::new(),
            firewalls: Vec::new(),
            public_ipv4: true,
            public_ipv6: true,
        }
    }

    async fn drain(mut rx: mpsc::Receiver<ActionEvent>) -> Vec<ActionEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn create_and_delete() {
        let provider = MockProvider::new();

        let created = provider.create_instance(&request("pool1")).await.unwrap();
        assert_eq!(provider.instance_count("pool1"), 1);
        let events = drain(provider.watch_action(&created.action)).await;
        assert_eq!(events, vec![ActionEvent::Progress(100)]);

        provider.delete_instance(created.instance.id).await.unwrap();
        assert_eq!(provider.instance_count("pool1"), 0);
        assert_eq!(provider.create_calls(), 1);
        assert_eq!(provider.delete_calls(), 1);
    }

    #[tokio::test]
    async fn scripted_create_failures() {
        let provider = MockProvider::new();
        provider.script_creates([MockBehavior::RejectCall, MockBehavior::FailAction]);

        assert!(provider.create_instance(&request("pool1")).await.is_err());

        let created = provider.create_instance(&request("pool1")).await.unwrap();
        let events = drain(provider.watch_action(&created.action)).await;
        assert!(matches!(events.last(), Some(ActionEvent::Failed(_))));

        // Script exhausted, back to success.
        assert!(provider.create_instance(&request("pool1")).await.is_ok());
    }

    #[tokio::test]
    async fn list_filters_by_selector() {
        let provider = MockProvider::new();
        provider.insert_instance("pool1");
        provider.insert_instance("pool1");
        provider.insert_instance("pool2");

        assert_eq!(provider.list_instances(POOL_LABEL).await.unwrap().len(), 3);
        let pool2 = provider
            .list_instances(&format!("{POOL_LABEL}=pool2"))
            .await
            .unwrap();
        assert_eq!(pool2.len(), 1);
        assert_eq!(pool2[0].pool(), Some("pool2"));
    }

    #[tokio::test]
    async fn unavailable_provider_rejects_everything() {
        let provider = MockProvider::new();
        provider.set_unavailable(true);

        assert!(matches!(
            provider.list_instances(POOL_LABEL).await,
            Err(ProviderError::Unavailable(_))
        ));
        assert!(provider.get_instance_type("cx22").await.is_err());
        assert!(provider.create_instance(&request("pool1")).await.is_err());
        assert_eq!(provider.instance_count("pool1"), 0);
    }

    #[tokio::test]
    async fn unknown_instance_type() {
        let provider = MockProvider::new()
            .with_instance_type(MockProvider::instance_type("cx22", 2, 4.0, &["fsn1"]));

        assert!(provider.get_instance_type("cx22").await.is_ok());
        assert!(matches!(
            provider.get_instance_type("cx99").await,
            Err(ProviderError::NotFound(_))
        ));
    }
}
