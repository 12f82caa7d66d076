//! `HcloudClient` against a mocked Hetzner Cloud API.

use std::collections::BTreeMap;

use nodepool_core::InstanceId;
use nodepool_provider::{
    ActionEvent, Architecture, CloudProvider, CreateInstanceRequest, HcloudClient, HcloudConfig,
    InstanceStatus, ProviderError, POOL_LABEL,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> HcloudClient {
    let mut config = HcloudConfig::new("test-token").with_endpoint(server.uri());
    config.poll_interval_ms = 10;
    HcloudClient::new(config).unwrap()
}

fn server_json(id: u64, name: &str, status: &str, pool: &str) -> serde_json::Value {
    json!({
        "id": id,
        "name": name,
        "status": status,
        "labels": { POOL_LABEL: pool },
        "created": "2024-05-01T10:00:00+00:00"
    })
}

fn action_json(id: u64, status: &str, progress: u8) -> serde_json::Value {
    json!({
        "id": id,
        "command": "create_server",
        "status": status,
        "progress": progress,
        "error": null
    })
}

fn create_request() -> CreateInstanceRequest {
    let mut labels = BTreeMap::new();
    labels.insert(POOL_LABEL.to_string(), "pool1".to_string());
    CreateInstanceRequest {
        name: "pool1-0123456789abcdef".to_string(),
        instance_type: "cx22".to_string(),
        region: "fsn1".to_string(),
        image: "ubuntu-24.04".to_string(),
        user_data: Some("#cloud-config\n".to_string()),
        labels,
        start_after_create: true,
        ssh_keys: vec!["ops".to_string()],
        networks: vec![7],
        firewalls: vec![9],
        public_ipv4: true,
        public_ipv6: false,
    }
}

#[tokio::test]
async fn create_instance_posts_server_and_returns_action() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/servers"))
        .and(header("authorization", "Bearer test-token"))
        .and(body_partial_json(json!({
            "name": "pool1-0123456789abcdef",
            "server_type": "cx22",
            "location": "fsn1",
            "start_after_create": true,
            "labels": { POOL_LABEL: "pool1" },
            "firewalls": [{ "firewall": 9 }],
            "public_net": { "enable_ipv4": true, "enable_ipv6": false }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "server": server_json(42, "pool1-0123456789abcdef", "initializing", "pool1"),
            "action": action_json(100, "running", 0)
        })))
        .expect(1)
        .mount(&server)
        .await;

    let created = client_for(&server)
        .create_instance(&create_request())
        .await
        .unwrap();

    assert_eq!(created.instance.id, InstanceId::new(42));
    assert_eq!(created.instance.status, Some(InstanceStatus::Creating));
    assert_eq!(created.instance.pool(), Some("pool1"));
    assert_eq!(created.action.id, 100);
    assert_eq!(created.action.command, "create_server");
}

#[tokio::test]
async fn api_errors_are_decoded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/servers"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": { "code": "rate_limit_exceeded", "message": "limit reached" }
        })))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .create_instance(&create_request())
        .await
        .unwrap_err();

    match &err {
        ProviderError::Api {
            status,
            code,
            message,
        } => {
            assert_eq!(*status, 429);
            assert_eq!(code, "rate_limit_exceeded");
            assert_eq!(message, "limit reached");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_retriable());
}

#[tokio::test]
async fn delete_instance_returns_action() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/servers/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "action": action_json(101, "running", 0)
        })))
        .expect(1)
        .mount(&server)
        .await;

    let action = client_for(&server)
        .delete_instance(InstanceId::new(42))
        .await
        .unwrap();
    assert_eq!(action.id, 101);
}

#[tokio::test]
async fn delete_missing_instance_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/servers/404"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "code": "not_found", "message": "server not found" }
        })))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .delete_instance(InstanceId::new(404))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::NotFound(_)));
}

#[tokio::test]
async fn list_instances_follows_pagination() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/servers"))
        .and(query_param("label_selector", POOL_LABEL))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "servers": [
                server_json(1, "pool1-a", "running", "pool1"),
                server_json(2, "pool2-a", "off", "pool2")
            ],
            "meta": { "pagination": { "page": 1, "next_page": 2 } }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/servers"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "servers": [server_json(3, "pool1-b", "starting", "pool1")],
            "meta": { "pagination": { "page": 2, "next_page": null } }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let instances = client_for(&server).list_instances(POOL_LABEL).await.unwrap();

    assert_eq!(instances.len(), 3);
    assert_eq!(instances[0].status, Some(InstanceStatus::Running));
    assert_eq!(instances[1].status, Some(InstanceStatus::Deleting));
    assert_eq!(instances[2].status, Some(InstanceStatus::Creating));
    assert_eq!(instances[2].provider_id(), "hcloud://3");
}

#[tokio::test]
async fn get_instance_type_maps_catalog_data() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/server_types"))
        .and(query_param("name", "cax11"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "server_types": [{
                "id": 45,
                "name": "cax11",
                "cores": 2,
                "memory": 4.0,
                "disk": 40,
                "architecture": "arm",
                "prices": [
                    { "location": "fsn1", "price_hourly": { "net": "0.0053", "gross": "0.0063" } },
                    { "location": "nbg1", "price_hourly": { "net": "0.0053", "gross": "0.0063" } }
                ]
            }]
        })))
        .mount(&server)
        .await;

    let spec = client_for(&server).get_instance_type("cax11").await.unwrap();

    assert_eq!(spec.cores, 2);
    assert_eq!(spec.architecture, Architecture::Arm);
    assert!(spec.available_in("nbg1"));
    assert!(!spec.available_in("ash"));
    assert_eq!(spec.pricings[0].hourly_gross.as_deref(), Some("0.0063"));
}

#[tokio::test]
async fn get_instance_type_empty_result_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/server_types"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "server_types": [] })))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .get_instance_type("cx99")
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::NotFound(_)));
}

#[tokio::test]
async fn watch_action_reports_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/actions/100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "action": action_json(100, "success", 100)
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let action = nodepool_provider::PendingAction {
        id: 100,
        command: "create_server".to_string(),
    };
    let mut rx = client.watch_action(&action);

    assert_eq!(rx.recv().await, Some(ActionEvent::Completed));
    assert_eq!(rx.recv().await, None);
}

#[tokio::test]
async fn watch_action_reports_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/actions/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "action": {
                "id": 7,
                "command": "create_server",
                "status": "error",
                "progress": 30,
                "error": { "code": "server_error", "message": "boot failed" }
            }
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let action = nodepool_provider::PendingAction {
        id: 7,
        command: "create_server".to_string(),
    };
    let mut rx = client.watch_action(&action);

    match rx.recv().await {
        Some(ActionEvent::Failed(error)) => {
            assert_eq!(error.code, "server_error");
            assert_eq!(error.message, "boot failed");
        }
        other => panic!("unexpected event: {other:?}"),
    }
}
