mod common;

use async_trait::async_trait;
use common::{TestApp, memory_store, test_config};
use mesh_common::MeshError;
use mesh_common::store::CoordinationStore;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

async fn wait_until_ready(client: &Client, address: &str) -> bool {
    for _ in 0..50 {
        let response = client
            .get(format!("{}/ready", address))
            .send()
            .await
            .expect("Failed to execute request");
        if response.status().is_success() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn health_check_reports_identity() {
    let app = TestApp::spawn(memory_store()).await;
    let client = Client::new();

    let response = client
        .get(format!("{}/health", app.address))
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "mesh-registrar");
    assert_eq!(body["identity"]["instance_name"], "chat_v2");
    assert_eq!(body["identity"]["address"], "10.0.0.5:5000");
    assert_eq!(body["load_balancer"], "haproxy");

    app.stop().await;
}

#[tokio::test]
async fn ready_once_registered() {
    let store = memory_store();
    let app = TestApp::spawn(store.clone()).await;
    let client = Client::new();

    assert!(wait_until_ready(&client, &app.address).await);
    assert_eq!(
        store
            .get("/services/chat/upstream/chat_v2")
            .expect("upstream not registered")
            .value,
        "10.0.0.5:5000"
    );
    assert_eq!(
        store.get("/services/chat/location").unwrap().value,
        "/api/chat"
    );

    app.stop().await;
}

#[tokio::test]
async fn traefik_agent_writes_tree_records() {
    let store = memory_store();
    let app = TestApp::spawn_with(test_config("traefik"), store.clone()).await;
    let client = Client::new();

    assert!(wait_until_ready(&client, &app.address).await);
    assert_eq!(
        store
            .get("/traefik/backends/chat-backend/servers/chat_v2/url")
            .unwrap()
            .value,
        "http://10.0.0.5:5000"
    );

    app.stop().await;
}

struct DownStore;

#[async_trait]
impl CoordinationStore for DownStore {
    async fn read(&self, _path: &str) -> mesh_common::Result<Option<String>> {
        Err(MeshError::store("no etcd endpoint reachable"))
    }

    async fn write(
        &self,
        _path: &str,
        _value: &str,
        _ttl: Option<Duration>,
    ) -> mesh_common::Result<()> {
        Err(MeshError::store("no etcd endpoint reachable"))
    }

    async fn delete(&self, _path: &str) -> mesh_common::Result<()> {
        Err(MeshError::store("no etcd endpoint reachable"))
    }
}

#[tokio::test]
async fn not_ready_while_store_is_down() {
    let app = TestApp::spawn(Arc::new(DownStore)).await;
    let client = Client::new();

    // Give the first heartbeat time to fail.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let response = client
        .get(format!("{}/ready", app.address))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

    let health = client
        .get(format!("{}/health", app.address))
        .send()
        .await
        .expect("Failed to execute request");
    assert!(health.status().is_success());

    app.stop().await;
}

#[tokio::test]
async fn missing_service_name_is_fatal() {
    let mut config = test_config("haproxy");
    config.service_name = None;
    config.instance_name = None;

    let result = mesh_registrar::startup::Application::build_with(
        config,
        memory_store(),
        &mesh_common::registry::NoContainer,
        Default::default(),
    )
    .await;

    assert!(matches!(result, Err(MeshError::Identity(_))));
}

#[tokio::test]
async fn unknown_load_balancer_is_rejected() {
    let result = mesh_registrar::startup::Application::build_with(
        test_config("nginx"),
        memory_store(),
        &mesh_common::registry::NoContainer,
        Default::default(),
    )
    .await;

    assert!(matches!(result, Err(MeshError::Config(_))));
}

#[tokio::test]
async fn request_id_is_echoed() {
    let app = TestApp::spawn(memory_store()).await;
    let client = Client::new();

    let response = client
        .get(format!("{}/health", app.address))
        .header("x-request-id", "req-42")
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.headers()["x-request-id"], "req-42");

    app.stop().await;
}
