#![allow(dead_code)]

use mesh_common::MeshConfig;
use mesh_common::registry::{HeartbeatSettings, NoContainer};
use mesh_common::store::{CoordinationStore, InMemoryStore};
use mesh_registrar::startup::Application;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub shutdown: CancellationToken,
    pub handle: tokio::task::JoinHandle<std::io::Result<()>>,
}

pub fn test_config(load_balancer: &str) -> MeshConfig {
    MeshConfig {
        port: 0, // Random port for testing
        service_name: Some("chat".to_string()),
        service_version: Some("2".to_string()),
        service_address: Some("10.0.0.5:5000".to_string()),
        load_balancer: load_balancer.to_string(),
        ..MeshConfig::default()
    }
}

impl TestApp {
    pub async fn spawn(store: Arc<dyn CoordinationStore>) -> Self {
        Self::spawn_with(test_config("haproxy"), store).await
    }

    pub async fn spawn_with(config: MeshConfig, store: Arc<dyn CoordinationStore>) -> Self {
        let app = Application::build_with(
            config,
            store,
            &NoContainer,
            HeartbeatSettings::new(Duration::from_secs(3), Duration::from_secs(1)).unwrap(),
        )
        .await
        .expect("Failed to build test application");

        let port = app.port();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(app.run_until_stopped(shutdown.clone().cancelled_owned()));

        let address = format!("http://127.0.0.1:{}", port);
        let client = reqwest::Client::new();
        for _ in 0..50 {
            if client.get(format!("{}/health", address)).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        Self {
            address,
            port,
            shutdown,
            handle,
        }
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        self.handle
            .await
            .expect("Application task panicked")
            .expect("Server error");
    }
}

pub fn memory_store() -> Arc<InMemoryStore> {
    Arc::new(InMemoryStore::new())
}
