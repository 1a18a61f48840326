use axum::{Router, routing::get};
use mesh_common::MeshConfig;
use mesh_common::error::{MeshError, Result};
use mesh_common::registry::{
    ContainerRuntime, DockerRuntime, HeartbeatSettings, LoadBalancerKind, Registrar,
    RegistrationStatus, ServiceIdentity, backend_for, resolve_identity,
};
use mesh_common::store::{CoordinationStore, etcd_client};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;

#[derive(Clone)]
pub struct AppState {
    pub identity: ServiceIdentity,
    pub load_balancer: LoadBalancerKind,
    pub status: RegistrationStatus,
}

pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
    registrar: Registrar,
    state: AppState,
}

impl Application {
    /// Connect to etcd, introspect the container and resolve this instance's
    /// identity. Any failure here is fatal.
    pub async fn build(config: MeshConfig) -> Result<Self> {
        let store: Arc<dyn CoordinationStore> = Arc::new(etcd_client(&config).map_err(|e| {
            tracing::error!("Failed to configure etcd client: {}", e);
            e
        })?);
        let runtime = DockerRuntime::from_config(&config)?;

        Self::build_with(config, store, &runtime, HeartbeatSettings::default()).await
    }

    /// Same as [`build`](Self::build) with the store and container runtime
    /// supplied by the caller.
    pub async fn build_with(
        config: MeshConfig,
        store: Arc<dyn CoordinationStore>,
        runtime: &dyn ContainerRuntime,
        settings: HeartbeatSettings,
    ) -> Result<Self> {
        let identity = resolve_identity(&config.identity_source(), runtime)
            .await
            .map_err(|e| {
                tracing::error!("Failed to resolve service identity: {}", e);
                e
            })?;

        let load_balancer = config.load_balancer()?;
        let backend = backend_for(load_balancer, &config.lb_algorithm);
        let registrar =
            Registrar::new(store, Arc::from(backend), identity.clone()).with_settings(settings);

        let state = AppState {
            identity,
            load_balancer,
            status: registrar.status(),
        };

        let router = Router::new()
            .route("/health", get(handlers::health_check))
            .route("/ready", get(handlers::readiness_check))
            .route("/metrics", get(handlers::metrics_endpoint))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .with_state(state.clone());

        let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            MeshError::Internal(e.into())
        })?;
        let port = listener
            .local_addr()
            .map_err(|e| MeshError::Internal(e.into()))?
            .port();

        tracing::info!("Listening on {}", port);

        Ok(Self {
            port,
            listener,
            router,
            registrar,
            state,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serve the probe endpoints and run the heartbeat until `shutdown`
    /// resolves.
    pub async fn run_until_stopped<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();

        let registrar = self.registrar;
        let heartbeat = tokio::spawn({
            let token = token.clone();
            async move { registrar.run_until(token).await }
        });

        let stop = token.clone();
        let served = axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = shutdown => {},
                    _ = stop.cancelled() => {},
                }
            })
            .await;

        token.cancel();
        if let Err(e) = heartbeat.await {
            tracing::error!("Heartbeat task failed: {}", e);
        }

        served
    }
}
