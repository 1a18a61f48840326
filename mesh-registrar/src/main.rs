use mesh_common::MeshConfig;
use mesh_common::observability::init_tracing;
use mesh_registrar::metrics::init_metrics;
use mesh_registrar::startup::Application;
use tokio::signal;

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Must be installed before any metrics are recorded
    init_metrics()?;

    let config = MeshConfig::load()?;

    let service_name = config
        .service_name
        .clone()
        .unwrap_or_else(|| "mesh-registrar".to_string());
    init_tracing(
        &service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;

    let app = Application::build(config).await?;
    app.run_until_stopped(shutdown_signal()).await?;

    tracing::info!("Registrar stopped");
    Ok(())
}
