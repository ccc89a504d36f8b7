//! dash-ops - control plane for cloud instances, cluster workloads and the
//! service catalog

use anyhow::{Context, Result};
use dash_lib::{
    health::components,
    provider::{KubeOrchestratorFactory, UnlinkedCloudFactory},
    ClientRegistry, DashConfig, HealthRegistry, StructuredLogger,
};
use dash_ops::{api, AppState, LogFormat, ServerConfig};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DASH_VERSION: &str = env!("CARGO_PKG_VERSION");

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).init(),
    }
}

async fn shutdown_signal(logger: StructuredLogger) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    logger.log_shutdown("SIGINT received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = ServerConfig::load()?;
    init_tracing(settings.log_format);

    info!("Starting dash-ops");

    let health_registry = HealthRegistry::new();

    // Load the control-plane file; nothing is served without it
    let config = DashConfig::load(&settings.config_path)
        .with_context(|| format!("failed to load {}", settings.config_path))?;
    let accounts = config.accounts().context("invalid aws configuration")?;
    let clusters = config
        .clusters()
        .context("invalid kubernetes configuration")?;
    let storage = config
        .catalog_storage()
        .context("invalid service catalog configuration")?;
    health_registry.set_healthy(components::CONFIG).await;

    match storage.probe().await {
        Ok(()) => health_registry.set_healthy(components::CATALOG).await,
        Err(e) => {
            warn!(error = %e, "Catalog storage unavailable");
            health_registry
                .set_critical(components::CATALOG, e.to_string())
                .await;
        }
    }

    if !accounts.is_empty() {
        warn!(
            accounts = accounts.len(),
            "No cloud provider linked; /aws requests against these accounts will fail"
        );
    }

    let logger = StructuredLogger::new("server");
    logger.log_startup(DASH_VERSION, accounts.len(), clusters.len());

    let registry = Arc::new(ClientRegistry::new(
        Arc::new(UnlinkedCloudFactory),
        Arc::new(KubeOrchestratorFactory),
    ));

    let app_state = Arc::new(AppState::new(
        accounts,
        clusters,
        registry,
        storage,
        health_registry,
        settings.allow_anonymous,
    ));

    api::serve(settings.port, app_state, shutdown_signal(logger)).await?;
    info!("Shut down");

    Ok(())
}
