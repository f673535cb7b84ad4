//! KubeServe control service binary.
//!
//! Runs the deployment orchestration service.

use tracing::info;
use tracing_subscriber::EnvFilter;

use kubeserve_control::{ControlConfig, ControlService};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("kubeserve_control=info".parse()?),
        )
        .init();

    info!("KubeServe control service starting");

    let config = ControlConfig::load()?;

    info!(
        listen_addr = %config.server.listen_addr,
        orchestrator = ?config.orchestrator.backend,
        ingress = ?config.ingress.backend,
        memory_store = config.uses_memory_store(),
        "configuration loaded"
    );

    ControlService::new(config).run().await?;

    Ok(())
}
