//! Service lifecycle management.
//!
//! Provides the main service runner with signal handling, the background
//! reconcile sweep and graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api;
use crate::config::ControlConfig;
use crate::deployment::{DeploymentManager, ManagerSettings};
use crate::error::{ControlError, ControlResult};
use crate::orchestration::create_client;
use crate::registrar::create_registrar;
use crate::registry::{MemoryRegistry, PostgresRegistry, PrefixedNamespaces, VersionRegistry};
use crate::store::{DeploymentStore, MemoryStore, PostgresStore};

/// The control service.
///
/// Manages the lifecycle of the control plane, including:
/// - Record store and version registry connections
/// - Orchestration client and endpoint registrar
/// - HTTP API server
/// - Periodic reconciliation of stuck deployments
/// - Signal handling and graceful shutdown
pub struct ControlService {
    config: ControlConfig,
    cancel: CancellationToken,
}

impl ControlService {
    /// Create a new control service with the given configuration.
    #[must_use]
    pub fn new(config: ControlConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Run the control service until a shutdown signal arrives.
    pub async fn run(&self) -> ControlResult<()> {
        let manager = Arc::new(self.build_manager().await?);
        info!("deployment manager initialised");

        let sweeper = self.spawn_reconciler(Arc::clone(&manager));

        let state = api::AppState {
            manager: Arc::clone(&manager),
            reconcile_grace: self.reconcile_grace(),
        };
        let app = api::router(state);

        let listener = tokio::net::TcpListener::bind(self.config.server.listen_addr)
            .await
            .map_err(|e| ControlError::Config(format!("failed to bind TCP: {e}")))?;
        info!(addr = %self.config.server.listen_addr, "control service listening");

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(self.cancel.clone()))
            .await
            .map_err(|e| ControlError::Config(format!("server error: {e}")));

        self.cancel.cancel();
        if let Some(handle) = sweeper {
            if let Err(e) = handle.await {
                warn!(error = %e, "reconcile task ended abnormally");
            }
        }
        manager.drain().await;

        served?;
        info!("control service shutdown complete");
        Ok(())
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Wire the manager and its collaborators from configuration.
    pub async fn build_manager(&self) -> ControlResult<DeploymentManager> {
        let (store, registry) = self.create_store().await?;

        let orchestrator = create_client(&self.config.orchestrator)?;
        info!(
            backend = ?self.config.orchestrator.backend,
            chart = %self.config.orchestrator.chart,
            "orchestration client configured"
        );

        let registrar = create_registrar(&self.config.ingress)?;
        info!(
            backend = ?self.config.ingress.backend,
            host = %self.config.ingress.host,
            "endpoint registrar configured"
        );

        Ok(DeploymentManager::new(
            store,
            registry,
            Arc::new(PrefixedNamespaces::new(
                self.config.deployment.namespace_prefix.as_str(),
            )),
            orchestrator,
            registrar,
            ManagerSettings::from_config(&self.config),
        ))
    }

    async fn create_store(
        &self,
    ) -> ControlResult<(Arc<dyn DeploymentStore>, Arc<dyn VersionRegistry>)> {
        if self.config.uses_memory_store() {
            warn!("using in-memory record store and version registry, data will not persist");
            return Ok((Arc::new(MemoryStore::new()), Arc::new(MemoryRegistry::new())));
        }

        let store = PostgresStore::new(&self.config.database).await.map_err(|e| {
            error!(error = %e, "failed to connect to PostgreSQL");
            e
        })?;
        info!("connected to PostgreSQL");

        let registry = PostgresRegistry::from_pool(store.pool().clone());
        Ok((Arc::new(store), Arc::new(registry)))
    }

    fn reconcile_grace(&self) -> Duration {
        Duration::from_secs(self.config.deployment.reconcile_grace_secs)
    }

    fn spawn_reconciler(&self, manager: Arc<DeploymentManager>) -> Option<JoinHandle<()>> {
        let interval_secs = self.config.deployment.reconcile_interval_secs;
        if interval_secs == 0 {
            info!("background reconcile disabled");
            return None;
        }

        let grace = self.reconcile_grace();
        let cancel = self.cancel.clone();
        Some(tokio::spawn(async move {
            manager
                .reconcile_every(Duration::from_secs(interval_secs), grace, cancel)
                .await;
        }))
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            info!("received SIGTERM, initiating shutdown");
        }
        () = cancel.cancelled() => {
            info!("shutdown requested");
        }
    }
}
