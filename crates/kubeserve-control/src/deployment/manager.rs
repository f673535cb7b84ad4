//! Core deployment orchestration logic.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn, Instrument};

use crate::config::ControlConfig;
use crate::error::{ControlError, ControlResult, ExternalError};
use crate::locator::ArtifactLocation;
use crate::orchestration::{
    ImageRef, InstallParameters, InstallRequest, ObjectStoreParams, OrchestrationClient,
    UninstallOutcome,
};
use crate::registrar::{public_path, EndpointRegistrar, ExposeRequest};
use crate::registry::{ModelVersion, NamespaceProvider, VersionRegistry};
use crate::state::{AnyDeployment, Deployment, Provisioning};
use crate::store::{DeploymentFilter, DeploymentStore};
use crate::types::{DeploymentId, DeploymentRecord, ReleaseName, Replicas, VersionId};

/// Fixed inputs of every deployment, resolved from configuration once.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Template reference handed to the orchestrator.
    pub template: String,
    /// Limit for a single install call.
    pub install_timeout: Duration,
    /// Limit for a single uninstall call.
    pub uninstall_timeout: Duration,
    /// Object store endpoint and credentials, passed through unchanged.
    pub object_store: ObjectStoreParams,
    /// Serving image.
    pub image: ImageRef,
    /// Public host of every route.
    pub public_host: String,
    /// Public path prefix, without the release segment.
    pub path_prefix: String,
    /// Port of the service the template creates.
    pub service_port: u16,
    /// Upper bound on replicas per deployment.
    pub max_replicas: u32,
}

impl ManagerSettings {
    /// Resolve settings from configuration.
    #[must_use]
    pub fn from_config(config: &ControlConfig) -> Self {
        let orchestrator = &config.orchestrator;
        let store = &config.object_store;
        Self {
            template: orchestrator.chart.clone(),
            install_timeout: Duration::from_secs(orchestrator.timeout_secs),
            uninstall_timeout: Duration::from_secs(orchestrator.timeout_secs),
            object_store: ObjectStoreParams {
                endpoint: store.endpoint.clone(),
                access_key: store.access_key.clone(),
                secret_key: SecretString::from(store.secret_key.clone()),
                use_ssl: store.use_ssl,
            },
            image: ImageRef {
                repository: orchestrator.image.repository.clone(),
                tag: orchestrator.image.tag.clone(),
            },
            public_host: config.ingress.host.clone(),
            path_prefix: config.ingress.path_prefix.clone(),
            service_port: config.ingress.service_port,
            max_replicas: config.deployment.max_replicas,
        }
    }
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self::from_config(&ControlConfig::default())
    }
}

/// Orchestrates deployment lifecycle operations.
///
/// The manager is the only writer of deployment rows. Every workflow runs on
/// its own tracked task: a caller that stops waiting does not interrupt it,
/// and [`DeploymentManager::drain`] waits for every such task before the
/// process exits, so each deploy or delete always reaches a resolved state.
#[derive(Clone)]
pub struct DeploymentManager {
    pub(super) store: Arc<dyn DeploymentStore>,
    registry: Arc<dyn VersionRegistry>,
    namespaces: Arc<dyn NamespaceProvider>,
    pub(super) orchestrator: Arc<dyn OrchestrationClient>,
    pub(super) registrar: Arc<dyn EndpointRegistrar>,
    pub(super) settings: ManagerSettings,
    tasks: TaskTracker,
}

impl DeploymentManager {
    /// Create a new deployment manager.
    pub fn new(
        store: Arc<dyn DeploymentStore>,
        registry: Arc<dyn VersionRegistry>,
        namespaces: Arc<dyn NamespaceProvider>,
        orchestrator: Arc<dyn OrchestrationClient>,
        registrar: Arc<dyn EndpointRegistrar>,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            store,
            registry,
            namespaces,
            orchestrator,
            registrar,
            settings,
            tasks: TaskTracker::new(),
        }
    }

    /// Deploy a model version.
    ///
    /// 1. Validate the replica count and the version (no row is written if
    ///    either is rejected)
    /// 2. Insert the deployment row, which marks provisioning as in flight
    /// 3. Install the release
    /// 4. Expose it
    /// 5. Record the URL, which makes the deployment live
    ///
    /// If any step after 2 fails, the release is compensated, the row is
    /// deleted and the original error is returned.
    #[instrument(skip(self, version_id), fields(version = %version_id))]
    pub async fn deploy(
        &self,
        version_id: VersionId,
        replicas: u32,
    ) -> ControlResult<DeploymentRecord> {
        let this = self.clone();
        self.tasks
            .spawn(async move { this.run_deploy(version_id, replicas).await }.in_current_span())
            .await
            .map_err(|e| ControlError::internal(format!("deploy task failed: {e}")))?
    }

    /// Delete a deployment.
    ///
    /// Route and release removal are best-effort; once the row is found the
    /// delete succeeds and the row is removed regardless of their outcome.
    #[instrument(skip(self, deployment_id), fields(deployment_id = %deployment_id))]
    pub async fn delete(&self, deployment_id: &DeploymentId) -> ControlResult<()> {
        let this = self.clone();
        let id = deployment_id.clone();
        self.tasks
            .spawn(async move { this.run_delete(&id).await }.in_current_span())
            .await
            .map_err(|e| ControlError::internal(format!("delete task failed: {e}")))?
    }

    /// Wait for every in-flight deploy and delete workflow to finish.
    ///
    /// Workflows started after the call are still tracked, but the wait
    /// returns once the tracked set is empty.
    pub async fn drain(&self) {
        self.tasks.close();
        let in_flight = self.tasks.len();
        if in_flight > 0 {
            info!(in_flight, "waiting for in-flight workflows");
        }
        self.tasks.wait().await;
        debug!("workflows drained");
    }

    /// Number of workflows currently running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Get a deployment.
    pub async fn get(&self, deployment_id: &DeploymentId) -> ControlResult<DeploymentRecord> {
        self.store
            .get(deployment_id)
            .await?
            .ok_or_else(|| ControlError::DeploymentNotFound(deployment_id.to_string()))
    }

    /// List deployments, newest first.
    pub async fn list(&self, filter: &DeploymentFilter) -> ControlResult<Vec<DeploymentRecord>> {
        self.store.list(filter).await
    }

    /// Check the record store is reachable.
    pub async fn ready(&self) -> ControlResult<()> {
        self.store.ping().await
    }

    async fn run_deploy(
        &self,
        version_id: VersionId,
        replicas: u32,
    ) -> ControlResult<DeploymentRecord> {
        let replicas = Replicas::new(replicas, self.settings.max_replicas)?;
        let version = self.registry.get_version(version_id).await?;
        version.ensure_deployable()?;
        let artifact = ArtifactLocation::parse(&version.store_reference)?;

        let namespace = self.namespaces.namespace_for(version.owner);
        let record = DeploymentRecord::new(version_id, namespace, replicas);

        let _guard = self.store.lock(&record.id).await;
        self.store.insert(&record).await?;

        let provisioning = Deployment::<Provisioning>::begin(record);
        info!(
            deployment_id = %provisioning.id(),
            release = %provisioning.release(),
            namespace = %provisioning.namespace(),
            replicas = %replicas,
            "provisioning started"
        );

        let url = match self.provision(&provisioning, &version, artifact).await {
            Ok(url) => url,
            Err(e) => return Err(self.roll_back(provisioning, e).await),
        };

        if let Err(e) = self.store.mark_live(provisioning.id(), &url).await {
            return Err(self.roll_back(provisioning, e).await);
        }

        let live = provisioning.go_live(url);
        info!(
            deployment_id = %live.id(),
            release = %live.release(),
            url = ?live.record().url,
            "deployment live"
        );
        Ok(live.into_record())
    }

    async fn provision(
        &self,
        deployment: &Deployment<Provisioning>,
        version: &ModelVersion,
        artifact: ArtifactLocation,
    ) -> ControlResult<String> {
        let request = InstallRequest {
            release: deployment.release().clone(),
            namespace: deployment.namespace().to_owned(),
            template: self.settings.template.clone(),
            parameters: InstallParameters {
                object_store: self.settings.object_store.clone(),
                artifact_reference: version.store_reference.clone(),
                artifact,
                replicas: deployment.record().replicas,
                image: self.settings.image.clone(),
                public_path: public_path(&self.settings.path_prefix, deployment.release()),
            },
            timeout: self.settings.install_timeout,
        };

        self.orchestrator.install(&request).await.map_err(|e| {
            debug!(release = %request.release, output = %e.output(), "install output");
            ControlError::install_failed(&e)
        })?;
        info!(release = %request.release, "release installed");

        self.expose(deployment.record())
            .await
            .map_err(|e| ControlError::expose_failed(&e))
    }

    /// Route request for a deployment's release.
    pub(super) fn expose_request(&self, record: &DeploymentRecord) -> ExposeRequest {
        ExposeRequest {
            namespace: record.namespace.clone(),
            release: record.release_name.clone(),
            service_name: record.release_name.as_str().to_owned(),
            service_port: self.settings.service_port,
            public_host: self.settings.public_host.clone(),
            path_prefix: self.settings.path_prefix.clone(),
        }
    }

    pub(super) async fn expose(&self, record: &DeploymentRecord) -> Result<String, ExternalError> {
        self.registrar.expose(&self.expose_request(record)).await
    }

    /// Undo a failed provisioning: compensate, then delete the row.
    ///
    /// The row is deleted even if compensation fails; the reconcile sweep
    /// does not see the release afterwards, so such a leak needs manual
    /// cleanup from the logged release name.
    async fn roll_back(
        &self,
        deployment: Deployment<Provisioning>,
        cause: ControlError,
    ) -> ControlError {
        error!(
            deployment_id = %deployment.id(),
            release = %deployment.release(),
            namespace = %deployment.namespace(),
            error = %cause,
            "provisioning failed, rolling back"
        );

        let compensated = self
            .compensate(deployment.release(), deployment.namespace())
            .await;

        let rolled_back = deployment.roll_back();
        if let Err(e) = self.store.delete(rolled_back.id()).await {
            error!(
                deployment_id = %rolled_back.id(),
                release = %rolled_back.release(),
                error = %e,
                "failed to delete rolled back deployment row"
            );
        }

        info!(
            deployment_id = %rolled_back.id(),
            release = %rolled_back.release(),
            compensated,
            "deployment rolled back"
        );
        cause
    }

    /// Remove whatever a failed provisioning may have created.
    ///
    /// Returns whether both the route and the release are known to be gone.
    pub async fn compensate(&self, release: &ReleaseName, namespace: &str) -> bool {
        let unexposed = match self.registrar.unexpose(namespace, release).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    release = %release,
                    namespace,
                    error = %e,
                    output = %e.output(),
                    "compensating unexpose failed"
                );
                false
            }
        };

        let uninstalled = match self
            .orchestrator
            .uninstall(release, namespace, self.settings.uninstall_timeout)
            .await
        {
            Ok(outcome) => {
                debug!(release = %release, ?outcome, "compensating uninstall finished");
                true
            }
            Err(e) => {
                warn!(
                    release = %release,
                    namespace,
                    error = %e,
                    output = %e.output(),
                    "compensating uninstall failed, release may be orphaned"
                );
                false
            }
        };

        unexposed && uninstalled
    }

    async fn run_delete(&self, deployment_id: &DeploymentId) -> ControlResult<()> {
        let _guard = self.store.lock(deployment_id).await;

        let record = self
            .store
            .get(deployment_id)
            .await?
            .ok_or_else(|| ControlError::DeploymentNotFound(deployment_id.to_string()))?;

        let tearing_down = AnyDeployment::from_record(record).into_tearing_down();
        info!(
            deployment_id = %tearing_down.id(),
            release = %tearing_down.release(),
            namespace = %tearing_down.namespace(),
            "tearing down deployment"
        );

        let release = tearing_down.release();
        let namespace = tearing_down.namespace();

        if let Err(e) = self.registrar.unexpose(namespace, release).await {
            warn!(
                release = %release,
                namespace,
                error = %e,
                output = %e.output(),
                "failed to remove route, continuing teardown"
            );
        }

        match self
            .orchestrator
            .uninstall(release, namespace, self.settings.uninstall_timeout)
            .await
        {
            Ok(UninstallOutcome::Removed) => info!(release = %release, "release uninstalled"),
            Ok(UninstallOutcome::NotFound) => {
                info!(release = %release, "release already absent");
            }
            Err(e) => warn!(
                release = %release,
                namespace,
                error = %e,
                output = %e.output(),
                "failed to uninstall release, continuing teardown"
            ),
        }

        self.store.delete(tearing_down.id()).await?;
        let gone = tearing_down.finish();
        info!(deployment_id = %gone.id(), "deployment gone");

        Ok(())
    }
}

impl std::fmt::Debug for DeploymentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentManager")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
